//! Generic JSON-over-HTTP collaborator.
//!
//! POSTs the typed request body and decodes the typed response. Transport
//! failures, non-2xx statuses and undecodable bodies all surface as errors,
//! which the proxy turns into an error envelope for the session.

use anyhow::Context;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

use crate::contracts::{CollaboratorKind, Correlated, IntoInbound};
use crate::swarm::Collaborator;

use super::http_client;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpCollaborator<Req, Resp> {
    kind: CollaboratorKind,
    client: reqwest::Client,
    url: String,
    _contract: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> HttpCollaborator<Req, Resp> {
    pub fn new(kind: CollaboratorKind, url: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(kind, url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        kind: CollaboratorKind,
        url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            kind,
            client: http_client(timeout)?,
            url: url.into(),
            _contract: PhantomData,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<Req, Resp> Collaborator for HttpCollaborator<Req, Resp>
where
    Req: Correlated + Serialize + Send + Sync + 'static,
    Resp: IntoInbound + DeserializeOwned + Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn kind(&self) -> CollaboratorKind {
        self.kind
    }

    async fn call(&self, request: Req) -> anyhow::Result<Resp> {
        tracing::debug!(
            correlation_id = %request.correlation_id(),
            collaborator = %self.kind,
            url = %self.url,
            "POST collaborator request"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", self.kind, self.url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", self.kind))?;

        response
            .json::<Resp>()
            .await
            .with_context(|| format!("{} returned a malformed body", self.kind))
    }
}
