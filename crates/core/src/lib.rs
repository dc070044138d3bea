//! # Conduit Core
//!
//! The coordinator behind Conduit's documentation assistant. A question is
//! routed to candidate projects, searched, fanned out to the answer
//! collaborators and synthesized into exactly one markdown answer.
//!
//! ## Architecture
//!
//! - `contracts/` - Typed, versioned messages exchanged with collaborators
//! - `state/` - Sessions and the registry that owns them
//! - `swarm/` - Pipeline state machine, fan-out join and the dispatcher
//! - `collaborators/` - HTTP and local implementations of each collaborator
//! - `memory/` - Per-user conversation history
//! - `config` - Timeouts, limits and endpoints
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_core::collaborators::{CatalogRouter, DocsSearch, LlmGenerator, MarkdownSynthesizer};
//! use conduit_core::swarm::Coordinator;
//!
//! let (outbox, mut answers) = tokio::sync::mpsc::channel(64);
//! let handle = Coordinator::new(config)
//!     .with_routing(CatalogRouter::new(&api_base)?)
//!     .with_search(DocsSearch::new(&api_base)?)
//!     .with_generation(LlmGenerator::from_config(&config)?)
//!     .with_synthesis(MarkdownSynthesizer::new())
//!     .with_outbox(outbox)
//!     .start()?;
//!
//! handle.ask("alice", "How do I use Chainlink VRF?", reply_to).await?;
//! let answer = answers.recv().await;
//! ```

pub mod collaborators;
pub mod config;
pub mod contracts;
pub mod error;
pub mod memory;
pub mod state;
pub mod swarm;

pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
