//! # Session Registry
//!
//! The only shared mutable resource in the coordinator. The map lock is held
//! just long enough to find a session; every read-modify-write then happens
//! under that session's own lock, so sessions never wait on each other.

use super::session::{Session, SessionSummary};
use crate::contracts::CorrelationId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<CorrelationId, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` and return its correlation id
    pub fn insert(&self, session: Session) -> CorrelationId {
        let id = session.correlation_id;
        self.sessions
            .write()
            .insert(id, Arc::new(Mutex::new(session)));
        id
    }

    /// Copy of the live session, if any
    pub fn get(&self, id: &CorrelationId) -> Option<Session> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        Some(session.clone())
    }

    /// Apply `mutator` atomically to one session.
    ///
    /// Returns `None` when the id is unknown or the session has already been
    /// sealed; the mutator does not run in either case.
    pub fn update<R>(
        &self,
        id: &CorrelationId,
        mutator: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        if session.is_sealed() {
            return None;
        }
        Some(mutator(&mut session))
    }

    pub fn remove(&self, id: &CorrelationId) -> Option<Session> {
        let entry = self.sessions.write().remove(id)?;
        let session = entry.lock();
        Some(session.clone())
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Summaries of every live session, oldest first
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let entries: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut summaries: Vec<_> = entries.iter().map(|s| s.lock().summary()).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    fn entry(&self, id: &CorrelationId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{CallerReference, CollaboratorKind};
    use crate::state::{PartialResult, SessionStage};
    use crate::swarm::emitter::{Outcome, TerminalAnswer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new()
    }

    fn open(reg: &SessionRegistry, query: &str, user: &str) -> CorrelationId {
        reg.insert(Session::new(
            query,
            user,
            CallerReference::new(format!("agent1q-{user}")),
            Duration::from_secs(45),
        ))
    }

    #[test]
    fn test_insert_get_remove() {
        let reg = registry();
        let id = open(&reg, "What is VRF?", "alice");

        let session = reg.get(&id).unwrap();
        assert_eq!(session.query, "What is VRF?");
        assert_eq!(session.user, "alice");
        assert_eq!(session.stage(), SessionStage::Created);
        assert_eq!(reg.len(), 1);

        assert!(reg.remove(&id).is_some());
        assert!(reg.get(&id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_unknown_id_is_none() {
        let reg = registry();
        let ran = reg.update(&CorrelationId::new(), |_| ());
        assert!(ran.is_none());
    }

    #[test]
    fn test_update_isolated_per_session() {
        let reg = registry();
        let a = open(&reg, "a", "alice");
        let b = open(&reg, "b", "bob");

        reg.update(&a, |s| {
            s.record(
                CollaboratorKind::Reasoning,
                PartialResult::Unavailable {
                    reason: "x".to_string(),
                },
            )
        });

        assert!(reg.get(&a).unwrap().is_resolved(CollaboratorKind::Reasoning));
        assert!(!reg.get(&b).unwrap().is_resolved(CollaboratorKind::Reasoning));
    }

    #[test]
    fn test_sealed_session_rejects_mutation() {
        let reg = registry();
        let id = open(&reg, "q", "carol");

        let first = reg.update(&id, |s| {
            let answer = TerminalAnswer::fixed(s, Outcome::Failed, "sorry");
            s.seal(answer).is_some()
        });
        assert_eq!(first, Some(true));

        // Session still registered until the emitter removes it
        assert!(reg.contains(&id));
        assert!(reg.update(&id, |_| ()).is_none());
    }

    #[test]
    fn test_concurrent_seal_happens_once() {
        let reg = Arc::new(registry());
        let id = open(&reg, "q", "carol");
        let sealed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let sealed = sealed.clone();
                std::thread::spawn(move || {
                    reg.update(&id, |s| {
                        let answer = TerminalAnswer::fixed(s, Outcome::Answered, "done");
                        if s.seal(answer).is_some() {
                            sealed.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sealed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_lists_live_sessions() {
        let reg = registry();
        open(&reg, "first", "alice");
        open(&reg, "second", "bob");
        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|s| s.stage == SessionStage::Created));
    }
}
