//! # Swarm Orchestration
//!
//! Drives each query through its collaborators.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Query → Routing → Search → ┬ Generation ┬ → Synthesis → Terminal Answer
//!                            ├ Reasoning  ┤
//!                            └ Codegen    ┘
//! ```
//!
//! Stage transitions are pure ([`pipeline::advance`]); the [`Coordinator`]
//! owns the queues, timers and side effects.

pub mod a2a_bridge;
pub mod coordinator;
pub mod emitter;
pub mod events;
pub mod fanout;
pub mod pipeline;

pub use a2a_bridge::{spawn_collaborator, Collaborator, Proxies, Proxy};
pub use coordinator::{AskOutcome, Coordinator, CoordinatorEvent, CoordinatorHandle};
pub use emitter::{Outcome, ResultEmitter, TerminalAnswer};
pub use events::{EventBus, SwarmEvent, SwarmEventKind};
pub use fanout::JoinState;
pub use pipeline::{Action, SessionEvent, StageSettings};
