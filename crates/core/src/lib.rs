//! # Crabdesk Core
//!
//! Domain types, traits, and error definitions for the Crabdesk support-agent
//! pipeline. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external seam is defined as a trait here: classification and
//! generation are consumed capabilities, persistence is an injected store.
//! Implementations live in their respective crates, which enables:
//! - Swapping storage backends via configuration
//! - Easy testing with mock classifiers/generators
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod error;
pub mod escalation;
pub mod event;
pub mod message;
pub mod record;
pub mod session;
pub mod store;
pub mod validate;

// Re-export key types at crate root for ergonomics
pub use capability::{Classification, Classifier, ComplexitySignal, GenerationContext, Generator};
pub use error::{CapabilityError, Error, PipelineError, Result, StoreError};
pub use escalation::EscalationItem;
pub use event::{DomainEvent, EventBus};
pub use message::{ChatMessage, Role, SessionKey};
pub use record::{InteractionEntry, LongTermRecord};
pub use session::{Session, SessionSnapshot, SessionStatus};
pub use store::{LongTermStore, SessionStore};
