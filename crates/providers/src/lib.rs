//! Reference capability implementations for Crabdesk.
//!
//! The pipeline consumes `classify` and `generate` behind traits; these are
//! the bundled rule-based providers the CLI wires up by default. A remote
//! NLU provider implements the same traits and replaces them without
//! touching orchestration.

pub mod classifier;
pub mod format;
pub mod playbook;
pub mod retry;

pub use classifier::RuleClassifier;
pub use format::ResponseFormatter;
pub use playbook::PlaybookGenerator;
pub use retry::with_retry;
