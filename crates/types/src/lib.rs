//! Shared data model for the axon rule engine.
//!
//! Everything a node and its peers agree on lives here: typed resource
//! values, atomic [`Update`]s, the rule shape the executer fires, the
//! [`ExternalAction`]s that travel between nodes and the command tokens of
//! the remote-commit protocol.

pub mod external;
pub mod protocol;
pub mod resource;
pub mod rule;
pub mod update;

pub use external::ExternalAction;
pub use protocol::Command;
pub use resource::{ResourceKind, TypeMap, Value, ValueParseError};
pub use rule::{ActionExpr, Rule, Task};
pub use update::{Assignment, Update};
