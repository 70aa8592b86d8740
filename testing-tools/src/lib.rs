/// Mock collaborators for exercising the executer core
pub mod mocks;
/// In-memory gossip fabric and multi-node harness
pub mod network;
/// Terse constructors for scenario rule sets
pub mod rules;
