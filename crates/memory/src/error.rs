use axon_types::ResourceKind;
use thiserror::Error;

/// Rejections raised while building a [`Memory`](crate::Memory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("resource {0:?} declared twice")]
    DuplicateResource(String)
}

/// Rejections raised by [`Memory::apply`](crate::Memory::apply) and
/// [`Memory::read`](crate::Memory::read).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("unknown resource {0:?}")]
    UnknownResource(String),
    #[error("resource {resource:?} is {expected}, got a {got} value")]
    TypeMismatch {
        resource: String,
        expected: ResourceKind,
        got:      ResourceKind
    }
}

/// An error reported by an environment source. Logged by the intake task,
/// never fatal.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct IoError(pub String);
