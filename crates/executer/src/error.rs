use axon_memory::MemoryError;
use axon_types::ValueParseError;
use thiserror::Error;

/// Malformed input text, either from `Executer::input` or from a remote
/// payload's expressions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("malformed assignment {0:?}")]
    Malformed(String),
    #[error("unknown resource {0:?}")]
    UnknownResource(String),
    #[error(transparent)]
    Value(#[from] ValueParseError)
}

/// A remote payload that could not be unmarshalled. Always contained to the
/// transaction that carried it.
#[derive(Debug, Clone, Error)]
#[error("cannot decode remote payload: {0}")]
pub struct DecodeError(pub String);

/// Expression evaluation failure. Local evaluation failing is a rule-set
/// bug and becomes a [`FatalError`]; remote evaluation failing aborts the
/// transaction.
#[derive(Debug, Clone, Error)]
#[error("evaluation failed: {0}")]
pub struct EvalError(pub String);

/// Failures surfaced by the transport agent.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport agent is not running")]
    NotRunning,
    #[error("transport failure: {0}")]
    Other(String)
}

/// Rejections raised while wiring up an executer.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    #[error("rule {rule:?}: event resource {resource:?} does not exist")]
    UnknownEvent { rule: String, resource: String },
    #[error("rule {rule:?}: local action targets unknown resource {resource:?}")]
    UnknownActionTarget { rule: String, resource: String }
}

/// A programmer error on the local side: bad rule set, bad update, or an
/// environment source violating the input contract. Fail-fast material,
/// surfaced as a typed error so tests can inspect it instead of catching a
/// process abort.
#[derive(Debug, Clone, Error)]
pub enum FatalError {
    #[error("cannot build local evaluation context: {0}")]
    LocalContext(#[source] EvalError),
    #[error("local evaluation failed for rule {rule:?}: {source}")]
    LocalEval { rule: String, source: EvalError },
    #[error("locally produced update rejected by memory: {0}")]
    LocalApply(#[from] MemoryError),
    #[error("cannot parse buffered environment input {input:?}: {source}")]
    InputParse { input: String, source: ParseError }
}

/// Errors returned by the executer's caller surface.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("executer is not running")]
    NotRunning,
    #[error("executer is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error(transparent)]
    Transport(#[from] TransportError)
}
