use axon_memory::Snapshot;
use axon_types::{ActionExpr, Assignment, ExternalAction, Task, TypeMap, Update};

use crate::error::{DecodeError, EvalError, ParseError};

/// The expression engine the core delegates to.
///
/// The core never looks inside an expression; it only hands expression text
/// plus a snapshot-backed context to the evaluator and consumes the results.
/// Local evaluation failures are rule-set bugs (the caller's problem);
/// remote evaluation failures abort the transaction that carried them.
pub trait Evaluator: Send + Sync + 'static {
    /// Evaluation environment in which one snapshot is addressable under an
    /// alias such as `"this"` or `"ext"`.
    type Context;

    fn build_context(&self, snapshot: &Snapshot, alias: &str) -> Result<Self::Context, EvalError>;

    fn eval_condition(&self, condition: &str, ctx: &Self::Context) -> Result<bool, EvalError>;

    /// Evaluates one assignment expression to a concrete resource write.
    fn eval_action(&self, action: &ActionExpr, ctx: &Self::Context)
        -> Result<Assignment, EvalError>;

    /// Parses the caller-facing assignment-list syntax, e.g.
    /// `"lorem = 10; involved = true"`, against the declared types.
    fn parse_input(&self, text: &str, types: &TypeMap) -> Result<Vec<Assignment>, ParseError>;

    /// Binds every read of the firing node's memory in `task` to its
    /// snapshot value, leaving the receiver-side (`ext`) reads as the free
    /// variables recorded in the returned working sets.
    fn specialize(&self, task: &Task, snapshot: &Snapshot) -> Result<Vec<ExternalAction>, EvalError>;

    fn marshal(&self, actions: &[ExternalAction]) -> Result<Vec<u8>, EvalError>;

    fn unmarshal(&self, payload: &[u8], types: &TypeMap)
        -> Result<Vec<ExternalAction>, DecodeError>;
}

/// Evaluates `condition` and, when it holds, every action in order. Returns
/// `None` when the condition is false or the action list is empty.
pub(crate) fn cond_eval_actions<E: Evaluator>(
    evaluator: &E,
    condition: &str,
    actions: &[&ActionExpr],
    ctx: &E::Context
) -> Result<Option<Update>, EvalError> {
    if !evaluator.eval_condition(condition, ctx)? {
        return Ok(None)
    }
    let mut assignments = Vec::with_capacity(actions.len());
    for action in actions {
        assignments.push(evaluator.eval_action(action, ctx)?);
    }
    Ok(Update::new(assignments))
}
