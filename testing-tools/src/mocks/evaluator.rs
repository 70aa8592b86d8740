use std::collections::HashSet;

use axon_memory::Snapshot;
use axon_types::{ActionExpr, Assignment, ExternalAction, Task, TypeMap, Value};
use executer::{DecodeError, EvalError, Evaluator, ParseError};

use super::expr::Expr;

/// A small but real expression engine implementing the [`Evaluator`] seam:
/// enough for every scenario the executer core is specified against.
///
/// Payloads are JSON-encoded [`ExternalAction`] lists; the caller-facing
/// input syntax is a `;`-separated assignment list of literals.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleEvaluator;

/// One snapshot addressable under an alias. Bare references resolve against
/// the same snapshot.
pub struct SimpleContext {
    alias:    String,
    snapshot: Snapshot
}

impl SimpleContext {
    fn resolve(&self, alias: Option<&str>, name: &str) -> Result<Value, EvalError> {
        if let Some(alias) = alias {
            if alias != self.alias {
                return Err(EvalError(format!("unknown alias {alias:?} in this context")))
            }
        }
        self.snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError(format!("unknown resource {name:?}")))
    }
}

impl Evaluator for SimpleEvaluator {
    type Context = SimpleContext;

    fn build_context(&self, snapshot: &Snapshot, alias: &str) -> Result<SimpleContext, EvalError> {
        Ok(SimpleContext { alias: alias.to_owned(), snapshot: snapshot.clone() })
    }

    fn eval_condition(&self, condition: &str, ctx: &SimpleContext) -> Result<bool, EvalError> {
        let value = Expr::parse(condition)?.eval(&|alias, name| ctx.resolve(alias, name))?;
        value
            .as_bool()
            .ok_or_else(|| EvalError(format!("condition {condition:?} is not boolean")))
    }

    fn eval_action(
        &self,
        action: &ActionExpr,
        ctx: &SimpleContext
    ) -> Result<Assignment, EvalError> {
        let value =
            Expr::parse(&action.expression)?.eval(&|alias, name| ctx.resolve(alias, name))?;
        // the target must exist and keep its kind, otherwise the produced
        // update would bounce off memory later
        let current = ctx.resolve(None, &action.resource)?;
        if current.kind() != value.kind() {
            return Err(EvalError(format!(
                "action target {:?} is {}, expression produced a {} value",
                action.resource,
                current.kind(),
                value.kind()
            )))
        }
        Ok(Assignment::new(action.resource.clone(), value))
    }

    fn parse_input(&self, text: &str, types: &TypeMap) -> Result<Vec<Assignment>, ParseError> {
        let mut assignments = Vec::new();
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue
            }
            let (name, literal) = part
                .split_once('=')
                .ok_or_else(|| ParseError::Malformed(part.to_owned()))?;
            let name = name.trim();
            let kind = *types
                .get(name)
                .ok_or_else(|| ParseError::UnknownResource(name.to_owned()))?;
            assignments.push(Assignment::new(name, Value::parse(kind, literal)?));
        }
        Ok(assignments)
    }

    fn specialize(
        &self,
        task: &Task,
        snapshot: &Snapshot
    ) -> Result<Vec<ExternalAction>, EvalError> {
        let condition = Expr::parse(&task.condition)?.bind_local(snapshot, "this")?;
        let mut cond_working_set = HashSet::new();
        condition.free_ext(&mut cond_working_set);

        let mut actions = Vec::with_capacity(task.actions.len());
        let mut working_sets = Vec::with_capacity(task.actions.len());
        for action in &task.actions {
            let bound = Expr::parse(&action.expression)?.bind_local(snapshot, "this")?;
            let mut working_set = HashSet::new();
            bound.free_ext(&mut working_set);
            actions.push(ActionExpr::new(action.resource.clone(), bound.to_string()));
            working_sets.push(working_set);
        }

        Ok(vec![ExternalAction {
            condition: condition.to_string(),
            cond_working_set,
            actions,
            working_sets
        }])
    }

    fn marshal(&self, actions: &[ExternalAction]) -> Result<Vec<u8>, EvalError> {
        serde_json::to_vec(actions).map_err(|err| EvalError(err.to_string()))
    }

    fn unmarshal(
        &self,
        payload: &[u8],
        _types: &TypeMap
    ) -> Result<Vec<ExternalAction>, DecodeError> {
        serde_json::from_slice(payload).map_err(|err| DecodeError(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use axon_memory::Memory;
    use axon_types::Rule;

    use super::*;
    use crate::rules;

    fn snapshot() -> Snapshot {
        Memory::new([
            ("lorem", Value::Integer(10)),
            ("ipsum", Value::Float(6.0)),
            ("involved", Value::Bool(true)),
        ])
        .unwrap()
        .snapshot()
    }

    #[test]
    fn conditions_see_the_alias_and_bare_names() {
        let evaluator = SimpleEvaluator;
        let ctx = evaluator.build_context(&snapshot(), "this").unwrap();
        assert!(evaluator.eval_condition("this.lorem > 5", &ctx).unwrap());
        assert!(evaluator.eval_condition("lorem == 10", &ctx).unwrap());
        assert!(evaluator.eval_condition("ext.lorem > 5", &ctx).is_err());
        assert!(evaluator.eval_condition("lorem + 1", &ctx).is_err());
    }

    #[test]
    fn specialize_binds_sender_reads_and_keeps_ext_free() {
        let evaluator = SimpleEvaluator;
        let rule: Rule = rules::on(
            "share",
            &["lorem"],
            rules::for_all("this.lorem > ext.lorem", &[("lorem", "this.lorem")])
        );
        let actions = evaluator.specialize(&rule.task, &snapshot()).unwrap();
        assert_eq!(actions.len(), 1);
        let action = &actions[0];
        assert_eq!(action.cond_working_set, ["lorem".to_owned()].into());
        assert_eq!(action.working_sets, vec![HashSet::new()]);
        assert_eq!(action.actions[0].expression, "10");

        // the specialized condition must evaluate under an `ext` context
        let ctx = evaluator.build_context(&snapshot(), "ext").unwrap();
        assert!(!evaluator.eval_condition(&action.condition, &ctx).unwrap());
    }

    #[test]
    fn payload_round_trip_is_semantics_preserving() {
        let evaluator = SimpleEvaluator;
        let task = rules::for_all("involved && ipsum != ext.ipsum", &[("ipsum", "this.ipsum")]);
        let actions = evaluator.specialize(&task, &snapshot()).unwrap();
        let payload = evaluator.marshal(&actions).unwrap();
        let decoded = evaluator.unmarshal(&payload, &TypeMap::new()).unwrap();
        assert_eq!(decoded, actions);
    }

    #[test]
    fn input_parsing_respects_declared_types() {
        let evaluator = SimpleEvaluator;
        let memory = Memory::new([
            ("a", Value::Integer(0)),
            ("b", Value::Integer(0)),
        ])
        .unwrap();
        let parsed = evaluator.parse_input("a = 1; b = 2", memory.types()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(evaluator.parse_input("a = 1.5", memory.types()).is_err());
        assert!(evaluator.parse_input("missing = 1", memory.types()).is_err());
        assert!(evaluator.parse_input("garbage", memory.types()).is_err());
    }

    #[test]
    fn action_type_mismatch_is_an_error() {
        let evaluator = SimpleEvaluator;
        let ctx = evaluator.build_context(&snapshot(), "ext").unwrap();
        let bad = ActionExpr::new("lorem", "true");
        assert!(evaluator.eval_action(&bad, &ctx).is_err());
        let good = ActionExpr::new("lorem", "ext.lorem + 1");
        assert_eq!(
            evaluator.eval_action(&good, &ctx).unwrap(),
            Assignment::new("lorem", Value::Integer(11))
        );
    }
}
