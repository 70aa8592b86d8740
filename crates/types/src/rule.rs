use serde::{Deserialize, Serialize};

/// An assignment expression targeting a named resource. The expression text
/// is opaque to the core; only the evaluator interprets it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionExpr {
    pub resource:   String,
    pub expression: String
}

impl ActionExpr {
    pub fn new(resource: impl Into<String>, expression: impl Into<String>) -> Self {
        Self { resource: resource.into(), expression: expression.into() }
    }
}

/// The conditional part of a rule.
///
/// An external task is evaluated on every peer: its expressions may read the
/// receiving node under the `ext` alias, while reads of the firing node are
/// bound to concrete values before the task leaves the node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub external:  bool,
    pub condition: String,
    pub actions:   Vec<ActionExpr>
}

/// An event-condition-action rule.
///
/// `default_actions` fire unconditionally whenever one of `events` is
/// assigned; `task` fires under its condition, locally or fleet-wide.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name:            String,
    pub events:          Vec<String>,
    pub default_actions: Vec<ActionExpr>,
    pub task:            Task
}

impl Rule {
    /// True iff one of the rule's events was just assigned.
    pub fn fires_on<'a>(&self, assigned: impl IntoIterator<Item = &'a str>) -> bool {
        let mut assigned = assigned.into_iter();
        assigned.any(|resource| self.events.iter().any(|e| e == resource))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rule(events: &[&str]) -> Rule {
        Rule {
            name:            "r".to_owned(),
            events:          events.iter().map(|e| e.to_string()).collect(),
            default_actions: vec![],
            task:            Task {
                external:  false,
                condition: "true".to_owned(),
                actions:   vec![]
            }
        }
    }

    #[test]
    fn fires_only_on_declared_events() {
        let r = rule(&["lorem", "ipsum"]);
        assert!(r.fires_on(["lorem"]));
        assert!(r.fires_on(["dolor", "ipsum"]));
        assert!(!r.fires_on(["dolor"]));
        assert!(!r.fires_on([]));
    }
}
