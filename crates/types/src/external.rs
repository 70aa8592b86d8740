use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{resource::TypeMap, rule::ActionExpr};

/// A task shipped to peers for remote evaluation.
///
/// The condition and action expressions have already been specialized by the
/// sender: every read of the sender's memory is a literal, so the free
/// variables left are exactly the receiver-side resources recorded in
/// `cond_working_set` / `working_sets`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalAction {
    pub condition:        String,
    /// Resources the condition reads on the receiving node.
    pub cond_working_set: HashSet<String>,
    pub actions:          Vec<ActionExpr>,
    /// Per-action read sets, parallel to `actions`.
    pub working_sets:     Vec<HashSet<String>>
}

impl ExternalAction {
    /// Whether the receiving node can evaluate the condition at all: every
    /// resource the condition reads must exist locally.
    pub fn is_evaluable(&self, local: &TypeMap) -> bool {
        self.cond_working_set.iter().all(|r| local.contains_key(r))
    }

    /// Resources this action would read on a node holding `local`, i.e. the
    /// condition working set plus each action working set that is fully
    /// local.
    pub fn working_set<'a>(&'a self, local: &TypeMap) -> HashSet<&'a str> {
        let mut set: HashSet<&str> = self.cond_working_set.iter().map(String::as_str).collect();
        for ws in &self.working_sets {
            if ws.iter().all(|r| local.contains_key(r)) {
                set.extend(ws.iter().map(String::as_str));
            }
        }
        set
    }

    /// Drops actions whose target resource is not local, keeping each
    /// survivor paired with its working set.
    pub fn cull_actions(&self, local: &TypeMap) -> Vec<&ActionExpr> {
        self.actions
            .iter()
            .filter(|action| local.contains_key(&action.resource))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::ResourceKind;

    fn local(names: &[&str]) -> TypeMap {
        names
            .iter()
            .map(|n| (n.to_string(), ResourceKind::Integer))
            .collect()
    }

    fn action(resource: &str) -> ActionExpr {
        ActionExpr::new(resource, "1")
    }

    #[test]
    fn evaluable_requires_full_condition_working_set() {
        let ea = ExternalAction {
            condition:        "ext.a > 1".to_owned(),
            cond_working_set: ["a".to_owned()].into(),
            actions:          vec![],
            working_sets:     vec![]
        };
        assert!(ea.is_evaluable(&local(&["a", "b"])));
        assert!(!ea.is_evaluable(&local(&["b"])));
    }

    #[test]
    fn cull_drops_foreign_targets() {
        let ea = ExternalAction {
            condition:        "true".to_owned(),
            cond_working_set: HashSet::new(),
            actions:          vec![action("a"), action("z"), action("b")],
            working_sets:     vec![HashSet::new(), HashSet::new(), HashSet::new()]
        };
        let kept = ea.cull_actions(&local(&["a", "b"]));
        assert_eq!(
            kept.iter().map(|a| a.resource.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn working_set_skips_partially_foreign_action_sets() {
        let ea = ExternalAction {
            condition:        "ext.a != 0".to_owned(),
            cond_working_set: ["a".to_owned()].into(),
            actions:          vec![action("a"), action("b")],
            working_sets:     vec![
                ["b".to_owned()].into(),
                ["b".to_owned(), "z".to_owned()].into(),
            ]
        };
        let ws = ea.working_set(&local(&["a", "b"]));
        assert_eq!(ws, ["a", "b"].into_iter().collect());
    }
}
