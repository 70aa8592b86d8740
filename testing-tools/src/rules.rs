use axon_types::{ActionExpr, Rule, Task};

/// A rule with no default actions: `on <events> <task>`.
pub fn on(name: &str, events: &[&str], task: Task) -> Rule {
    Rule {
        name: name.to_owned(),
        events: events.iter().map(|e| e.to_string()).collect(),
        default_actions: Vec::new(),
        task
    }
}

/// A rule with unconditional local default actions:
/// `on <events> default <defaults> <task>`.
pub fn on_default(name: &str, events: &[&str], defaults: &[(&str, &str)], task: Task) -> Rule {
    Rule { default_actions: actions(defaults), ..on(name, events, task) }
}

/// An external task evaluated on every peer: `for all <condition> do ...`.
pub fn for_all(condition: &str, acts: &[(&str, &str)]) -> Task {
    Task { external: true, condition: condition.to_owned(), actions: actions(acts) }
}

/// A task evaluated only on the firing node.
pub fn local(condition: &str, acts: &[(&str, &str)]) -> Task {
    Task { external: false, condition: condition.to_owned(), actions: actions(acts) }
}

fn actions(pairs: &[(&str, &str)]) -> Vec<ActionExpr> {
    pairs
        .iter()
        .map(|(resource, expression)| ActionExpr::new(*resource, *expression))
        .collect()
}
