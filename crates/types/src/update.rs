use std::{collections::HashSet, fmt, slice};

use serde::{Deserialize, Serialize};

use crate::resource::Value;

/// A single resource write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub resource: String,
    pub value:    Value
}

impl Assignment {
    pub fn new(resource: impl Into<String>, value: Value) -> Self {
        Self { resource: resource.into(), value }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.resource, self.value)
    }
}

/// An ordered, non-empty list of assignments applied all-or-nothing.
///
/// The constructor returns `None` for an empty list so that "empty update"
/// can never reach the pool or the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Update(Vec<Assignment>);

impl Update {
    pub fn new(assignments: Vec<Assignment>) -> Option<Self> {
        if assignments.is_empty() {
            return None
        }
        Some(Self(assignments))
    }

    pub fn iter(&self) -> slice::Iter<'_, Assignment> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The set of resource names this update writes.
    pub fn assigned(&self) -> HashSet<&str> {
        self.0.iter().map(|a| a.resource.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Update {
    type IntoIter = slice::Iter<'a, Assignment>;
    type Item = &'a Assignment;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for assignment in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{assignment}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_update_is_rejected() {
        assert!(Update::new(vec![]).is_none());
    }

    #[test]
    fn assigned_is_the_resource_set() {
        let update = Update::new(vec![
            Assignment::new("a", Value::Integer(1)),
            Assignment::new("b", Value::Integer(2)),
            Assignment::new("a", Value::Integer(3)),
        ])
        .unwrap();
        assert_eq!(update.assigned(), ["a", "b"].into_iter().collect());
        assert_eq!(update.len(), 3);
    }
}
