use std::{collections::HashMap, sync::Arc};

use axon_types::{ResourceKind, TypeMap, Update, Value};

use crate::{
    error::{InitError, MemoryError},
    io::{merge, IoSource, IoStreams}
};

/// The typed resource store of one node.
///
/// `Memory` itself is single-threaded; the executer wraps it in a `RwLock`
/// and serializes applies against each other while snapshot readers proceed
/// on the read side.
pub struct Memory {
    slots:   HashMap<String, Value>,
    types:   TypeMap,
    sources: Vec<IoSource>
}

/// A stable point-in-time view of the store. Cheap to clone and to hold
/// across suspension points; applies that happen later are invisible to it.
#[derive(Clone, Debug)]
pub struct Snapshot(Arc<HashMap<String, Value>>);

impl Memory {
    /// Builds a memory from `(name, initial value)` declarations; the
    /// initial value fixes the resource's kind for good.
    pub fn new<N>(resources: impl IntoIterator<Item = (N, Value)>) -> Result<Self, InitError>
    where
        N: Into<String>
    {
        let mut slots = HashMap::new();
        let mut types = TypeMap::new();
        for (name, value) in resources {
            let name = name.into();
            if slots.contains_key(&name) {
                return Err(InitError::DuplicateResource(name))
            }
            types.insert(name.clone(), value.kind());
            slots.insert(name, value);
        }
        Ok(Self { slots, types, sources: Vec::new() })
    }

    /// Attaches one environment source. Must happen before the executer
    /// takes the merged streams.
    pub fn attach(&mut self, source: IoSource) {
        self.sources.push(source);
    }

    /// Number of attached sources; sizes the intake batch.
    pub fn inputs_count(&self) -> usize {
        self.sources.len()
    }

    /// Hands over the merged input/error streams. The caller owns them from
    /// here on; later calls yield empty streams.
    pub fn take_io(&mut self) -> IoStreams {
        merge(std::mem::take(&mut self.sources))
    }

    pub fn types(&self) -> &TypeMap {
        &self.types
    }

    pub fn read(&self, name: &str) -> Result<(ResourceKind, &Value), MemoryError> {
        self.slots
            .get(name)
            .map(|value| (value.kind(), value))
            .ok_or_else(|| MemoryError::UnknownResource(name.to_owned()))
    }

    /// Applies every assignment of `update` or none: all writes are
    /// validated against the declared kinds before the first one lands.
    pub fn apply(&mut self, update: &Update) -> Result<(), MemoryError> {
        for assignment in update {
            let expected = *self
                .types
                .get(&assignment.resource)
                .ok_or_else(|| MemoryError::UnknownResource(assignment.resource.clone()))?;
            let got = assignment.value.kind();
            if got != expected {
                return Err(MemoryError::TypeMismatch {
                    resource: assignment.resource.clone(),
                    expected,
                    got
                })
            }
        }
        for assignment in update {
            self.slots
                .insert(assignment.resource.clone(), assignment.value.clone());
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(Arc::new(self.slots.clone()))
    }
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
