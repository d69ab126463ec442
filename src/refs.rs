//! Per-call identity tracking for shared and cyclic object graphs.
//!
//! Ids are positional: the encoder numbers objects in the order it first reaches them
//! (depth-first, field-ordinal order) and the decoder numbers shells in the order it
//! allocates them, which is the same order.

use crate::value::ObjectId;
use crate::MalformedStreamError;
use std::collections::HashMap;

/// Outcome of offering an object to the encoder's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// First visit; the object must be written in full.
    New(u32),
    /// Already written; emit a back-reference to this id.
    Seen(u32),
}

/// Identity table scoped to one top-level `serialize` or `deserialize` call.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    identity_to_id: HashMap<ObjectId, u32>,
    id_to_instance: Vec<ObjectId>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode side: assigns the next id on first sight, before any field is written.
    pub fn assign(&mut self, object: ObjectId) -> Assignment {
        let next = self.identity_to_id.len() as u32;
        match self.identity_to_id.get(&object) {
            Some(&id) => Assignment::Seen(id),
            None => {
                self.identity_to_id.insert(object, next);
                Assignment::New(next)
            }
        }
    }

    /// Decode side: records a freshly allocated shell, before any field is read.
    pub fn register_shell(&mut self, shell: ObjectId) -> u32 {
        let id = self.id_to_instance.len() as u32;
        self.id_to_instance.push(shell);
        id
    }

    /// Decode side: the instance (possibly still being populated) behind a back-reference.
    pub fn resolve(&self, id: u32) -> Result<ObjectId, MalformedStreamError> {
        self.id_to_instance
            .get(id as usize)
            .copied()
            .ok_or(MalformedStreamError::UnknownBackReference(id))
    }

    pub fn assigned(&self) -> usize {
        self.identity_to_id.len()
    }

    pub fn allocated(&self) -> usize {
        self.id_to_instance.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ObjectGraph, Value};

    #[test]
    fn ids_follow_first_visit_order() {
        let mut graph = ObjectGraph::new();
        let a = graph.insert("T", vec![Value::Null]);
        let b = graph.insert("T", vec![Value::Null]);

        let mut table = ReferenceTable::new();
        assert_eq!(table.assign(b), Assignment::New(0));
        assert_eq!(table.assign(a), Assignment::New(1));
        assert_eq!(table.assign(b), Assignment::Seen(0));
        assert_eq!(table.assigned(), 2);
    }

    #[test]
    fn shells_resolve_by_position() {
        let mut graph = ObjectGraph::new();
        let shell = graph.insert("T", vec![]);
        let mut table = ReferenceTable::new();
        assert_eq!(table.register_shell(shell), 0);
        assert_eq!(table.resolve(0), Ok(shell));
        assert_eq!(
            table.resolve(1),
            Err(MalformedStreamError::UnknownBackReference(1))
        );
    }
}
