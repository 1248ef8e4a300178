use crate::state::entity::EntityState;
use dashmap::DashMap;
use std::collections::HashMap;

/// Read access to the current state of arbitrary entities
pub trait StateReader {
    fn get_state(&self, entity_id: &str) -> Option<EntityState>;
}

impl StateReader for HashMap<String, EntityState> {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.get(entity_id).cloned()
    }
}

/// Latest state of every entity seen so far
pub struct StateEngine {
    /// Lock-free concurrent map for fast reads
    states: DashMap<String, EntityState>,
}

impl StateEngine {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Store a new entity state, replacing the previous one
    pub fn update_state(&self, state: EntityState) {
        self.states.insert(state.entity_id.clone(), state);
    }
}

impl StateReader for StateEngine {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.states.get(entity_id).map(|e| e.clone())
    }
}

impl Default for StateEngine {
    fn default() -> Self {
        Self::new()
    }
}
