//! Entity state store.
//!
//! The host keeps named entity states (`domain.object_id` → state). The
//! tracker only uses it for its own on/off entity, but the store is shared
//! with the rest of the host so that external callers can observe it.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// State value of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Entity is switched on.
    On,
    /// Entity is switched off.
    Off,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}

/// A stored state together with the time it last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StateRecord {
    /// Current value.
    pub state: EntityState,

    /// When the value last changed (not when it was last written).
    pub last_changed: DateTime<Utc>,
}

/// Key/value store for entity states.
pub trait StateStore: Send + Sync {
    /// Read the current state of `entity_id`.
    fn get(&self, entity_id: &str) -> Option<StateRecord>;

    /// Write the state of `entity_id`.
    fn set(&self, entity_id: &str, state: EntityState);

    /// All known entities, sorted by id.
    fn all(&self) -> Vec<(String, StateRecord)>;
}

/// Process-local [`StateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, StateRecord>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, entity_id: &str) -> Option<StateRecord> {
        let states = self.states.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        states.get(entity_id).cloned()
    }

    fn set(&self, entity_id: &str, state: EntityState) {
        let mut states = self.states.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        match states.get_mut(entity_id) {
            Some(record) if record.state == state => {}
            Some(record) => {
                record.state = state;
                record.last_changed = Utc::now();
            }
            None => {
                states.insert(
                    entity_id.to_string(),
                    StateRecord {
                        state,
                        last_changed: Utc::now(),
                    },
                );
            }
        }
    }

    fn all(&self) -> Vec<(String, StateRecord)> {
        let states = self.states.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<_> = states
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
