//! Memoized schema and table name lists.
//!
//! Every stored list remembers the generation it was loaded under.
//! Invalidation bumps the generation, so all lists become stale at once.
//! A list loaded under an older generation is dropped instead of stored,
//! which keeps a slow lookup racing an invalidation from resurrecting old
//! names.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct NameState {
    generation: u64,
    schema_names: Option<(u64, Vec<String>)>,
    table_names: HashMap<String, (u64, Vec<String>)>,
}

/// Generation-counted cache of name lists.
#[derive(Debug, Default)]
pub struct NameCache {
    state: Mutex<NameState>,
}

impl NameCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current generation. Pass it back when storing a list.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Marks every stored list stale.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.schema_names = None;
        state.table_names.clear();
    }

    /// Returns the memoized schema names, if current.
    pub fn schema_names(&self) -> Option<Vec<String>> {
        let state = self.lock();
        state
            .schema_names
            .as_ref()
            .filter(|(generation, _)| *generation == state.generation)
            .map(|(_, names)| names.clone())
    }

    /// Stores schema names loaded under `generation`.
    pub fn set_schema_names(&self, generation: u64, names: Vec<String>) {
        let mut state = self.lock();
        if generation == state.generation {
            state.schema_names = Some((generation, names));
        }
    }

    /// Returns the memoized table names of `schema`, if current.
    pub fn table_names(&self, schema: &str) -> Option<Vec<String>> {
        let state = self.lock();
        state
            .table_names
            .get(schema)
            .filter(|(generation, _)| *generation == state.generation)
            .map(|(_, names)| names.clone())
    }

    /// Stores the table names of `schema` loaded under `generation`.
    pub fn set_table_names(&self, schema: &str, generation: u64, names: Vec<String>) {
        let mut state = self.lock();
        if generation == state.generation {
            state
                .table_names
                .insert(schema.to_string(), (generation, names));
        }
    }
}
