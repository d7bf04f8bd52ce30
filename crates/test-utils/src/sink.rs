use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use enginesched::analysis::LocationStateSink;
use enginesched::types::{LocationKey, LocationState};

/// Records every location-state update published by the analysis loop.
#[derive(Clone, Default)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<(LocationKey, LocationState)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_sink(&self) -> Arc<dyn LocationStateSink> {
        let updates = Arc::clone(&self.updates);
        Arc::new(move |key: &LocationKey, state: LocationState| {
            updates.lock().unwrap().push((key.clone(), state));
        })
    }

    /// Every update, oldest first.
    pub fn history(&self) -> Vec<(LocationKey, LocationState)> {
        self.updates.lock().unwrap().clone()
    }

    /// Latest state per location.
    pub fn latest(&self) -> HashMap<LocationKey, LocationState> {
        self.history().into_iter().collect()
    }

    pub fn state_of(&self, component: &str, location: &str) -> Option<LocationState> {
        self.latest().get(&LocationKey::new(component, location)).copied()
    }
}
