//! Process-wide registry of compiled crews.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crew::Crew;

/// Named crews, compiled once and shared across requests.
#[derive(Default)]
pub struct CrewRegistry {
    crews: RwLock<HashMap<String, Arc<Crew>>>,
    default_crew: RwLock<Option<String>>,
}

impl CrewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a crew under its own name. The first registration becomes
    /// the default crew unless one was chosen explicitly.
    pub fn register(&self, crew: Crew) {
        let name = crew.name.clone();
        self.crews.write().insert(name.clone(), Arc::new(crew));
        let mut default = self.default_crew.write();
        if default.is_none() {
            *default = Some(name);
        }
    }

    pub fn set_default(&self, name: &str) {
        *self.default_crew.write() = Some(name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<Arc<Crew>> {
        self.crews.read().get(name).cloned()
    }

    /// The crew used when a request names none.
    pub fn default_crew(&self) -> Option<Arc<Crew>> {
        let name = self.default_crew.read().clone()?;
        self.get(&name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.crews.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.crews.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.crews.read().is_empty()
    }

    /// Replace a crew definition (configuration reload).
    pub fn replace(&self, crew: Crew) {
        self.crews
            .write()
            .insert(crew.name.clone(), Arc::new(crew));
    }
}
