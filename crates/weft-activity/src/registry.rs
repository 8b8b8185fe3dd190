//! Name-keyed activity registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::activity::{Activity, ActivityRef};

/// Activities available to processors, keyed by name.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
  activities: HashMap<String, ActivityRef>,
}

impl ActivityRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an activity under its own name, replacing any previous entry.
  pub fn register(&mut self, activity: impl Activity + 'static) -> &mut Self {
    self.register_ref(Arc::new(activity))
  }

  pub fn register_ref(&mut self, activity: ActivityRef) -> &mut Self {
    self.activities.insert(activity.name().to_string(), activity);
    self
  }

  pub fn get(&self, name: &str) -> Option<ActivityRef> {
    self.activities.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.activities.contains_key(name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.activities.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}
