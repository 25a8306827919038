//! Name-keyed capture of dependency and state values.
//!
//! A reconfiguration replaces every array and descriptor of a model, and may add or remove
//! variables. Values are therefore captured by name, the only identity that survives.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Captured value of a dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDependency {
    pub value: ArrayD<f64>,
    pub is_set: bool,
}

/// Values of every dependency and state variable of a model, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub dependencies: BTreeMap<String, SavedDependency>,
    pub state: BTreeMap<String, ArrayD<f64>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.state.is_empty()
    }

    pub fn dependency(&self, name: &str) -> Option<&SavedDependency> {
        self.dependencies.get(name)
    }

    pub fn state_value(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.state.get(name)
    }
}
