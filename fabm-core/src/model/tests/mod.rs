//! Scenario tests for the model module.
//!
//! These run the full lifecycle against the in-process core: creation, reconfiguration,
//! start, evaluation and lookup.

#[cfg(test)]
mod lookup;
#[cfg(test)]
mod readiness;

use crate::backend::Backend;
use crate::context::BindingContext;
use crate::example_backend::ExampleBackend;
use crate::model::{Model, StartMode};
use std::sync::Arc;

/// A context with both ranks served by the in-process core.
pub(crate) fn context() -> (BindingContext, Arc<ExampleBackend>, Arc<ExampleBackend>) {
    let point = Arc::new(ExampleBackend::new(0));
    let column = Arc::new(ExampleBackend::new(1));
    let context = BindingContext::new()
        .with_backend(Arc::clone(&point) as Arc<dyn Backend>)
        .unwrap()
        .with_backend(Arc::clone(&column) as Arc<dyn Backend>)
        .unwrap();
    (context, point, column)
}

pub(crate) fn point_model() -> (Model, Arc<ExampleBackend>) {
    let (context, point, _) = context();
    let model = Model::new(&context, "fabm.yaml", &[]).unwrap();
    (model, point)
}

/// A point model with every required dependency set and a cell thickness of 10 m.
pub(crate) fn started_point_model() -> (Model, Arc<ExampleBackend>) {
    let (mut model, backend) = point_model();
    model.set_dependency("temperature", 20.0).unwrap();
    model.set_dependency("light", 1.0).unwrap();
    model.set_cell_thickness(10.0);
    let readiness = model.start(StartMode::Strict).unwrap();
    assert!(readiness.is_ready());
    (model, backend)
}

pub(crate) fn scalar(model: &Model, index: usize) -> f64 {
    model.state_value(index).unwrap().iter().copied().next().unwrap()
}
