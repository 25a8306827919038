//! A model instance bound to a model core.
//!
//! The [`Model`] owns the core's handle and all host-side memory shared with it:
//!
//! - the state array, shaped `(n_state,) + domain_shape` and partitioned into interior,
//!   surface and bottom rows (in that order),
//! - the dependency array, shaped `(n_dependencies,) + domain_shape` and partitioned into
//!   interior, horizontal and scalar rows.
//!
//! Each state row is linked into the core when the configuration is built, each dependency row
//! when the model is started. Whenever a parameter changes, the whole configuration is rebuilt:
//! arrays are reallocated and relinked, descriptors are recreated, and values are carried over
//! by name (see [`Snapshot`](crate::snapshot::Snapshot)).
//!
//! The lifecycle is: create → (set dependencies / parameters)* → [`Model::start`] →
//! (rates / state checks / Jacobians / integration)*. A rebuild returns the model to the
//! configured state, so it must be started again before further evaluation.

mod builder;
mod configuration;
mod introspection;
mod lifecycle;
mod lookup;
mod parameters;

#[cfg(test)]
mod tests;

pub use builder::ModelBuilder;
pub use introspection::{CouplingGraph, ModelSummary, ParameterTree, SubModel};
pub use lifecycle::{Readiness, StartMode, DEFAULT_PERTURBATION};
pub use lookup::Collection;

use crate::backend::{Backend, Counts, ModelHandle};
use crate::context::{BindingContext, MAX_DOMAIN_RANK};
use crate::errors::{FabmError, FabmResult};
use crate::variable::{
    ConservedQuantity, Coupling, Dependency, DiagnosticVariable, Parameter, StateVariable,
};
use lookup::LookupTables;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, Slice};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Time passed to the core when no time has been set.
pub const TIME_UNSET: f64 = -1.0;

pub struct Model {
    backend: Arc<dyn Backend>,
    handle: ModelHandle,
    path: String,
    domain_shape: Vec<usize>,
    counts: Counts,
    /// Incremented on every rebuild.
    generation: u64,
    state: ArrayD<f64>,
    dependency_data: ArrayD<f64>,
    state_variables: Vec<StateVariable>,
    diagnostic_variables: Vec<DiagnosticVariable>,
    dependencies: Vec<Dependency>,
    conserved_quantities: Vec<ConservedQuantity>,
    parameters: Vec<Parameter>,
    couplings: Vec<Coupling>,
    lookup: LookupTables,
    cell_thickness: Option<ArrayD<f64>>,
    time: f64,
    started: bool,
}

impl Model {
    /// Create a model from a configuration document.
    ///
    /// `domain_shape` is empty for a single point, or holds the number of cells of a column.
    pub fn new(context: &BindingContext, path: &str, domain_shape: &[usize]) -> FabmResult<Self> {
        if domain_shape.len() > MAX_DOMAIN_RANK {
            return Err(FabmError::InvalidDomainShape(domain_shape.to_vec()));
        }
        let backend = context.backend(domain_shape.len())?;
        backend.reset_error_state();
        let handle = backend.create_model(path, domain_shape)?;
        if backend.error_state() {
            let message = backend.error_message();
            backend.reset_error_state();
            if !handle.is_null() {
                backend.release_model(handle);
            }
            return Err(FabmError::Configuration {
                path: path.to_string(),
                message,
            });
        }

        let mut model = Self {
            backend,
            handle,
            path: path.to_string(),
            domain_shape: domain_shape.to_vec(),
            counts: Counts::default(),
            generation: 0,
            state: ArrayD::zeros(IxDyn(&[0])),
            dependency_data: ArrayD::zeros(IxDyn(&[0])),
            state_variables: vec![],
            diagnostic_variables: vec![],
            dependencies: vec![],
            conserved_quantities: vec![],
            parameters: vec![],
            couplings: vec![],
            lookup: LookupTables::default(),
            cell_thickness: None,
            time: TIME_UNSET,
            started: false,
        };
        model.update_configuration(None).map_err(|e| match e {
            FabmError::Native(message) => FabmError::Configuration {
                path: path.to_string(),
                message,
            },
            other => other,
        })?;
        Ok(model)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn domain_shape(&self) -> &[usize] {
        &self.domain_shape
    }

    pub fn handle(&self) -> ModelHandle {
        self.handle
    }

    /// The core this model was created with.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Number of configuration rebuilds so far, starting at 1 after creation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of cells in the domain.
    pub fn cell_count(&self) -> usize {
        self.domain_shape.iter().product()
    }

    /// Whether the model has been started successfully since the last rebuild.
    pub fn is_started(&self) -> bool {
        self.started
    }

    // Collections

    /// Interior, surface and bottom state variables, in that order.
    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn interior_state_variables(&self) -> &[StateVariable] {
        &self.state_variables[self.interior_state_rows()]
    }

    pub fn surface_state_variables(&self) -> &[StateVariable] {
        &self.state_variables[self.surface_state_rows()]
    }

    pub fn bottom_state_variables(&self) -> &[StateVariable] {
        &self.state_variables[self.bottom_state_rows()]
    }

    /// Interior and horizontal diagnostics, in that order.
    pub fn diagnostic_variables(&self) -> &[DiagnosticVariable] {
        &self.diagnostic_variables
    }

    pub fn interior_diagnostic_variables(&self) -> &[DiagnosticVariable] {
        &self.diagnostic_variables[..self.counts.interior_diagnostic]
    }

    pub fn horizontal_diagnostic_variables(&self) -> &[DiagnosticVariable] {
        &self.diagnostic_variables[self.counts.interior_diagnostic..]
    }

    /// Interior, horizontal and scalar dependencies, in that order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn interior_dependencies(&self) -> &[Dependency] {
        &self.dependencies[self.interior_dependency_rows()]
    }

    pub fn horizontal_dependencies(&self) -> &[Dependency] {
        &self.dependencies[self.horizontal_dependency_rows()]
    }

    pub fn scalar_dependencies(&self) -> &[Dependency] {
        &self.dependencies[self.scalar_dependency_rows()]
    }

    pub fn conserved_quantities(&self) -> &[ConservedQuantity] {
        &self.conserved_quantities
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn couplings(&self) -> &[Coupling] {
        &self.couplings
    }

    // State values

    /// The full state array.
    pub fn state(&self) -> ArrayViewD<'_, f64> {
        self.state.view()
    }

    pub fn state_mut(&mut self) -> ArrayViewMutD<'_, f64> {
        self.state.view_mut()
    }

    pub fn interior_state(&self) -> ArrayViewD<'_, f64> {
        self.state_rows(self.interior_state_rows())
    }

    pub fn surface_state(&self) -> ArrayViewD<'_, f64> {
        self.state_rows(self.surface_state_rows())
    }

    pub fn bottom_state(&self) -> ArrayViewD<'_, f64> {
        self.state_rows(self.bottom_state_rows())
    }

    /// Values of the state variable at `index` in [`Model::state_variables`].
    pub fn state_value(&self, index: usize) -> FabmResult<ArrayViewD<'_, f64>> {
        self.check_index(index, self.state_variables.len(), Collection::StateVariables)?;
        Ok(self.state.index_axis(Axis(0), index))
    }

    pub fn state_value_mut(&mut self, index: usize) -> FabmResult<ArrayViewMutD<'_, f64>> {
        self.check_index(index, self.state_variables.len(), Collection::StateVariables)?;
        Ok(self.state.index_axis_mut(Axis(0), index))
    }

    /// Assign the same value to every cell of a state variable.
    pub fn set_state_value(&mut self, index: usize, value: f64) -> FabmResult<()> {
        self.state_value_mut(index)?.fill(value);
        Ok(())
    }

    /// Assign values to a state variable, broadcasting `values` over the domain.
    pub fn set_state_values(&mut self, index: usize, values: &ArrayViewD<'_, f64>) -> FabmResult<()> {
        let mut target = self.state_value_mut(index)?;
        assign_broadcast(&mut target, values)
    }

    // Dependency values

    /// The full dependency array.
    pub fn dependency_data(&self) -> ArrayViewD<'_, f64> {
        self.dependency_data.view()
    }

    /// Values of the dependency at `index` in [`Model::dependencies`].
    pub fn dependency_value(&self, index: usize) -> FabmResult<ArrayViewD<'_, f64>> {
        self.check_index(index, self.dependencies.len(), Collection::Dependencies)?;
        Ok(self.dependency_data.index_axis(Axis(0), index))
    }

    /// Assign the same value to every cell of a dependency and mark it as set.
    pub fn set_dependency_value(&mut self, index: usize, value: f64) -> FabmResult<()> {
        self.check_index(index, self.dependencies.len(), Collection::Dependencies)?;
        self.dependency_data.index_axis_mut(Axis(0), index).fill(value);
        self.dependencies[index].mark_set(true);
        Ok(())
    }

    /// Assign values to a dependency, broadcasting `values` over the domain, and mark it as set.
    pub fn set_dependency_values(
        &mut self,
        index: usize,
        values: &ArrayViewD<'_, f64>,
    ) -> FabmResult<()> {
        self.check_index(index, self.dependencies.len(), Collection::Dependencies)?;
        let mut target = self.dependency_data.index_axis_mut(Axis(0), index);
        assign_broadcast(&mut target, values)?;
        self.dependencies[index].mark_set(true);
        Ok(())
    }

    // Partitions of the state and dependency arrays

    fn interior_state_rows(&self) -> Range<usize> {
        0..self.counts.interior_state
    }

    fn surface_state_rows(&self) -> Range<usize> {
        let start = self.counts.interior_state;
        start..start + self.counts.surface_state
    }

    fn bottom_state_rows(&self) -> Range<usize> {
        self.counts.interior_state + self.counts.surface_state..self.counts.state()
    }

    fn interior_dependency_rows(&self) -> Range<usize> {
        0..self.counts.interior_dependency
    }

    fn horizontal_dependency_rows(&self) -> Range<usize> {
        let start = self.counts.interior_dependency;
        start..start + self.counts.horizontal_dependency
    }

    fn scalar_dependency_rows(&self) -> Range<usize> {
        self.counts.interior_dependency + self.counts.horizontal_dependency
            ..self.counts.dependencies()
    }

    fn state_rows(&self, rows: Range<usize>) -> ArrayViewD<'_, f64> {
        self.state.slice_axis(Axis(0), Slice::from(rows))
    }

    fn check_index(&self, index: usize, len: usize, collection: Collection) -> FabmResult<()> {
        if index >= len {
            return Err(FabmError::IndexOutOfBounds {
                index,
                len,
                collection,
            });
        }
        Ok(())
    }

    /// Surface a raised native error flag.
    fn check_error(&self) -> FabmResult<()> {
        crate::backend::take_error(self.backend.as_ref())
    }
}

fn assign_broadcast(
    target: &mut ArrayViewMutD<'_, f64>,
    values: &ArrayViewD<'_, f64>,
) -> FabmResult<()> {
    let broadcast = values
        .broadcast(target.raw_dim())
        .ok_or_else(|| FabmError::ShapeMismatch {
            expected: target.shape().to_vec(),
            found: values.shape().to_vec(),
        })?;
    target.assign(&broadcast);
    Ok(())
}

impl Drop for Model {
    fn drop(&mut self) {
        self.backend.release_model(self.handle);
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("path", &self.path)
            .field("domain_shape", &self.domain_shape)
            .field("counts", &self.counts)
            .field("generation", &self.generation)
            .field("started", &self.started)
            .finish()
    }
}
