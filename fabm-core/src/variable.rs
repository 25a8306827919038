//! Typed descriptors for the objects of a configured model.
//!
//! Descriptors are rebuilt on every reconfiguration of their [`Model`](crate::model::Model).
//! They carry the display identity of an object (name, units, long name, path) and, where the
//! core has a handle for the object, answer further questions by asking the core.
//!
//! Values of state variables and dependencies live in arrays owned by the model and are
//! accessed through it by [`StateVariable::index`] and [`Dependency::index`].
//! Diagnostic values live in memory owned by the core and are borrowed read-only.

use crate::backend::{take_error, Backend, MasterList, ModelHandle, VariableHandle};
use crate::errors::FabmResult;
use crate::parameter::{ParameterType, ParameterValue};
use ndarray::{ArrayViewD, IxDyn};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Display identity shared by every descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub units: String,
    pub long_name: String,
    pub path: String,
}

impl VariableInfo {
    /// Build an identity, falling back to `name` for an empty long name or path.
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        long_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let long_name = non_empty_or(long_name.into(), &name);
        let path = non_empty_or(path.into(), &name);
        Self {
            name,
            units: units.into(),
            long_name,
            path,
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Read-only identity contract of all descriptors.
pub trait Variable {
    fn info(&self) -> &VariableInfo;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn units(&self) -> &str {
        &self.info().units
    }

    fn long_name(&self) -> &str {
        &self.info().long_name
    }

    fn path(&self) -> &str {
        &self.info().path
    }

    /// Fully qualified long name.
    fn long_path(&self) -> String {
        self.info().long_name.clone()
    }

    /// Name used when writing the variable to output.
    fn output_name(&self) -> String {
        self.info().name.clone()
    }
}

/// A handle into the core for objects it can be queried about.
#[derive(Clone)]
pub(crate) struct Linked {
    backend: Arc<dyn Backend>,
    handle: VariableHandle,
}

impl Linked {
    pub(crate) fn new(backend: Arc<dyn Backend>, handle: VariableHandle) -> Self {
        Self { backend, handle }
    }

    /// Query the display identity of the variable from the core.
    pub(crate) fn info(&self) -> VariableInfo {
        let attributes = self.backend.variable_attributes(self.handle);
        VariableInfo::new(
            attributes.name.clone(),
            attributes.units,
            attributes.long_name,
            attributes.name,
        )
    }

    fn long_path(&self) -> String {
        self.backend.variable_long_path(self.handle)
    }

    fn output_name(&self) -> String {
        self.backend.variable_output_name(self.handle)
    }

    fn real_property(&self, name: &str, default: f64) -> f64 {
        self.backend.variable_real_property(self.handle, name, default)
    }
}

impl fmt::Debug for Linked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Linked").field(&self.handle).finish()
    }
}

macro_rules! impl_linked_variable {
    ($descriptor:ty) => {
        impl Variable for $descriptor {
            fn info(&self) -> &VariableInfo {
                &self.info
            }

            fn long_path(&self) -> String {
                self.linked.long_path()
            }

            fn output_name(&self) -> String {
                self.linked.output_name()
            }
        }

        impl $descriptor {
            pub fn handle(&self) -> VariableHandle {
                self.linked.handle
            }

            /// Named real-valued property of the variable, or `default` if it is not defined.
            pub fn real_property(&self, name: &str, default: f64) -> f64 {
                self.linked.real_property(name, default)
            }
        }
    };
}

/// Which part of the domain a state variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateDomain {
    Interior,
    Surface,
    Bottom,
}

/// A prognostic variable whose values live in the model's state array.
#[derive(Debug)]
pub struct StateVariable {
    info: VariableInfo,
    linked: Linked,
    domain: StateDomain,
    index: usize,
}

impl StateVariable {
    pub(crate) fn new(linked: Linked, domain: StateDomain, index: usize) -> Self {
        Self {
            info: linked.info(),
            linked,
            domain,
            index,
        }
    }

    pub fn domain(&self) -> StateDomain {
        self.domain
    }

    /// Row of this variable in the model's full state array.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn background_value(&self) -> f64 {
        self.linked.backend.variable_background_value(self.linked.handle)
    }

    /// Whether the variable is included in output.
    pub fn output(&self) -> bool {
        self.linked.backend.variable_output(self.linked.handle)
    }
}

impl_linked_variable!(StateVariable);

/// Horizontal extent of a diagnostic or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticDomain {
    Interior,
    Horizontal,
}

/// Core-owned values, borrowed read-only.
///
/// Valid from a successful start until the next reconfiguration of the owning model.
#[derive(Debug)]
pub(crate) struct ForeignArray {
    data: NonNull<f64>,
    shape: Vec<usize>,
}

// SAFETY: the buffer belongs to the model instance that also owns this array; the core must be
// reentrant per model handle, so the model (and this view) may move between threads.
unsafe impl Send for ForeignArray {}

impl ForeignArray {
    pub(crate) fn new(data: NonNull<f64>, shape: &[usize]) -> Self {
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    fn view(&self) -> ArrayViewD<'_, f64> {
        // SAFETY: the core guarantees one value per cell until it is reconfigured, and the
        // owning model unbinds this array before any reconfiguration. The core only writes
        // the buffer while evaluating, which borrows the model mutably and so cannot overlap
        // the returned view.
        unsafe { ArrayViewD::from_shape_ptr(IxDyn(&self.shape), self.data.as_ptr()) }
    }
}

/// A derived variable computed by the core.
#[derive(Debug)]
pub struct DiagnosticVariable {
    info: VariableInfo,
    linked: Linked,
    domain: DiagnosticDomain,
    ordinal: usize,
    data: Option<ForeignArray>,
}

impl DiagnosticVariable {
    pub(crate) fn new(linked: Linked, domain: DiagnosticDomain, ordinal: usize) -> Self {
        Self {
            info: linked.info(),
            linked,
            domain,
            ordinal,
            data: None,
        }
    }

    pub fn domain(&self) -> DiagnosticDomain {
        self.domain
    }

    /// 1-based position within its category.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Current values, or `None` before the model has been started or while the core keeps
    /// this diagnostic inactive.
    ///
    /// The view borrows the model, so it has to be dropped (or copied with `to_owned`) before
    /// the next evaluation.
    pub fn value(&self) -> Option<ArrayViewD<'_, f64>> {
        self.data.as_ref().map(ForeignArray::view)
    }

    pub fn output(&self) -> bool {
        self.linked.backend.variable_output(self.linked.handle)
    }

    pub(crate) fn bind(&mut self, data: Option<ForeignArray>) {
        self.data = data;
    }
}

impl_linked_variable!(DiagnosticVariable);

/// Which part of the domain a dependency is defined on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyDomain {
    Interior,
    Horizontal,
    Scalar,
}

/// An external input the model reads, such as temperature.
#[derive(Debug)]
pub struct Dependency {
    info: VariableInfo,
    linked: Linked,
    domain: DependencyDomain,
    index: usize,
    is_set: bool,
}

impl Dependency {
    pub(crate) fn new(linked: Linked, domain: DependencyDomain, index: usize) -> Self {
        Self {
            info: linked.info(),
            linked,
            domain,
            index,
            is_set: false,
        }
    }

    pub fn domain(&self) -> DependencyDomain {
        self.domain
    }

    /// Row of this dependency in the model's dependency array.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether a value has been assigned since the last reconfiguration.
    pub fn is_set(&self) -> bool {
        self.is_set
    }

    /// Whether the core needs a value before it can start.
    pub fn required(&self) -> bool {
        self.linked.backend.variable_required(self.linked.handle)
    }

    pub(crate) fn mark_set(&mut self, is_set: bool) {
        self.is_set = is_set;
    }
}

impl_linked_variable!(Dependency);

/// A conserved quantity (e.g. total nitrogen) aggregated by the core.
#[derive(Debug, Clone)]
pub struct ConservedQuantity {
    info: VariableInfo,
}

impl ConservedQuantity {
    pub(crate) fn new(info: VariableInfo) -> Self {
        Self { info }
    }
}

impl Variable for ConservedQuantity {
    fn info(&self) -> &VariableInfo {
        &self.info
    }
}

/// A model parameter.
///
/// Reading goes straight to the core. Writing changes the shape of the model and is done
/// through [`Model::set_parameter`](crate::model::Model::set_parameter).
pub struct Parameter {
    info: VariableInfo,
    backend: Arc<dyn Backend>,
    model: ModelHandle,
    index: usize,
    kind: ParameterType,
    has_default: bool,
}

impl Parameter {
    pub(crate) fn new(
        info: VariableInfo,
        backend: Arc<dyn Backend>,
        model: ModelHandle,
        index: usize,
        kind: ParameterType,
        has_default: bool,
    ) -> Self {
        Self {
            info,
            backend,
            model,
            index,
            kind,
            has_default,
        }
    }

    /// 1-based index in the core's parameter table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    pub fn has_default(&self) -> bool {
        self.has_default
    }

    /// Current value, including any override.
    pub fn value(&self) -> FabmResult<ParameterValue> {
        self.read(false)
    }

    /// Built-in default, if the parameter has one.
    pub fn default_value(&self) -> FabmResult<Option<ParameterValue>> {
        if !self.has_default {
            return Ok(None);
        }
        self.read(true).map(Some)
    }

    /// Read the value, bypassing any override when `default` is set.
    pub fn read(&self, default: bool) -> FabmResult<ParameterValue> {
        let value = self
            .kind
            .read(self.backend.as_ref(), self.model, self.index, default);
        take_error(self.backend.as_ref())?;
        Ok(value)
    }
}

impl Variable for Parameter {
    fn info(&self) -> &VariableInfo {
        &self.info
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.info.name)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("has_default", &self.has_default)
            .finish()
    }
}

/// A resolved link between a slave variable and the master supplying its value.
///
/// The identity of a coupling is that of its slave.
#[derive(Debug)]
pub struct Coupling {
    info: VariableInfo,
    linked: Linked,
    model: ModelHandle,
    master: VariableHandle,
}

impl Coupling {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        model: ModelHandle,
        slave: VariableHandle,
        master: VariableHandle,
    ) -> Self {
        let linked = Linked::new(backend, slave);
        Self {
            info: linked.info(),
            linked,
            model,
            master,
        }
    }

    pub fn slave(&self) -> VariableHandle {
        self.linked.handle
    }

    pub fn master(&self) -> VariableHandle {
        self.master
    }

    /// Long path of the master currently supplying the slave.
    pub fn master_path(&self) -> String {
        self.linked.backend.variable_long_path(self.master)
    }

    /// Long paths of every variable that could act as master for the slave.
    pub fn options(&self) -> FabmResult<Vec<String>> {
        let backend = self.linked.backend.as_ref();
        let masters = MasterList::new(backend, self.model, self.linked.handle);
        let options: Vec<String> = masters
            .iter()
            .map(|master| backend.variable_long_path(master))
            .collect();
        drop(masters);
        take_error(backend)?;
        Ok(options)
    }
}

impl_linked_variable!(Coupling);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_falls_back_to_name() {
        let info = VariableInfo::new("total_nitrogen", "mmol m-3", "", "");
        assert_eq!(info.long_name, "total_nitrogen");
        assert_eq!(info.path, "total_nitrogen");

        let quantity = ConservedQuantity::new(info);
        assert_eq!(quantity.long_path(), "total_nitrogen");
        assert_eq!(quantity.output_name(), "total_nitrogen");
    }
}
