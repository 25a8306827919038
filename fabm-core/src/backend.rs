//! The binding boundary between the host and a biogeochemical model core.
//!
//! A model core (usually a compiled native library) owns the variable graph of a configured
//! model. The host discovers that graph through positional queries: it asks for the number of
//! objects per [`VariableCategory`] and then for the metadata of each object by its 1-based
//! ordinal. Ordinals and handles are only meaningful within one configuration generation.
//!
//! Errors are never pushed across the boundary. A failing call sets an error flag inside the
//! core which the host polls with [`Backend::error_state`] and [`Backend::error_message`].
//!
//! Memory flows in two directions:
//! - state and dependency values live in host-owned arrays which are *linked* into the core
//!   (the core keeps a non-owning pointer until the next relink),
//! - diagnostic values live in core-owned buffers which the host may only read between a
//!   successful start and the next reconfiguration.

use crate::errors::{FabmError, FabmResult};
use std::ptr::NonNull;

/// Maximum length of text crossing the boundary, including the terminating NUL.
pub const ATTRIBUTE_LENGTH: usize = 256;

/// Opaque handle to a model instance inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModelHandle(usize);

/// Opaque handle to a single variable inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VariableHandle(usize);

/// Opaque handle to a list of variables allocated by the core.
///
/// Lists must be finalized exactly once, see [`MasterList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkListHandle(usize);

macro_rules! impl_handle {
    ($handle:ident) => {
        impl $handle {
            pub fn from_raw(value: usize) -> Self {
                Self(value)
            }

            pub fn as_raw(self) -> usize {
                self.0
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

impl_handle!(ModelHandle);
impl_handle!(VariableHandle);
impl_handle!(LinkListHandle);

/// Category of a variable as numbered by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableCategory {
    InteriorState = 1,
    SurfaceState = 2,
    BottomState = 3,
    InteriorDiagnostic = 4,
    HorizontalDiagnostic = 5,
    ConservedQuantity = 6,
    InteriorDependency = 7,
    HorizontalDependency = 8,
    ScalarDependency = 9,
}

impl VariableCategory {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Number of objects per category for the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub interior_state: usize,
    pub surface_state: usize,
    pub bottom_state: usize,
    pub interior_diagnostic: usize,
    pub horizontal_diagnostic: usize,
    pub interior_dependency: usize,
    pub horizontal_dependency: usize,
    pub scalar_dependency: usize,
    pub conserved: usize,
    pub parameters: usize,
    pub couplings: usize,
}

impl Counts {
    pub fn state(&self) -> usize {
        self.interior_state + self.surface_state + self.bottom_state
    }

    pub fn diagnostics(&self) -> usize {
        self.interior_diagnostic + self.horizontal_diagnostic
    }

    pub fn dependencies(&self) -> usize {
        self.interior_dependency + self.horizontal_dependency + self.scalar_dependency
    }

    /// Number of objects in a variable category.
    pub fn of(&self, category: VariableCategory) -> usize {
        match category {
            VariableCategory::InteriorState => self.interior_state,
            VariableCategory::SurfaceState => self.surface_state,
            VariableCategory::BottomState => self.bottom_state,
            VariableCategory::InteriorDiagnostic => self.interior_diagnostic,
            VariableCategory::HorizontalDiagnostic => self.horizontal_diagnostic,
            VariableCategory::ConservedQuantity => self.conserved,
            VariableCategory::InteriorDependency => self.interior_dependency,
            VariableCategory::HorizontalDependency => self.horizontal_dependency,
            VariableCategory::ScalarDependency => self.scalar_dependency,
        }
    }
}

/// Metadata of a variable queried by category and ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableMetadata {
    pub name: String,
    pub units: String,
    pub long_name: String,
    pub path: String,
}

/// Metadata of a variable queried by handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableAttributes {
    pub name: String,
    pub units: String,
    pub long_name: String,
}

/// Metadata of a parameter queried by ordinal.
///
/// `type_code` is the raw type tag reported by the core, see
/// [`ParameterType`](crate::parameter::ParameterType).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterMetadata {
    pub name: String,
    pub units: String,
    pub long_name: String,
    pub type_code: i32,
    pub has_default: bool,
}

/// Metadata of a (sub)model instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubModelMetadata {
    pub long_name: String,
    pub user_created: bool,
}

/// Output buffers for a single rate evaluation.
///
/// Each slice holds one row per state variable of its category, every row holding one value
/// per cell of the domain.
#[derive(Debug)]
pub struct SourceTerms<'a> {
    pub interior: &'a mut [f64],
    pub surface: &'a mut [f64],
    pub bottom: &'a mut [f64],
    pub include_surface: bool,
    pub include_bottom: bool,
}

/// Arguments of a fixed-step integration over a 0-dimensional domain.
///
/// `output` receives one row of `initial_state.len()` values per entry in `times`.
#[derive(Debug)]
pub struct Integration<'a> {
    pub times: &'a [f64],
    pub initial_state: &'a [f64],
    pub output: &'a mut [f64],
    pub time_step: f64,
    pub include_surface: bool,
    pub include_bottom: bool,
    pub cell_thickness: &'a [f64],
}

/// The entry points a model core provides.
///
/// Implementations must be reentrant per model handle. Calls that fail set the core's error
/// flag and return a neutral value; the host checks the flag afterwards.
pub trait Backend: Send + Sync {
    /// Spatial rank of the domains this core works with (0 or 1).
    fn domain_rank(&self) -> usize;

    /// Library and version description.
    fn version(&self) -> String;

    /// Create a model from a configuration document.
    ///
    /// Parse failures are reported through the error flag.
    /// An `Err` is only returned when the arguments cannot be encoded for the core.
    fn create_model(&self, path: &str, domain_shape: &[usize]) -> FabmResult<ModelHandle>;

    /// Release a model created by [`Backend::create_model`].
    fn release_model(&self, model: ModelHandle);

    fn error_state(&self) -> bool;
    fn error_message(&self) -> String;
    fn reset_error_state(&self);

    fn counts(&self, model: ModelHandle) -> Counts;
    fn variable_metadata(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        index: usize,
    ) -> VariableMetadata;
    fn variable(&self, model: ModelHandle, category: VariableCategory, index: usize)
        -> VariableHandle;
    fn parameter_metadata(&self, model: ModelHandle, index: usize) -> ParameterMetadata;
    fn model_metadata(&self, model: ModelHandle, name: &str) -> SubModelMetadata;
    /// Slave and master handles of a coupling.
    fn coupling(&self, model: ModelHandle, index: usize) -> (VariableHandle, VariableHandle);

    fn variable_attributes(&self, variable: VariableHandle) -> VariableAttributes;
    fn variable_long_path(&self, variable: VariableHandle) -> String;
    fn variable_output_name(&self, variable: VariableHandle) -> String;
    fn variable_output(&self, variable: VariableHandle) -> bool;
    fn variable_required(&self, variable: VariableHandle) -> bool;
    fn variable_background_value(&self, variable: VariableHandle) -> f64;
    fn variable_real_property(&self, variable: VariableHandle, name: &str, default: f64) -> f64;

    /// Variables that could act as master for `slave`.
    fn suitable_masters(&self, model: ModelHandle, slave: VariableHandle) -> LinkListHandle;
    fn link_list_count(&self, list: LinkListHandle) -> usize;
    /// Entry of a list by 1-based ordinal.
    fn link_list_index(&self, list: LinkListHandle, index: usize) -> VariableHandle;
    fn link_list_finalize(&self, list: LinkListHandle);

    fn real_parameter(&self, model: ModelHandle, index: usize, default: bool) -> f64;
    fn integer_parameter(&self, model: ModelHandle, index: usize, default: bool) -> i32;
    fn logical_parameter(&self, model: ModelHandle, index: usize, default: bool) -> bool;
    fn string_parameter(&self, model: ModelHandle, index: usize, default: bool) -> String;
    fn set_real_parameter(&self, model: ModelHandle, name: &str, value: f64);
    fn set_integer_parameter(&self, model: ModelHandle, name: &str, value: i32);
    fn set_logical_parameter(&self, model: ModelHandle, name: &str, value: bool);
    fn set_string_parameter(&self, model: ModelHandle, name: &str, value: &str);
    fn reset_parameter(&self, model: ModelHandle, index: usize);

    /// Link host memory as the values of the interior state variable with 1-based `index`.
    ///
    /// The core may write initial values into the linked memory.
    ///
    /// # Safety
    ///
    /// `data` must point to one value per interior cell and stay valid and unmoved until the
    /// variable is relinked, the model is reconfigured or the model is released.
    unsafe fn link_interior_state(&self, model: ModelHandle, index: usize, data: *mut f64);
    /// # Safety
    ///
    /// As for [`Backend::link_interior_state`], with one value per horizontal cell.
    unsafe fn link_surface_state(&self, model: ModelHandle, index: usize, data: *mut f64);
    /// # Safety
    ///
    /// As for [`Backend::link_interior_state`], with one value per horizontal cell.
    unsafe fn link_bottom_state(&self, model: ModelHandle, index: usize, data: *mut f64);
    /// Link host memory as the values of an interior dependency.
    ///
    /// # Safety
    ///
    /// `data` must point to one value per interior cell and stay valid and unmoved until the
    /// model is reconfigured or released.
    unsafe fn link_interior_data(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64);
    /// # Safety
    ///
    /// As for [`Backend::link_interior_data`], with one value per horizontal cell.
    unsafe fn link_horizontal_data(
        &self,
        model: ModelHandle,
        variable: VariableHandle,
        data: *mut f64,
    );
    /// # Safety
    ///
    /// As for [`Backend::link_interior_data`], with a single value.
    unsafe fn link_scalar(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64);

    /// Finalize dependency linking and prepare the model for evaluation.
    fn start(&self, model: ModelHandle);
    /// Core-owned values of an interior diagnostic, `None` if the diagnostic is inactive.
    fn interior_diagnostic_data(&self, model: ModelHandle, index: usize) -> Option<NonNull<f64>>;
    fn horizontal_diagnostic_data(&self, model: ModelHandle, index: usize)
        -> Option<NonNull<f64>>;
    fn get_sources(
        &self,
        model: ModelHandle,
        time: f64,
        sources: SourceTerms<'_>,
        cell_thickness: Option<&[f64]>,
    );
    /// Check whether the linked state lies within its valid range, optionally clipping it.
    fn check_state(&self, model: ModelHandle, repair: bool) -> bool;
    /// Integrate a 0-dimensional model with a fixed time step.
    ///
    /// Cores without an integrator return [`FabmError::Unsupported`].
    fn integrate(&self, model: ModelHandle, integration: Integration<'_>) -> FabmResult<()>;
}

/// Turn a raised error flag into an error, resetting the flag.
pub(crate) fn take_error(backend: &dyn Backend) -> FabmResult<()> {
    if backend.error_state() {
        let message = backend.error_message();
        backend.reset_error_state();
        return Err(FabmError::Native(message));
    }
    Ok(())
}

/// A list of suitable masters that is finalized when dropped.
pub struct MasterList<'a> {
    backend: &'a dyn Backend,
    list: LinkListHandle,
}

impl<'a> MasterList<'a> {
    pub fn new(backend: &'a dyn Backend, model: ModelHandle, slave: VariableHandle) -> Self {
        let list = backend.suitable_masters(model, slave);
        Self { backend, list }
    }

    pub fn len(&self) -> usize {
        self.backend.link_list_count(self.list)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = VariableHandle> + '_ {
        (1..=self.len()).map(move |i| self.backend.link_list_index(self.list, i))
    }
}

impl Drop for MasterList<'_> {
    fn drop(&mut self) {
        self.backend.link_list_finalize(self.list);
    }
}
