//! Binding to a compiled model core through its C entry points.
//!
//! Locating and loading the shared library is left to the caller, who fills an [`FabmApi`]
//! table with the exported functions (for example through `dlsym`). [`NativeBackend`] checks
//! that the library was built for a supported domain layout and adapts the C calling
//! conventions to the [`Backend`] trait:
//!
//! - handles are opaque pointers, carried around as integers,
//! - text crosses as NUL-terminated single-byte strings in fixed-size buffers,
//! - counts, ordinals and flags are C `int`s.

use fabm_core::backend::{
    Backend, Counts, Integration, LinkListHandle, ModelHandle, ParameterMetadata, SourceTerms,
    SubModelMetadata, VariableAttributes, VariableCategory, VariableHandle, VariableMetadata,
    ATTRIBUTE_LENGTH,
};
use fabm_core::{FabmError, FabmResult};
use log::debug;
use std::ffi::{c_char, c_int, c_void, CString};
use std::ptr::{self, NonNull};
use std::sync::{Mutex, PoisonError};

/// Size of the buffer receiving error messages.
pub const ERROR_LENGTH: usize = 1024;

/// Opaque pointer to a model, variable or list inside the core.
pub type RawHandle = *mut c_void;

/// `create_model`, whose arity depends on the rank the library was built for.
#[derive(Clone, Copy)]
pub enum CreateModelFn {
    /// 0-dimensional domains: only the configuration path.
    Point(unsafe extern "C" fn(path: *const c_char) -> RawHandle),
    /// 1-dimensional domains: the path and the number of cells.
    Column(unsafe extern "C" fn(path: *const c_char, extent: c_int) -> RawHandle),
}

impl CreateModelFn {
    pub fn rank(&self) -> usize {
        match self {
            CreateModelFn::Point(_) => 0,
            CreateModelFn::Column(_) => 1,
        }
    }
}

/// Entry points exported by a compiled core.
#[derive(Clone, Copy)]
pub struct FabmApi {
    pub get_driver_settings: unsafe extern "C" fn(ndim: *mut c_int, idepthdim: *mut c_int),
    pub get_version: unsafe extern "C" fn(length: c_int, version: *mut c_char),
    pub create_model: CreateModelFn,
    pub release_model: unsafe extern "C" fn(model: RawHandle),
    pub get_counts: unsafe extern "C" fn(
        model: RawHandle,
        nstate_interior: *mut c_int,
        nstate_surface: *mut c_int,
        nstate_bottom: *mut c_int,
        ndiag_interior: *mut c_int,
        ndiag_horizontal: *mut c_int,
        ndependencies_interior: *mut c_int,
        ndependencies_horizontal: *mut c_int,
        ndependencies_scalar: *mut c_int,
        nconserved: *mut c_int,
        nparameters: *mut c_int,
        ncouplings: *mut c_int,
    ),
    pub get_variable_metadata: unsafe extern "C" fn(
        model: RawHandle,
        category: c_int,
        index: c_int,
        length: c_int,
        name: *mut c_char,
        units: *mut c_char,
        long_name: *mut c_char,
        path: *mut c_char,
    ),
    pub get_variable:
        unsafe extern "C" fn(model: RawHandle, category: c_int, index: c_int) -> RawHandle,
    pub get_parameter_metadata: unsafe extern "C" fn(
        model: RawHandle,
        index: c_int,
        length: c_int,
        name: *mut c_char,
        units: *mut c_char,
        long_name: *mut c_char,
        type_code: *mut c_int,
        has_default: *mut c_int,
    ),
    pub get_model_metadata: unsafe extern "C" fn(
        model: RawHandle,
        name: *const c_char,
        length: c_int,
        long_name: *mut c_char,
        user_created: *mut c_int,
    ),
    pub get_coupling: unsafe extern "C" fn(
        model: RawHandle,
        index: c_int,
        slave: *mut RawHandle,
        master: *mut RawHandle,
    ),
    pub get_error_state: unsafe extern "C" fn() -> c_int,
    pub get_error: unsafe extern "C" fn(length: c_int, message: *mut c_char),
    pub reset_error_state: unsafe extern "C" fn(),

    pub variable_get_metadata: unsafe extern "C" fn(
        variable: RawHandle,
        length: c_int,
        name: *mut c_char,
        units: *mut c_char,
        long_name: *mut c_char,
    ),
    pub variable_get_long_path:
        unsafe extern "C" fn(variable: RawHandle, length: c_int, long_path: *mut c_char),
    pub variable_get_output_name:
        unsafe extern "C" fn(variable: RawHandle, length: c_int, output_name: *mut c_char),
    pub variable_get_output: unsafe extern "C" fn(variable: RawHandle) -> c_int,
    pub variable_is_required: unsafe extern "C" fn(variable: RawHandle) -> c_int,
    pub variable_get_background_value: unsafe extern "C" fn(variable: RawHandle) -> f64,
    pub variable_get_real_property:
        unsafe extern "C" fn(variable: RawHandle, name: *const c_char, default: f64) -> f64,
    pub variable_get_suitable_masters:
        unsafe extern "C" fn(model: RawHandle, variable: RawHandle) -> RawHandle,

    pub link_list_count: unsafe extern "C" fn(list: RawHandle) -> c_int,
    pub link_list_index: unsafe extern "C" fn(list: RawHandle, index: c_int) -> RawHandle,
    pub link_list_finalize: unsafe extern "C" fn(list: RawHandle),

    pub get_real_parameter:
        unsafe extern "C" fn(model: RawHandle, index: c_int, default: c_int) -> f64,
    pub get_integer_parameter:
        unsafe extern "C" fn(model: RawHandle, index: c_int, default: c_int) -> c_int,
    pub get_logical_parameter:
        unsafe extern "C" fn(model: RawHandle, index: c_int, default: c_int) -> c_int,
    pub get_string_parameter: unsafe extern "C" fn(
        model: RawHandle,
        index: c_int,
        default: c_int,
        length: c_int,
        value: *mut c_char,
    ),
    pub reset_parameter: unsafe extern "C" fn(model: RawHandle, index: c_int),
    pub set_real_parameter: unsafe extern "C" fn(model: RawHandle, name: *const c_char, value: f64),
    pub set_integer_parameter:
        unsafe extern "C" fn(model: RawHandle, name: *const c_char, value: c_int),
    pub set_logical_parameter:
        unsafe extern "C" fn(model: RawHandle, name: *const c_char, value: c_int),
    pub set_string_parameter:
        unsafe extern "C" fn(model: RawHandle, name: *const c_char, value: *const c_char),

    pub link_interior_state_data:
        unsafe extern "C" fn(model: RawHandle, index: c_int, data: *mut f64),
    pub link_surface_state_data:
        unsafe extern "C" fn(model: RawHandle, index: c_int, data: *mut f64),
    pub link_bottom_state_data:
        unsafe extern "C" fn(model: RawHandle, index: c_int, data: *mut f64),
    pub link_interior_data:
        unsafe extern "C" fn(model: RawHandle, variable: RawHandle, data: *mut f64),
    pub link_horizontal_data:
        unsafe extern "C" fn(model: RawHandle, variable: RawHandle, data: *mut f64),
    pub link_scalar: unsafe extern "C" fn(model: RawHandle, variable: RawHandle, data: *mut f64),

    pub get_interior_diagnostic_data:
        unsafe extern "C" fn(model: RawHandle, index: c_int) -> *mut f64,
    pub get_horizontal_diagnostic_data:
        unsafe extern "C" fn(model: RawHandle, index: c_int) -> *mut f64,

    pub start: unsafe extern "C" fn(model: RawHandle),
    pub get_sources: unsafe extern "C" fn(
        model: RawHandle,
        time: f64,
        interior: *mut f64,
        surface: *mut f64,
        bottom: *mut f64,
        include_surface: c_int,
        include_bottom: c_int,
        cell_thickness: *const f64,
    ),
    pub check_state: unsafe extern "C" fn(model: RawHandle, repair: c_int) -> c_int,
    /// Only exported by cores built for 0-dimensional domains.
    pub integrate: Option<
        unsafe extern "C" fn(
            model: RawHandle,
            ntime: c_int,
            nstate: c_int,
            times: *const f64,
            initial_state: *const f64,
            output: *mut f64,
            time_step: f64,
            include_surface: c_int,
            include_bottom: c_int,
            cell_thickness: *const f64,
        ),
    >,
}

/// Check the layout a library was built for, returning the rank of its domains.
///
/// Only libraries without a depth dimension are supported (`idepthdim == -1`), and the rank
/// must match the form of `create_model`.
pub fn check_driver_settings(
    ndim: c_int,
    idepthdim: c_int,
    create_model: &CreateModelFn,
) -> FabmResult<usize> {
    if idepthdim != -1 {
        return Err(FabmError::Unsupported(format!(
            "Only spatial domains without a depth dimension are supported (depth index {})",
            idepthdim
        )));
    }
    if usize::try_from(ndim).ok() != Some(create_model.rank()) {
        return Err(FabmError::Unsupported(format!(
            "Library reports {} spatial dimensions but its create_model takes {} extents",
            ndim,
            create_model.rank()
        )));
    }
    Ok(create_model.rank())
}

/// A [`Backend`] calling into a compiled core.
pub struct NativeBackend {
    api: FabmApi,
    rank: usize,
    /// Failure raised on the host side of the boundary, reported like a core error.
    host_error: Mutex<Option<String>>,
}

impl NativeBackend {
    /// Wrap a library after checking its driver settings.
    ///
    /// # Safety
    ///
    /// Every function in `api` must be the matching export of one loaded library, which
    /// must stay loaded for as long as the backend or any model created through it exists.
    pub unsafe fn new(api: FabmApi) -> FabmResult<Self> {
        let mut ndim: c_int = 0;
        let mut idepthdim: c_int = 0;
        (api.get_driver_settings)(&mut ndim, &mut idepthdim);
        let rank = check_driver_settings(ndim, idepthdim, &api.create_model)?;
        debug!("Loaded model core for {}-dimensional domains", rank);
        Ok(Self {
            api,
            rank,
            host_error: Mutex::new(None),
        })
    }

    fn raise(&self, message: String) {
        let mut error = self.host_error.lock().unwrap_or_else(PoisonError::into_inner);
        error.get_or_insert(message);
    }

    /// Encode text for the core, raising the error flag if it cannot be represented.
    fn encode(&self, text: &str) -> Option<CString> {
        match CString::new(text) {
            Ok(text) => Some(text),
            Err(_) => {
                self.raise(FabmError::InvalidText(text.to_string()).to_string());
                None
            }
        }
    }
}

fn model_ptr(model: ModelHandle) -> RawHandle {
    model.as_raw() as RawHandle
}

fn variable_ptr(variable: VariableHandle) -> RawHandle {
    variable.as_raw() as RawHandle
}

fn list_ptr(list: LinkListHandle) -> RawHandle {
    list.as_raw() as RawHandle
}

fn ordinal(index: usize) -> c_int {
    c_int::try_from(index).unwrap_or(c_int::MAX)
}

fn count(value: c_int) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn flag(value: bool) -> c_int {
    c_int::from(value)
}

/// A zeroed buffer receiving a NUL-terminated string from the core.
struct Text(Vec<c_char>);

impl Text {
    fn new(length: usize) -> Self {
        Self(vec![0; length])
    }

    fn attribute() -> Self {
        Self::new(ATTRIBUTE_LENGTH)
    }

    fn length(&self) -> c_int {
        ordinal(self.0.len())
    }

    fn as_mut_ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr()
    }

    /// Contents up to the first NUL, one character per byte.
    fn decode(&self) -> String {
        self.0
            .iter()
            .take_while(|&&byte| byte != 0)
            .map(|&byte| char::from(byte as u8))
            .collect()
    }
}

impl Backend for NativeBackend {
    fn domain_rank(&self) -> usize {
        self.rank
    }

    fn version(&self) -> String {
        let mut version = Text::attribute();
        // SAFETY: the buffer holds `length` bytes.
        unsafe { (self.api.get_version)(version.length(), version.as_mut_ptr()) };
        version.decode()
    }

    fn create_model(&self, path: &str, domain_shape: &[usize]) -> FabmResult<ModelHandle> {
        let path = CString::new(path).map_err(|_| FabmError::InvalidText(path.to_string()))?;
        let model = match (self.api.create_model, domain_shape) {
            // SAFETY: `path` is NUL-terminated and outlives the call.
            (CreateModelFn::Point(create), []) => unsafe { create(path.as_ptr()) },
            (CreateModelFn::Column(create), [extent]) => {
                let extent = c_int::try_from(*extent)
                    .map_err(|_| FabmError::InvalidDomainShape(domain_shape.to_vec()))?;
                // SAFETY: as above.
                unsafe { create(path.as_ptr(), extent) }
            }
            _ => return Err(FabmError::InvalidDomainShape(domain_shape.to_vec())),
        };
        Ok(ModelHandle::from_raw(model as usize))
    }

    fn release_model(&self, model: ModelHandle) {
        if !model.is_null() {
            // SAFETY: the handle was returned by `create_model` and is released once.
            unsafe { (self.api.release_model)(model_ptr(model)) }
        }
    }

    fn error_state(&self) -> bool {
        let host = self
            .host_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        // SAFETY: no arguments.
        host || unsafe { (self.api.get_error_state)() } != 0
    }

    fn error_message(&self) -> String {
        let host = self
            .host_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(message) = host {
            return message;
        }
        let mut message = Text::new(ERROR_LENGTH);
        // SAFETY: the buffer holds `length` bytes.
        unsafe { (self.api.get_error)(message.length(), message.as_mut_ptr()) };
        message.decode()
    }

    fn reset_error_state(&self) {
        *self.host_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        // SAFETY: no arguments.
        unsafe { (self.api.reset_error_state)() }
    }

    fn counts(&self, model: ModelHandle) -> Counts {
        let mut n = [0 as c_int; 11];
        let [a, b, c, d, e, f, g, h, i, j, k] = &mut n;
        // SAFETY: every output points to a distinct local integer.
        unsafe { (self.api.get_counts)(model_ptr(model), a, b, c, d, e, f, g, h, i, j, k) };
        Counts {
            interior_state: count(n[0]),
            surface_state: count(n[1]),
            bottom_state: count(n[2]),
            interior_diagnostic: count(n[3]),
            horizontal_diagnostic: count(n[4]),
            interior_dependency: count(n[5]),
            horizontal_dependency: count(n[6]),
            scalar_dependency: count(n[7]),
            conserved: count(n[8]),
            parameters: count(n[9]),
            couplings: count(n[10]),
        }
    }

    fn variable_metadata(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        index: usize,
    ) -> VariableMetadata {
        let [mut name, mut units, mut long_name, mut path] = [(); 4].map(|_| Text::attribute());
        // SAFETY: all buffers hold `ATTRIBUTE_LENGTH` bytes.
        unsafe {
            (self.api.get_variable_metadata)(
                model_ptr(model),
                category.code(),
                ordinal(index),
                name.length(),
                name.as_mut_ptr(),
                units.as_mut_ptr(),
                long_name.as_mut_ptr(),
                path.as_mut_ptr(),
            )
        };
        VariableMetadata {
            name: name.decode(),
            units: units.decode(),
            long_name: long_name.decode(),
            path: path.decode(),
        }
    }

    fn variable(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        index: usize,
    ) -> VariableHandle {
        // SAFETY: plain values only.
        let variable =
            unsafe { (self.api.get_variable)(model_ptr(model), category.code(), ordinal(index)) };
        VariableHandle::from_raw(variable as usize)
    }

    fn parameter_metadata(&self, model: ModelHandle, index: usize) -> ParameterMetadata {
        let [mut name, mut units, mut long_name] = [(); 3].map(|_| Text::attribute());
        let mut type_code: c_int = 0;
        let mut has_default: c_int = 0;
        // SAFETY: all buffers hold `ATTRIBUTE_LENGTH` bytes, the integers are locals.
        unsafe {
            (self.api.get_parameter_metadata)(
                model_ptr(model),
                ordinal(index),
                name.length(),
                name.as_mut_ptr(),
                units.as_mut_ptr(),
                long_name.as_mut_ptr(),
                &mut type_code,
                &mut has_default,
            )
        };
        ParameterMetadata {
            name: name.decode(),
            units: units.decode(),
            long_name: long_name.decode(),
            type_code,
            has_default: has_default != 0,
        }
    }

    fn model_metadata(&self, model: ModelHandle, name: &str) -> SubModelMetadata {
        let Some(name) = self.encode(name) else {
            return SubModelMetadata::default();
        };
        let mut long_name = Text::attribute();
        let mut user_created: c_int = 0;
        // SAFETY: `name` is NUL-terminated, the buffer holds `length` bytes.
        unsafe {
            (self.api.get_model_metadata)(
                model_ptr(model),
                name.as_ptr(),
                long_name.length(),
                long_name.as_mut_ptr(),
                &mut user_created,
            )
        };
        SubModelMetadata {
            long_name: long_name.decode(),
            user_created: user_created != 0,
        }
    }

    fn coupling(&self, model: ModelHandle, index: usize) -> (VariableHandle, VariableHandle) {
        let mut slave: RawHandle = ptr::null_mut();
        let mut master: RawHandle = ptr::null_mut();
        // SAFETY: both outputs are locals.
        unsafe { (self.api.get_coupling)(model_ptr(model), ordinal(index), &mut slave, &mut master) };
        (
            VariableHandle::from_raw(slave as usize),
            VariableHandle::from_raw(master as usize),
        )
    }

    fn variable_attributes(&self, variable: VariableHandle) -> VariableAttributes {
        let [mut name, mut units, mut long_name] = [(); 3].map(|_| Text::attribute());
        // SAFETY: all buffers hold `ATTRIBUTE_LENGTH` bytes.
        unsafe {
            (self.api.variable_get_metadata)(
                variable_ptr(variable),
                name.length(),
                name.as_mut_ptr(),
                units.as_mut_ptr(),
                long_name.as_mut_ptr(),
            )
        };
        VariableAttributes {
            name: name.decode(),
            units: units.decode(),
            long_name: long_name.decode(),
        }
    }

    fn variable_long_path(&self, variable: VariableHandle) -> String {
        let mut path = Text::attribute();
        // SAFETY: the buffer holds `length` bytes.
        unsafe {
            (self.api.variable_get_long_path)(variable_ptr(variable), path.length(), path.as_mut_ptr())
        };
        path.decode()
    }

    fn variable_output_name(&self, variable: VariableHandle) -> String {
        let mut name = Text::attribute();
        // SAFETY: the buffer holds `length` bytes.
        unsafe {
            (self.api.variable_get_output_name)(variable_ptr(variable), name.length(), name.as_mut_ptr())
        };
        name.decode()
    }

    fn variable_output(&self, variable: VariableHandle) -> bool {
        // SAFETY: plain values only.
        unsafe { (self.api.variable_get_output)(variable_ptr(variable)) != 0 }
    }

    fn variable_required(&self, variable: VariableHandle) -> bool {
        // SAFETY: plain values only.
        unsafe { (self.api.variable_is_required)(variable_ptr(variable)) != 0 }
    }

    fn variable_background_value(&self, variable: VariableHandle) -> f64 {
        // SAFETY: plain values only.
        unsafe { (self.api.variable_get_background_value)(variable_ptr(variable)) }
    }

    fn variable_real_property(&self, variable: VariableHandle, name: &str, default: f64) -> f64 {
        let Some(name) = self.encode(name) else {
            return default;
        };
        // SAFETY: `name` is NUL-terminated and outlives the call.
        unsafe {
            (self.api.variable_get_real_property)(variable_ptr(variable), name.as_ptr(), default)
        }
    }

    fn suitable_masters(&self, model: ModelHandle, slave: VariableHandle) -> LinkListHandle {
        // SAFETY: plain values only.
        let list = unsafe {
            (self.api.variable_get_suitable_masters)(model_ptr(model), variable_ptr(slave))
        };
        LinkListHandle::from_raw(list as usize)
    }

    fn link_list_count(&self, list: LinkListHandle) -> usize {
        // SAFETY: plain values only.
        count(unsafe { (self.api.link_list_count)(list_ptr(list)) })
    }

    fn link_list_index(&self, list: LinkListHandle, index: usize) -> VariableHandle {
        // SAFETY: plain values only.
        let variable = unsafe { (self.api.link_list_index)(list_ptr(list), ordinal(index)) };
        VariableHandle::from_raw(variable as usize)
    }

    fn link_list_finalize(&self, list: LinkListHandle) {
        // SAFETY: the list is finalized once, by its guard.
        unsafe { (self.api.link_list_finalize)(list_ptr(list)) }
    }

    fn real_parameter(&self, model: ModelHandle, index: usize, default: bool) -> f64 {
        // SAFETY: plain values only.
        unsafe { (self.api.get_real_parameter)(model_ptr(model), ordinal(index), flag(default)) }
    }

    fn integer_parameter(&self, model: ModelHandle, index: usize, default: bool) -> i32 {
        // SAFETY: plain values only.
        unsafe {
            (self.api.get_integer_parameter)(model_ptr(model), ordinal(index), flag(default))
        }
    }

    fn logical_parameter(&self, model: ModelHandle, index: usize, default: bool) -> bool {
        // SAFETY: plain values only.
        unsafe {
            (self.api.get_logical_parameter)(model_ptr(model), ordinal(index), flag(default)) != 0
        }
    }

    fn string_parameter(&self, model: ModelHandle, index: usize, default: bool) -> String {
        let mut value = Text::attribute();
        // SAFETY: the buffer holds `length` bytes.
        unsafe {
            (self.api.get_string_parameter)(
                model_ptr(model),
                ordinal(index),
                flag(default),
                value.length(),
                value.as_mut_ptr(),
            )
        };
        value.decode()
    }

    fn set_real_parameter(&self, model: ModelHandle, name: &str, value: f64) {
        if let Some(name) = self.encode(name) {
            // SAFETY: `name` is NUL-terminated and outlives the call.
            unsafe { (self.api.set_real_parameter)(model_ptr(model), name.as_ptr(), value) }
        }
    }

    fn set_integer_parameter(&self, model: ModelHandle, name: &str, value: i32) {
        if let Some(name) = self.encode(name) {
            // SAFETY: as above.
            unsafe { (self.api.set_integer_parameter)(model_ptr(model), name.as_ptr(), value) }
        }
    }

    fn set_logical_parameter(&self, model: ModelHandle, name: &str, value: bool) {
        if let Some(name) = self.encode(name) {
            // SAFETY: as above.
            unsafe {
                (self.api.set_logical_parameter)(model_ptr(model), name.as_ptr(), flag(value))
            }
        }
    }

    fn set_string_parameter(&self, model: ModelHandle, name: &str, value: &str) {
        if let (Some(name), Some(value)) = (self.encode(name), self.encode(value)) {
            // SAFETY: both strings are NUL-terminated and outlive the call.
            unsafe {
                (self.api.set_string_parameter)(model_ptr(model), name.as_ptr(), value.as_ptr())
            }
        }
    }

    fn reset_parameter(&self, model: ModelHandle, index: usize) {
        // SAFETY: plain values only.
        unsafe { (self.api.reset_parameter)(model_ptr(model), ordinal(index)) }
    }

    unsafe fn link_interior_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        (self.api.link_interior_state_data)(model_ptr(model), ordinal(index), data)
    }

    unsafe fn link_surface_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        (self.api.link_surface_state_data)(model_ptr(model), ordinal(index), data)
    }

    unsafe fn link_bottom_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        (self.api.link_bottom_state_data)(model_ptr(model), ordinal(index), data)
    }

    unsafe fn link_interior_data(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64) {
        (self.api.link_interior_data)(model_ptr(model), variable_ptr(variable), data)
    }

    unsafe fn link_horizontal_data(
        &self,
        model: ModelHandle,
        variable: VariableHandle,
        data: *mut f64,
    ) {
        (self.api.link_horizontal_data)(model_ptr(model), variable_ptr(variable), data)
    }

    unsafe fn link_scalar(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64) {
        (self.api.link_scalar)(model_ptr(model), variable_ptr(variable), data)
    }

    fn start(&self, model: ModelHandle) {
        // SAFETY: plain values only.
        unsafe { (self.api.start)(model_ptr(model)) }
    }

    fn interior_diagnostic_data(&self, model: ModelHandle, index: usize) -> Option<NonNull<f64>> {
        // SAFETY: plain values only. The core owns the returned buffer.
        NonNull::new(unsafe {
            (self.api.get_interior_diagnostic_data)(model_ptr(model), ordinal(index))
        })
    }

    fn horizontal_diagnostic_data(
        &self,
        model: ModelHandle,
        index: usize,
    ) -> Option<NonNull<f64>> {
        // SAFETY: as above.
        NonNull::new(unsafe {
            (self.api.get_horizontal_diagnostic_data)(model_ptr(model), ordinal(index))
        })
    }

    fn get_sources(
        &self,
        model: ModelHandle,
        time: f64,
        sources: SourceTerms<'_>,
        cell_thickness: Option<&[f64]>,
    ) {
        let thickness = cell_thickness.map_or(ptr::null(), <[f64]>::as_ptr);
        // SAFETY: the source buffers are sized by the host from the counts of the current
        // configuration. Without a thickness neither boundary is requested.
        unsafe {
            (self.api.get_sources)(
                model_ptr(model),
                time,
                sources.interior.as_mut_ptr(),
                sources.surface.as_mut_ptr(),
                sources.bottom.as_mut_ptr(),
                flag(sources.include_surface),
                flag(sources.include_bottom),
                thickness,
            )
        }
    }

    fn check_state(&self, model: ModelHandle, repair: bool) -> bool {
        // SAFETY: plain values only; the core works on the linked state.
        unsafe { (self.api.check_state)(model_ptr(model), flag(repair)) != 0 }
    }

    fn integrate(&self, model: ModelHandle, integration: Integration<'_>) -> FabmResult<()> {
        let Some(integrate) = self.api.integrate else {
            return Err(FabmError::Unsupported(
                "This library does not provide an integrator".to_string(),
            ));
        };
        let Integration {
            times,
            initial_state,
            output,
            time_step,
            include_surface,
            include_bottom,
            cell_thickness,
        } = integration;
        let n = initial_state.len();
        if output.len() != times.len() * n {
            return Err(FabmError::ShapeMismatch {
                expected: vec![times.len(), n],
                found: vec![output.len()],
            });
        }
        // SAFETY: `output` holds one row of `n` values per time, as checked above.
        unsafe {
            integrate(
                model_ptr(model),
                ordinal(times.len()),
                ordinal(n),
                times.as_ptr(),
                initial_state.as_ptr(),
                output.as_mut_ptr(),
                time_step,
                flag(include_surface),
                flag(include_bottom),
                cell_thickness.as_ptr(),
            )
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests;
