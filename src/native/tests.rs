//! Tests against a small C-ABI core defined here.
//!
//! The core serves one interior state variable `nut` (initial value 2) decaying at rate
//! `nut/k`, plus a string parameter `nut/title`. Its state lives in a thread local so tests
//! running in parallel do not share it.

use super::*;
use fabm_core::variable::Variable;
use fabm_core::{BindingContext, Model, Simulator, StartMode};
use std::cell::RefCell;
use std::ffi::CStr;
use std::sync::Arc;

const MODEL: usize = 0x10;
const NUT: usize = 0x20;

struct Fake {
    error: Option<String>,
    state: *mut f64,
    rate: f64,
    title: String,
    released: usize,
}

impl Default for Fake {
    fn default() -> Self {
        Self {
            error: None,
            state: ptr::null_mut(),
            rate: 0.1,
            title: "nutrient".to_string(),
            released: 0,
        }
    }
}

thread_local! {
    static FAKE: RefCell<Fake> = RefCell::new(Fake::default());
}

fn with<R>(f: impl FnOnce(&mut Fake) -> R) -> R {
    FAKE.with(|fake| f(&mut fake.borrow_mut()))
}

fn fail(message: String) {
    with(|fake| {
        fake.error.get_or_insert(message);
    })
}

unsafe fn write(buffer: *mut c_char, length: c_int, text: &str) {
    let n = text.len().min(count(length).saturating_sub(1));
    ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, buffer, n);
    *buffer.add(n) = 0;
}

unsafe fn read(text: *const c_char) -> String {
    CStr::from_ptr(text).to_string_lossy().into_owned()
}

unsafe extern "C" fn get_driver_settings(ndim: *mut c_int, idepthdim: *mut c_int) {
    *ndim = 0;
    *idepthdim = -1;
}

unsafe extern "C" fn get_version(length: c_int, version: *mut c_char) {
    write(version, length, "fake core 0.1");
}

unsafe extern "C" fn create_model(path: *const c_char) -> RawHandle {
    let path = read(path);
    if path.ends_with(".yaml") {
        MODEL as RawHandle
    } else {
        fail(format!("cannot parse {}", path));
        ptr::null_mut()
    }
}

unsafe extern "C" fn release_model(_model: RawHandle) {
    with(|fake| fake.released += 1);
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn get_counts(
    _model: RawHandle,
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
) {
    *nstate_interior = 1;
    for empty in [
        nstate_surface,
        nstate_bottom,
        ndiag_interior,
        ndiag_horizontal,
        ndependencies_interior,
        ndependencies_horizontal,
        ndependencies_scalar,
        nconserved,
        ncouplings,
    ] {
        *empty = 0;
    }
    *nparameters = 2;
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn get_variable_metadata(
    _model: RawHandle,
    category: c_int,
    index: c_int,
    _length: c_int,
    _name: *mut c_char,
    _units: *mut c_char,
    _long_name: *mut c_char,
    _path: *mut c_char,
) {
    fail(format!("no variable {} in category {}", index, category));
}

unsafe extern "C" fn get_variable(_model: RawHandle, category: c_int, index: c_int) -> RawHandle {
    if category == VariableCategory::InteriorState.code() && index == 1 {
        NUT as RawHandle
    } else {
        fail(format!("no variable {} in category {}", index, category));
        ptr::null_mut()
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn get_parameter_metadata(
    _model: RawHandle,
    index: c_int,
    length: c_int,
    name: *mut c_char,
    units: *mut c_char,
    long_name: *mut c_char,
    type_code: *mut c_int,
    has_default: *mut c_int,
) {
    let (n, u, l, t) = match index {
        1 => ("nut/k", "d-1", "decay rate", 1),
        2 => ("nut/title", "", "display name", 4),
        _ => return fail(format!("no parameter {}", index)),
    };
    write(name, length, n);
    write(units, length, u);
    write(long_name, length, l);
    *type_code = t;
    *has_default = 1;
}

unsafe extern "C" fn get_model_metadata(
    _model: RawHandle,
    name: *const c_char,
    length: c_int,
    long_name: *mut c_char,
    user_created: *mut c_int,
) {
    write(long_name, length, &read(name));
    *user_created = 1;
}

unsafe extern "C" fn get_coupling(
    _model: RawHandle,
    index: c_int,
    _slave: *mut RawHandle,
    _master: *mut RawHandle,
) {
    fail(format!("no coupling {}", index));
}

unsafe extern "C" fn get_error_state() -> c_int {
    with(|fake| c_int::from(fake.error.is_some()))
}

unsafe extern "C" fn get_error(length: c_int, message: *mut c_char) {
    let error = with(|fake| fake.error.clone().unwrap_or_default());
    write(message, length, &error);
}

unsafe extern "C" fn reset_error_state() {
    with(|fake| fake.error = None);
}

unsafe extern "C" fn variable_get_metadata(
    _variable: RawHandle,
    length: c_int,
    name: *mut c_char,
    units: *mut c_char,
    long_name: *mut c_char,
) {
    write(name, length, "nut");
    write(units, length, "mmol m-3");
    let title = with(|fake| fake.title.clone());
    write(long_name, length, &title);
}

unsafe extern "C" fn variable_get_long_path(_variable: RawHandle, length: c_int, path: *mut c_char) {
    write(path, length, "nut/nutrient");
}

unsafe extern "C" fn variable_get_output_name(
    _variable: RawHandle,
    length: c_int,
    name: *mut c_char,
) {
    write(name, length, "nut_c");
}

unsafe extern "C" fn variable_get_output(_variable: RawHandle) -> c_int {
    1
}

unsafe extern "C" fn variable_is_required(_variable: RawHandle) -> c_int {
    0
}

unsafe extern "C" fn variable_get_background_value(_variable: RawHandle) -> f64 {
    0.25
}

unsafe extern "C" fn variable_get_real_property(
    _variable: RawHandle,
    _name: *const c_char,
    default: f64,
) -> f64 {
    default
}

unsafe extern "C" fn variable_get_suitable_masters(
    _model: RawHandle,
    _variable: RawHandle,
) -> RawHandle {
    ptr::null_mut()
}

unsafe extern "C" fn link_list_count(_list: RawHandle) -> c_int {
    0
}

unsafe extern "C" fn link_list_index(_list: RawHandle, index: c_int) -> RawHandle {
    fail(format!("no entry {}", index));
    ptr::null_mut()
}

unsafe extern "C" fn link_list_finalize(_list: RawHandle) {}

unsafe extern "C" fn get_real_parameter(_model: RawHandle, _index: c_int, default: c_int) -> f64 {
    if default != 0 {
        0.1
    } else {
        with(|fake| fake.rate)
    }
}

unsafe extern "C" fn get_integer_parameter(_model: RawHandle, index: c_int, _default: c_int) -> c_int {
    fail(format!("parameter {} is not an integer", index));
    0
}

unsafe extern "C" fn get_logical_parameter(_model: RawHandle, index: c_int, _default: c_int) -> c_int {
    fail(format!("parameter {} is not a logical", index));
    0
}

unsafe extern "C" fn get_string_parameter(
    _model: RawHandle,
    _index: c_int,
    default: c_int,
    length: c_int,
    value: *mut c_char,
) {
    let title = if default != 0 {
        "nutrient".to_string()
    } else {
        with(|fake| fake.title.clone())
    };
    write(value, length, &title);
}

unsafe extern "C" fn reset_parameter(_model: RawHandle, index: c_int) {
    match index {
        1 => with(|fake| fake.rate = 0.1),
        2 => with(|fake| fake.title = "nutrient".to_string()),
        _ => fail(format!("no parameter {}", index)),
    }
}

unsafe extern "C" fn set_real_parameter(_model: RawHandle, name: *const c_char, value: f64) {
    match read(name).as_str() {
        "nut/k" => with(|fake| fake.rate = value),
        other => fail(format!("{} is not a real parameter", other)),
    }
}

unsafe extern "C" fn set_integer_parameter(_model: RawHandle, name: *const c_char, _value: c_int) {
    fail(format!("{} is not an integer parameter", read(name)));
}

unsafe extern "C" fn set_logical_parameter(_model: RawHandle, name: *const c_char, _value: c_int) {
    fail(format!("{} is not a logical parameter", read(name)));
}

unsafe extern "C" fn set_string_parameter(
    _model: RawHandle,
    name: *const c_char,
    value: *const c_char,
) {
    match read(name).as_str() {
        "nut/title" => {
            let title = read(value);
            with(|fake| fake.title = title)
        }
        other => fail(format!("{} is not a string parameter", other)),
    }
}

unsafe extern "C" fn link_interior_state_data(_model: RawHandle, _index: c_int, data: *mut f64) {
    *data = 2.0;
    with(|fake| fake.state = data);
}

unsafe extern "C" fn link_state_data(_model: RawHandle, index: c_int, _data: *mut f64) {
    fail(format!("no boundary state variable {}", index));
}

unsafe extern "C" fn link_data(_model: RawHandle, _variable: RawHandle, _data: *mut f64) {
    fail("no dependencies".to_string());
}

unsafe extern "C" fn get_diagnostic_data(_model: RawHandle, _index: c_int) -> *mut f64 {
    ptr::null_mut()
}

unsafe extern "C" fn start(_model: RawHandle) {}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn get_sources(
    _model: RawHandle,
    _time: f64,
    interior: *mut f64,
    _surface: *mut f64,
    _bottom: *mut f64,
    _include_surface: c_int,
    _include_bottom: c_int,
    _cell_thickness: *const f64,
) {
    let (state, rate) = with(|fake| (fake.state, fake.rate));
    *interior = -rate * *state;
}

unsafe extern "C" fn check_state(_model: RawHandle, repair: c_int) -> c_int {
    let state = with(|fake| fake.state);
    if *state >= 0.0 {
        return 1;
    }
    if repair != 0 {
        *state = 0.0;
    }
    0
}

/// Writes `initial + time` for every output time.
#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn integrate(
    _model: RawHandle,
    ntime: c_int,
    nstate: c_int,
    times: *const f64,
    initial_state: *const f64,
    output: *mut f64,
    _time_step: f64,
    _include_surface: c_int,
    _include_bottom: c_int,
    _cell_thickness: *const f64,
) {
    let (ntime, nstate) = (count(ntime), count(nstate));
    for k in 0..ntime {
        for i in 0..nstate {
            *output.add(k * nstate + i) = *initial_state.add(i) + *times.add(k);
        }
    }
}

fn api() -> FabmApi {
    FabmApi {
        get_driver_settings,
        get_version,
        create_model: CreateModelFn::Point(create_model),
        release_model,
        get_counts,
        get_variable_metadata,
        get_variable,
        get_parameter_metadata,
        get_model_metadata,
        get_coupling,
        get_error_state,
        get_error,
        reset_error_state,
        variable_get_metadata,
        variable_get_long_path,
        variable_get_output_name,
        variable_get_output,
        variable_is_required,
        variable_get_background_value,
        variable_get_real_property,
        variable_get_suitable_masters,
        link_list_count,
        link_list_index,
        link_list_finalize,
        get_real_parameter,
        get_integer_parameter,
        get_logical_parameter,
        get_string_parameter,
        reset_parameter,
        set_real_parameter,
        set_integer_parameter,
        set_logical_parameter,
        set_string_parameter,
        link_interior_state_data,
        link_surface_state_data: link_state_data,
        link_bottom_state_data: link_state_data,
        link_interior_data: link_data,
        link_horizontal_data: link_data,
        link_scalar: link_data,
        get_interior_diagnostic_data: get_diagnostic_data,
        get_horizontal_diagnostic_data: get_diagnostic_data,
        start,
        get_sources,
        check_state,
        integrate: Some(integrate),
    }
}

fn backend() -> Arc<NativeBackend> {
    // SAFETY: every entry point comes from this module.
    Arc::new(unsafe { NativeBackend::new(api()) }.unwrap())
}

fn context() -> BindingContext {
    BindingContext::new().with_backend(backend()).unwrap()
}

#[test]
fn driver_settings() {
    let point = CreateModelFn::Point(create_model);
    assert_eq!(check_driver_settings(0, -1, &point).unwrap(), 0);

    let err = check_driver_settings(0, 1, &point).unwrap_err();
    assert!(matches!(err, FabmError::Unsupported(ref message) if message.contains("depth")));

    let err = check_driver_settings(1, -1, &point).unwrap_err();
    assert!(matches!(err, FabmError::Unsupported(_)));
}

#[test]
fn text_stops_at_the_first_nul() {
    let mut text = Text::new(8);
    text.0[..7].copy_from_slice(&[b'a', b'b', 0, b'c', b'd', b'e', b'f'].map(|b| b as c_char));
    assert_eq!(text.decode(), "ab");

    let mut text = Text::new(3);
    text.0.copy_from_slice(&[b'c', 0xE9, b'x'].map(|b| b as c_char));
    assert_eq!(text.decode(), "c\u{e9}x");
}

#[test]
fn version_is_read_through_a_buffer() {
    let context = context();
    assert_eq!(context.version(0).unwrap(), "fake core 0.1");
}

#[test]
fn model_lifecycle() {
    let context = context();
    let mut model = Model::new(&context, "fake.yaml", &[]).unwrap();

    assert_eq!(model.state().as_slice(), Some(&[2.0][..]));
    let nut = model.find_state_variable("nut", false).unwrap();
    assert_eq!(nut.long_path(), "nut/nutrient");
    assert_eq!(nut.output_name(), "nut_c");
    assert_eq!(nut.background_value(), 0.25);

    model.set_state("nut", 3.0).unwrap();
    model.set_parameter_by_name("nut/k", 0.5).unwrap();
    model.set_parameter_by_name("nut/title", "nitrate").unwrap();
    assert_eq!(model.state().as_slice(), Some(&[3.0][..]));
    assert_eq!(
        model.find_state_variable("nut", false).unwrap().long_name(),
        "nitrate"
    );

    assert!(model.start(StartMode::Strict).unwrap().is_ready());
    let rates = model.rates().unwrap();
    assert_eq!(rates.as_slice(), Some(&[-1.5][..]));

    model.set_state("nut", -1.0).unwrap();
    assert!(!model.check_state(true).unwrap());
    assert_eq!(model.state().as_slice(), Some(&[0.0][..]));

    drop(model);
    assert_eq!(with(|fake| fake.released), 1);
}

#[test]
fn integration_goes_through_the_core() {
    let context = context();
    let mut model = Model::new(&context, "fake.yaml", &[]).unwrap();
    model.set_cell_thickness(1.0);
    model.start(StartMode::Strict).unwrap();

    let mut simulator = Simulator::new(&mut model).unwrap();
    let result = simulator
        .integrate(&[2.0], &[0.0, 1.0, 5.0], 0.5, true, true)
        .unwrap();
    assert_eq!(result.column(0).to_vec(), vec![2.0, 3.0, 7.0]);
}

#[test]
fn missing_integrator() {
    let mut api = api();
    api.integrate = None;
    // SAFETY: every entry point comes from this module.
    let backend = unsafe { NativeBackend::new(api) }.unwrap();

    let mut output = [0.0; 2];
    let err = backend
        .integrate(
            ModelHandle::from_raw(MODEL),
            Integration {
                times: &[0.0, 1.0],
                initial_state: &[2.0],
                output: &mut output,
                time_step: 0.1,
                include_surface: false,
                include_bottom: false,
                cell_thickness: &[1.0],
            },
        )
        .unwrap_err();
    assert!(matches!(err, FabmError::Unsupported(_)));
}

#[test]
fn core_errors_are_polled() {
    let context = context();
    let err = Model::new(&context, "fake.nml", &[]).unwrap_err();

    assert!(matches!(err, FabmError::Configuration { ref message, .. } if message == "cannot parse fake.nml"));
    assert!(with(|fake| fake.error.is_none()));

    let backend = backend();
    backend.set_logical_parameter(ModelHandle::from_raw(MODEL), "nut/k", true);
    assert!(backend.error_state());
    assert_eq!(backend.error_message(), "nut/k is not a logical parameter");
    backend.reset_error_state();
    assert!(!backend.error_state());
}

#[test]
fn text_with_nul_never_reaches_the_core() {
    let backend = backend();
    let nut = VariableHandle::from_raw(NUT);

    assert_eq!(backend.variable_real_property(nut, "vertical\0movement", 7.0), 7.0);
    assert!(backend.error_state());
    assert!(backend.error_message().contains("NUL"));
    assert!(with(|fake| fake.error.is_none()));

    backend.reset_error_state();
    assert!(!backend.error_state());
    assert!(matches!(
        backend.create_model("fa\0ke.yaml", &[]),
        Err(FabmError::InvalidText(_))
    ));
}

#[test]
fn shapes_must_match_the_library() {
    let backend = backend();
    assert!(matches!(
        backend.create_model("fake.yaml", &[3]),
        Err(FabmError::InvalidDomainShape(ref shape)) if shape == &[3]
    ));
}
