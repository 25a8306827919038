use super::point_model;
use crate::backend::Backend;
use crate::errors::FabmError;
use crate::model::StartMode;
use is_close::is_close;

#[test]
fn every_missing_dependency_is_reported() {
    let (mut model, backend) = point_model();

    let readiness = model.start(StartMode::Lenient).unwrap();

    assert!(!readiness.is_ready());
    assert_eq!(readiness.missing, vec!["temperature", "light"]);
    assert_eq!(backend.start_calls(), 1);
    assert_eq!(
        readiness.start_error.as_deref(),
        Some("dependency temperature is not linked")
    );
    assert!(!model.is_started());
    assert!(matches!(model.rates(), Err(FabmError::NotStarted)));
}

#[test]
fn lenient_mode_still_starts_the_core() {
    let (mut model, backend) = point_model();
    model.set_dependency("temperature", 20.0).unwrap();

    let readiness = model.start(StartMode::Lenient).unwrap();

    assert_eq!(backend.start_calls(), 1);
    assert_eq!(readiness.missing, vec!["light"]);
    assert_eq!(
        readiness.start_error.as_deref(),
        Some("dependency light is not linked")
    );
    assert!(!backend.error_state());
    assert_eq!(
        backend.linked_values(model.handle(), "temperature"),
        Some(vec![20.0])
    );
    assert!(!model.is_started());
}

#[test]
fn lenient_mode_binds_diagnostics_of_a_started_core() {
    let (mut model, backend) = point_model();
    model.set_parameter_by_name("phy/use_light", false).unwrap();

    let readiness = model.start(StartMode::Lenient).unwrap();
    assert_eq!(readiness.missing, vec!["temperature"]);
    assert!(readiness.start_error.is_some());

    model.set_dependency("temperature", 20.0).unwrap();
    let readiness = model.start(StartMode::Lenient).unwrap();
    assert!(readiness.is_ready());
    assert_eq!(backend.start_calls(), 2);
    let chl = model.find_diagnostic_variable("chl", false).unwrap();
    assert!(chl.value().is_some());
}

#[test]
fn strict_mode_fails_with_the_full_list() {
    let (mut model, backend) = point_model();
    model.set_dependency("light", 1.0).unwrap();

    let err = model.start(StartMode::Strict).unwrap_err();

    assert!(
        matches!(err, FabmError::UnsetDependencies(ref names) if names == &["temperature"])
    );
    assert_eq!(
        err.to_string(),
        "Not all dependencies have been fulfilled: temperature"
    );
    assert_eq!(backend.start_calls(), 0);
}

#[test]
fn ready_once_dependencies_are_set() {
    let (mut model, backend) = point_model();
    assert!(!model.start(StartMode::Lenient).unwrap().is_ready());

    model.set_dependency("temperature", 12.0).unwrap();
    model.set_dependency("light", 0.6).unwrap();
    let readiness = model.start(StartMode::Lenient).unwrap();

    assert!(readiness.is_ready());
    assert!(model.is_started());
    assert_eq!(
        backend.linked_values(model.handle(), "temperature"),
        Some(vec![12.0])
    );
    // Optional dependencies stay unlinked
    assert_eq!(backend.linked_values(model.handle(), "wind_speed"), None);
}

#[test]
fn start_binds_active_diagnostics() {
    let (mut model, _) = point_model();
    model.set_parameter_by_name("phy/use_light", false).unwrap();
    model.set_dependency("temperature", 20.0).unwrap();

    assert!(model.start(StartMode::Strict).unwrap().is_ready());

    let inactive = model
        .find_diagnostic_variable("light_limitation", false)
        .unwrap();
    assert!(inactive.value().is_none());
    let chl = model.find_diagnostic_variable("chl", false).unwrap();
    assert_eq!(chl.value().unwrap().shape(), &[] as &[usize]);
    let burial = model.horizontal_diagnostic_variables();
    assert_eq!(burial.len(), 1);
    assert!(burial[0].value().is_some());
}

#[test]
fn diagnostics_follow_evaluation() {
    let (mut model, _) = point_model();
    model.set_dependency("temperature", 20.0).unwrap();
    model.set_dependency("light", 0.8).unwrap();
    model.start(StartMode::Strict).unwrap();

    model.get_rates(None, false, false).unwrap();

    let limitation = model
        .find_diagnostic_variable("light_limitation", false)
        .unwrap()
        .value()
        .unwrap()
        .sum();
    assert!(is_close!(limitation, 0.8));
    let chl = model
        .find_diagnostic_variable("chl", false)
        .unwrap()
        .value()
        .unwrap()
        .sum();
    assert!(is_close!(chl, 0.01));
}

#[test]
fn diagnostic_copies_outlive_evaluation() {
    let (mut model, _) = point_model();
    model.set_dependency("temperature", 20.0).unwrap();
    model.set_dependency("light", 1.0).unwrap();
    model.start(StartMode::Strict).unwrap();

    let before = model
        .find_diagnostic_variable("light_limitation", false)
        .unwrap()
        .value()
        .unwrap()
        .to_owned();
    model.get_rates(None, false, false).unwrap();
    let after = model
        .find_diagnostic_variable("light_limitation", false)
        .unwrap()
        .value()
        .unwrap()
        .to_owned();

    assert_eq!(before.sum(), 0.0);
    assert!(is_close!(after.sum(), 1.0));
}

#[test]
fn native_start_failure_is_not_an_error() {
    let (mut model, backend) = point_model();
    model.set_parameter_by_name("phy/mu", -1.0).unwrap();
    model.set_dependency("temperature", 20.0).unwrap();
    model.set_dependency("light", 1.0).unwrap();

    let readiness = model.start(StartMode::Strict).unwrap();

    assert!(!readiness.is_ready());
    assert!(readiness.missing.is_empty());
    assert!(readiness
        .start_error
        .as_deref()
        .is_some_and(|message| message.contains("phy/mu")));
    assert!(!backend.error_state());
    assert!(!model.is_started());

    model.set_parameter_by_name("phy/mu", 1.0).unwrap();
    assert!(model.start(StartMode::Strict).unwrap().is_ready());
}
