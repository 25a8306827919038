//! End-to-end tests of the public binding API.
//!
//! A host configures a model, supplies its inputs, starts it and evaluates it, reconfiguring
//! along the way. Everything runs against the in-process core.

use fabm_core::example_backend::ExampleBackend;
use fabm_core::parameter::ParameterValue;
use fabm_core::snapshot::Snapshot;
use fabm_core::variable::Variable;
use fabm_core::{BindingContext, FabmError, Model, ModelBuilder, StartMode};
use is_close::is_close;
use std::sync::Arc;

fn context() -> BindingContext {
    BindingContext::new()
        .with_backend(Arc::new(ExampleBackend::new(0)))
        .unwrap()
        .with_backend(Arc::new(ExampleBackend::new(1)))
        .unwrap()
}

mod host_workflow {
    use super::*;

    /// Configure, fill, start and evaluate a point model.
    #[test]
    fn test_point_model_from_builder() {
        let context = context();
        let mut model = ModelBuilder::new("fabm.yaml")
            .with_parameter("det/n", 2)
            .with_dependency("temperature", 20.0)
            .with_dependency("light", 1.0)
            .with_cell_thickness(5.0)
            .build(&context)
            .unwrap();

        assert_eq!(model.state().shape(), &[6]);
        let readiness = model.start(StartMode::default()).unwrap();
        assert!(readiness.is_ready());

        let rates = model.rates().unwrap();
        // Mortality is split evenly over the detritus pools
        assert!(is_close!(rates[[2]], 0.05 / 2.0));
        assert!(is_close!(rates[[3]], 0.05 / 2.0));
    }

    /// A host that forgets an input learns every missing name at once.
    #[test]
    fn test_missing_inputs_then_retry() {
        let context = context();
        let mut model = Model::new(&context, "fabm.yaml", &[2]).unwrap();

        let readiness = model.start(StartMode::Lenient).unwrap();
        assert_eq!(readiness.missing, vec!["temperature", "light"]);

        for dependency in ["temperature", "light"] {
            model.set_dependency(dependency, 1.0).unwrap();
        }
        assert!(model.start(StartMode::Lenient).unwrap().is_ready());
        assert_eq!(model.get_rates(Some(0.0), false, false).unwrap().shape(), &[5, 2]);
    }

    /// Values set before a reconfiguration are still in place after it.
    #[test]
    fn test_reconfiguration_keeps_inputs() {
        let context = context();
        let mut model = ModelBuilder::new("fabm.yaml")
            .with_dependency("temperature", 10.0)
            .with_dependency("light", 0.5)
            .with_cell_thickness(1.0)
            .build(&context)
            .unwrap();
        model.set_state("phy", 0.25).unwrap();
        model.start(StartMode::Strict).unwrap();

        model.set_parameter_by_name("phy/title", "diatoms").unwrap();

        assert!(!model.is_started());
        assert_eq!(
            model.find_state_variable("phy", false).unwrap().long_name(),
            "diatoms"
        );
        let phy = model.find_state_variable("phy", false).unwrap().index();
        assert!(is_close!(model.state_value(phy).unwrap().sum(), 0.25));
        assert!(model.start(StartMode::Strict).unwrap().is_ready());
    }
}

mod settings {
    use super::*;

    /// Snapshots serialize to JSON and can be restored into another model.
    #[test]
    fn test_snapshot_transfer() {
        let context = context();
        let mut source = Model::new(&context, "fabm.yaml", &[]).unwrap();
        source.set_dependency("temperature", 14.0).unwrap();
        source.set_state("nut", 7.0).unwrap();

        let json = serde_json::to_string(&source.save_settings()).unwrap();
        let snapshot: Snapshot = serde_json::from_str(&json).unwrap();

        let mut target = Model::new(&context, "fabm.yaml", &[]).unwrap();
        target.restore_settings(&snapshot);

        let temperature = target.find_dependency("temperature", false).unwrap();
        assert!(temperature.is_set());
        assert!(!target.find_dependency("light", false).unwrap().is_set());
        assert!(is_close!(target.state_value(0).unwrap().sum(), 7.0));
    }

    /// Parameters keep their type across the boundary.
    #[test]
    fn test_parameter_types() {
        let context = context();
        let model = Model::new(&context, "fabm.yaml", &[]).unwrap();

        let values: Vec<ParameterValue> = model
            .parameters()
            .iter()
            .map(|parameter| parameter.value().unwrap())
            .collect();
        assert_eq!(values[0], ParameterValue::Real(1.0));
        assert_eq!(values[6], ParameterValue::Logical(true));
        assert_eq!(values[7], ParameterValue::Integer(1));
        assert_eq!(values[8], ParameterValue::String("phytoplankton".to_string()));
    }
}

mod failures {
    use super::*;

    /// Contexts without a core for the requested rank cannot create models.
    #[test]
    fn test_empty_context() {
        let context = BindingContext::new();
        assert!(matches!(
            Model::new(&context, "fabm.yaml", &[]),
            Err(FabmError::NoBackend(0))
        ));
    }

    /// A failed write is reported and leaves a usable model.
    #[test]
    fn test_rejected_parameter() {
        let context = context();
        let mut model = Model::new(&context, "fabm.yaml", &[]).unwrap();

        let err = model.set_parameter_by_name("det/n", -2).unwrap_err();
        assert!(matches!(err, FabmError::Native(_)));

        model.set_parameter_by_name("det/n", 2).unwrap();
        assert_eq!(model.counts().interior_state, 4);
    }
}
