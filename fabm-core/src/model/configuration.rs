use super::{lookup::LookupTables, Model, TIME_UNSET};
use crate::backend::VariableCategory;
use crate::errors::FabmResult;
use crate::parameter::ParameterType;
use crate::snapshot::{SavedDependency, Snapshot};
use crate::variable::{
    ConservedQuantity, Coupling, Dependency, DependencyDomain, DiagnosticDomain,
    DiagnosticVariable, Linked, Parameter, StateDomain, StateVariable, Variable, VariableInfo,
};
use log::debug;
use ndarray::{ArrayD, Axis, IxDyn};
use std::sync::Arc;

const STATE_CATEGORIES: [(VariableCategory, StateDomain); 3] = [
    (VariableCategory::InteriorState, StateDomain::Interior),
    (VariableCategory::SurfaceState, StateDomain::Surface),
    (VariableCategory::BottomState, StateDomain::Bottom),
];

const DIAGNOSTIC_CATEGORIES: [(VariableCategory, DiagnosticDomain); 2] = [
    (VariableCategory::InteriorDiagnostic, DiagnosticDomain::Interior),
    (VariableCategory::HorizontalDiagnostic, DiagnosticDomain::Horizontal),
];

const DEPENDENCY_CATEGORIES: [(VariableCategory, DependencyDomain); 3] = [
    (VariableCategory::InteriorDependency, DependencyDomain::Interior),
    (VariableCategory::HorizontalDependency, DependencyDomain::Horizontal),
    (VariableCategory::ScalarDependency, DependencyDomain::Scalar),
];

impl Model {
    /// Rebuild everything that depends on the shape of the variable graph.
    ///
    /// Descriptors are queried first and arrays are reallocated and relinked only once every
    /// query has succeeded, so a failed rebuild leaves the previous configuration in place
    /// (stopped, with its diagnostics unbound). When `settings` is given, values are restored
    /// by name afterwards.
    pub fn update_configuration(&mut self, settings: Option<&Snapshot>) -> FabmResult<()> {
        let backend = Arc::clone(&self.backend);
        let model = self.handle;

        // Diagnostic data belongs to the previous graph
        self.started = false;
        for diagnostic in self.diagnostic_variables.iter_mut() {
            diagnostic.bind(None);
        }

        let counts = backend.counts(model);
        self.check_error()?;

        let linked = |category, ordinal| {
            Linked::new(
                Arc::clone(&backend),
                backend.variable(model, category, ordinal),
            )
        };

        let mut state_variables = Vec::with_capacity(counts.state());
        for (category, domain) in STATE_CATEGORIES {
            for ordinal in 1..=counts.of(category) {
                let index = state_variables.len();
                state_variables.push(StateVariable::new(linked(category, ordinal), domain, index));
            }
        }

        let mut diagnostic_variables = Vec::with_capacity(counts.diagnostics());
        for (category, domain) in DIAGNOSTIC_CATEGORIES {
            for ordinal in 1..=counts.of(category) {
                diagnostic_variables.push(DiagnosticVariable::new(
                    linked(category, ordinal),
                    domain,
                    ordinal,
                ));
            }
        }

        let mut dependencies = Vec::with_capacity(counts.dependencies());
        for (category, domain) in DEPENDENCY_CATEGORIES {
            for ordinal in 1..=counts.of(category) {
                let index = dependencies.len();
                dependencies.push(Dependency::new(linked(category, ordinal), domain, index));
            }
        }

        let conserved_quantities: Vec<ConservedQuantity> = (1..=counts.conserved)
            .map(|ordinal| {
                let metadata =
                    backend.variable_metadata(model, VariableCategory::ConservedQuantity, ordinal);
                ConservedQuantity::new(VariableInfo::new(
                    metadata.name,
                    metadata.units,
                    metadata.long_name,
                    metadata.path,
                ))
            })
            .collect();

        let mut parameters = Vec::with_capacity(counts.parameters);
        for index in 1..=counts.parameters {
            let metadata = backend.parameter_metadata(model, index);
            let kind = ParameterType::try_from(metadata.type_code)?;
            let info = VariableInfo::new(metadata.name, metadata.units, metadata.long_name, "");
            parameters.push(Parameter::new(
                info,
                Arc::clone(&backend),
                model,
                index,
                kind,
                metadata.has_default,
            ));
        }

        let couplings: Vec<Coupling> = (1..=counts.couplings)
            .map(|index| {
                let (slave, master) = backend.coupling(model, index);
                Coupling::new(Arc::clone(&backend), model, slave, master)
            })
            .collect();
        self.check_error()?;

        // Nothing below can fail before the new generation is complete
        self.counts = counts;
        self.state_variables = state_variables;
        self.diagnostic_variables = diagnostic_variables;
        self.dependencies = dependencies;
        self.conserved_quantities = conserved_quantities;
        self.parameters = parameters;
        self.couplings = couplings;
        self.lookup = LookupTables::default();
        self.state = ArrayD::zeros(self.stacked_shape(counts.state()));
        self.dependency_data = ArrayD::zeros(self.stacked_shape(counts.dependencies()));
        self.link_state();

        if let Some(settings) = settings {
            self.restore_settings(settings);
        }

        self.time = TIME_UNSET;
        self.generation += 1;
        debug!(
            "Configured {} (generation {}): {} state, {} diagnostic, {} dependency, {} parameter",
            self.path,
            self.generation,
            counts.state(),
            counts.diagnostics(),
            counts.dependencies(),
            counts.parameters
        );
        self.check_error()
    }

    /// Hand every row of the state array to the core.
    fn link_state(&mut self) {
        let backend = Arc::clone(&self.backend);
        let model = self.handle;
        let counts = self.counts;
        let cells = self.cell_count();
        let base = self.state.as_mut_ptr();
        let mut row = 0;
        for (category, _) in STATE_CATEGORIES {
            for ordinal in 1..=counts.of(category) {
                // SAFETY: `row < counts.state()`, so the row lies inside the state array, which
                // is neither moved nor reallocated until the next rebuild.
                unsafe {
                    let data = base.add(row * cells);
                    match category {
                        VariableCategory::InteriorState => {
                            backend.link_interior_state(model, ordinal, data)
                        }
                        VariableCategory::SurfaceState => {
                            backend.link_surface_state(model, ordinal, data)
                        }
                        _ => backend.link_bottom_state(model, ordinal, data),
                    }
                }
                row += 1;
            }
        }
        debug!("Linked {} state variables of {}", row, self.path);
    }

    /// Capture the values of every dependency and state variable by name.
    pub fn save_settings(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for dependency in &self.dependencies {
            let value = self.dependency_data.index_axis(Axis(0), dependency.index());
            snapshot.dependencies.insert(
                dependency.name().to_string(),
                SavedDependency {
                    value: value.to_owned(),
                    is_set: dependency.is_set(),
                },
            );
        }
        for variable in &self.state_variables {
            let value = self.state.index_axis(Axis(0), variable.index());
            snapshot
                .state
                .insert(variable.name().to_string(), value.to_owned());
        }
        snapshot
    }

    /// Restore values by name.
    ///
    /// Names unknown to the current configuration are ignored. Objects without a saved value,
    /// or whose saved value does not fit the domain, keep their current value.
    pub fn restore_settings(&mut self, settings: &Snapshot) {
        for dependency in self.dependencies.iter_mut() {
            let Some(saved) = settings.dependency(dependency.name()) else {
                continue;
            };
            let mut target = self.dependency_data.index_axis_mut(Axis(0), dependency.index());
            if target.shape() == saved.value.shape() {
                target.assign(&saved.value);
                dependency.mark_set(saved.is_set);
            }
        }
        for variable in &self.state_variables {
            let Some(saved) = settings.state_value(variable.name()) else {
                continue;
            };
            let mut target = self.state.index_axis_mut(Axis(0), variable.index());
            if target.shape() == saved.shape() {
                target.assign(saved);
            }
        }
    }

    fn stacked_shape(&self, rows: usize) -> IxDyn {
        let mut shape = Vec::with_capacity(self.domain_shape.len() + 1);
        shape.push(rows);
        shape.extend_from_slice(&self.domain_shape);
        IxDyn(&shape)
    }
}
