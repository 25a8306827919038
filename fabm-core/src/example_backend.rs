//! An in-process model core.
//!
//! Implements the [`Backend`] contract without a native library: a small nutrient,
//! phytoplankton and detritus model with a surface slick and a sediment pool. It is used to
//! test the binding layer and to exercise host code without a compiled core.
//!
//! Configuration documents are not read. Any path ending in `.yaml` yields the same model,
//! whose shape is controlled by its parameters:
//!
//! | parameter       | type    | effect                                                 |
//! |-----------------|---------|--------------------------------------------------------|
//! | `phy/use_light` | logical | adds the `light` dependency and activates `light_limitation` |
//! | `det/n`         | integer | number of detritus pools `det1..detN`                  |
//! | `phy/title`     | string  | long name of the phytoplankton                         |

use crate::backend::{
    Backend, Counts, Integration, LinkListHandle, ModelHandle, ParameterMetadata, SourceTerms,
    SubModelMetadata, VariableAttributes, VariableCategory, VariableHandle, VariableMetadata,
};
use crate::errors::{FabmError, FabmResult};
use crate::parameter::ParameterValue;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

const VERSION: &str = "example-core 1.0";

#[derive(Debug, Clone, Copy)]
enum Preset {
    Real(f64),
    Integer(i32),
    Logical(bool),
    Text(&'static str),
}

impl Preset {
    fn value(self) -> ParameterValue {
        match self {
            Preset::Real(v) => ParameterValue::Real(v),
            Preset::Integer(v) => ParameterValue::Integer(v),
            Preset::Logical(v) => ParameterValue::Logical(v),
            Preset::Text(v) => ParameterValue::String(v.to_string()),
        }
    }
}

struct ParameterSpec {
    name: &'static str,
    units: &'static str,
    long_name: &'static str,
    value: Preset,
    has_default: bool,
}

static PARAMETERS: [ParameterSpec; 10] = [
    ParameterSpec {
        name: "phy/mu",
        units: "d-1",
        long_name: "maximum growth rate",
        value: Preset::Real(1.0),
        has_default: true,
    },
    ParameterSpec {
        name: "phy/m",
        units: "d-1",
        long_name: "mortality rate",
        value: Preset::Real(0.1),
        has_default: true,
    },
    ParameterSpec {
        name: "det/r",
        units: "d-1",
        long_name: "remineralisation rate",
        value: Preset::Real(0.05),
        has_default: true,
    },
    ParameterSpec {
        name: "nut/input",
        units: "mmol m-3 d-1",
        long_name: "external nutrient input",
        value: Preset::Real(0.0),
        has_default: true,
    },
    ParameterSpec {
        name: "slick/decay",
        units: "d-1",
        long_name: "surface slick decay rate",
        value: Preset::Real(0.1),
        has_default: true,
    },
    ParameterSpec {
        name: "sed/burial",
        units: "d-1",
        long_name: "burial rate",
        value: Preset::Real(0.02),
        has_default: true,
    },
    ParameterSpec {
        name: "phy/use_light",
        units: "",
        long_name: "use light limitation",
        value: Preset::Logical(true),
        has_default: true,
    },
    ParameterSpec {
        name: "det/n",
        units: "",
        long_name: "number of detritus pools",
        value: Preset::Integer(1),
        has_default: true,
    },
    ParameterSpec {
        name: "phy/title",
        units: "",
        long_name: "display name",
        value: Preset::Text("phytoplankton"),
        has_default: true,
    },
    // Value taken from the configuration document; there is no built-in default
    ParameterSpec {
        name: "nut/initial",
        units: "mmol m-3",
        long_name: "initial nutrient concentration",
        value: Preset::Real(2.0),
        has_default: false,
    },
];

/// Sub-models of every configuration, with their long names.
static INSTANCES: [(&str, &str); 5] = [
    ("nut", "nutrient"),
    ("phy", ""),
    ("det", "detritus"),
    ("slick", "surface slick"),
    ("sed", "sediment"),
];

/// Host memory linked into the core.
#[derive(Debug, Clone, Copy)]
struct Link(*mut f64);

// SAFETY: the host guarantees the memory outlives the link (see the `link_*` entry points),
// and all access goes through the registry mutex.
unsafe impl Send for Link {}

impl Link {
    fn read(self, len: usize) -> Vec<f64> {
        // SAFETY: linked memory holds at least `len` values, as promised by the host.
        (0..len).map(|i| unsafe { *self.0.add(i) }).collect()
    }

    fn write(self, values: &[f64]) {
        for (i, value) in values.iter().enumerate() {
            // SAFETY: as for `read`.
            unsafe { *self.0.add(i) = *value }
        }
    }
}

#[derive(Debug, Clone)]
struct VariableSpec {
    name: String,
    units: &'static str,
    long_name: String,
    long_path: String,
    /// `None` for variables that only appear as the slave of a coupling.
    category: Option<VariableCategory>,
    initial: f64,
    background: f64,
    output: bool,
    required: bool,
    vertical_movement: Option<f64>,
}

impl VariableSpec {
    fn new(name: &str, units: &'static str, long_name: &str, category: VariableCategory) -> Self {
        Self {
            name: name.to_string(),
            units,
            long_name: long_name.to_string(),
            long_path: long_name.to_string(),
            category: Some(category),
            initial: 0.0,
            background: 0.0,
            output: true,
            required: false,
            vertical_movement: None,
        }
    }
}

struct Instance {
    cells: usize,
    values: Vec<ParameterValue>,
    variables: Vec<VariableSpec>,
    handles: Vec<usize>,
    links: Vec<Option<Link>>,
    diagnostics: HashMap<usize, Box<[f64]>>,
    started: bool,
    last_time: Option<f64>,
}

impl Instance {
    fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        PARAMETERS
            .iter()
            .position(|spec| spec.name == name)
            .map(|i| &self.values[i])
    }

    fn real(&self, name: &str) -> f64 {
        self.parameter(name)
            .and_then(ParameterValue::as_real)
            .unwrap_or_default()
    }

    fn logical(&self, name: &str) -> bool {
        self.parameter(name)
            .and_then(ParameterValue::as_logical)
            .unwrap_or_default()
    }

    fn detritus_pools(&self) -> usize {
        self.parameter("det/n")
            .and_then(ParameterValue::as_integer)
            .map_or(1, |n| n.max(1) as usize)
    }

    /// Variable graph for the current parameter values.
    fn graph(&self) -> Vec<VariableSpec> {
        use VariableCategory::*;

        let use_light = self.logical("phy/use_light");
        let title = self
            .parameter("phy/title")
            .and_then(ParameterValue::as_str)
            .unwrap_or("phytoplankton")
            .to_string();

        let mut graph = vec![];
        let mut nut = VariableSpec::new("nut", "mmol m-3", "nutrient", InteriorState);
        nut.initial = self.real("nut/initial");
        graph.push(nut);
        let mut phy = VariableSpec::new("phy", "mmol m-3", &title, InteriorState);
        phy.initial = 0.5;
        phy.background = 0.01;
        graph.push(phy);
        for i in 1..=self.detritus_pools() {
            let mut det = VariableSpec::new(
                &format!("det{}", i),
                "mmol m-3",
                &format!("detritus {}", i),
                InteriorState,
            );
            det.vertical_movement = Some(-1.0);
            graph.push(det);
        }
        let mut slick = VariableSpec::new("slick", "mmol m-2", "surface slick", SurfaceState);
        slick.initial = 1.0;
        graph.push(slick);
        let mut sed = VariableSpec::new("sed", "mmol m-2", "sediment", BottomState);
        sed.initial = 1.0;
        graph.push(sed);

        graph.push(VariableSpec::new(
            "light_limitation",
            "-",
            "light limitation",
            InteriorDiagnostic,
        ));
        let mut chl = VariableSpec::new("chl", "mg m-3", "chlorophyll", InteriorDiagnostic);
        chl.output = false;
        graph.push(chl);
        graph.push(VariableSpec::new(
            "burial_flux",
            "mmol m-2 d-1",
            "burial flux",
            HorizontalDiagnostic,
        ));

        let mut temperature =
            VariableSpec::new("temperature", "degree_Celsius", "temperature", InteriorDependency);
        temperature.required = true;
        graph.push(temperature);
        if use_light {
            let mut light = VariableSpec::new("light", "-", "relative light", InteriorDependency);
            light.required = true;
            graph.push(light);
        }
        graph.push(VariableSpec::new(
            "wind_speed",
            "m s-1",
            "wind speed",
            HorizontalDependency,
        ));
        graph.push(VariableSpec::new(
            "day_of_year",
            "d",
            "day of the year",
            ScalarDependency,
        ));

        let mut slave = VariableSpec::new("phy/nutrient", "mmol m-3", "nutrient source", InteriorState);
        slave.category = None;
        slave.long_path = format!("{}/nutrient source", title);
        graph.push(slave);
        graph
    }

    fn index_of(&self, category: VariableCategory, ordinal: usize) -> Option<usize> {
        if ordinal == 0 {
            return None;
        }
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.category == Some(category))
            .nth(ordinal - 1)
            .map(|(i, _)| i)
    }

    fn named(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|spec| spec.name == name)
    }

    fn count(&self, category: VariableCategory) -> usize {
        self.variables
            .iter()
            .filter(|spec| spec.category == Some(category))
            .count()
    }

    fn state_indices(&self) -> Vec<usize> {
        [
            VariableCategory::InteriorState,
            VariableCategory::SurfaceState,
            VariableCategory::BottomState,
        ]
        .iter()
        .flat_map(|&category| {
            self.variables
                .iter()
                .enumerate()
                .filter(move |(_, spec)| spec.category == Some(category))
                .map(|(i, _)| i)
        })
        .collect()
    }

    fn dependency(&self, name: &str, len: usize) -> Option<Vec<f64>> {
        let index = self.named(name)?;
        self.links[index].map(|link| link.read(len))
    }

    /// Linked state, row by row in interior, surface, bottom order.
    fn read_state(&self) -> Result<Vec<f64>, String> {
        let mut state = Vec::new();
        for index in self.state_indices() {
            let link = self.links[index]
                .ok_or_else(|| format!("state variable {} is not linked", self.variables[index].name))?;
            state.extend(link.read(self.cells));
        }
        Ok(state)
    }

    /// Source terms for `state`, laid out like it. Diagnostics are updated along the way.
    fn evaluate(
        &mut self,
        state: &[f64],
        sources: &mut [f64],
        include_surface: bool,
        include_bottom: bool,
        thickness: Option<&[f64]>,
    ) -> Result<(), String> {
        let cells = self.cells;
        let pools = self.detritus_pools();
        if state.len() != (pools + 4) * cells || sources.len() != state.len() {
            return Err("state does not match the model".to_string());
        }
        let thickness = match thickness {
            Some(h) if h.len() >= cells && h[..cells].iter().all(|&h| h > 0.0) => Some(h),
            _ if include_surface || include_bottom => {
                return Err("cell thickness must be positive".to_string())
            }
            _ => None,
        };

        let mu = self.real("phy/mu");
        let m = self.real("phy/m");
        let r = self.real("det/r");
        let input = self.real("nut/input");
        let decay = self.real("slick/decay");
        let burial = self.real("sed/burial");
        let temperature = self
            .dependency("temperature", cells)
            .ok_or("dependency temperature is not linked")?;
        let light = if self.logical("phy/use_light") {
            self.dependency("light", cells)
                .ok_or("dependency light is not linked")?
        } else {
            vec![1.0; cells]
        };
        let wind = self
            .dependency("wind_speed", cells)
            .unwrap_or_else(|| vec![0.0; cells]);

        let surface_row = (2 + pools) * cells;
        let bottom_row = (3 + pools) * cells;
        sources.fill(0.0);
        let mut light_limitation = vec![0.0; cells];
        let mut chlorophyll = vec![0.0; cells];
        let mut burial_flux = vec![0.0; cells];
        for c in 0..cells {
            let nut = state[c];
            let phy = state[cells + c];
            let temperature_factor = 2f64.powf((temperature[c] - 20.0) / 10.0);
            let growth = mu * light[c] * temperature_factor * nut / (nut + 1.0) * phy;
            let mortality = m * phy;

            let mut remineralisation = 0.0;
            for pool in 0..pools {
                let at = (2 + pool) * cells + c;
                remineralisation += r * state[at];
                sources[at] = mortality / pools as f64 - r * state[at];
            }
            sources[c] = input - growth + remineralisation;
            sources[cells + c] = growth - mortality;

            let slick = state[surface_row + c];
            let sed = state[bottom_row + c];
            if include_surface {
                sources[surface_row + c] = -decay * slick * (1.0 + wind[c]);
            }
            if let (true, Some(h)) = (include_bottom, thickness) {
                sources[bottom_row + c] = -burial * sed;
                sources[c] += burial * sed / h[c];
            }

            light_limitation[c] = light[c];
            chlorophyll[c] = 0.02 * phy;
            burial_flux[c] = burial * sed;
        }

        for (name, values) in [
            ("light_limitation", light_limitation),
            ("chl", chlorophyll),
            ("burial_flux", burial_flux),
        ] {
            let buffer = self
                .named(name)
                .and_then(|index| self.diagnostics.get_mut(&index));
            if let Some(buffer) = buffer {
                buffer.copy_from_slice(&values);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Registry {
    next_model: usize,
    next_variable: usize,
    next_list: usize,
    models: HashMap<usize, Instance>,
    /// Variable handle to (model, position in the model's graph).
    variables: HashMap<usize, (usize, usize)>,
    lists: HashMap<usize, Vec<VariableHandle>>,
    error: Option<String>,
    fault: Option<Fault>,
    start_calls: usize,
}

impl Registry {
    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    fn instance(&mut self, model: ModelHandle) -> Option<&mut Instance> {
        if !self.models.contains_key(&model.as_raw()) {
            self.fail(format!("invalid model handle {}", model.as_raw()));
        }
        self.models.get_mut(&model.as_raw())
    }

    fn variable(&mut self, variable: VariableHandle) -> Option<&VariableSpec> {
        let found = self
            .variables
            .get(&variable.as_raw())
            .and_then(|(model, index)| self.models.get(model)?.variables.get(*index));
        if found.is_none() {
            self.error
                .get_or_insert_with(|| format!("invalid variable handle {}", variable.as_raw()));
        }
        found
    }

    /// Recreate the variable graph of a model with fresh handles, dropping all links.
    fn rebuild(&mut self, id: usize) {
        let Some(instance) = self.models.get_mut(&id) else {
            return;
        };
        for handle in instance.handles.drain(..) {
            self.variables.remove(&handle);
        }
        instance.variables = instance.graph();
        instance.links = vec![None; instance.variables.len()];
        instance.diagnostics.clear();
        instance.started = false;
        instance.handles = (0..instance.variables.len())
            .map(|index| {
                self.next_variable += 1;
                self.variables.insert(self.next_variable, (id, index));
                self.next_variable
            })
            .collect();
    }

    fn set_parameter(&mut self, model: ModelHandle, name: &str, value: ParameterValue) {
        let Some(position) = PARAMETERS.iter().position(|spec| spec.name == name) else {
            self.fail(format!("parameter {} does not exist", name));
            return;
        };
        let expected = PARAMETERS[position].value.value().kind();
        if value.kind() != expected {
            self.fail(format!(
                "parameter {} has type {} but a {} value was given",
                name,
                expected,
                value.kind()
            ));
            return;
        }
        if name == "det/n" && value.as_integer().is_some_and(|n| n < 1) {
            self.fail("det/n must be at least 1");
            return;
        }
        if let Some(instance) = self.instance(model) {
            instance.values[position] = value;
            self.rebuild(model.as_raw());
        }
    }

    fn link_state(&mut self, model: ModelHandle, category: VariableCategory, ordinal: usize, data: *mut f64) {
        let Some(instance) = self.instance(model) else {
            return;
        };
        let Some(index) = instance.index_of(category, ordinal) else {
            self.fail(format!("no {:?} variable with index {}", category, ordinal));
            return;
        };
        let link = Link(data);
        link.write(&vec![instance.variables[index].initial; instance.cells]);
        instance.links[index] = Some(link);
    }

    fn link_data(
        &mut self,
        model: ModelHandle,
        variable: VariableHandle,
        category: VariableCategory,
        data: *mut f64,
    ) {
        match self.variables.get(&variable.as_raw()).copied() {
            Some((id, index)) if id == model.as_raw() => {
                let Some(instance) = self.models.get_mut(&id) else {
                    return;
                };
                if instance.variables[index].category == Some(category) {
                    instance.links[index] = Some(Link(data));
                } else {
                    let name = instance.variables[index].name.clone();
                    self.fail(format!("{} is not a {:?} variable", name, category));
                }
            }
            _ => self.fail(format!("invalid variable handle {}", variable.as_raw())),
        }
    }
}

/// Failures the reference core can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report a parameter type code no host knows.
    UnknownParameterType,
    /// Create the model, then flag its configuration as invalid.
    RejectConfiguration,
}

/// The reference core, serving domains of one rank.
pub struct ExampleBackend {
    rank: usize,
    registry: Mutex<Registry>,
}

impl ExampleBackend {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following call affected by `fault` misbehave, or restore normal service.
    pub fn inject(&self, fault: Option<Fault>) {
        self.lock().fault = fault;
    }

    /// Number of times the start entry point has been called.
    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    /// Number of models that have been created and not yet released.
    pub fn live_models(&self) -> usize {
        self.lock().models.len()
    }

    /// Number of link lists that have not been finalized.
    pub fn open_link_lists(&self) -> usize {
        self.lock().lists.len()
    }

    /// Time passed to the most recent rate evaluation of a model.
    pub fn last_time(&self, model: ModelHandle) -> Option<f64> {
        self.lock()
            .models
            .get(&model.as_raw())
            .and_then(|instance| instance.last_time)
    }

    /// Values the core currently sees in the memory linked for a variable.
    pub fn linked_values(&self, model: ModelHandle, name: &str) -> Option<Vec<f64>> {
        let registry = self.lock();
        let instance = registry.models.get(&model.as_raw())?;
        let index = instance.named(name)?;
        let len = match instance.variables[index].category {
            Some(VariableCategory::ScalarDependency) => 1,
            _ => instance.cells,
        };
        instance.links[index].map(|link| link.read(len))
    }
}

impl Backend for ExampleBackend {
    fn domain_rank(&self) -> usize {
        self.rank
    }

    fn version(&self) -> String {
        VERSION.to_string()
    }

    fn create_model(&self, path: &str, domain_shape: &[usize]) -> FabmResult<ModelHandle> {
        let mut registry = self.lock();
        if !path.ends_with(".yaml") {
            registry.fail(format!("{} is not a YAML configuration document", path));
            return Ok(ModelHandle::default());
        }
        if domain_shape.len() != self.rank {
            registry.fail(format!(
                "this core serves {}-dimensional domains, got shape {:?}",
                self.rank, domain_shape
            ));
            return Ok(ModelHandle::default());
        }

        registry.next_model += 1;
        let id = registry.next_model;
        registry.models.insert(
            id,
            Instance {
                cells: domain_shape.iter().product(),
                values: PARAMETERS.iter().map(|spec| spec.value.value()).collect(),
                variables: vec![],
                handles: vec![],
                links: vec![],
                diagnostics: HashMap::new(),
                started: false,
                last_time: None,
            },
        );
        registry.rebuild(id);
        if registry.fault == Some(Fault::RejectConfiguration) {
            registry.fail(format!("cannot parse {}", path));
        }
        Ok(ModelHandle::from_raw(id))
    }

    fn release_model(&self, model: ModelHandle) {
        let mut registry = self.lock();
        if let Some(instance) = registry.models.remove(&model.as_raw()) {
            for handle in instance.handles {
                registry.variables.remove(&handle);
            }
        }
    }

    fn error_state(&self) -> bool {
        self.lock().error.is_some()
    }

    fn error_message(&self) -> String {
        self.lock().error.clone().unwrap_or_default()
    }

    fn reset_error_state(&self) {
        self.lock().error = None;
    }

    fn counts(&self, model: ModelHandle) -> Counts {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return Counts::default();
        };
        Counts {
            interior_state: instance.count(VariableCategory::InteriorState),
            surface_state: instance.count(VariableCategory::SurfaceState),
            bottom_state: instance.count(VariableCategory::BottomState),
            interior_diagnostic: instance.count(VariableCategory::InteriorDiagnostic),
            horizontal_diagnostic: instance.count(VariableCategory::HorizontalDiagnostic),
            interior_dependency: instance.count(VariableCategory::InteriorDependency),
            horizontal_dependency: instance.count(VariableCategory::HorizontalDependency),
            scalar_dependency: instance.count(VariableCategory::ScalarDependency),
            conserved: 1,
            parameters: PARAMETERS.len(),
            couplings: 1,
        }
    }

    fn variable_metadata(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        index: usize,
    ) -> VariableMetadata {
        let mut registry = self.lock();
        if category == VariableCategory::ConservedQuantity {
            if index != 1 {
                registry.fail(format!("no conserved quantity with index {}", index));
                return VariableMetadata::default();
            }
            return VariableMetadata {
                name: "total_nitrogen".to_string(),
                units: "mmol m-3".to_string(),
                long_name: "total nitrogen".to_string(),
                path: "total_nitrogen".to_string(),
            };
        }
        let Some(instance) = registry.instance(model) else {
            return VariableMetadata::default();
        };
        match instance.index_of(category, index) {
            Some(i) => {
                let spec = &instance.variables[i];
                VariableMetadata {
                    name: spec.name.clone(),
                    units: spec.units.to_string(),
                    long_name: spec.long_name.clone(),
                    path: spec.name.clone(),
                }
            }
            None => {
                registry.fail(format!("no {:?} variable with index {}", category, index));
                VariableMetadata::default()
            }
        }
    }

    fn variable(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        index: usize,
    ) -> VariableHandle {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return VariableHandle::default();
        };
        match instance.index_of(category, index) {
            Some(i) => VariableHandle::from_raw(instance.handles[i]),
            None => {
                registry.fail(format!("no {:?} variable with index {}", category, index));
                VariableHandle::default()
            }
        }
    }

    fn parameter_metadata(&self, _model: ModelHandle, index: usize) -> ParameterMetadata {
        let fault = self.lock().fault;
        let Some(spec) = index.checked_sub(1).and_then(|i| PARAMETERS.get(i)) else {
            self.lock()
                .fail(format!("no parameter with index {}", index));
            return ParameterMetadata::default();
        };
        ParameterMetadata {
            name: spec.name.to_string(),
            units: spec.units.to_string(),
            long_name: spec.long_name.to_string(),
            type_code: match fault {
                Some(Fault::UnknownParameterType) => 99,
                _ => spec.value.value().kind().code(),
            },
            has_default: spec.has_default,
        }
    }

    fn model_metadata(&self, model: ModelHandle, name: &str) -> SubModelMetadata {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return SubModelMetadata::default();
        };
        if name.is_empty() {
            return SubModelMetadata {
                long_name: "model".to_string(),
                user_created: false,
            };
        }
        let title = instance
            .parameter("phy/title")
            .and_then(ParameterValue::as_str)
            .unwrap_or_default()
            .to_string();
        match INSTANCES.iter().find(|(instance, _)| *instance == name) {
            Some((_, long_name)) => SubModelMetadata {
                long_name: if long_name.is_empty() {
                    title
                } else {
                    long_name.to_string()
                },
                user_created: true,
            },
            None => {
                registry.fail(format!("no model instance named {}", name));
                SubModelMetadata::default()
            }
        }
    }

    fn coupling(&self, model: ModelHandle, index: usize) -> (VariableHandle, VariableHandle) {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return no_coupling();
        };
        let slave = instance.named("phy/nutrient");
        let master = instance.named("nut");
        match (index, slave, master) {
            (1, Some(slave), Some(master)) => (
                VariableHandle::from_raw(instance.handles[slave]),
                VariableHandle::from_raw(instance.handles[master]),
            ),
            _ => {
                registry.fail(format!("no coupling with index {}", index));
                no_coupling()
            }
        }
    }

    fn variable_attributes(&self, variable: VariableHandle) -> VariableAttributes {
        let mut registry = self.lock();
        registry
            .variable(variable)
            .map(|spec| VariableAttributes {
                name: spec.name.clone(),
                units: spec.units.to_string(),
                long_name: spec.long_name.clone(),
            })
            .unwrap_or_default()
    }

    fn variable_long_path(&self, variable: VariableHandle) -> String {
        let mut registry = self.lock();
        registry
            .variable(variable)
            .map(|spec| spec.long_path.clone())
            .unwrap_or_default()
    }

    fn variable_output_name(&self, variable: VariableHandle) -> String {
        let mut registry = self.lock();
        registry
            .variable(variable)
            .map(|spec| spec.name.clone())
            .unwrap_or_default()
    }

    fn variable_output(&self, variable: VariableHandle) -> bool {
        let mut registry = self.lock();
        registry.variable(variable).is_some_and(|spec| spec.output)
    }

    fn variable_required(&self, variable: VariableHandle) -> bool {
        let mut registry = self.lock();
        registry.variable(variable).is_some_and(|spec| spec.required)
    }

    fn variable_background_value(&self, variable: VariableHandle) -> f64 {
        let mut registry = self.lock();
        registry
            .variable(variable)
            .map(|spec| spec.background)
            .unwrap_or_default()
    }

    fn variable_real_property(&self, variable: VariableHandle, name: &str, default: f64) -> f64 {
        let mut registry = self.lock();
        match (registry.variable(variable), name) {
            (Some(spec), "vertical_movement") => spec.vertical_movement.unwrap_or(default),
            _ => default,
        }
    }

    fn suitable_masters(&self, model: ModelHandle, slave: VariableHandle) -> LinkListHandle {
        let mut registry = self.lock();
        let is_slave = registry
            .variable(slave)
            .is_some_and(|spec| spec.category.is_none());
        let Some(instance) = registry.instance(model) else {
            return LinkListHandle::default();
        };
        let masters: Vec<VariableHandle> = if is_slave {
            instance
                .variables
                .iter()
                .enumerate()
                .filter(|(_, spec)| {
                    spec.category == Some(VariableCategory::InteriorState) && spec.name != "phy"
                })
                .map(|(i, _)| VariableHandle::from_raw(instance.handles[i]))
                .collect()
        } else {
            vec![]
        };
        registry.next_list += 1;
        let list = registry.next_list;
        registry.lists.insert(list, masters);
        LinkListHandle::from_raw(list)
    }

    fn link_list_count(&self, list: LinkListHandle) -> usize {
        let mut registry = self.lock();
        match registry.lists.get(&list.as_raw()) {
            Some(entries) => entries.len(),
            None => {
                registry.fail(format!("invalid link list {}", list.as_raw()));
                0
            }
        }
    }

    fn link_list_index(&self, list: LinkListHandle, index: usize) -> VariableHandle {
        let mut registry = self.lock();
        let entry = registry
            .lists
            .get(&list.as_raw())
            .and_then(|entries| entries.get(index.wrapping_sub(1)))
            .copied();
        entry.unwrap_or_else(|| {
            registry.fail(format!("link list {} has no entry {}", list.as_raw(), index));
            VariableHandle::default()
        })
    }

    fn link_list_finalize(&self, list: LinkListHandle) {
        let mut registry = self.lock();
        if registry.lists.remove(&list.as_raw()).is_none() {
            registry.fail(format!("invalid link list {}", list.as_raw()));
        }
    }

    fn real_parameter(&self, model: ModelHandle, index: usize, default: bool) -> f64 {
        self.read_parameter(model, index, default)
            .and_then(|value| value.as_real())
            .unwrap_or_default()
    }

    fn integer_parameter(&self, model: ModelHandle, index: usize, default: bool) -> i32 {
        self.read_parameter(model, index, default)
            .and_then(|value| value.as_integer())
            .unwrap_or_default()
    }

    fn logical_parameter(&self, model: ModelHandle, index: usize, default: bool) -> bool {
        self.read_parameter(model, index, default)
            .and_then(|value| value.as_logical())
            .unwrap_or_default()
    }

    fn string_parameter(&self, model: ModelHandle, index: usize, default: bool) -> String {
        self.read_parameter(model, index, default)
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn set_real_parameter(&self, model: ModelHandle, name: &str, value: f64) {
        self.lock().set_parameter(model, name, ParameterValue::Real(value));
    }

    fn set_integer_parameter(&self, model: ModelHandle, name: &str, value: i32) {
        self.lock()
            .set_parameter(model, name, ParameterValue::Integer(value));
    }

    fn set_logical_parameter(&self, model: ModelHandle, name: &str, value: bool) {
        self.lock()
            .set_parameter(model, name, ParameterValue::Logical(value));
    }

    fn set_string_parameter(&self, model: ModelHandle, name: &str, value: &str) {
        self.lock()
            .set_parameter(model, name, ParameterValue::String(value.to_string()));
    }

    fn reset_parameter(&self, model: ModelHandle, index: usize) {
        let mut registry = self.lock();
        let Some(spec) = index.checked_sub(1).and_then(|i| PARAMETERS.get(i)) else {
            registry.fail(format!("no parameter with index {}", index));
            return;
        };
        if let Some(instance) = registry.instance(model) {
            instance.values[index - 1] = spec.value.value();
            registry.rebuild(model.as_raw());
        }
    }

    unsafe fn link_interior_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        self.lock()
            .link_state(model, VariableCategory::InteriorState, index, data);
    }

    unsafe fn link_surface_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        self.lock()
            .link_state(model, VariableCategory::SurfaceState, index, data);
    }

    unsafe fn link_bottom_state(&self, model: ModelHandle, index: usize, data: *mut f64) {
        self.lock()
            .link_state(model, VariableCategory::BottomState, index, data);
    }

    unsafe fn link_interior_data(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64) {
        self.lock()
            .link_data(model, variable, VariableCategory::InteriorDependency, data);
    }

    unsafe fn link_horizontal_data(
        &self,
        model: ModelHandle,
        variable: VariableHandle,
        data: *mut f64,
    ) {
        self.lock()
            .link_data(model, variable, VariableCategory::HorizontalDependency, data);
    }

    unsafe fn link_scalar(&self, model: ModelHandle, variable: VariableHandle, data: *mut f64) {
        self.lock()
            .link_data(model, variable, VariableCategory::ScalarDependency, data);
    }

    fn start(&self, model: ModelHandle) {
        let mut registry = self.lock();
        registry.start_calls += 1;
        let Some(instance) = registry.instance(model) else {
            return;
        };
        let problem = if instance.real("phy/mu") < 0.0 {
            Some("phy/mu must be non-negative".to_string())
        } else {
            instance
                .variables
                .iter()
                .zip(&instance.links)
                .find(|(spec, link)| spec.required && link.is_none())
                .map(|(spec, _)| format!("dependency {} is not linked", spec.name))
        };
        if let Some(message) = problem {
            registry.fail(message);
            return;
        }

        let use_light = instance.logical("phy/use_light");
        let cells = instance.cells;
        instance.diagnostics = instance
            .variables
            .iter()
            .enumerate()
            .filter(|(_, spec)| {
                matches!(
                    spec.category,
                    Some(VariableCategory::InteriorDiagnostic | VariableCategory::HorizontalDiagnostic)
                ) && (use_light || spec.name != "light_limitation")
            })
            .map(|(i, _)| (i, vec![0.0; cells].into_boxed_slice()))
            .collect();
        instance.started = true;
    }

    fn interior_diagnostic_data(&self, model: ModelHandle, index: usize) -> Option<NonNull<f64>> {
        self.diagnostic_data(model, VariableCategory::InteriorDiagnostic, index)
    }

    fn horizontal_diagnostic_data(
        &self,
        model: ModelHandle,
        index: usize,
    ) -> Option<NonNull<f64>> {
        self.diagnostic_data(model, VariableCategory::HorizontalDiagnostic, index)
    }

    fn get_sources(
        &self,
        model: ModelHandle,
        time: f64,
        sources: SourceTerms<'_>,
        cell_thickness: Option<&[f64]>,
    ) {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return;
        };
        let outcome = evaluate_linked(instance, time, sources, cell_thickness);
        if let Err(message) = outcome {
            registry.fail(message);
        }
    }

    fn check_state(&self, model: ModelHandle, repair: bool) -> bool {
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return false;
        };
        let mut valid = true;
        for index in instance.state_indices() {
            let Some(link) = instance.links[index] else {
                continue;
            };
            let mut values = link.read(instance.cells);
            if values.iter().any(|&v| v < 0.0) {
                valid = false;
                if repair {
                    values.iter_mut().for_each(|v| *v = v.max(0.0));
                    link.write(&values);
                }
            }
        }
        valid
    }

    fn integrate(&self, model: ModelHandle, integration: Integration<'_>) -> FabmResult<()> {
        if self.rank != 0 {
            return Err(FabmError::Unsupported(
                "Integration is only available for 0-dimensional models".to_string(),
            ));
        }
        let mut registry = self.lock();
        let Some(instance) = registry.instance(model) else {
            return Ok(());
        };
        if let Err(message) = integrate_euler(instance, integration) {
            registry.fail(message);
        }
        Ok(())
    }
}

impl ExampleBackend {
    fn read_parameter(&self, model: ModelHandle, index: usize, default: bool) -> Option<ParameterValue> {
        let mut registry = self.lock();
        let Some(spec) = index.checked_sub(1).and_then(|i| PARAMETERS.get(i)) else {
            registry.fail(format!("no parameter with index {}", index));
            return None;
        };
        let instance = registry.instance(model)?;
        if default {
            Some(spec.value.value())
        } else {
            Some(instance.values[index - 1].clone())
        }
    }

    fn diagnostic_data(
        &self,
        model: ModelHandle,
        category: VariableCategory,
        ordinal: usize,
    ) -> Option<NonNull<f64>> {
        let mut registry = self.lock();
        let instance = registry.instance(model)?;
        let index = instance.index_of(category, ordinal)?;
        instance
            .diagnostics
            .get_mut(&index)
            .and_then(|buffer| NonNull::new(buffer.as_mut_ptr()))
    }
}

fn no_coupling() -> (VariableHandle, VariableHandle) {
    (VariableHandle::default(), VariableHandle::default())
}

fn evaluate_linked(
    instance: &mut Instance,
    time: f64,
    sources: SourceTerms<'_>,
    cell_thickness: Option<&[f64]>,
) -> Result<(), String> {
    if !instance.started {
        return Err("model has not been started".to_string());
    }
    instance.last_time = Some(time);
    let state = instance.read_state()?;
    let mut rates = vec![0.0; state.len()];
    instance.evaluate(
        &state,
        &mut rates,
        sources.include_surface,
        sources.include_bottom,
        cell_thickness,
    )?;

    let interior = sources.interior.len();
    let surface = sources.surface.len();
    if interior + surface + sources.bottom.len() != rates.len() {
        return Err("source buffers do not match the state".to_string());
    }
    sources.interior.copy_from_slice(&rates[..interior]);
    sources
        .surface
        .copy_from_slice(&rates[interior..interior + surface]);
    sources.bottom.copy_from_slice(&rates[interior + surface..]);
    Ok(())
}

/// Forward Euler from `times[0]`, recording the state at every entry of `times`.
fn integrate_euler(instance: &mut Instance, integration: Integration<'_>) -> Result<(), String> {
    let Integration {
        times,
        initial_state,
        output,
        time_step,
        include_surface,
        include_bottom,
        cell_thickness,
    } = integration;
    if !instance.started {
        return Err("model has not been started".to_string());
    }
    if time_step <= 0.0 {
        return Err(format!("time step must be positive, got {}", time_step));
    }
    let n = initial_state.len();
    if n != instance.state_indices().len() * instance.cells || output.len() != times.len() * n {
        return Err("integration buffers do not match the state".to_string());
    }
    let Some(&start) = times.first() else {
        return Ok(());
    };

    let mut state = initial_state.to_vec();
    let mut rates = vec![0.0; n];
    let mut t = start;
    output[..n].copy_from_slice(&state);
    for (k, &target) in times.iter().enumerate().skip(1) {
        while t < target {
            let remaining = target - t;
            let dt = time_step.min(remaining);
            instance.evaluate(
                &state,
                &mut rates,
                include_surface,
                include_bottom,
                Some(cell_thickness),
            )?;
            for (y, dy) in state.iter_mut().zip(&rates) {
                *y += dt * dy;
            }
            t = if dt == remaining { target } else { t + dt };
        }
        output[k * n..(k + 1) * n].copy_from_slice(&state);
    }
    instance.last_time = Some(t);
    Ok(())
}
