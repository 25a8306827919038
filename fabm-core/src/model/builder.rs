//! Builder for setting up a model in code.

use super::Model;
use crate::context::BindingContext;
use crate::errors::FabmResult;
use crate::parameter::ParameterValue;

/// Build a [`Model`] together with its initial parameter overrides and inputs.
///
/// Parameters are applied first, in the order given, since each one may reshape the model.
/// Dependency values and the cell thickness are applied to the final configuration.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    path: String,
    domain_shape: Vec<usize>,
    cell_thickness: Option<f64>,
    parameters: Vec<(String, ParameterValue)>,
    dependencies: Vec<(String, f64)>,
}

impl ModelBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            domain_shape: vec![],
            cell_thickness: None,
            parameters: vec![],
            dependencies: vec![],
        }
    }

    /// Number of cells per dimension. Empty (the default) for a single point.
    pub fn with_domain_shape(&mut self, shape: &[usize]) -> &mut Self {
        self.domain_shape = shape.to_vec();
        self
    }

    pub fn with_cell_thickness(&mut self, thickness: f64) -> &mut Self {
        self.cell_thickness = Some(thickness);
        self
    }

    pub fn with_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        self.parameters.push((name.to_string(), value.into()));
        self
    }

    pub fn with_dependency(&mut self, name: &str, value: f64) -> &mut Self {
        self.dependencies.push((name.to_string(), value));
        self
    }

    pub fn build(&self, context: &BindingContext) -> FabmResult<Model> {
        let mut model = Model::new(context, &self.path, &self.domain_shape)?;
        for (name, value) in &self.parameters {
            model.set_parameter_by_name(name, value.clone())?;
        }
        for (name, value) in &self.dependencies {
            model.set_dependency(name, *value)?;
        }
        if let Some(thickness) = self.cell_thickness {
            model.set_cell_thickness(thickness);
        }
        Ok(model)
    }
}
