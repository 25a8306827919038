use super::{lookup::Collection, Model};
use crate::errors::{FabmError, FabmResult};
use crate::parameter::ParameterValue;
use crate::variable::Variable;
use log::debug;

impl Model {
    /// Current value of the parameter at `index` in [`Model::parameters`].
    pub fn parameter_value(&self, index: usize) -> FabmResult<ParameterValue> {
        self.check_index(index, self.parameters.len(), Collection::Parameters)?;
        self.parameters[index].value()
    }

    /// Write a parameter value.
    ///
    /// The configuration is rebuilt afterwards, whether or not the core accepted the value, and
    /// dependency and state values are carried over by name. Descriptors obtained before the
    /// call belong to the previous configuration.
    pub fn set_parameter(
        &mut self,
        index: usize,
        value: impl Into<ParameterValue>,
    ) -> FabmResult<()> {
        self.check_index(index, self.parameters.len(), Collection::Parameters)?;
        let parameter = &self.parameters[index];
        let name = parameter.name().to_string();
        let value = parameter.kind().coerce(&name, value.into())?;
        if let ParameterValue::String(text) = &value {
            if text.contains('\0') {
                return Err(FabmError::InvalidText(text.clone()));
            }
        }

        debug!("Setting parameter {} to {}", name, value);
        let backend = std::sync::Arc::clone(&self.backend);
        let handle = self.handle;
        self.rebuild_around(|| value.write(backend.as_ref(), handle, &name))
    }

    /// Set a parameter by name.
    pub fn set_parameter_by_name(
        &mut self,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> FabmResult<()> {
        let index = self.position(Collection::Parameters, name, false)?;
        self.set_parameter(index, value)
    }

    /// Remove any override of a parameter, returning it to the core's default.
    pub fn reset_parameter(&mut self, index: usize) -> FabmResult<()> {
        self.check_index(index, self.parameters.len(), Collection::Parameters)?;
        let ordinal = self.parameters[index].index();
        debug!("Resetting parameter {}", self.parameters[index].name());
        let backend = std::sync::Arc::clone(&self.backend);
        let handle = self.handle;
        self.rebuild_around(|| backend.reset_parameter(handle, ordinal))
    }

    pub fn reset_parameter_by_name(&mut self, name: &str) -> FabmResult<()> {
        let index = self.position(Collection::Parameters, name, false)?;
        self.reset_parameter(index)
    }

    /// Snapshot, apply `change`, rebuild and restore.
    ///
    /// An error raised by `change` is reported after the rebuild so the arrays and the core
    /// never disagree.
    fn rebuild_around(&mut self, change: impl FnOnce()) -> FabmResult<()> {
        let settings = self.save_settings();
        change();
        let written = self.check_error();
        self.update_configuration(Some(&settings))?;
        written
    }
}
