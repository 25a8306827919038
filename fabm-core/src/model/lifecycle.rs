use super::Model;
use crate::backend::SourceTerms;
use crate::errors::{FabmError, FabmResult};
use crate::variable::{DependencyDomain, DiagnosticDomain, ForeignArray, Variable};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayD, ArrayViewD, IxDyn};

/// Perturbation applied to each state entry when approximating the Jacobian.
pub const DEFAULT_PERTURBATION: f64 = 1e-6;

/// How [`Model::start`] treats required dependencies without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Report every missing dependency in the returned [`Readiness`].
    #[default]
    Lenient,
    /// Fail with [`FabmError::UnsetDependencies`] before calling into the core.
    Strict,
}

/// Outcome of [`Model::start`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Readiness {
    /// Names of required dependencies without a value.
    pub missing: Vec<String>,
    /// Message of the core if it refused to start.
    pub start_error: Option<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty() && self.start_error.is_none()
    }
}

impl Model {
    /// Link dependency values and prepare the model for evaluation.
    ///
    /// Every dependency that has been given a value is linked into the core and the core is
    /// started. Required dependencies without a value are all collected: [`StartMode::Strict`]
    /// fails on them before touching the core, [`StartMode::Lenient`] reports them and leaves the
    /// model unable to evaluate. Diagnostics expose whatever values the core provides.
    pub fn start(&mut self, mode: StartMode) -> FabmResult<Readiness> {
        let missing: Vec<String> = self
            .dependencies
            .iter()
            .filter(|dependency| !dependency.is_set() && dependency.required())
            .map(|dependency| dependency.name().to_string())
            .collect();
        for name in &missing {
            warn!("Value for dependency {} is not set.", name);
        }
        if mode == StartMode::Strict && !missing.is_empty() {
            return Err(FabmError::UnsetDependencies(missing));
        }

        self.link_dependencies();
        self.backend.start(self.handle);
        if self.backend.error_state() {
            let message = self.backend.error_message();
            self.backend.reset_error_state();
            warn!("{} could not be started: {}", self.path, message);
            return Ok(Readiness {
                missing,
                start_error: Some(message),
            });
        }

        self.bind_diagnostics();
        self.started = missing.is_empty();
        if self.started {
            info!("Started {} (generation {})", self.path, self.generation);
        }
        Ok(Readiness {
            missing,
            start_error: None,
        })
    }

    fn link_dependencies(&mut self) {
        let cells = self.cell_count();
        let base = self.dependency_data.as_mut_ptr();
        let mut linked = 0;
        for dependency in self.dependencies.iter().filter(|d| d.is_set()) {
            // SAFETY: each dependency owns one row of the dependency array, which stays in
            // place until the next reconfiguration relinks everything.
            unsafe {
                let data = base.add(dependency.index() * cells);
                match dependency.domain() {
                    DependencyDomain::Interior => {
                        self.backend
                            .link_interior_data(self.handle, dependency.handle(), data)
                    }
                    DependencyDomain::Horizontal => {
                        self.backend
                            .link_horizontal_data(self.handle, dependency.handle(), data)
                    }
                    DependencyDomain::Scalar => {
                        self.backend
                            .link_scalar(self.handle, dependency.handle(), data)
                    }
                }
            }
            linked += 1;
        }
        debug!("Linked {} dependencies of {}", linked, self.path);
    }

    fn bind_diagnostics(&mut self) {
        let shape = self.domain_shape.clone();
        for variable in self.diagnostic_variables.iter_mut() {
            let data = match variable.domain() {
                DiagnosticDomain::Interior => self
                    .backend
                    .interior_diagnostic_data(self.handle, variable.ordinal()),
                DiagnosticDomain::Horizontal => self
                    .backend
                    .horizontal_diagnostic_data(self.handle, variable.ordinal()),
            };
            variable.bind(data.map(|data| ForeignArray::new(data, &shape)));
        }
    }

    fn ensure_started(&self) -> FabmResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(FabmError::NotStarted)
        }
    }

    /// Time passed to the core when no explicit time is given.
    pub fn update_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Use the same cell thickness for every cell.
    pub fn set_cell_thickness(&mut self, thickness: f64) {
        self.cell_thickness = Some(ArrayD::from_elem(IxDyn(&self.domain_shape), thickness));
    }

    /// Assign a thickness per cell.
    pub fn set_cell_thickness_values(&mut self, thickness: ArrayD<f64>) -> FabmResult<()> {
        if thickness.shape() != self.domain_shape.as_slice() {
            return Err(FabmError::ShapeMismatch {
                expected: self.domain_shape.clone(),
                found: thickness.shape().to_vec(),
            });
        }
        self.cell_thickness = Some(thickness.as_standard_layout().into_owned());
        Ok(())
    }

    pub fn cell_thickness(&self) -> Option<ArrayViewD<'_, f64>> {
        self.cell_thickness.as_ref().map(|h| h.view())
    }

    pub(crate) fn cell_thickness_slice(&self) -> Option<&[f64]> {
        self.cell_thickness.as_ref().and_then(|h| h.as_slice())
    }

    /// Rates of change of every state entry, shaped like the state array.
    ///
    /// `time` defaults to the value given to [`Model::update_time`]. Surface and bottom terms
    /// need the cell thickness; when left out, their rows are zero.
    ///
    /// The core rewrites its diagnostics while evaluating, so no diagnostic view may outlive
    /// the call:
    ///
    /// ```compile_fail
    /// # use fabm_core::Model;
    /// fn peek(model: &mut Model) {
    ///     let before = model.diagnostic_variables()[0].value();
    ///     model.get_rates(None, false, false).ok();
    ///     drop(before);
    /// }
    /// ```
    pub fn get_rates(
        &mut self,
        time: Option<f64>,
        surface: bool,
        bottom: bool,
    ) -> FabmResult<ArrayD<f64>> {
        self.ensure_started()?;
        if (surface || bottom) && self.cell_thickness.is_none() {
            return Err(FabmError::CellThicknessNotSet("get_rates"));
        }

        let cells = self.cell_count();
        let mut sources = vec![0.0; self.counts.state() * cells];
        let (interior, horizontal) = sources.split_at_mut(self.counts.interior_state * cells);
        let (surface_sources, bottom_sources) =
            horizontal.split_at_mut(self.counts.surface_state * cells);
        self.backend.get_sources(
            self.handle,
            time.unwrap_or(self.time),
            SourceTerms {
                interior,
                surface: surface_sources,
                bottom: bottom_sources,
                include_surface: surface,
                include_bottom: bottom,
            },
            self.cell_thickness_slice(),
        );
        self.check_error()?;
        Ok(ArrayD::from_shape_vec(self.state.raw_dim(), sources)?)
    }

    /// Rates at the current time, including surface and bottom terms when the cell thickness
    /// is known.
    pub fn rates(&mut self) -> FabmResult<ArrayD<f64>> {
        let boundaries = self.cell_thickness.is_some();
        self.get_rates(None, boundaries, boundaries)
    }

    /// Whether the state lies within its valid range. With `repair`, the core clips it in place.
    pub fn check_state(&mut self, repair: bool) -> FabmResult<bool> {
        self.ensure_started()?;
        let valid = self.backend.check_state(self.handle, repair);
        self.check_error()?;
        Ok(valid)
    }

    /// Finite-difference Jacobian of the full rates, surface and bottom terms included, over
    /// the flattened state. The cell thickness must be set.
    ///
    /// Entry `[i, j]` is the change in the rate of entry `i` per unit change in entry `j`.
    pub fn jacobian(&mut self, perturbation: Option<f64>) -> FabmResult<Array2<f64>> {
        let perturbation = perturbation.unwrap_or(DEFAULT_PERTURBATION);
        let perturbations = vec![perturbation; self.state.len()];
        self.jacobian_with_perturbations(&perturbations)
    }

    /// As [`Model::jacobian`], with a separate perturbation for every state entry.
    pub fn jacobian_with_perturbations(&mut self, perturbations: &[f64]) -> FabmResult<Array2<f64>> {
        let n = self.state.len();
        if perturbations.len() != n {
            return Err(FabmError::ShapeMismatch {
                expected: vec![n],
                found: vec![perturbations.len()],
            });
        }
        let reference = self.get_rates(None, true, true)?;

        let mut jacobian = Array2::zeros((n, n));
        for (column, &perturbation) in perturbations.iter().enumerate() {
            let original = self.perturb_state(column, perturbation);
            let perturbed = self.get_rates(None, true, true);
            self.restore_state_entry(column, original);
            let perturbed = perturbed?;

            for (row, (p, r)) in perturbed.iter().zip(reference.iter()).enumerate() {
                jacobian[[row, column]] = (p - r) / perturbation;
            }
        }
        Ok(jacobian)
    }

    /// Add `delta` to one entry of the flattened state, returning its previous value.
    fn perturb_state(&mut self, entry: usize, delta: f64) -> f64 {
        match self.state_entry(entry) {
            Some(value) => {
                let original = *value;
                *value += delta;
                original
            }
            None => 0.0,
        }
    }

    fn restore_state_entry(&mut self, entry: usize, original: f64) {
        if let Some(value) = self.state_entry(entry) {
            *value = original;
        }
    }

    fn state_entry(&mut self, entry: usize) -> Option<&mut f64> {
        // The state array is always allocated in standard layout
        self.state.as_slice_mut().and_then(|values| values.get_mut(entry))
    }
}
