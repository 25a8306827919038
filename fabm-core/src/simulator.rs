//! Time-stepped integration of point models.
//!
//! The stepping loop runs inside the core; this module prepares the buffers and checks the
//! preconditions.

use crate::backend::Integration;
use crate::errors::{FabmError, FabmResult};
use crate::model::Model;
use log::debug;
use ndarray::{aview1, Array2};

/// Time step used between consecutive output times.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeStep {
    /// The same step throughout.
    Fixed(f64),
    /// One step per output interval, `times.len() - 1` in total.
    PerInterval(Vec<f64>),
}

impl From<f64> for TimeStep {
    fn from(step: f64) -> Self {
        TimeStep::Fixed(step)
    }
}

/// Integrates a started 0-dimensional model.
#[derive(Debug)]
pub struct Simulator<'a> {
    model: &'a mut Model,
}

impl<'a> Simulator<'a> {
    pub fn new(model: &'a mut Model) -> FabmResult<Self> {
        if !model.domain_shape().is_empty() {
            return Err(FabmError::Unsupported(format!(
                "Integration is only available for 0-dimensional domains, got shape {:?}",
                model.domain_shape()
            )));
        }
        if model.cell_thickness().is_none() {
            return Err(FabmError::CellThicknessNotSet("Simulator"));
        }
        Ok(Self { model })
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    /// State at each of `times`, one row per time, starting from `initial_state` at `times[0]`.
    pub fn integrate(
        &mut self,
        initial_state: &[f64],
        times: &[f64],
        step: impl Into<TimeStep>,
        surface: bool,
        bottom: bool,
    ) -> FabmResult<Array2<f64>> {
        if !self.model.is_started() {
            return Err(FabmError::NotStarted);
        }
        let n = self.model.state().len();
        if initial_state.len() != n {
            return Err(FabmError::ShapeMismatch {
                expected: vec![n],
                found: vec![initial_state.len()],
            });
        }
        let thickness: Vec<f64> = self
            .model
            .cell_thickness()
            .map(|h| h.iter().copied().collect())
            .ok_or(FabmError::CellThicknessNotSet("Simulator"))?;

        let mut output = Array2::zeros((times.len(), n));
        match step.into() {
            TimeStep::Fixed(step) => {
                debug!("Integrating over {} output times, step {}", times.len(), step);
                let output = output.as_slice_mut();
                self.run(times, initial_state, output, step, (surface, bottom), &thickness)?;
            }
            TimeStep::PerInterval(steps) => {
                if steps.len() + 1 != times.len() {
                    return Err(FabmError::ShapeMismatch {
                        expected: vec![times.len().saturating_sub(1)],
                        found: vec![steps.len()],
                    });
                }
                debug!("Integrating over {} intervals", steps.len());
                output.row_mut(0).assign(&aview1(initial_state));
                let mut buffer = vec![0.0; 2 * n];
                for (k, &step) in steps.iter().enumerate() {
                    let start = output.row(k).to_vec();
                    let interval = &times[k..k + 2];
                    let boundaries = (surface, bottom);
                    self.run(interval, &start, Some(buffer.as_mut_slice()), step, boundaries, &thickness)?;
                    output.row_mut(k + 1).assign(&aview1(&buffer[n..]));
                }
            }
        }
        Ok(output)
    }

    fn run(
        &self,
        times: &[f64],
        initial_state: &[f64],
        output: Option<&mut [f64]>,
        time_step: f64,
        (include_surface, include_bottom): (bool, bool),
        cell_thickness: &[f64],
    ) -> FabmResult<()> {
        let Some(output) = output else {
            return Err(FabmError::Unsupported("Output buffer is not contiguous".to_string()));
        };
        let backend = self.model.backend();
        backend.integrate(
            self.model.handle(),
            Integration {
                times,
                initial_state,
                output,
                time_step,
                include_surface,
                include_bottom,
                cell_thickness,
            },
        )?;
        crate::backend::take_error(backend.as_ref())
    }
}
