//! Decoded raster values for one partition.

use chrono::{DateTime, Utc};

use crate::error::{CommonError, CommonResult};
use crate::grid::CellWindow;

/// Values of several variables over a cell window and a run of timestamps.
///
/// Each variable's buffer is laid out time-major then row-major within the
/// window: `values[t * window.len() + local_cell]`. Missing data is NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSlice {
    pub times: Vec<DateTime<Utc>>,
    pub window: CellWindow,
    pub variables: Vec<String>,
    data: Vec<Vec<f32>>,
}

impl RasterSlice {
    pub fn new(
        times: Vec<DateTime<Utc>>,
        window: CellWindow,
        variables: Vec<String>,
        data: Vec<Vec<f32>>,
    ) -> CommonResult<Self> {
        if variables.len() != data.len() {
            return Err(CommonError::InvalidSlice(format!(
                "{} variables but {} buffers",
                variables.len(),
                data.len()
            )));
        }
        let expected = times.len() * window.len();
        if let Some((name, buf)) = variables.iter().zip(&data).find(|(_, b)| b.len() != expected) {
            return Err(CommonError::InvalidSlice(format!(
                "variable {} has {} values, expected {}",
                name,
                buf.len(),
                expected
            )));
        }
        Ok(Self {
            times,
            window,
            variables,
            data,
        })
    }

    /// An all-NaN slice, filled in place by readers.
    pub fn empty(times: Vec<DateTime<Utc>>, window: CellWindow, variables: Vec<String>) -> Self {
        let len = times.len() * window.len();
        let data = variables.iter().map(|_| vec![f32::NAN; len]).collect();
        Self {
            times,
            window,
            variables,
            data,
        }
    }

    pub fn steps(&self) -> usize {
        self.times.len()
    }

    /// Values of one variable at one time step, row-major over the window.
    pub fn step(&self, variable: usize, t: usize) -> &[f32] {
        let n = self.window.len();
        &self.data[variable][t * n..(t + 1) * n]
    }

    pub fn step_mut(&mut self, variable: usize, t: usize) -> &mut [f32] {
        let n = self.window.len();
        &mut self.data[variable][t * n..(t + 1) * n]
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }
}
