use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};

/// Clock handed to every component that needs the time or the step size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationContext {
    pub t: f64,
    pub dt: f64,
    pub stop: f64,
}

impl SimulationContext {
    pub fn new(dt: f64, stop: f64) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "step size must be positive, got {dt}"
            )));
        }
        if !(stop.is_finite() && stop > 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "stop time must be positive, got {stop}"
            )));
        }

        Ok(Self { t: 0.0, dt, stop })
    }

    /// Number of fixed steps covering [0, stop).
    pub fn steps(&self) -> usize {
        // 250 / 0.025 lands a hair above 10000 in floating point
        ((self.stop / self.dt) - 1e-9).ceil() as usize
    }

    pub fn step_index(&self) -> usize {
        (self.t / self.dt).round() as usize
    }

    pub fn finished(&self) -> bool {
        self.step_index() >= self.steps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_count_is_ceiling_of_stop_over_dt() {
        let ctx = SimulationContext::new(0.025, 250.0).unwrap();
        assert_eq!(ctx.steps(), 10_000);

        let ctx = SimulationContext::new(0.3, 1.0).unwrap();
        assert_eq!(ctx.steps(), 4);
    }

    #[test]
    fn rejects_non_positive_step() {
        assert!(matches!(
            SimulationContext::new(0.0, 10.0),
            Err(DppError::InvalidArgument(_))
        ));
        assert!(SimulationContext::new(0.025, -1.0).is_err());
    }
}
