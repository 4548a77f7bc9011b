use std::sync::Arc;

use serde::Serialize;

use crate::error::{DppError, Result};
use crate::neuro::cell::{Cell, SegmentRef};
use crate::neuro::context::SimulationContext;
use crate::neuro::mechanism::{Mechanism, MechanismKind};
use crate::neuro::scale::{ModulationSlot, ScaleState};
use crate::neuro::synapse::Receptor;

/// One value per integration step over [0, stop). Cheap to clone; every
/// binding of the same schedule shares the samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule(Arc<[f64]>);

impl Schedule {
    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self(samples.into())
    }

    fn sampled(ctx: &SimulationContext, f: impl Fn(f64) -> f64) -> Self {
        Self::from_samples((0..ctx.steps()).map(|i| f(i as f64 * ctx.dt)).collect())
    }

    pub fn constant(ctx: &SimulationContext, value: f64) -> Self {
        Self::sampled(ctx, |_| value)
    }

    /// `magnitude` on [onset, offset], 0 elsewhere. Edges snap to the
    /// nearest step so both ends stay on the grid.
    pub fn step(ctx: &SimulationContext, onset: f64, offset: f64, magnitude: f64) -> Result<Self> {
        if offset < onset {
            return Err(DppError::InvalidArgument(format!(
                "schedule offset {offset} precedes onset {onset}"
            )));
        }
        let first = (onset / ctx.dt).round();
        let last = (offset / ctx.dt).round();
        Ok(Self::from_samples(
            (0..ctx.steps())
                .map(|i| {
                    let i = i as f64;
                    if first <= i && i <= last { magnitude } else { 0.0 }
                })
                .collect(),
        ))
    }

    /// Alpha transient peaking at `gmax` one `tau` after `tstart`.
    pub fn alpha(ctx: &SimulationContext, tstart: f64, gmax: f64, tau: f64) -> Result<Self> {
        if tau <= 0.0 {
            return Err(DppError::InvalidArgument(format!(
                "alpha time constant must be positive, got {tau}"
            )));
        }
        Ok(Self::sampled(ctx, |t| {
            if t < tstart {
                return 0.0;
            }
            let s = (t - tstart) / tau;
            gmax * s * (1.0 - s).exp()
        }))
    }

    /// `base + gmax / (1 + exp((t - tstart) / slope))`. A negative slope
    /// rises from `base` to `base + gmax`, a positive one falls back.
    pub fn sigmoid(
        ctx: &SimulationContext,
        tstart: f64,
        base: f64,
        gmax: f64,
        slope: f64,
    ) -> Result<Self> {
        if slope == 0.0 {
            return Err(DppError::InvalidArgument(
                "sigmoid slope must be non-zero".to_string(),
            ));
        }
        Ok(Self::sampled(ctx, |t| {
            base + gmax / (1.0 + ((t - tstart) / slope).exp())
        }))
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_samples(self.0.iter().map(|v| v * factor).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, step: usize) -> Option<f64> {
        self.0.get(step).copied()
    }

    #[cfg(test)]
    pub fn samples(&self) -> &[f64] {
        &self.0
    }

    pub fn ensure_len(&self, ctx: &SimulationContext) -> Result<()> {
        let expected = ctx.steps();
        if self.len() != expected {
            return Err(DppError::ScheduleLength {
                expected,
                got: self.len(),
            });
        }
        Ok(())
    }
}

/// Address of one scalar a schedule can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StateRef {
    MechanismLevel {
        at: SegmentRef,
        kind: MechanismKind,
        slot: ModulationSlot,
    },
    KafShift {
        at: SegmentRef,
    },
    ReceptorLevel {
        synapse: usize,
        receptor: Receptor,
        slot: ModulationSlot,
    },
}

impl StateRef {
    fn mechanism_mut(cell: &mut Cell, at: SegmentRef, kind: MechanismKind) -> Option<&mut Mechanism> {
        cell.compartments_mut()
            .get_mut(at.compartment)?
            .segments
            .get_mut(at.segment)?
            .mechanisms
            .iter_mut()
            .find(|m| m.kind == kind)
    }

    #[cfg(test)]
    fn mechanism(cell: &Cell, at: SegmentRef, kind: MechanismKind) -> Option<&Mechanism> {
        cell.compartments()
            .get(at.compartment)?
            .segments
            .get(at.segment)?
            .mechanisms
            .iter()
            .find(|m| m.kind == kind)
    }

    /// Slot state behind a level reference; `None` for shifts.
    pub fn scale_mut<'a>(&self, cell: &'a mut Cell) -> Option<&'a mut ScaleState> {
        match *self {
            StateRef::MechanismLevel { at, kind, slot } => {
                Self::mechanism_mut(cell, at, kind).map(|m| m.slots.get_mut(slot))
            }
            StateRef::ReceptorLevel {
                synapse,
                receptor,
                slot,
            } => cell
                .synapses
                .get_mut(synapse)?
                .receptor_mut(receptor)
                .map(|r| r.slots.get_mut(slot)),
            StateRef::KafShift { .. } => None,
        }
    }

    pub fn write(&self, cell: &mut Cell, value: f64) {
        match *self {
            StateRef::KafShift { at } => {
                if let Some(kaf) = Self::mechanism_mut(cell, at, MechanismKind::Kaf) {
                    kaf.mod_shift = value;
                }
            }
            _ => {
                if let Some(state) = self.scale_mut(cell) {
                    state.level = value;
                }
            }
        }
    }

    #[cfg(test)]
    pub fn read(&self, cell: &Cell) -> Option<f64> {
        match *self {
            StateRef::MechanismLevel { at, kind, slot } => {
                Self::mechanism(cell, at, kind).map(|m| m.slots.get(slot).level)
            }
            StateRef::KafShift { at } => {
                Self::mechanism(cell, at, MechanismKind::Kaf).map(|m| m.mod_shift)
            }
            StateRef::ReceptorLevel {
                synapse,
                receptor,
                slot,
            } => cell
                .synapses
                .get(synapse)?
                .receptor(receptor)
                .map(|r| r.slots.get(slot).level),
        }
    }
}

/// Identifies one schedule binding inside an integrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayHandle(pub(crate) u64);
