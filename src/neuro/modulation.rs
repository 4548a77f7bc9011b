//! Reversible neuromodulation of channel conductances and synaptic
//! receptors across a set of target segments.
//!
//! A [`Modulation`] is bound to its targets once, at construction. `apply`
//! switches the configured slot on for every matching mechanism and
//! receptor, writing either a constant level of 1 or binding a schedule
//! that drives the level step by step. `reset` detaches the schedules and
//! returns every level and kaf shift to 0.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DppError, Result};
use crate::neuro::cell::{Cell, SectionClass, SegmentRef};
use crate::neuro::mechanism::MechanismKind;
use crate::neuro::scale::ModulationSlot;
use crate::neuro::schedule::{PlayHandle, Schedule, StateRef};
use crate::neuro::solver::Integrator;
use crate::neuro::synapse::{Receptor, SynapseFamily};

/// Shift (mV) written to kaf by objects targeting named sections.
pub const TARGETED_KAF_SHIFT: f64 = 5.0;
/// Shift (mV) written to kaf by whole-class cholinergic objects.
pub const MODE_KAF_SHIFT: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialMode {
    /// dend, soma and axon
    Uniform,
    /// dend and soma
    NoAxon,
}

impl SpatialMode {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "uniform" => Ok(SpatialMode::Uniform),
            "no-axon" | "noAxon" => Ok(SpatialMode::NoAxon),
            other => Err(DppError::Configuration(format!(
                "'{other}' modulation is not permitted, use 'uniform' or 'no-axon'"
            ))),
        }
    }

    pub fn classes(self) -> &'static [SectionClass] {
        match self {
            SpatialMode::Uniform => &[SectionClass::Dend, SectionClass::Soma, SectionClass::Axon],
            SpatialMode::NoAxon => &[SectionClass::Dend, SectionClass::Soma],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentTarget {
    AllSegments,
    At(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TargetSpec {
    Mode(SpatialMode),
    /// Section names, or the single sentinel `all`.
    Named {
        names: Vec<String>,
        position: SegmentTarget,
    },
}

impl TargetSpec {
    #[cfg(test)]
    pub fn named<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        TargetSpec::Named {
            names: names.into_iter().map(Into::into).collect(),
            position: SegmentTarget::AllSegments,
        }
    }

    fn resolve(&self, cell: &Cell) -> Result<Vec<SegmentRef>> {
        let mut targets = BTreeSet::new();

        match self {
            TargetSpec::Mode(mode) => {
                for &class in mode.classes() {
                    for (idx, _) in cell.of_class(class) {
                        targets.extend(cell.segment_refs(idx));
                    }
                }
            }
            TargetSpec::Named { names, position } => {
                if let SegmentTarget::At(x) = position {
                    if !(0.0..=1.0).contains(x) {
                        return Err(DppError::InvalidArgument(format!(
                            "segment target {x} lies outside [0, 1]"
                        )));
                    }
                }

                let compartments: Vec<usize> = if names.iter().any(|n| n == "all") {
                    (0..cell.compartments().len()).collect()
                } else {
                    names
                        .iter()
                        .map(|name| cell.find_required(name))
                        .collect::<Result<_>>()?
                };

                for idx in compartments {
                    match position {
                        SegmentTarget::AllSegments => targets.extend(cell.segment_refs(idx)),
                        SegmentTarget::At(x) => {
                            targets.insert(cell.locate(idx, *x));
                        }
                    }
                }
            }
        }

        Ok(targets.into_iter().collect())
    }
}

/// Factor per channel kind and per receptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModFactors {
    pub channels: BTreeMap<MechanismKind, f64>,
    pub receptors: BTreeMap<Receptor, f64>,
}

impl ModFactors {
    /// Splits `{name: factor}` into channel and receptor factors. Receptor
    /// names are `AMPA`, `NMDA` and `GABA`.
    pub fn from_names(map: &BTreeMap<String, f64>) -> Result<Self> {
        let mut factors = ModFactors::default();
        for (name, &factor) in map {
            if !factor.is_finite() {
                return Err(DppError::InvalidArgument(format!(
                    "factor for '{name}' is not finite"
                )));
            }
            match Receptor::from_name(name) {
                Some(receptor) => {
                    factors.receptors.insert(receptor, factor);
                }
                None => {
                    factors.channels.insert(MechanismKind::from_name(name)?, factor);
                }
            }
        }
        Ok(factors)
    }
}

/// Key under which a schedule replaces the constant level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlayKey {
    Channel(MechanismKind),
    Receptor(Receptor),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KafMode {
    /// kaf gating moves by `mv` and its conductance is left alone.
    Shift { mv: f64 },
    /// kaf is scaled like every other channel.
    Conductance,
}

/// Per-family switches.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Families {
    pub intrinsic: bool,
    pub kaf_shift: bool,
    pub gaba: bool,
    pub glut: bool,
}

impl Default for Families {
    fn default() -> Self {
        Self {
            intrinsic: true,
            kaf_shift: true,
            gaba: true,
            glut: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModulationConfig {
    pub slot: ModulationSlot,
    pub factors: ModFactors,
    pub kaf: KafMode,
    pub families: Families,
    /// A kaf schedule is in mV and drives the shift directly.
    pub schedules: BTreeMap<PlayKey, Schedule>,
}

impl ModulationConfig {
    /// Dopaminergic modulation on the primary slot.
    pub fn dopamine(factors: ModFactors) -> Self {
        Self {
            slot: ModulationSlot::Primary,
            factors,
            kaf: KafMode::Conductance,
            families: Families {
                kaf_shift: false,
                ..Families::default()
            },
            schedules: BTreeMap::new(),
        }
    }

    /// Cholinergic modulation of whole classes: kaf is always shifted.
    pub fn acetylcholine(factors: ModFactors) -> Self {
        Self {
            slot: ModulationSlot::Secondary,
            factors,
            kaf: KafMode::Shift { mv: MODE_KAF_SHIFT },
            families: Families::default(),
            schedules: BTreeMap::new(),
        }
    }

    /// Cholinergic modulation of named sections: kaf is shifted only when
    /// it appears among the factors.
    pub fn targeted_acetylcholine(factors: ModFactors) -> Self {
        let kaf_shift = factors.channels.contains_key(&MechanismKind::Kaf);
        Self {
            slot: ModulationSlot::Secondary,
            factors,
            kaf: KafMode::Shift {
                mv: TARGETED_KAF_SHIFT,
            },
            families: Families {
                kaf_shift,
                ..Families::default()
            },
            schedules: BTreeMap::new(),
        }
    }

    /// Replaces the preset shift magnitude. No effect when kaf is scaled.
    pub fn with_kaf_shift(mut self, mv: f64) -> Self {
        if let KafMode::Shift { .. } = self.kaf {
            self.kaf = KafMode::Shift { mv };
        }
        self
    }

    pub fn with_schedule(mut self, key: PlayKey, schedule: Schedule) -> Self {
        self.schedules.insert(key, schedule);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ModulationState {
    Unmodulated,
    Modulated,
}

/// One scalar the modulation writes.
#[derive(Clone, Copy, Debug)]
struct Binding {
    target: StateRef,
    key: PlayKey,
    /// Cap written to the slot; `None` for the kaf shift.
    factor: Option<f64>,
    /// Constant written when no schedule is bound.
    on: f64,
}

#[derive(Debug)]
pub struct Modulation {
    targets: Vec<SegmentRef>,
    config: ModulationConfig,
    state: ModulationState,
    bound: Vec<PlayHandle>,
}

impl Modulation {
    /// Resolves the target set. Nothing on the cell changes until `apply`.
    pub fn new(cell: &Cell, target: &TargetSpec, config: ModulationConfig) -> Result<Self> {
        let targets = target.resolve(cell)?;
        debug!(segments = targets.len(), slot = ?config.slot, "modulation targets resolved");

        Ok(Self {
            targets,
            config,
            state: ModulationState::Unmodulated,
            bound: Vec::new(),
        })
    }

    pub fn targets(&self) -> &[SegmentRef] {
        &self.targets
    }

    pub fn state(&self) -> ModulationState {
        self.state
    }

    fn plan(&self, cell: &Cell) -> Vec<Binding> {
        let ModulationConfig {
            slot,
            factors,
            kaf,
            families,
            ..
        } = &self.config;
        let slot = *slot;
        let mut bindings = Vec::new();

        for &at in &self.targets {
            let segment = cell.segment(at);

            for mech in &segment.mechanisms {
                match (mech.kind, kaf) {
                    (MechanismKind::Kaf, KafMode::Shift { mv }) => {
                        if families.kaf_shift {
                            bindings.push(Binding {
                                target: StateRef::KafShift { at },
                                key: PlayKey::Channel(MechanismKind::Kaf),
                                factor: None,
                                on: *mv,
                            });
                        }
                    }
                    (kind, _) => {
                        if let Some(&factor) = factors.channels.get(&kind) {
                            if families.intrinsic {
                                bindings.push(Binding {
                                    target: StateRef::MechanismLevel { at, kind, slot },
                                    key: PlayKey::Channel(kind),
                                    factor: Some(factor),
                                    on: 1.0,
                                });
                            }
                        }
                    }
                }
            }

            for &synapse in &segment.point_processes {
                let Some(syn) = cell.synapses.get(synapse) else {
                    continue;
                };
                if !syn.kind.is_modulatable() {
                    continue;
                }
                let enabled = match syn.kind.family() {
                    SynapseFamily::Gabaergic => families.gaba,
                    SynapseFamily::Glutamatergic => families.glut,
                };
                if !enabled {
                    continue;
                }

                for channel in &syn.receptors {
                    if let Some(&factor) = factors.receptors.get(&channel.receptor) {
                        bindings.push(Binding {
                            target: StateRef::ReceptorLevel {
                                synapse,
                                receptor: channel.receptor,
                                slot,
                            },
                            key: PlayKey::Receptor(channel.receptor),
                            factor: Some(factor),
                            on: 1.0,
                        });
                    }
                }
            }
        }

        bindings
    }

    /// Switches modulation on. Schedules are checked against the run length
    /// before anything is written.
    pub fn apply<I: Integrator>(&mut self, cell: &mut Cell, solver: &mut I) -> Result<()> {
        if self.state == ModulationState::Modulated {
            return Err(DppError::InvalidArgument(
                "modulation is already applied".to_string(),
            ));
        }
        for schedule in self.config.schedules.values() {
            schedule.ensure_len(solver.context())?;
        }

        let bindings = self.plan(cell);
        for binding in &bindings {
            if let Some(factor) = binding.factor {
                if let Some(state) = binding.target.scale_mut(cell) {
                    state.enabled = true;
                    state.max = factor;
                }
            }

            match self.config.schedules.get(&binding.key) {
                Some(schedule) => {
                    let handle = solver.play(binding.target, schedule.clone())?;
                    self.bound.push(handle);
                }
                None => binding.target.write(cell, binding.on),
            }
        }

        self.state = ModulationState::Modulated;
        info!(
            segments = self.targets.len(),
            bindings = bindings.len(),
            scheduled = self.bound.len(),
            slot = ?self.config.slot,
            "modulation applied"
        );
        Ok(())
    }

    /// Detaches every schedule and zeroes every level and kaf shift on the
    /// targets. Safe to call any number of times.
    pub fn reset<I: Integrator>(&mut self, cell: &mut Cell, solver: &mut I) {
        for handle in self.bound.drain(..) {
            solver.play_remove(handle);
        }
        for binding in self.plan(cell) {
            binding.target.write(cell, 0.0);
        }
        if self.state == ModulationState::Modulated {
            debug!(segments = self.targets.len(), "modulation reset");
        }
        self.state = ModulationState::Unmodulated;
    }
}
