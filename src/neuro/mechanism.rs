use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};
use crate::neuro::scale::ModulationSlots;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    Naf,
    Kaf,
    Kas,
    Kdr,
    Kir,
    Sk,
    Bk,
    Cal12,
    Cal13,
    Can,
    Car,
    Cat32,
    Cat33,
    #[serde(rename = "Im")]
    Im,
}

/// Which density parameter a channel exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConductanceParam {
    Gbar,
    /// Calcium channels are parameterised by permeability.
    Pbar,
}

impl fmt::Display for ConductanceParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConductanceParam::Gbar => "gbar",
            ConductanceParam::Pbar => "pbar",
        })
    }
}

impl MechanismKind {
    pub const ALL: [MechanismKind; 14] = [
        MechanismKind::Naf,
        MechanismKind::Kaf,
        MechanismKind::Kas,
        MechanismKind::Kdr,
        MechanismKind::Kir,
        MechanismKind::Sk,
        MechanismKind::Bk,
        MechanismKind::Cal12,
        MechanismKind::Cal13,
        MechanismKind::Can,
        MechanismKind::Car,
        MechanismKind::Cat32,
        MechanismKind::Cat33,
        MechanismKind::Im,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MechanismKind::Naf => "naf",
            MechanismKind::Kaf => "kaf",
            MechanismKind::Kas => "kas",
            MechanismKind::Kdr => "kdr",
            MechanismKind::Kir => "kir",
            MechanismKind::Sk => "sk",
            MechanismKind::Bk => "bk",
            MechanismKind::Cal12 => "cal12",
            MechanismKind::Cal13 => "cal13",
            MechanismKind::Can => "can",
            MechanismKind::Car => "car",
            MechanismKind::Cat32 => "cat32",
            MechanismKind::Cat33 => "cat33",
            MechanismKind::Im => "Im",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| DppError::Configuration(format!("unknown mechanism '{name}'")))
    }

    pub fn conductance_param(self) -> ConductanceParam {
        match self {
            MechanismKind::Cal12
            | MechanismKind::Cal13
            | MechanismKind::Can
            | MechanismKind::Car
            | MechanismKind::Cat32
            | MechanismKind::Cat33 => ConductanceParam::Pbar,
            _ => ConductanceParam::Gbar,
        }
    }

    /// Cholinergic modulation of kaf moves its gating, not its conductance.
    pub fn shifts_voltage(self) -> bool {
        self == MechanismKind::Kaf
    }

    pub(crate) fn gating(self) -> Gating {
        const E_NA: f64 = 50.0;
        const E_K: f64 = -85.0;
        const E_CA: f64 = 120.0;

        let gate = |v_half, slope, tau| Gate { v_half, slope, tau };

        match self {
            MechanismKind::Naf => Gating {
                e_rev: E_NA,
                activation: gate(-25.0, 9.2, 0.1),
                power: 3,
                inactivation: Some(gate(-62.9, -10.7, 0.5)),
            },
            MechanismKind::Kaf => Gating {
                e_rev: E_K,
                activation: gate(-10.0, 17.7, 1.0),
                power: 2,
                inactivation: Some(gate(-75.6, -10.0, 14.0)),
            },
            MechanismKind::Kas => Gating {
                e_rev: E_K,
                activation: gate(-27.0, 16.0, 3.0),
                power: 2,
                inactivation: Some(gate(-33.5, -21.5, 200.0)),
            },
            MechanismKind::Kdr => Gating {
                e_rev: E_K,
                activation: gate(-13.0, 11.0, 5.0),
                power: 1,
                inactivation: None,
            },
            MechanismKind::Kir => Gating {
                e_rev: E_K,
                activation: gate(-82.0, -13.0, 0.5),
                power: 1,
                inactivation: None,
            },
            MechanismKind::Sk => Gating {
                e_rev: E_K,
                activation: gate(-30.0, 5.0, 5.0),
                power: 1,
                inactivation: None,
            },
            MechanismKind::Bk => Gating {
                e_rev: E_K,
                activation: gate(-20.0, 10.0, 2.0),
                power: 1,
                inactivation: None,
            },
            MechanismKind::Cal12 => Gating {
                e_rev: E_CA,
                activation: gate(-8.9, 6.7, 1.0),
                power: 2,
                inactivation: None,
            },
            MechanismKind::Cal13 => Gating {
                e_rev: E_CA,
                activation: gate(-15.0, 6.7, 1.0),
                power: 2,
                inactivation: None,
            },
            MechanismKind::Can => Gating {
                e_rev: E_CA,
                activation: gate(-3.0, 8.0, 2.0),
                power: 2,
                inactivation: None,
            },
            MechanismKind::Car => Gating {
                e_rev: E_CA,
                activation: gate(-29.0, 4.6, 1.7),
                power: 3,
                inactivation: Some(gate(-33.3, -17.0, 50.0)),
            },
            MechanismKind::Cat32 => Gating {
                e_rev: E_CA,
                activation: gate(-42.0, 7.3, 5.0),
                power: 3,
                inactivation: Some(gate(-73.0, -5.0, 20.0)),
            },
            MechanismKind::Cat33 => Gating {
                e_rev: E_CA,
                activation: gate(-45.0, 7.0, 4.0),
                power: 3,
                inactivation: Some(gate(-75.0, -5.5, 25.0)),
            },
            MechanismKind::Im => Gating {
                e_rev: E_K,
                activation: gate(-35.0, 10.0, 100.0),
                power: 1,
                inactivation: None,
            },
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Boltzmann gate relaxing towards its steady state with a fixed time constant.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Gate {
    pub v_half: f64,
    pub slope: f64,
    pub tau: f64,
}

impl Gate {
    pub fn steady_state(&self, v: f64, shift: f64) -> f64 {
        1.0 / (1.0 + (-(v - (self.v_half - shift)) / self.slope).exp())
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Gating {
    pub e_rev: f64,
    pub activation: Gate,
    pub power: i32,
    pub inactivation: Option<Gate>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Mechanism {
    pub kind: MechanismKind,
    /// `gbar` or `pbar` as assigned at cell build.
    pub baseline: f64,
    pub slots: ModulationSlots,
    /// Hyperpolarising gating shift in mV; only read for kaf.
    pub mod_shift: f64,
    #[serde(skip)]
    pub(crate) m: f64,
    #[serde(skip)]
    pub(crate) h: f64,
}

impl Mechanism {
    pub fn new(kind: MechanismKind, baseline: f64) -> Self {
        Self {
            kind,
            baseline,
            slots: ModulationSlots::default(),
            mod_shift: 0.0,
            m: 0.0,
            h: 1.0,
        }
    }

    pub fn effective_conductance(&self) -> f64 {
        self.baseline * self.slots.factor()
    }

    fn shift(&self) -> f64 {
        if self.kind.shifts_voltage() {
            self.mod_shift
        } else {
            0.0
        }
    }

    pub(crate) fn settle(&mut self, v: f64) {
        let gating = self.kind.gating();
        let shift = self.shift();
        self.m = gating.activation.steady_state(v, shift);
        self.h = gating
            .inactivation
            .map_or(1.0, |gate| gate.steady_state(v, shift));
    }

    pub(crate) fn relax(&mut self, v: f64, dt: f64) {
        let gating = self.kind.gating();
        let shift = self.shift();

        let m_inf = gating.activation.steady_state(v, shift);
        self.m = m_inf + (self.m - m_inf) * (-dt / gating.activation.tau).exp();

        if let Some(gate) = gating.inactivation {
            let h_inf = gate.steady_state(v, shift);
            self.h = h_inf + (self.h - h_inf) * (-dt / gate.tau).exp();
        }
    }

    /// Open conductance per unit area and the reversal it drives towards.
    pub(crate) fn open_conductance(&self) -> (f64, f64) {
        let gating = self.kind.gating();
        let open = self.m.powi(gating.power) * self.h;
        (self.effective_conductance() * open, gating.e_rev)
    }
}
