use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};
use crate::neuro::cell::SegmentRef;
use crate::neuro::scale::ModulationSlots;

/// Point-process classes that can be placed on a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SynapseKind {
    /// AMPA + NMDA with modulation hooks (`glut`).
    Glutamate,
    /// AMPA + NMDA with short-term depression (`tmglut`).
    TmGlutamate,
    /// Two-exponential GABA with modulation hooks (`gaba`).
    Gaba,
    /// Plain two-exponential synapse used as GABA (`gabaOld`).
    Exp2Gaba,
    /// GABA-A with short-term depression (`tmgabaa`).
    TmGabaA,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynapseFamily {
    Glutamatergic,
    Gabaergic,
}

impl SynapseKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "glut" => Ok(SynapseKind::Glutamate),
            "tmglut" => Ok(SynapseKind::TmGlutamate),
            "gaba" => Ok(SynapseKind::Gaba),
            "gabaOld" => Ok(SynapseKind::Exp2Gaba),
            "tmgabaa" => Ok(SynapseKind::TmGabaA),
            "ampa" => Err(DppError::Configuration(
                "synapse class 'ampa' (Exp2Syn format) is no longer supported".to_string(),
            )),
            other => Err(DppError::Configuration(format!(
                "unrecognised synapse class '{other}'"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SynapseKind::Glutamate => "glut",
            SynapseKind::TmGlutamate => "tmglut",
            SynapseKind::Gaba => "gaba",
            SynapseKind::Exp2Gaba => "gabaOld",
            SynapseKind::TmGabaA => "tmgabaa",
        }
    }

    pub fn family(self) -> SynapseFamily {
        match self {
            SynapseKind::Glutamate | SynapseKind::TmGlutamate => SynapseFamily::Glutamatergic,
            SynapseKind::Gaba | SynapseKind::Exp2Gaba | SynapseKind::TmGabaA => {
                SynapseFamily::Gabaergic
            }
        }
    }

    /// Registry key suffix appended to the compartment name.
    pub fn key_suffix(self) -> &'static str {
        match self.family() {
            SynapseFamily::Glutamatergic => "_glut",
            SynapseFamily::Gabaergic => "_gaba",
        }
    }

    /// Only the `glut` and `gaba` models carry modulation slots.
    pub fn is_modulatable(self) -> bool {
        matches!(self, SynapseKind::Glutamate | SynapseKind::Gaba)
    }

    fn receptors(self) -> &'static [Receptor] {
        match self.family() {
            SynapseFamily::Glutamatergic => &[Receptor::Ampa, Receptor::Nmda],
            SynapseFamily::Gabaergic => &[Receptor::Gaba],
        }
    }
}

impl fmt::Display for SynapseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for SynapseKind {
    type Error = DppError;

    fn try_from(name: String) -> Result<Self> {
        Self::parse(&name)
    }
}

impl From<SynapseKind> for String {
    fn from(kind: SynapseKind) -> Self {
        kind.name().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Receptor {
    Ampa,
    Nmda,
    Gaba,
}

impl Receptor {
    pub fn name(self) -> &'static str {
        match self {
            Receptor::Ampa => "AMPA",
            Receptor::Nmda => "NMDA",
            Receptor::Gaba => "GABA",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AMPA" => Some(Receptor::Ampa),
            "NMDA" => Some(Receptor::Nmda),
            "GABA" => Some(Receptor::Gaba),
            _ => None,
        }
    }
}

impl fmt::Display for Receptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-synapse parameters; unset fields take the class defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapseParams {
    /// NMDA weight relative to AMPA.
    pub ratio: Option<f64>,
    /// Recovery time constant of depressing synapses (ms).
    pub tau_dep: Option<f64>,
    /// Release probability of depressing synapses.
    pub u: Option<f64>,
    /// Reversal potential of GABA synapses (mV).
    pub e: Option<f64>,
    pub tau1: Option<f64>,
    pub tau2: Option<f64>,
    pub ampa_scale_factor: Option<f64>,
    pub nmda_scale_factor: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReceptorChannel {
    pub receptor: Receptor,
    pub tau1: f64,
    pub tau2: f64,
    pub e_rev: f64,
    /// Fraction of the connection weight routed to this receptor.
    pub weight_share: f64,
    pub slots: ModulationSlots,
    #[serde(skip)]
    a: f64,
    #[serde(skip)]
    b: f64,
    #[serde(skip)]
    peak_norm: f64,
}

impl ReceptorChannel {
    fn new(receptor: Receptor, tau1: f64, tau2: f64, e_rev: f64, weight_share: f64) -> Self {
        Self {
            receptor,
            tau1,
            tau2,
            e_rev,
            weight_share,
            slots: ModulationSlots::default(),
            a: 0.0,
            b: 0.0,
            peak_norm: peak_normalisation(tau1, tau2),
        }
    }

    fn activate(&mut self, weight: f64) {
        let increment = weight * self.weight_share * self.peak_norm;
        self.a += increment;
        self.b += increment;
    }

    fn decay(&mut self, dt: f64) {
        self.a *= (-dt / self.tau1).exp();
        self.b *= (-dt / self.tau2).exp();
    }

    /// Conductance (µS) including modulation and, for NMDA, the Mg block.
    pub fn conductance(&self, v: f64) -> f64 {
        let g = (self.b - self.a).max(0.0) * self.slots.factor();
        match self.receptor {
            Receptor::Nmda => g * mg_block(v),
            Receptor::Ampa | Receptor::Gaba => g,
        }
    }
}

fn peak_normalisation(tau1: f64, tau2: f64) -> f64 {
    if (tau2 - tau1).abs() < 1e-9 {
        return 1.0;
    }
    let t_peak = (tau1 * tau2) / (tau2 - tau1) * (tau2 / tau1).ln();
    1.0 / ((-t_peak / tau2).exp() - (-t_peak / tau1).exp())
}

fn mg_block(v: f64) -> f64 {
    const MG: f64 = 1.0;
    1.0 / (1.0 + (-0.062 * v).exp() * MG / 3.57)
}

#[derive(Clone, Copy, Debug, Serialize)]
struct Depression {
    tau_rec: f64,
    u: f64,
    resources: f64,
}

/// A point process attached to one segment of the owning cell.
#[derive(Clone, Debug, Serialize)]
pub struct Synapse {
    pub kind: SynapseKind,
    pub location: SegmentRef,
    pub x: f64,
    pub receptors: Vec<ReceptorChannel>,
    depression: Option<Depression>,
}

impl Synapse {
    pub fn new(kind: SynapseKind, location: SegmentRef, x: f64, params: &SynapseParams) -> Self {
        let receptors = kind
            .receptors()
            .iter()
            .map(|&receptor| match receptor {
                Receptor::Ampa => ReceptorChannel::new(
                    receptor,
                    params.tau1.unwrap_or(1.9),
                    params.tau2.unwrap_or(4.8),
                    0.0,
                    params.ampa_scale_factor.unwrap_or(1.0),
                ),
                Receptor::Nmda => {
                    let ratio = params.ratio.unwrap_or(1.0).max(0.0);
                    ReceptorChannel::new(
                        receptor,
                        5.52,
                        231.0,
                        0.0,
                        ratio * params.nmda_scale_factor.unwrap_or(1.0),
                    )
                }
                Receptor::Gaba => ReceptorChannel::new(
                    receptor,
                    params.tau1.unwrap_or(0.5),
                    params.tau2.unwrap_or(7.5),
                    params.e.unwrap_or(-60.0),
                    1.0,
                ),
            })
            .collect();

        let depression = match kind {
            SynapseKind::TmGlutamate | SynapseKind::TmGabaA => Some(Depression {
                tau_rec: params.tau_dep.unwrap_or(100.0),
                u: params.u.unwrap_or(1.0).clamp(0.0, 1.0),
                resources: 1.0,
            }),
            _ => None,
        };

        Self {
            kind,
            location,
            x,
            receptors,
            depression,
        }
    }

    #[cfg(test)]
    pub fn receptor(&self, receptor: Receptor) -> Option<&ReceptorChannel> {
        self.receptors.iter().find(|r| r.receptor == receptor)
    }

    pub fn receptor_mut(&mut self, receptor: Receptor) -> Option<&mut ReceptorChannel> {
        self.receptors.iter_mut().find(|r| r.receptor == receptor)
    }

    /// Delivers one presynaptic event of the given weight (µS).
    pub fn receive(&mut self, weight: f64) {
        let efficacy = match self.depression.as_mut() {
            Some(dep) => {
                let released = dep.u * dep.resources;
                dep.resources -= released;
                released / dep.u.max(f64::MIN_POSITIVE)
            }
            None => 1.0,
        };

        for receptor in &mut self.receptors {
            receptor.activate(weight * efficacy);
        }
    }

    pub(crate) fn decay(&mut self, dt: f64) {
        for receptor in &mut self.receptors {
            receptor.decay(dt);
        }
        if let Some(dep) = self.depression.as_mut() {
            dep.resources = 1.0 + (dep.resources - 1.0) * (-dt / dep.tau_rec).exp();
        }
    }

    /// Total conductance (µS) and the conductance-weighted drive g·E (nA).
    pub(crate) fn drive(&self, v: f64) -> (f64, f64) {
        self.receptors.iter().fold((0.0, 0.0), |(g, ge), r| {
            let gr = r.conductance(v);
            (g + gr, ge + gr * r.e_rev)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_soma() -> SegmentRef {
        SegmentRef {
            compartment: 0,
            segment: 0,
        }
    }

    #[test]
    fn parse_rejects_deprecated_and_unknown_classes() {
        assert!(matches!(
            SynapseKind::parse("ampa"),
            Err(DppError::Configuration(msg)) if msg.contains("no longer supported")
        ));
        assert!(matches!(
            SynapseKind::parse("kainate"),
            Err(DppError::Configuration(_))
        ));
        assert_eq!(SynapseKind::parse("gabaOld").unwrap(), SynapseKind::Exp2Gaba);

        let kind: SynapseKind = serde_json::from_str("\"tmglut\"").unwrap();
        assert_eq!(kind, SynapseKind::TmGlutamate);
        assert!(serde_json::from_str::<SynapseKind>("\"ampa\"").is_err());
    }

    #[test]
    fn keys_follow_family() {
        assert_eq!(SynapseKind::TmGlutamate.key_suffix(), "_glut");
        assert_eq!(SynapseKind::TmGabaA.key_suffix(), "_gaba");
        assert!(SynapseKind::Gaba.is_modulatable());
        assert!(!SynapseKind::TmGabaA.is_modulatable());
    }

    #[test]
    fn glutamate_carries_two_independent_receptors() {
        let syn = Synapse::new(SynapseKind::Glutamate, at_soma(), 0.5, &SynapseParams::default());
        assert!(syn.receptor(Receptor::Ampa).is_some());
        assert!(syn.receptor(Receptor::Nmda).is_some());
        assert!(syn.receptor(Receptor::Gaba).is_none());
    }

    #[test]
    fn event_peaks_at_weight_and_decays() {
        let mut syn = Synapse::new(SynapseKind::Gaba, at_soma(), 0.5, &SynapseParams::default());
        syn.receive(1e-3);

        let mut peak: f64 = 0.0;
        for _ in 0..2000 {
            syn.decay(0.025);
            peak = peak.max(syn.receptors[0].conductance(-70.0));
        }
        assert!((peak - 1e-3).abs() < 2e-5);
        assert!(syn.receptors[0].conductance(-70.0) < peak);
    }

    #[test]
    fn depression_reduces_back_to_back_events() {
        let params = SynapseParams {
            u: Some(0.5),
            ..SynapseParams::default()
        };
        let mut syn = Synapse::new(SynapseKind::TmGabaA, at_soma(), 0.5, &params);
        syn.receive(1.0);
        let first = syn.receptors[0].b;
        syn.receive(1.0);
        let second = syn.receptors[0].b - first;
        assert!(second < first);
    }
}
