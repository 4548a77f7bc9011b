use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::metrics::MetricsConfig;
use crate::error::{DppError, Result};
use crate::neuro::cell::Biophysics;
use crate::neuro::context::SimulationContext;
use crate::neuro::factors::{CellType, FactorMode, Modulator};
use crate::neuro::modulation::{Families, SpatialMode};
use crate::neuro::morphology::BranchedSpec;
use crate::neuro::schedule::Schedule;
use crate::neuro::stimuli::{HfiSpec, NoiseSpec};

/// A section with the label it is reported under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelledTarget {
    pub section: String,
    pub label: String,
    /// Restricts modulation to the segment at this position.
    #[serde(default)]
    pub x: Option<f64>,
}

impl LabelledTarget {
    fn new(section: &str, label: &str) -> Self {
        Self {
            section: section.to_string(),
            label: label.to_string(),
            x: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteredConfig {
    /// Preset targets for the cell type when unset.
    pub targets: Option<Vec<LabelledTarget>>,
    pub stim_n: usize,
    /// ms
    pub stim_t: f64,
    pub isi: f64,
    pub x: f64,
}

impl Default for ClusteredConfig {
    fn default() -> Self {
        Self {
            targets: None,
            stim_n: 16,
            stim_t: 100.0,
            isi: 1.0,
            x: 0.5,
        }
    }
}

/// Where the modulation object is bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationTargets {
    /// One run per named section, restricted to that section.
    Sections(Option<Vec<LabelledTarget>>),
    /// A single run with whole classes modulated.
    Mode(String),
}

/// Time course of the modulation level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModulationProfile {
    /// Fully on for the whole run.
    #[default]
    On,
    Level { level: f64 },
    /// On for `[onset, offset]` ms, off elsewhere.
    Window { onset: f64, offset: f64 },
    /// Transient peaking at full modulation `tau` ms after `onset`.
    Alpha { onset: f64, tau: f64 },
    /// Rises from off to on around `onset`; `slope` in ms.
    Sigmoid { onset: f64, slope: f64 },
}

impl ModulationProfile {
    fn validate(&self) -> Result<()> {
        let ok = match *self {
            ModulationProfile::On => true,
            ModulationProfile::Level { level } => level.is_finite(),
            ModulationProfile::Window { onset, offset } => onset >= 0.0 && offset >= onset,
            ModulationProfile::Alpha { tau, .. } => tau > 0.0,
            ModulationProfile::Sigmoid { slope, .. } => slope.is_finite() && slope != 0.0,
        };
        if !ok {
            return Err(DppError::Configuration(format!(
                "invalid modulation profile {self:?}"
            )));
        }
        Ok(())
    }

    /// Level schedule for the run, or `None` when the level stays at 1.
    pub fn schedule(&self, ctx: &SimulationContext) -> Result<Option<Schedule>> {
        let schedule = match *self {
            ModulationProfile::On => return Ok(None),
            ModulationProfile::Level { level } => Schedule::constant(ctx, level),
            ModulationProfile::Window { onset, offset } => Schedule::step(ctx, onset, offset, 1.0)?,
            ModulationProfile::Alpha { onset, tau } => Schedule::alpha(ctx, onset, 1.0, tau)?,
            ModulationProfile::Sigmoid { onset, slope } => {
                Schedule::sigmoid(ctx, onset, 0.0, 1.0, -slope.abs())?
            }
        };
        Ok(Some(schedule))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationSettings {
    pub modulator: Modulator,
    pub targets: ModulationTargets,
    /// Channel and receptor names, or `["all"]`.
    pub channels: Vec<String>,
    pub factor_mode: FactorMode,
    pub families: Families,
    pub profile: ModulationProfile,
    /// kaf gating shift (mV) for cholinergic runs. Unset takes the drawn
    /// `kaf` value, then 5 mV for named sections or 20 mV for whole classes.
    pub kaf_shift: Option<f64>,
}

impl Default for ModulationSettings {
    fn default() -> Self {
        Self {
            modulator: Modulator::Acetylcholine,
            targets: ModulationTargets::Sections(None),
            channels: vec!["all".to_string()],
            factor_mode: FactorMode::Random,
            families: Families::default(),
            profile: ModulationProfile::On,
            kaf_shift: None,
        }
    }
}

/// Everything one `run` invocation needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub cell_type: CellType,
    /// JSON morphology; the synthetic branched tree when unset.
    pub morphology: Option<PathBuf>,
    pub branched: BranchedSpec,
    pub biophysics: Biophysics,
    pub library: Option<PathBuf>,
    /// Every id in the library when empty.
    pub model_ids: Vec<usize>,
    pub rounds: usize,
    pub clustered: ClusteredConfig,
    pub modulation: Option<ModulationSettings>,
    pub noise: Option<NoiseSpec>,
    pub hfi: Option<HfiSpec>,
    /// ms
    pub stop: f64,
    pub dt: f64,
    /// mV
    pub v_init: f64,
    pub metrics: MetricsConfig,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cell_type: CellType::Dspn,
            morphology: None,
            branched: BranchedSpec::default(),
            biophysics: Biophysics::default(),
            library: None,
            model_ids: Vec::new(),
            rounds: 1,
            clustered: ClusteredConfig::default(),
            modulation: Some(ModulationSettings::default()),
            noise: Some(NoiseSpec {
                freq_glut: 12.0,
                freq_gaba: 3.0,
                ..NoiseSpec::default()
            }),
            hfi: None,
            stop: 350.0,
            dt: 0.025,
            v_init: -80.0,
            metrics: MetricsConfig::default(),
            seed: 0,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), cell_type = config.cell_type.name(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(DppError::Configuration(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !self.stop.is_finite() || self.stop <= self.clustered.stim_t {
            return Err(DppError::Configuration(format!(
                "stop ({} ms) must come after the stimulus at {} ms",
                self.stop, self.clustered.stim_t
            )));
        }
        if self.rounds == 0 {
            return Err(DppError::Configuration(
                "rounds must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.clustered.x) {
            return Err(DppError::Configuration(format!(
                "clustered position {} lies outside [0, 1]",
                self.clustered.x
            )));
        }
        if self.clustered_targets().is_empty() {
            return Err(DppError::Configuration(
                "no clustered targets configured".to_string(),
            ));
        }

        if let Some(modulation) = &self.modulation {
            if let ModulationTargets::Mode(mode) = &modulation.targets {
                SpatialMode::parse(mode)?;
            }
            modulation.profile.validate()?;
            if let Some(mv) = modulation.kaf_shift {
                if !mv.is_finite() {
                    return Err(DppError::Configuration(format!(
                        "kaf shift must be finite, got {mv}"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn clustered_targets(&self) -> Vec<LabelledTarget> {
        self.clustered.targets.clone().unwrap_or_else(|| match self.cell_type {
            CellType::Dspn => vec![
                LabelledTarget::new("dend[49]", "proximal dend"),
                LabelledTarget::new("dend[51]", "distal dend"),
            ],
            CellType::Ispn => vec![
                LabelledTarget::new("dend[12]", "proximal dend"),
                LabelledTarget::new("dend[17]", "distal dend"),
            ],
        })
    }

    /// Sections modulated one at a time, with their labels.
    pub fn modulation_sections(&self, settings: &ModulationSettings) -> Vec<LabelledTarget> {
        match &settings.targets {
            ModulationTargets::Sections(Some(targets)) => targets.clone(),
            ModulationTargets::Sections(None) => {
                let off_site = match self.cell_type {
                    CellType::Dspn => "dend[48]",
                    CellType::Ispn => "dend[8]",
                };
                vec![
                    LabelledTarget::new(off_site, "off-site"),
                    LabelledTarget::new("soma[0]", "soma"),
                    LabelledTarget::new("axon[0]", "axon"),
                ]
            }
            ModulationTargets::Mode(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_gives_dspn_presets() {
        let file = write_config("{}");
        let config = SimulationConfig::load(file.path()).unwrap();

        let labels: Vec<_> = config
            .clustered_targets()
            .into_iter()
            .map(|t| t.section)
            .collect();
        assert_eq!(labels, ["dend[49]", "dend[51]"]);

        let settings = config.modulation.clone().unwrap();
        let sections = config.modulation_sections(&settings);
        assert_eq!(sections[0].section, "dend[48]");
        assert_eq!(sections[0].label, "off-site");
        assert_eq!(config.clustered.stim_n, 16);
        assert_eq!(config.noise.as_ref().unwrap().freq_glut, 12.0);
    }

    #[test]
    fn ispn_presets_and_overrides() {
        let file = write_config(
            r#"{
                "cell_type": "ispn",
                "noise": null,
                "modulation": {
                    "modulator": "dopamine",
                    "targets": {"mode": "no-axon"},
                    "kaf_shift": 8.0
                }
            }"#,
        );
        let config = SimulationConfig::load(file.path()).unwrap();

        assert_eq!(config.clustered_targets()[1].section, "dend[17]");
        assert!(config.noise.is_none());
        let settings = config.modulation.clone().unwrap();
        assert_eq!(settings.modulator, Modulator::Dopamine);
        assert!(config.modulation_sections(&settings).is_empty());
        assert_eq!(settings.profile, ModulationProfile::On);
        assert_eq!(settings.kaf_shift, Some(8.0));
    }

    #[test]
    fn profiles_sample_the_level_over_the_run() {
        let ctx = SimulationContext::new(1.0, 20.0).unwrap();

        assert!(ModulationProfile::On.schedule(&ctx).unwrap().is_none());

        let window = ModulationProfile::Window { onset: 5.0, offset: 9.0 }
            .schedule(&ctx)
            .unwrap()
            .unwrap();
        assert_eq!(window.len(), 20);
        assert_eq!(window.get(4), Some(0.0));
        assert_eq!(window.get(5), Some(1.0));
        assert_eq!(window.get(10), Some(0.0));

        let rising = ModulationProfile::Sigmoid { onset: 10.0, slope: 2.0 }
            .schedule(&ctx)
            .unwrap()
            .unwrap();
        assert!(rising.get(0).unwrap() < 0.01);
        assert!(rising.get(19).unwrap() > 0.9);

        let half = ModulationProfile::Level { level: 0.5 }.schedule(&ctx).unwrap().unwrap();
        assert_eq!(half.get(7), Some(0.5));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_mode = write_config(r#"{"modulation": {"targets": {"mode": "apical"}}}"#);
        assert!(matches!(
            SimulationConfig::load(bad_mode.path()),
            Err(DppError::Configuration(_))
        ));

        let early_stop = write_config(r#"{"stop": 50.0}"#);
        assert!(SimulationConfig::load(early_stop.path()).is_err());

        let window = write_config(
            r#"{"modulation": {"profile": {"kind": "window", "onset": 200.0, "offset": 100.0}}}"#,
        );
        assert!(matches!(
            SimulationConfig::load(window.path()),
            Err(DppError::Configuration(_))
        ));

        let mut config = SimulationConfig::default();
        if let Some(settings) = config.modulation.as_mut() {
            settings.kaf_shift = Some(f64::NAN);
        }
        assert!(matches!(config.validate(), Err(DppError::Configuration(_))));

        let unknown_cell = write_config(r#"{"cell_type": "fsn"}"#);
        assert!(matches!(
            SimulationConfig::load(unknown_cell.path()),
            Err(DppError::Json(_))
        ));
    }
}
