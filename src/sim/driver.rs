use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::metrics::{
    baseline, exclude_at_start, plateau_amplitude, plateau_duration, spike_summary,
};
use crate::config::{LabelledTarget, ModulationSettings, ModulationTargets, SimulationConfig};
use crate::error::{DppError, Result};
use crate::neuro::cell::Cell;
use crate::neuro::context::SimulationContext;
use crate::neuro::factors::{CellType, Modulator, draw_factors};
use crate::neuro::mechanism::MechanismKind;
use crate::neuro::modulation::{
    Families, KafMode, ModFactors, Modulation, ModulationConfig, PlayKey, SegmentTarget, SpatialMode,
    TargetSpec,
};
use crate::neuro::morphology::Morphology;
use crate::neuro::solver::{Integrator, ReducedSolver};
use crate::neuro::stimuli::{
    ClusterSpec, SeedCounter, SynapseRegistry, set_clustered_stim, set_hfi, set_noise,
};
use crate::sim::library::{ModelLibrary, ModelSet};

/// Somatic trace and the observables derived from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub tm: Vec<f64>,
    pub vm: Vec<f64>,
    /// Path distance (µm) from the soma to the clustered input.
    pub dist: u32,
    pub rheo: f64,
    pub dur: Option<f64>,
    pub amp: Option<f64>,
    pub spiked: bool,
    pub first_spike: Option<f64>,
    pub n_spikes: usize,
    pub hfi_mean_dist: Option<f64>,
    /// Segments touched by the modulation, 0 for control runs.
    pub modulated_segments: usize,
    pub id: usize,
    pub cell_type: CellType,
    pub label: String,
    pub modulation: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMeta {
    pub id: usize,
    pub round: usize,
    pub cell_type: CellType,
    pub rheo: f64,
    pub seed: u64,
    pub factors: BTreeMap<String, f64>,
}

/// Runs of one cell keyed by clustered label, then by run label. The
/// control run sits under the clustered label itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    pub meta: ProtocolMeta,
    pub runs: BTreeMap<String, BTreeMap<String, RunRecord>>,
}

/// Modulation applied during one run.
#[derive(Clone, Debug)]
pub struct ModulationRun<'a> {
    pub settings: &'a ModulationSettings,
    pub target: TargetSpec,
    pub label: String,
    pub factors: &'a BTreeMap<String, f64>,
}

impl ModulationRun<'_> {
    fn config(&self, ctx: &SimulationContext) -> Result<ModulationConfig> {
        let factors = ModFactors::from_names(self.factors)?;
        let targeted = matches!(self.target, TargetSpec::Named { .. });

        let mut config = match (self.settings.modulator, targeted) {
            (Modulator::Dopamine, _) => ModulationConfig::dopamine(factors),
            (Modulator::Acetylcholine, true) => ModulationConfig::targeted_acetylcholine(factors),
            (Modulator::Acetylcholine, false) => ModulationConfig::acetylcholine(factors),
        };
        // the cholinergic kaf draw is already a shift in mV
        if let Some(mv) = self.settings.kaf_shift.or_else(|| self.factors.get("kaf").copied()) {
            config = config.with_kaf_shift(mv);
        }

        let preset = config.families;
        let wanted = self.settings.families;
        config.families = Families {
            intrinsic: preset.intrinsic && wanted.intrinsic,
            kaf_shift: preset.kaf_shift && wanted.kaf_shift,
            gaba: preset.gaba && wanted.gaba,
            glut: preset.glut && wanted.glut,
        };

        if let Some(on) = self.settings.profile.schedule(ctx)? {
            let mut keys: BTreeSet<PlayKey> = config
                .factors
                .channels
                .keys()
                .map(|&kind| PlayKey::Channel(kind))
                .chain(config.factors.receptors.keys().map(|&r| PlayKey::Receptor(r)))
                .collect();
            if let KafMode::Shift { .. } = config.kaf {
                keys.insert(PlayKey::Channel(MechanismKind::Kaf));
            }

            for key in keys {
                let schedule = match (key, config.kaf) {
                    (PlayKey::Channel(MechanismKind::Kaf), KafMode::Shift { mv }) => on.scaled(mv),
                    _ => on.clone(),
                };
                config = config.with_schedule(key, schedule);
            }
        }

        Ok(config)
    }
}

pub fn build_cell(config: &SimulationConfig, model: &ModelSet) -> Result<Cell> {
    let morphology = match &config.morphology {
        Some(path) => Morphology::load(path)?,
        None => Morphology::branched(&config.branched),
    };
    Cell::build(&morphology, &config.biophysics, &model.variables)
}

/// Keeps a metric that is undefined for this trace as `None`.
fn tolerate(metric: &str, value: Result<f64>) -> Result<Option<f64>> {
    match value {
        Ok(v) => Ok(Some(v)),
        Err(DppError::Domain(reason)) => {
            warn!(metric, %reason, "metric left undefined");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// One simulation of a freshly built cell: clustered input on
/// `cluster.section`, optional background input, optional modulation.
pub fn run_single(
    config: &SimulationConfig,
    model: &ModelSet,
    id: usize,
    cluster: &LabelledTarget,
    modulation: Option<&ModulationRun<'_>>,
    seed: u64,
) -> Result<RunRecord> {
    let ctx = SimulationContext::new(config.dt, config.stop)?;
    let mut cell = build_cell(config, model)?;
    let mut solver = ReducedSolver::new(ctx);
    let mut registry = SynapseRegistry::new();
    let mut seeds = SeedCounter::new(seed);
    let mut rng = StdRng::seed_from_u64(seed);

    if let Some(noise) = &config.noise {
        set_noise(&mut cell, &mut registry, &mut seeds, noise, &mut rng)?;
    }
    let hfi_mean_dist = match &config.hfi {
        Some(hfi) => {
            let (arrangement, _) = set_hfi(&mut cell, &mut registry, &mut seeds, hfi, &mut rng)?;
            Some(arrangement.mean_dist)
        }
        None => None,
    };

    let cluster_spec = ClusterSpec {
        n: config.clustered.stim_n,
        act_time: config.clustered.stim_t,
        isi: config.clustered.isi,
        x: config.clustered.x,
        ..ClusterSpec::default()
    };
    let (handle, dist) = set_clustered_stim(
        &mut cell,
        &mut registry,
        &mut seeds,
        &cluster.section,
        &cluster_spec,
    )?;
    let clustered = registry.resolve(&handle)?;
    debug!(
        key = %clustered.key,
        synapse = clustered.synapse,
        generation = clustered.generation,
        inputs = registry.len(),
        "inputs placed"
    );

    let mut applied = match modulation {
        Some(run) => {
            let mut m = Modulation::new(&cell, &run.target, run.config(&ctx)?)?;
            m.apply(&mut cell, &mut solver)?;
            Some(m)
        }
        None => None,
    };

    solver.initialize(&mut cell, config.v_init);

    let soma = cell.locate(cell.soma(), 0.5);
    let mut tm = Vec::with_capacity(ctx.steps() + 1);
    let mut vm = Vec::with_capacity(ctx.steps() + 1);
    tm.push(solver.context().t);
    vm.push(cell.segment(soma).v);

    while !solver.context().finished() {
        registry.emit(&mut solver);
        solver.advance(&mut cell);
        tm.push(solver.context().t);
        vm.push(cell.segment(soma).v);
    }

    let modulated_segments = match applied.as_mut() {
        Some(m) => {
            m.reset(&mut cell, &mut solver);
            debug!(state = ?m.state(), "modulation reset after run");
            m.targets().len()
        }
        None => 0,
    };

    let metrics = &config.metrics;
    let (dur, amp) = if metrics.plateau {
        match tolerate(
            "baseline",
            baseline(&tm, &vm, config.clustered.stim_t, metrics.baseline_window),
        )? {
            Some(base) => {
                let (t_after, v_after) = exclude_at_start(&tm, &vm, config.clustered.stim_t);
                (
                    tolerate("duration", plateau_duration(t_after, v_after, base))?,
                    tolerate("amplitude", plateau_amplitude(v_after, base))?,
                )
            }
            None => (None, None),
        }
    } else {
        (None, None)
    };

    let spikes = if metrics.spikes {
        spike_summary(&tm, &vm, metrics.spike_threshold)
    } else {
        Default::default()
    };

    let label = modulation.map(|m| m.label.clone());
    info!(
        id,
        section = %cluster.section,
        modulation = label.as_deref().unwrap_or("control"),
        dur,
        amp,
        spikes = spikes.count,
        "run finished"
    );

    Ok(RunRecord {
        tm,
        vm,
        dist,
        rheo: model.rheobase,
        dur,
        amp,
        spiked: spikes.spiked,
        first_spike: spikes.first_spike,
        n_spikes: spikes.count,
        hfi_mean_dist,
        modulated_segments,
        id,
        cell_type: config.cell_type,
        label: cluster.label.clone(),
        modulation: label,
    })
}

/// Seed shared by every run of one cell and round, so control and
/// modulated runs see the same background input.
pub fn run_seed(base: u64, id: usize, round: usize) -> u64 {
    base.wrapping_add((round as u64).wrapping_mul(1_000_003))
        .wrapping_add(id as u64)
}

// separates the factor draw from the noise stream
const FACTOR_STREAM: u64 = 0x5eed_fac7;

/// For every clustered target: a control run, then one run per modulation
/// target.
pub fn run_protocol(
    config: &SimulationConfig,
    library: &ModelLibrary,
    id: usize,
    round: usize,
) -> Result<ProtocolRecord> {
    let model = library.get(id)?;
    let seed = run_seed(config.seed, id, round);

    let factors = match &config.modulation {
        Some(settings) => {
            let mut rng = StdRng::seed_from_u64(seed ^ FACTOR_STREAM);
            draw_factors(
                settings.modulator,
                config.cell_type,
                &settings.channels,
                settings.factor_mode,
                &mut rng,
            )?
        }
        None => BTreeMap::new(),
    };

    let modulation_runs: Vec<ModulationRun<'_>> = match &config.modulation {
        Some(settings) => match &settings.targets {
            ModulationTargets::Mode(mode) => vec![ModulationRun {
                settings,
                target: TargetSpec::Mode(SpatialMode::parse(mode)?),
                label: mode.clone(),
                factors: &factors,
            }],
            ModulationTargets::Sections(_) => config
                .modulation_sections(settings)
                .into_iter()
                .map(|t| ModulationRun {
                    settings,
                    target: TargetSpec::Named {
                        names: vec![t.section],
                        position: t.x.map_or(SegmentTarget::AllSegments, SegmentTarget::At),
                    },
                    label: t.label,
                    factors: &factors,
                })
                .collect(),
        },
        None => Vec::new(),
    };

    info!(
        id,
        round,
        cell_type = config.cell_type.name(),
        modulated = modulation_runs.len(),
        "protocol started"
    );

    let mut runs = BTreeMap::new();
    for cluster in config.clustered_targets() {
        let mut by_label = BTreeMap::new();
        by_label.insert(
            cluster.label.clone(),
            run_single(config, model, id, &cluster, None, seed)?,
        );
        for modulation in &modulation_runs {
            by_label.insert(
                modulation.label.clone(),
                run_single(config, model, id, &cluster, Some(modulation), seed)?,
            );
        }
        runs.insert(cluster.label.clone(), by_label);
    }

    Ok(ProtocolRecord {
        meta: ProtocolMeta {
            id,
            round,
            cell_type: config.cell_type,
            rheo: model.rheobase,
            seed,
            factors: factors.clone(),
        },
        runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusteredConfig, ModulationProfile};
    use crate::neuro::morphology::BranchedSpec;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            branched: BranchedSpec {
                primaries: 1,
                depth: 1,
                ..BranchedSpec::default()
            },
            clustered: ClusteredConfig {
                targets: Some(vec![
                    LabelledTarget {
                        section: "dend[1]".to_string(),
                        label: "proximal dend".to_string(),
                        x: None,
                    },
                    LabelledTarget {
                        section: "dend[2]".to_string(),
                        label: "distal dend".to_string(),
                        x: None,
                    },
                ]),
                stim_t: 20.0,
                ..ClusteredConfig::default()
            },
            modulation: Some(ModulationSettings {
                targets: ModulationTargets::Sections(Some(vec![
                    LabelledTarget {
                        section: "dend[0]".to_string(),
                        label: "off-site".to_string(),
                        x: Some(0.5),
                    },
                    LabelledTarget {
                        section: "soma[0]".to_string(),
                        label: "soma".to_string(),
                        x: None,
                    },
                ])),
                ..ModulationSettings::default()
            }),
            noise: None,
            stop: 60.0,
            dt: 0.1,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn protocol_runs_control_and_each_modulation_target() {
        let config = small_config();
        let record = run_protocol(&config, &ModelLibrary::single(200.0), 0, 0).unwrap();

        assert_eq!(record.runs.len(), 2);
        let proximal = &record.runs["proximal dend"];
        let labels: Vec<_> = proximal.keys().cloned().collect();
        assert_eq!(labels, ["off-site", "proximal dend", "soma"]);

        let control = &proximal["proximal dend"];
        assert!(control.modulation.is_none());
        assert_eq!(control.tm.len(), 601);
        assert_eq!(control.tm.len(), control.vm.len());
        assert!((control.tm[600] - 60.0).abs() < 1e-9);
        assert!(control.vm.iter().all(|v| v.is_finite()));
        assert_eq!(control.rheo, 200.0);
        assert!(control.dist > 0);
        assert_eq!(proximal["soma"].modulation.as_deref(), Some("soma"));
        assert_eq!(proximal["soma"].modulated_segments, 1);
        assert_eq!(control.modulated_segments, 0);
        assert_eq!(proximal["off-site"].modulated_segments, 1);
        assert!(!record.meta.factors.is_empty());
    }

    #[test]
    fn same_seed_reproduces_the_trace() {
        let mut config = small_config();
        config.noise = Some(crate::neuro::stimuli::NoiseSpec {
            n_glut: 10,
            n_gaba: 5,
            freq_glut: 50.0,
            freq_gaba: 20.0,
            ..Default::default()
        });
        config.modulation = None;
        let model = ModelSet::default();
        let target = config.clustered_targets()[0].clone();

        let a = run_single(&config, &model, 0, &target, None, 7).unwrap();
        let b = run_single(&config, &model, 0, &target, None, 7).unwrap();
        assert_eq!(a.vm, b.vm);
    }

    #[test]
    fn windowed_modulation_leaves_earlier_samples_untouched() {
        let mut config = small_config();
        let mut settings = config.modulation.clone().unwrap();
        settings.profile = ModulationProfile::Window {
            onset: 40.0,
            offset: 50.0,
        };
        config.modulation = Some(settings.clone());

        let model = ModelSet::default();
        let target = config.clustered_targets()[1].clone();
        let factors = BTreeMap::from([("naf".to_string(), 1.2), ("kaf".to_string(), 5.0)]);
        let modulation = ModulationRun {
            settings: &settings,
            target: TargetSpec::named(["soma[0]"]),
            label: "soma".to_string(),
            factors: &factors,
        };

        let control = run_single(&config, &model, 0, &target, None, 1).unwrap();
        let modded = run_single(&config, &model, 0, &target, Some(&modulation), 1).unwrap();

        let before = control.tm.iter().take_while(|&&t| t < 39.0).count();
        assert_eq!(control.vm[..before], modded.vm[..before]);
        assert_ne!(control.vm[before..], modded.vm[before..]);
    }

    #[test]
    fn kaf_shift_follows_settings_then_drawn_value_then_preset() {
        let ctx = SimulationContext::new(0.1, 60.0).unwrap();
        let mut settings = ModulationSettings::default();
        let drawn = BTreeMap::from([("kaf".to_string(), 9.0), ("naf".to_string(), 1.1)]);
        let naf_only = BTreeMap::from([("naf".to_string(), 1.1)]);
        let run =
            |settings: &ModulationSettings, factors: &BTreeMap<String, f64>, target: TargetSpec| {
                ModulationRun {
                    settings,
                    target,
                    label: "soma".to_string(),
                    factors,
                }
                .config(&ctx)
                .unwrap()
            };

        let named = || TargetSpec::named(["soma[0]"]);
        let uniform = || TargetSpec::Mode(SpatialMode::Uniform);
        assert_eq!(run(&settings, &drawn, named()).kaf, KafMode::Shift { mv: 9.0 });
        assert_eq!(run(&settings, &drawn, uniform()).kaf, KafMode::Shift { mv: 9.0 });
        assert_eq!(run(&settings, &naf_only, uniform()).kaf, KafMode::Shift { mv: 20.0 });

        settings.kaf_shift = Some(12.0);
        settings.profile = ModulationProfile::Window {
            onset: 10.0,
            offset: 20.0,
        };
        let config = run(&settings, &drawn, named());
        assert_eq!(config.kaf, KafMode::Shift { mv: 12.0 });
        let kaf = &config.schedules[&PlayKey::Channel(MechanismKind::Kaf)];
        assert_eq!(kaf.get(150), Some(12.0));
        assert_eq!(kaf.get(50), Some(0.0));

        settings.modulator = Modulator::Dopamine;
        assert_eq!(run(&settings, &drawn, named()).kaf, KafMode::Conductance);
    }

    #[test]
    fn unknown_cluster_section_is_a_configuration_error() {
        let config = small_config();
        let target = LabelledTarget {
            section: "dend[99]".to_string(),
            label: "missing".to_string(),
            x: None,
        };
        assert!(matches!(
            run_single(&config, &ModelSet::default(), 0, &target, None, 0),
            Err(DppError::Configuration(_))
        ));
    }
}
