use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DppError, Result};
use crate::neuro::cell::{Cell, SectionClass};
use crate::neuro::solver::Integrator;
use crate::neuro::spatial::{InputArrangement, hf_input_arrangement};
use crate::neuro::synapse::{Synapse, SynapseFamily, SynapseKind, SynapseParams};

/// Artificial presynaptic spike generator: `number` events from `start`
/// with mean `interval`, where `noise` in [0, 1] is the exponentially
/// distributed share of every interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeTrainSpec {
    pub start: f64,
    pub interval: f64,
    pub noise: f64,
    pub number: usize,
}

impl Default for SpikeTrainSpec {
    fn default() -> Self {
        Self {
            start: 0.0,
            interval: 1000.0 / 18.0,
            noise: 1.0,
            number: 1000,
        }
    }
}

impl SpikeTrainSpec {
    pub fn ensure_valid(&self) -> Result<()> {
        if !(self.start.is_finite() && self.start >= 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "spike train start must be >= 0, got {}",
                self.start
            )));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "spike train interval must be > 0, got {}",
                self.interval
            )));
        }
        if !(0.0..=1.0).contains(&self.noise) {
            return Err(DppError::InvalidArgument(format!(
                "spike train noise must lie in [0, 1], got {}",
                self.noise
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSpec {
    /// ms
    pub delay: f64,
    /// µS
    pub weight: f64,
    pub threshold: f64,
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        Self {
            delay: 0.0,
            weight: 0.6e-3,
            threshold: 0.1,
        }
    }
}

impl ConnectionSpec {
    pub fn ensure_valid(&self) -> Result<()> {
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "connection weight must be a finite conductance >= 0, got {}",
                self.weight
            )));
        }
        if !(self.delay.is_finite() && self.delay >= 0.0) {
            return Err(DppError::InvalidArgument(format!(
                "connection delay must be >= 0, got {}",
                self.delay
            )));
        }
        Ok(())
    }
}

/// Hands out one seed per spike source, in placement order.
#[derive(Clone, Debug)]
pub struct SeedCounter {
    next: u64,
}

impl SeedCounter {
    pub fn new(base: u64) -> Self {
        Self { next: base }
    }

    pub fn next_seed(&mut self) -> u64 {
        let seed = self.next;
        self.next = self.next.wrapping_add(1);
        seed
    }
}

#[derive(Clone, Debug)]
pub struct SpikeSource {
    spec: SpikeTrainSpec,
    rng: StdRng,
    next_time: Option<f64>,
    emitted: usize,
}

impl SpikeSource {
    pub fn new(spec: SpikeTrainSpec, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let next_time = (spec.number > 0).then(|| {
            let jitter = if spec.noise > 0.0 {
                spec.noise * spec.interval * Self::exponential(&mut rng)
            } else {
                0.0
            };
            (spec.start + jitter).max(0.0)
        });

        Self {
            spec,
            rng,
            next_time,
            emitted: 0,
        }
    }

    pub fn next_time(&self) -> Option<f64> {
        self.next_time
    }

    fn advance(&mut self) {
        self.emitted += 1;
        self.next_time = match self.next_time {
            Some(t) if self.emitted < self.spec.number => {
                let fixed = self.spec.interval * (1.0 - self.spec.noise);
                let random = if self.spec.noise > 0.0 {
                    self.spec.noise * self.spec.interval * Self::exponential(&mut self.rng)
                } else {
                    0.0
                };
                Some(t + fixed + random)
            }
            _ => None,
        };
    }

    fn exponential(rng: &mut StdRng) -> f64 {
        let u: f64 = rng.random();
        -u.max(f64::MIN_POSITIVE).ln()
    }
}

/// Generation-tagged reference to a registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SynapseHandle {
    pub key: String,
    index: usize,
    generation: u32,
}

#[derive(Clone, Debug)]
pub struct RegisteredInput {
    pub key: String,
    pub generation: u32,
    /// Index into the cell's synapse table.
    pub synapse: usize,
    pub source: SpikeSource,
    pub connection: ConnectionSpec,
}

/// Every input placed on a cell, addressed by `<section><suffix>` keys.
/// Re-registering a key retires the previous handle, but the retired
/// input keeps firing.
#[derive(Clone, Debug, Default)]
pub struct SynapseRegistry {
    entries: Vec<RegisteredInput>,
    live: HashMap<String, (usize, u32)>,
}

impl SynapseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: String,
        synapse: usize,
        source: SpikeSource,
        connection: ConnectionSpec,
    ) -> SynapseHandle {
        let generation = self.live.get(&key).map_or(0, |&(_, g)| g + 1);
        let index = self.entries.len();

        self.entries.push(RegisteredInput {
            key: key.clone(),
            generation,
            synapse,
            source,
            connection,
        });
        self.live.insert(key.clone(), (index, generation));

        SynapseHandle {
            key,
            index,
            generation,
        }
    }

    pub fn resolve(&self, handle: &SynapseHandle) -> Result<&RegisteredInput> {
        match self.live.get(&handle.key) {
            Some(&(index, generation)) if generation == handle.generation => {
                debug_assert_eq!(index, handle.index);
                Ok(&self.entries[index])
            }
            Some(&(_, current)) => Err(DppError::StaleHandle {
                key: handle.key.clone(),
                held: handle.generation,
                current,
            }),
            None => Err(DppError::InvalidArgument(format!(
                "no input registered under '{}'",
                handle.key
            ))),
        }
    }

    /// Live entry for `key`, if any.
    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&RegisteredInput> {
        self.live.get(key).map(|&(index, _)| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hands every spike due within the current step to the integrator,
    /// offset by the connection delay.
    pub fn emit<I: Integrator>(&mut self, solver: &mut I) {
        let ctx = *solver.context();
        let step_end = ctx.t + ctx.dt - 1e-9;

        for entry in &mut self.entries {
            let mut events = 0;
            while let Some(spike) = entry.source.next_time() {
                if spike >= step_end {
                    break;
                }
                let delay = (spike + entry.connection.delay - ctx.t).max(0.0);
                solver.schedule_event(entry.synapse, entry.connection.weight, delay);
                entry.source.advance();

                events += 1;
                if events >= 1024 {
                    break;
                }
            }
        }
    }
}

/// Synapse class, parameters, drive and wiring of one input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputSpec {
    pub kind: SynapseKind,
    pub params: SynapseParams,
    pub train: SpikeTrainSpec,
    pub connection: ConnectionSpec,
    pub seed: Option<u64>,
}

impl InputSpec {
    pub fn new(kind: SynapseKind) -> Self {
        Self {
            kind,
            params: SynapseParams::default(),
            train: SpikeTrainSpec::default(),
            connection: ConnectionSpec::default(),
            seed: None,
        }
    }
}

/// Places one synapse at `section(x)`, wires it to its own spike source and
/// registers it under the section name plus the class suffix.
pub fn place_synapse(
    cell: &mut Cell,
    registry: &mut SynapseRegistry,
    seeds: &mut SeedCounter,
    section: &str,
    x: f64,
    input: &InputSpec,
) -> Result<SynapseHandle> {
    if !(0.0..=1.0).contains(&x) {
        return Err(DppError::InvalidArgument(format!(
            "synapse position {x} lies outside [0, 1]"
        )));
    }
    input.train.ensure_valid()?;
    input.connection.ensure_valid()?;

    let compartment = cell.find_required(section)?;
    let location = cell.locate(compartment, x);
    let synapse = cell.attach_synapse(Synapse::new(input.kind, location, x, &input.params));

    let seed = input.seed.unwrap_or_else(|| seeds.next_seed());
    let key = format!("{section}{}", input.kind.key_suffix());
    debug!(%key, kind = %input.kind, x, seed, "placed synapse");

    Ok(registry.insert(
        key,
        synapse,
        SpikeSource::new(input.train, seed),
        input.connection,
    ))
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    pub n: usize,
    /// ms
    pub act_time: f64,
    pub delta: f64,
    /// Inter-spike interval within the cluster (ms).
    pub isi: f64,
    pub x: f64,
    /// AMPA and NMDA scale factors.
    pub syn_fact: Option<(f64, f64)>,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            n: 20,
            act_time: 1000.0,
            delta: 0.0,
            isi: 1.0,
            x: 0.5,
            syn_fact: None,
        }
    }
}

/// Clustered glutamatergic input on one dendrite. Returns the handle and
/// the distance (µm) to the soma at the same position.
pub fn set_clustered_stim(
    cell: &mut Cell,
    registry: &mut SynapseRegistry,
    seeds: &mut SeedCounter,
    section: &str,
    spec: &ClusterSpec,
) -> Result<(SynapseHandle, u32)> {
    let compartment = cell.find_required(section)?;
    let d2soma = cell.distance((cell.soma(), spec.x), (compartment, spec.x)) as u32;

    let input = InputSpec {
        kind: SynapseKind::Glutamate,
        params: SynapseParams {
            ratio: Some(1.0 / 3.0),
            ampa_scale_factor: spec.syn_fact.map(|(ampa, _)| ampa),
            nmda_scale_factor: spec.syn_fact.map(|(_, nmda)| nmda),
            ..SynapseParams::default()
        },
        train: SpikeTrainSpec {
            start: spec.act_time + spec.delta,
            interval: spec.isi,
            noise: 0.0,
            number: spec.n,
        },
        connection: ConnectionSpec {
            delay: 0.0,
            weight: 1.5e-3,
            ..ConnectionSpec::default()
        },
        seed: None,
    };

    let handle = place_synapse(cell, registry, seeds, section, spec.x, &input)?;
    info!(section, n = spec.n, d2soma, "clustered stimulus set");
    Ok((handle, d2soma))
}

const BACKGROUND_WEIGHT: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSpec {
    /// Hz
    pub freq_glut: f64,
    pub freq_gaba: f64,
    pub n_glut: usize,
    pub n_gaba: usize,
    pub only_dend: bool,
    /// Fixed positions; random per input when unset.
    pub glut_x: Option<f64>,
    pub gaba_x: Option<f64>,
    pub glut_delay: f64,
    pub gaba_delay: f64,
    pub glut_kind: SynapseKind,
    pub gaba_kind: SynapseKind,
}

impl Default for NoiseSpec {
    fn default() -> Self {
        Self {
            freq_glut: 1.0,
            freq_gaba: 0.5,
            n_glut: 400,
            n_gaba: 100,
            only_dend: true,
            glut_x: None,
            gaba_x: None,
            glut_delay: 0.0,
            gaba_delay: 0.0,
            glut_kind: SynapseKind::Glutamate,
            gaba_kind: SynapseKind::Gaba,
        }
    }
}

fn background_input(kind: SynapseKind, freq: f64, delay: f64) -> Result<InputSpec> {
    if !(freq.is_finite() && freq > 0.0) {
        return Err(DppError::InvalidArgument(format!(
            "input frequency must be > 0 Hz, got {freq}"
        )));
    }
    let mut input = InputSpec::new(kind);
    input.train = SpikeTrainSpec {
        start: delay,
        interval: 1000.0 / freq,
        ..SpikeTrainSpec::default()
    };
    input.connection.weight = BACKGROUND_WEIGHT;
    if kind.family() == SynapseFamily::Glutamatergic {
        input.params.ratio = Some(1.0);
    }
    Ok(input)
}

/// Background glutamatergic and GABAergic input at random sections.
pub fn set_noise<R: Rng>(
    cell: &mut Cell,
    registry: &mut SynapseRegistry,
    seeds: &mut SeedCounter,
    spec: &NoiseSpec,
    rng: &mut R,
) -> Result<Vec<SynapseHandle>> {
    let sections: Vec<String> = cell
        .compartments()
        .iter()
        .filter(|c| !spec.only_dend || c.class == SectionClass::Dend)
        .map(|c| c.name.clone())
        .collect();
    if sections.is_empty() {
        return Err(DppError::InvalidArgument(
            "no sections available for background input".to_string(),
        ));
    }

    if spec.glut_kind.family() != SynapseFamily::Glutamatergic
        || spec.gaba_kind.family() != SynapseFamily::Gabaergic
    {
        return Err(DppError::Configuration(format!(
            "background input needs a glutamatergic and a GABAergic class, got {} and {}",
            spec.glut_kind, spec.gaba_kind
        )));
    }

    let groups = [
        (spec.glut_kind, spec.freq_glut, spec.n_glut, spec.glut_x, spec.glut_delay),
        (spec.gaba_kind, spec.freq_gaba, spec.n_gaba, spec.gaba_x, spec.gaba_delay),
    ];

    let mut handles = Vec::with_capacity(spec.n_glut + spec.n_gaba);
    for (kind, freq, n, fixed_x, delay) in groups {
        if n == 0 {
            continue;
        }
        let input = background_input(kind, freq, delay)?;
        for _ in 0..n {
            let section = &sections[rng.random_range(0..sections.len())];
            let x = fixed_x.unwrap_or_else(|| rng.random_range(0.0..=1.0));
            handles.push(place_synapse(cell, registry, seeds, section, x, &input)?);
        }
    }

    info!(
        glut = spec.n_glut,
        gaba = spec.n_gaba,
        sections = sections.len(),
        "background noise set"
    );
    Ok(handles)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HfiSpec {
    /// Hz
    pub freq: f64,
    pub n_inputs: usize,
    /// ms
    pub delay: f64,
    pub exclude: Vec<String>,
}

impl Default for HfiSpec {
    fn default() -> Self {
        Self {
            freq: 25.0,
            n_inputs: 20,
            delay: 0.0,
            exclude: vec!["soma[0]".to_string(), "axon[0]".to_string()],
        }
    }
}

/// High-frequency glutamatergic input at randomly arranged sections.
pub fn set_hfi<R: Rng>(
    cell: &mut Cell,
    registry: &mut SynapseRegistry,
    seeds: &mut SeedCounter,
    spec: &HfiSpec,
    rng: &mut R,
) -> Result<(InputArrangement, Vec<SynapseHandle>)> {
    let arrangement = hf_input_arrangement(cell, &spec.exclude, spec.n_inputs, rng)?;
    let input = background_input(SynapseKind::Glutamate, spec.freq, spec.delay)?;

    let handles = arrangement
        .targets
        .iter()
        .map(|section| {
            let x = rng.random_range(0.0..=1.0);
            place_synapse(cell, registry, seeds, section, x, &input)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        n = spec.n_inputs,
        mean_dist = arrangement.mean_dist,
        "high-frequency input set"
    );
    Ok((arrangement, handles))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;

    use super::*;
    use crate::neuro::context::SimulationContext;
    use crate::neuro::fixtures::small_cell;
    use crate::neuro::solver::ReducedSolver;

    fn spike_times(spec: SpikeTrainSpec, seed: u64) -> Vec<f64> {
        let mut source = SpikeSource::new(spec, seed);
        let mut times = Vec::new();
        while let Some(t) = source.next_time() {
            times.push(t);
            source.advance();
        }
        times
    }

    #[test]
    fn regular_train_fires_number_events_at_interval() {
        let times = spike_times(
            SpikeTrainSpec {
                start: 100.0,
                interval: 1.0,
                noise: 0.0,
                number: 4,
            },
            0,
        );
        assert_eq!(times, vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn noisy_train_is_reproducible_per_seed() {
        let spec = SpikeTrainSpec {
            number: 50,
            ..SpikeTrainSpec::default()
        };
        let a = spike_times(spec, 11);
        assert_eq!(a, spike_times(spec, 11));
        assert_ne!(a, spike_times(spec, 12));
        assert_eq!(a.len(), 50);
        assert!(a.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn invalid_trains_and_connections_are_rejected() {
        let noisy = SpikeTrainSpec {
            noise: 1.5,
            ..SpikeTrainSpec::default()
        };
        assert!(noisy.ensure_valid().is_err());

        let negative = ConnectionSpec {
            weight: -1.0,
            ..ConnectionSpec::default()
        };
        assert!(matches!(
            negative.ensure_valid(),
            Err(DppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn replacing_a_key_makes_old_handles_stale() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);
        let input = InputSpec::new(SynapseKind::Glutamate);

        let first = place_synapse(&mut cell, &mut registry, &mut seeds, "dend[1]", 0.5, &input).unwrap();
        assert!(registry.resolve(&first).is_ok());

        let second = place_synapse(&mut cell, &mut registry, &mut seeds, "dend[1]", 0.2, &input).unwrap();
        assert_eq!(first.key, "dend[1]_glut");
        assert!(matches!(
            registry.resolve(&first),
            Err(DppError::StaleHandle { held: 0, current: 1, .. })
        ));
        assert_eq!(registry.resolve(&second).unwrap().generation, 1);
        // both inputs stay wired
        assert_eq!(registry.len(), 2);
        assert_eq!(cell.synapses.len(), 2);
    }

    #[test]
    fn gaba_classes_share_the_gaba_suffix() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);

        let handle = place_synapse(
            &mut cell,
            &mut registry,
            &mut seeds,
            "soma[0]",
            0.5,
            &InputSpec::new(SynapseKind::TmGabaA),
        )
        .unwrap();
        assert_eq!(handle.key, "soma[0]_gaba");
        assert!(registry.get("soma[0]_glut").is_none());
    }

    #[test]
    fn placement_validates_position_and_section() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);
        let input = InputSpec::new(SynapseKind::Gaba);

        assert!(matches!(
            place_synapse(&mut cell, &mut registry, &mut seeds, "dend[0]", 1.2, &input),
            Err(DppError::InvalidArgument(_))
        ));
        assert!(matches!(
            place_synapse(&mut cell, &mut registry, &mut seeds, "dend[7]", 0.5, &input),
            Err(DppError::Configuration(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn seeds_advance_once_per_unseeded_placement() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(40);
        let mut input = InputSpec::new(SynapseKind::Glutamate);

        place_synapse(&mut cell, &mut registry, &mut seeds, "dend[0]", 0.5, &input).unwrap();
        input.seed = Some(7);
        place_synapse(&mut cell, &mut registry, &mut seeds, "dend[1]", 0.5, &input).unwrap();
        assert_eq!(seeds.next_seed(), 41);
    }

    #[test]
    fn clustered_stim_reports_distance_and_fires_n_events() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);
        let spec = ClusterSpec {
            n: 16,
            act_time: 1.0,
            ..ClusterSpec::default()
        };

        let (handle, d2soma) =
            set_clustered_stim(&mut cell, &mut registry, &mut seeds, "dend[1]", &spec).unwrap();
        // soma(0.5) -> dend[0] end -> dend[1](0.5)
        assert_eq!(d2soma, 130);

        let synapse = registry.resolve(&handle).unwrap().synapse;
        let nmda = cell.synapses[synapse]
            .receptor(crate::neuro::synapse::Receptor::Nmda)
            .unwrap();
        assert!((nmda.weight_share - 1.0 / 3.0).abs() < 1e-12);

        let mut solver = ReducedSolver::new(SimulationContext::new(0.025, 30.0).unwrap());
        solver.initialize(&mut cell, -80.0);
        while !solver.context().finished() {
            registry.emit(&mut solver);
            solver.advance(&mut cell);
        }
        assert_eq!(registry.entries[0].source.emitted, 16);
        assert!(registry.entries[0].source.next_time().is_none());
    }

    #[test]
    fn noise_places_gaba_inputs_as_gaba_on_dendrites() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);
        let mut rng = StdRng::seed_from_u64(3);
        let spec = NoiseSpec {
            n_glut: 6,
            n_gaba: 4,
            ..NoiseSpec::default()
        };

        let handles = set_noise(&mut cell, &mut registry, &mut seeds, &spec, &mut rng).unwrap();
        assert_eq!(handles.len(), 10);
        assert_eq!(cell.synapses.len(), 10);

        let gaba: Vec<_> = cell
            .synapses
            .iter()
            .filter(|s| s.kind == SynapseKind::Gaba)
            .collect();
        assert_eq!(gaba.len(), 4);
        assert!(cell.synapses.iter().all(|s| {
            cell.compartments()[s.location.compartment].class == SectionClass::Dend
        }));

        let swapped = NoiseSpec {
            glut_kind: SynapseKind::Gaba,
            ..spec
        };
        assert!(matches!(
            set_noise(&mut cell, &mut registry, &mut seeds, &swapped, &mut rng),
            Err(DppError::Configuration(_))
        ));
    }

    #[test]
    fn hfi_targets_follow_the_arrangement() {
        let mut cell = small_cell();
        let mut registry = SynapseRegistry::new();
        let mut seeds = SeedCounter::new(0);
        let mut rng = StdRng::seed_from_u64(9);

        let (arrangement, handles) =
            set_hfi(&mut cell, &mut registry, &mut seeds, &HfiSpec::default(), &mut rng).unwrap();
        assert_eq!(handles.len(), 20);
        for (target, handle) in arrangement.targets.iter().zip(&handles) {
            assert_eq!(handle.key, format!("{target}_glut"));
        }
    }
}
