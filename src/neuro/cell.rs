use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};
use crate::neuro::mechanism::{Mechanism, MechanismKind};
use crate::neuro::morphology::Morphology;
use crate::neuro::synapse::Synapse;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionClass {
    Soma,
    Dend,
    Axon,
}

impl SectionClass {
    pub const ALL: [SectionClass; 3] = [SectionClass::Soma, SectionClass::Dend, SectionClass::Axon];

    pub fn name(self) -> &'static str {
        match self {
            SectionClass::Soma => "soma",
            SectionClass::Dend => "dend",
            SectionClass::Axon => "axon",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|class| class.name() == name)
            .ok_or_else(|| {
                DppError::InvalidArgument(format!(
                    "section type '{name}' is not one of soma, dend, axon"
                ))
            })
    }

    /// Classifies a section by its name prefix, e.g. `dend[3]`.
    pub fn of_section_name(name: &str) -> Result<Self> {
        let prefix = name.split('[').next().unwrap_or(name);
        Self::parse(prefix)
    }
}

impl fmt::Display for SectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Passive properties and channel densities of one cell specification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Biophysics {
    /// µF/cm²
    pub cm: f64,
    /// Ω·cm
    pub ra: f64,
    /// S/cm²
    pub g_leak: f64,
    /// mV
    pub e_leak: f64,
    pub channels: BTreeMap<MechanismKind, ChannelDensity>,
}

/// Density per section class (S/cm², or cm/s for calcium channels).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDensity {
    pub soma: f64,
    pub dend: f64,
    pub axon: f64,
}

impl ChannelDensity {
    fn for_class(&self, class: SectionClass) -> f64 {
        match class {
            SectionClass::Soma => self.soma,
            SectionClass::Dend => self.dend,
            SectionClass::Axon => self.axon,
        }
    }
}

impl Default for Biophysics {
    fn default() -> Self {
        let density = |soma, dend, axon| ChannelDensity { soma, dend, axon };

        let channels = BTreeMap::from([
            (MechanismKind::Naf, density(9.0, 0.05, 30.0)),
            (MechanismKind::Kaf, density(0.12, 0.06, 0.0)),
            (MechanismKind::Kas, density(0.02, 0.005, 0.1)),
            (MechanismKind::Kdr, density(0.006, 0.0005, 0.4)),
            (MechanismKind::Kir, density(0.0009, 0.0009, 0.0)),
            (MechanismKind::Sk, density(0.0002, 0.0002, 0.0)),
            (MechanismKind::Bk, density(0.0005, 0.0005, 0.0)),
            (MechanismKind::Cal12, density(0.0002, 0.0001, 0.0)),
            (MechanismKind::Cal13, density(0.0001, 0.00005, 0.0)),
            (MechanismKind::Can, density(0.0002, 0.0, 0.0)),
            (MechanismKind::Car, density(0.0003, 0.0003, 0.0)),
            (MechanismKind::Cat32, density(0.0, 0.0001, 0.0)),
            (MechanismKind::Cat33, density(0.0, 0.00005, 0.0)),
            (MechanismKind::Im, density(0.0003, 0.0, 0.0003)),
        ]);

        Self {
            cm: 1.0,
            ra: 150.0,
            g_leak: 1.25e-5,
            e_leak: -70.0,
            channels,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentRef {
    pub compartment: usize,
    pub segment: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    /// Centre of the segment along its section, in (0, 1).
    pub x: f64,
    /// mV
    pub v: f64,
    pub mechanisms: Vec<Mechanism>,
    /// Indices into the owning cell's synapse table.
    pub point_processes: Vec<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Compartment {
    pub name: String,
    pub class: SectionClass,
    /// µm
    pub length: f64,
    /// µm
    pub diam: f64,
    /// Parent compartment index and the point the 0-end attaches to.
    pub parent: Option<(usize, f64)>,
    pub segments: Vec<Segment>,
}

impl Compartment {
    /// Index of the segment containing position `x`.
    pub fn segment_at(&self, x: f64) -> usize {
        let nseg = self.segments.len();
        ((x.clamp(0.0, 1.0) * nseg as f64).floor() as usize).min(nseg - 1)
    }
}

/// A multi-compartment neuron. Owns every compartment, mechanism and point
/// process; everything else refers into it by index.
#[derive(Clone, Debug, Serialize)]
pub struct Cell {
    compartments: Vec<Compartment>,
    pub synapses: Vec<Synapse>,
    pub biophysics: Biophysics,
}

impl Cell {
    /// Builds the cell from a morphology, inserting every channel with a
    /// non-zero density. `variables` scales channel densities by name.
    pub fn build(
        morphology: &Morphology,
        biophysics: &Biophysics,
        variables: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let mut scales = BTreeMap::new();
        for (name, scale) in variables {
            scales.insert(MechanismKind::from_name(name)?, *scale);
        }
        for (&kind, density) in &biophysics.channels {
            let scale = scales.get(&kind).copied().unwrap_or(1.0);
            for value in [density.soma, density.dend, density.axon] {
                if !(value * scale).is_finite() || value * scale < 0.0 {
                    return Err(DppError::Configuration(format!(
                        "{} of {kind} must be a finite non-negative density, got {}",
                        kind.conductance_param(),
                        value * scale
                    )));
                }
            }
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut compartments = Vec::with_capacity(morphology.sections.len());

        for spec in &morphology.sections {
            if index.contains_key(spec.name.as_str()) {
                return Err(DppError::Configuration(format!(
                    "section '{}' is defined twice",
                    spec.name
                )));
            }
            if spec.nseg == 0 || spec.length <= 0.0 || spec.diam <= 0.0 {
                return Err(DppError::Configuration(format!(
                    "section '{}' needs positive length, diameter and nseg",
                    spec.name
                )));
            }

            let class = SectionClass::of_section_name(&spec.name)
                .map_err(|e| DppError::Configuration(e.to_string()))?;

            let parent = match &spec.parent {
                Some(parent) => {
                    let idx = index.get(parent.as_str()).copied().ok_or_else(|| {
                        DppError::Configuration(format!(
                            "section '{}' names unknown parent '{}'",
                            spec.name, parent
                        ))
                    })?;
                    Some((idx, spec.parent_x.clamp(0.0, 1.0)))
                }
                None => None,
            };

            let segments = (0..spec.nseg)
                .map(|i| {
                    let mechanisms = biophysics
                        .channels
                        .iter()
                        .filter_map(|(&kind, density)| {
                            let gbar = density.for_class(class) * scales.get(&kind).copied().unwrap_or(1.0);
                            (gbar > 0.0).then(|| Mechanism::new(kind, gbar))
                        })
                        .collect();

                    Segment {
                        x: (i as f64 + 0.5) / spec.nseg as f64,
                        v: biophysics.e_leak,
                        mechanisms,
                        point_processes: Vec::new(),
                    }
                })
                .collect();

            index.insert(spec.name.as_str(), compartments.len());
            compartments.push(Compartment {
                name: spec.name.clone(),
                class,
                length: spec.length,
                diam: spec.diam,
                parent,
                segments,
            });
        }

        if !compartments.iter().any(|c| c.class == SectionClass::Soma) {
            return Err(DppError::Configuration(
                "morphology has no somatic section".to_string(),
            ));
        }
        let roots = compartments.iter().filter(|c| c.parent.is_none()).count();
        if roots != 1 {
            return Err(DppError::Configuration(format!(
                "morphology must form a single tree, found {roots} roots"
            )));
        }

        Ok(Self {
            compartments,
            synapses: Vec::new(),
            biophysics: biophysics.clone(),
        })
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    pub fn of_class(&self, class: SectionClass) -> impl Iterator<Item = (usize, &Compartment)> {
        self.compartments
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.class == class)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.compartments.iter().position(|c| c.name == name)
    }

    pub fn find_required(&self, name: &str) -> Result<usize> {
        self.find(name).ok_or_else(|| {
            DppError::Configuration(format!("cell has no section named '{name}'"))
        })
    }

    /// First somatic compartment.
    pub fn soma(&self) -> usize {
        // `build` guarantees a soma exists
        self.compartments
            .iter()
            .position(|c| c.class == SectionClass::Soma)
            .unwrap_or(0)
    }

    pub fn locate(&self, compartment: usize, x: f64) -> SegmentRef {
        SegmentRef {
            compartment,
            segment: self.compartments[compartment].segment_at(x),
        }
    }

    pub fn segment_refs(&self, compartment: usize) -> impl Iterator<Item = SegmentRef> + '_ {
        (0..self.compartments[compartment].segments.len())
            .map(move |segment| SegmentRef { compartment, segment })
    }

    #[cfg(test)]
    pub fn all_segment_refs(&self) -> impl Iterator<Item = SegmentRef> + '_ {
        (0..self.compartments.len()).flat_map(|c| self.segment_refs(c))
    }

    pub fn segment(&self, at: SegmentRef) -> &Segment {
        &self.compartments[at.compartment].segments[at.segment]
    }

    pub fn segment_mut(&mut self, at: SegmentRef) -> &mut Segment {
        &mut self.compartments[at.compartment].segments[at.segment]
    }

    pub(crate) fn compartments_mut(&mut self) -> &mut [Compartment] {
        &mut self.compartments
    }

    pub fn attach_synapse(&mut self, synapse: Synapse) -> usize {
        let index = self.synapses.len();
        let at = synapse.location;
        self.synapses.push(synapse);
        self.segment_mut(at).point_processes.push(index);
        index
    }

    /// Path length (µm) along the tree between two (compartment, x) points.
    pub fn distance(&self, a: (usize, f64), b: (usize, f64)) -> f64 {
        let chain_a = self.ancestry(a);
        let chain_b = self.ancestry(b);

        // Walk both chains from the root until they diverge; the last shared
        // compartment is the lowest common ancestor.
        let mut shared = 0;
        while shared < chain_a.len()
            && shared < chain_b.len()
            && chain_a[shared].0 == chain_b[shared].0
        {
            shared += 1;
        }
        let lca = shared - 1;

        let climb = |chain: &[(usize, f64)]| -> f64 {
            chain[lca + 1..]
                .iter()
                .map(|&(c, x)| x * self.compartments[c].length)
                .sum()
        };

        let lca_len = self.compartments[chain_a[lca].0].length;
        climb(&chain_a) + climb(&chain_b) + (chain_a[lca].1 - chain_b[lca].1).abs() * lca_len
    }

    /// Root-first list of (compartment, position) pairs leading to `point`:
    /// every ancestor paired with the point where the path leaves it.
    fn ancestry(&self, point: (usize, f64)) -> Vec<(usize, f64)> {
        let mut chain = vec![point];
        let mut current = point.0;
        while let Some((parent, parent_x)) = self.compartments[current].parent {
            chain.push((parent, parent_x));
            current = parent;
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neuro::fixtures::section;

    fn y_cell() -> Cell {
        let morph = Morphology {
            sections: vec![
                section("soma[0]", None, 1.0, 10.0),
                section("dend[0]", Some("soma[0]"), 1.0, 100.0),
                section("dend[1]", Some("dend[0]"), 1.0, 50.0),
                section("dend[2]", Some("dend[0]"), 1.0, 80.0),
                section("axon[0]", Some("soma[0]"), 0.0, 30.0),
            ],
        };
        Cell::build(&morph, &Biophysics::default(), &BTreeMap::new()).unwrap()
    }

    #[test]
    fn distance_walks_the_tree() {
        let cell = y_cell();
        let soma = (0, 0.5);

        assert_eq!(cell.distance(soma, soma), 0.0);
        assert!((cell.distance(soma, (1, 0.5)) - 55.0).abs() < 1e-9);
        assert!((cell.distance(soma, (2, 1.0)) - 155.0).abs() < 1e-9);
        // sibling to sibling passes through the branch point only
        assert!((cell.distance((2, 1.0), (3, 1.0)) - 130.0).abs() < 1e-9);
        // axon leaves the other end of the soma
        assert!((cell.distance(soma, (4, 0.5)) - 20.0).abs() < 1e-9);
        assert_eq!(cell.distance((1, 0.2), (2, 0.3)), cell.distance((2, 0.3), (1, 0.2)));
    }

    #[test]
    fn build_inserts_channels_by_class_and_scales_variables() {
        let variables = BTreeMap::from([("naf".to_string(), 2.0)]);
        let cell = Cell::build(
            &Morphology {
                sections: vec![
                    section("soma[0]", None, 1.0, 10.0),
                    section("dend[0]", Some("soma[0]"), 1.0, 100.0),
                ],
            },
            &Biophysics::default(),
            &variables,
        )
        .unwrap();

        let soma = cell.segment(SegmentRef { compartment: 0, segment: 0 });
        let naf = soma
            .mechanisms
            .iter()
            .find(|m| m.kind == MechanismKind::Naf)
            .unwrap();
        assert_eq!(naf.baseline, 18.0);

        let dend = cell.segment(SegmentRef { compartment: 1, segment: 0 });
        assert!(dend.mechanisms.iter().all(|m| m.kind != MechanismKind::Can));
    }

    #[test]
    fn build_rejects_bad_trees() {
        let orphan = Morphology {
            sections: vec![
                section("soma[0]", None, 1.0, 10.0),
                section("dend[0]", Some("dend[9]"), 1.0, 10.0),
            ],
        };
        assert!(matches!(
            Cell::build(&orphan, &Biophysics::default(), &BTreeMap::new()),
            Err(DppError::Configuration(_))
        ));

        let unknown_class = Morphology {
            sections: vec![section("spine[0]", None, 1.0, 1.0)],
        };
        assert!(Cell::build(&unknown_class, &Biophysics::default(), &BTreeMap::new()).is_err());

        let unknown_variable = BTreeMap::from([("hcn".to_string(), 1.0)]);
        assert!(Cell::build(&y_cell_morph(), &Biophysics::default(), &unknown_variable).is_err());

        let negative = BTreeMap::from([("cal12".to_string(), -1.0)]);
        let err = Cell::build(&y_cell_morph(), &Biophysics::default(), &negative).unwrap_err();
        assert!(err.to_string().contains("pbar of cal12"));
    }

    fn y_cell_morph() -> Morphology {
        Morphology {
            sections: vec![section("soma[0]", None, 1.0, 10.0)],
        }
    }

    #[test]
    fn segment_lookup_matches_position() {
        let mut spec = section("soma[0]", None, 1.0, 10.0);
        spec.nseg = 5;
        let cell = Cell::build(
            &Morphology { sections: vec![spec] },
            &Biophysics::default(),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(cell.locate(0, 0.0).segment, 0);
        assert_eq!(cell.locate(0, 0.5).segment, 2);
        assert_eq!(cell.locate(0, 1.0).segment, 4);
        assert!((cell.segment(cell.locate(0, 0.5)).x - 0.5).abs() < 1e-12);
    }
}
