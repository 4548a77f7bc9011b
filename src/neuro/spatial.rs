use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;

use crate::error::{DppError, Result};
use crate::neuro::cell::{Cell, SectionClass, SegmentRef};

/// Reference point for distance queries; defaults to the first soma at 0.5.
#[derive(Clone, Debug, PartialEq)]
pub struct Origin {
    pub section: Option<String>,
    pub x: f64,
}

impl Default for Origin {
    fn default() -> Self {
        Self { section: None, x: 0.5 }
    }
}

/// What to measure: whole section classes or an explicit list of names.
#[derive(Clone, Debug, PartialEq)]
pub enum DistanceQuery {
    Classes(Vec<String>),
    Sections(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Distances {
    /// Class name to the distance of every section in that class.
    ByClass(BTreeMap<String, Vec<u32>>),
    /// Section name to its distance.
    BySection(BTreeMap<String, u32>),
}

fn resolve_origin(cell: &Cell, origin: &Origin) -> Result<(usize, f64)> {
    let compartment = match &origin.section {
        Some(name) => cell.find(name).ok_or_else(|| {
            DppError::InvalidArgument(format!("origin section '{name}' does not exist"))
        })?,
        None => cell.soma(),
    };
    Ok((compartment, origin.x))
}

/// Path distances (µm, truncated) from `origin` to each requested section,
/// measured at position `x` on the target.
pub fn get_dists(cell: &Cell, origin: &Origin, query: &DistanceQuery, x: f64) -> Result<Distances> {
    let from = resolve_origin(cell, origin)?;

    match query {
        DistanceQuery::Sections(names) => {
            let mut out = BTreeMap::new();
            for name in names {
                if let Some(idx) = cell.find(name) {
                    out.insert(name.clone(), cell.distance(from, (idx, x)) as u32);
                }
            }
            Ok(Distances::BySection(out))
        }
        DistanceQuery::Classes(classes) => {
            let classes = classes
                .iter()
                .map(|name| SectionClass::parse(name))
                .collect::<Result<Vec<_>>>()?;

            let mut out = BTreeMap::new();
            for class in classes {
                let dists = cell
                    .of_class(class)
                    .map(|(idx, _)| cell.distance(from, (idx, x)) as u32)
                    .collect();
                out.insert(class.name().to_string(), dists);
            }
            Ok(Distances::ByClass(out))
        }
    }
}

/// Upper bounds (µm) of the dendritic distance bands; the last band is open.
pub const BAND_EDGES: [f64; 3] = [60.0, 120.0, 180.0];

/// Sorts every dendritic segment into one of four distance bands from the
/// soma origin.
pub fn distance_bands(cell: &Cell) -> [Vec<SegmentRef>; 4] {
    let origin = (cell.soma(), 0.0);
    let mut bands: [Vec<SegmentRef>; 4] = Default::default();

    for (idx, comp) in cell.of_class(SectionClass::Dend) {
        for (segment, seg) in comp.segments.iter().enumerate() {
            let dist = cell.distance(origin, (idx, seg.x));
            let band = BAND_EDGES
                .iter()
                .position(|&edge| dist < edge)
                .unwrap_or(BAND_EDGES.len());
            bands[band].push(SegmentRef {
                compartment: idx,
                segment,
            });
        }
    }

    bands
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InputArrangement {
    pub targets: Vec<String>,
    pub dists: Vec<u32>,
    pub mean_dist: f64,
}

/// Picks `n_inputs` sections (with replacement) outside `exclude` to receive
/// high-frequency input.
pub fn hf_input_arrangement<R: Rng>(
    cell: &Cell,
    exclude: &[String],
    n_inputs: usize,
    rng: &mut R,
) -> Result<InputArrangement> {
    let candidates: Vec<&str> = cell
        .compartments()
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !exclude.iter().any(|e| e == name))
        .collect();

    if candidates.is_empty() {
        return Err(DppError::InvalidArgument(
            "every section is excluded from high-frequency input".to_string(),
        ));
    }

    let targets: Vec<String> = (0..n_inputs)
        .map(|_| candidates[rng.random_range(0..candidates.len())].to_string())
        .collect();

    let from = (cell.soma(), 0.5);
    let dists: Vec<u32> = targets
        .iter()
        .map(|name| cell.find_required(name).map(|idx| cell.distance(from, (idx, 0.5)) as u32))
        .collect::<Result<_>>()?;

    let mean_dist = if dists.is_empty() {
        0.0
    } else {
        dists.iter().map(|&d| d as f64).sum::<f64>() / dists.len() as f64
    };

    Ok(InputArrangement {
        targets,
        dists,
        mean_dist,
    })
}
