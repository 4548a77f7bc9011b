use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulator {
    Dopamine,
    Acetylcholine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Dspn,
    Ispn,
}

impl CellType {
    pub fn name(self) -> &'static str {
        match self {
            CellType::Dspn => "dspn",
            CellType::Ispn => "ispn",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorMode {
    /// Uniform draw within the published range.
    #[default]
    Random,
    /// Midpoint of the range.
    Mean,
}

type Range = (&'static str, f64, f64);

fn ranges(modulator: Modulator, cell_type: CellType) -> &'static [Range] {
    match (modulator, cell_type) {
        (Modulator::Dopamine, CellType::Dspn) => &[
            ("naf", 0.6, 0.8),
            ("kaf", 0.75, 0.85),
            ("kas", 0.65, 0.85),
            ("kir", 0.85, 1.25),
            ("cal12", 1.0, 2.0),
            ("cal13", 1.0, 2.0),
            ("can", 0.2, 1.0),
            ("NMDA", 1.3, 1.3),
            ("AMPA", 1.2, 1.2),
            ("GABA", 0.8, 0.8),
        ],
        (Modulator::Dopamine, CellType::Ispn) => &[
            ("naf", 0.95, 1.1),
            ("kaf", 1.0, 1.1),
            ("kas", 1.0, 1.1),
            ("kir", 0.8, 1.0),
            ("cal12", 0.7, 0.8),
            ("cal13", 0.7, 0.8),
            ("can", 0.9, 1.0),
            ("car", 0.6, 0.8),
            ("NMDA", 0.85, 1.05),
            ("AMPA", 0.7, 0.9),
            ("GABA", 0.9, 1.1),
        ],
        // the kaf entry for cholinergic dSPN is a gating shift in mV
        (Modulator::Acetylcholine, CellType::Dspn) => &[
            ("naf", 1.0, 1.2),
            ("kaf", 0.0, 10.0),
            ("kir", 0.8, 1.0),
            ("cal12", 0.3, 0.7),
            ("cal13", 0.3, 0.7),
            ("can", 0.65, 0.85),
            ("Im", 0.0, 0.4),
        ],
        (Modulator::Acetylcholine, CellType::Ispn) => &[
            ("naf", 1.0, 1.2),
            ("kir", 0.5, 0.7),
            ("cal12", 0.3, 0.7),
            ("cal13", 0.3, 0.7),
            ("can", 0.65, 0.85),
            ("Im", 0.0, 0.4),
            ("NMDA", 1.0, 1.05),
            ("AMPA", 0.99, 1.01),
            ("GABA", 0.99, 1.01),
        ],
    }
}

/// Factors for the channels in `selection` (or every tabulated channel for
/// `["all"]`), keyed by mechanism or receptor name.
pub fn draw_factors<R: Rng>(
    modulator: Modulator,
    cell_type: CellType,
    selection: &[String],
    mode: FactorMode,
    rng: &mut R,
) -> Result<BTreeMap<String, f64>> {
    let table = ranges(modulator, cell_type);

    let chosen: Vec<&Range> = if selection.first().is_some_and(|s| s == "all") {
        table.iter().collect()
    } else {
        selection
            .iter()
            .map(|name| {
                table.iter().find(|(n, _, _)| n == name).ok_or_else(|| {
                    DppError::Configuration(format!(
                        "no {modulator:?} range for '{name}' in {}",
                        cell_type.name()
                    ))
                })
            })
            .collect::<Result<_>>()?
    };

    Ok(chosen
        .into_iter()
        .map(|&(name, lo, hi)| {
            let value = match mode {
                FactorMode::Mean => (lo + hi) / 2.0,
                FactorMode::Random if hi > lo => rng.random_range(lo..hi),
                FactorMode::Random => lo,
            };
            (name.to_string(), value)
        })
        .collect())
}
