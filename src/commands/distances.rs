use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::config::SimulationConfig;
use crate::neuro::spatial::{BAND_EDGES, DistanceQuery, Origin, distance_bands, get_dists};
use crate::sim::driver::build_cell;
use crate::sim::library::ModelSet;

pub fn run(
    config_path: &Path,
    classes: Vec<String>,
    only: Option<Vec<String>>,
    bands: bool,
) -> anyhow::Result<()> {
    let config = SimulationConfig::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let cell = build_cell(&config, &ModelSet::default()).context("building cell")?;

    if bands {
        let mut out = BTreeMap::new();
        for (i, band) in distance_bands(&cell).iter().enumerate() {
            let lower = if i == 0 { 0.0 } else { BAND_EDGES[i - 1] };
            let names: Vec<String> = band
                .iter()
                .map(|at| {
                    let comp = &cell.compartments()[at.compartment];
                    format!("{}({:.3})", comp.name, comp.segments[at.segment].x)
                })
                .collect();
            out.insert(format!("{lower}+"), names);
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let query = match only {
        Some(names) => DistanceQuery::Sections(names),
        None => DistanceQuery::Classes(classes),
    };
    let dists = get_dists(&cell, &Origin::default(), &query, 0.5)?;
    println!("{}", serde_json::to_string_pretty(&dists)?);

    Ok(())
}
