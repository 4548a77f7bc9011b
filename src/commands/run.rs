use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::config::SimulationConfig;
use crate::sim::driver::run_protocol;
use crate::sim::library::ModelLibrary;

pub fn run(config_path: &Path, out: &Path) -> anyhow::Result<()> {
    let config = SimulationConfig::load(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let library = match &config.library {
        Some(path) => ModelLibrary::load(path)
            .with_context(|| format!("loading model library {}", path.display()))?,
        None => ModelLibrary::single(0.0),
    };

    let ids: Vec<usize> = if config.model_ids.is_empty() {
        library.ids().collect()
    } else {
        config.model_ids.clone()
    };

    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let total = ids.len() * config.rounds;
    let mut done = 0;
    for round in 0..config.rounds {
        for &id in &ids {
            done += 1;
            info!(cell = done, of = total, id, round, "simulating cell specification");

            let record = run_protocol(&config, &library, id, round)
                .with_context(|| format!("simulating model {id}, round {round}"))?;

            let path = out.join(format!(
                "{}_{}-{}_modulation.json",
                config.cell_type.name(),
                round,
                id
            ));
            let json = serde_json::to_string(&record)?;
            fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        }
    }

    info!(records = total, out = %out.display(), "simulations completed");
    Ok(())
}
