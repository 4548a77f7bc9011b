use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::warn;

use crate::analysis::stats::{ContingencyTable, binary_to_table, mcnemar};
use crate::error::DppError;
use crate::sim::driver::ProtocolRecord;

#[derive(Debug, Serialize)]
struct Comparison {
    table: ContingencyTable,
    p_value: Option<f64>,
}

fn spiked(records: &[ProtocolRecord], cluster: &str, label: &str) -> anyhow::Result<Vec<u8>> {
    records
        .iter()
        .map(|record| {
            record
                .runs
                .get(cluster)
                .and_then(|runs| runs.get(label))
                .map(|run| u8::from(run.spiked))
                .with_context(|| {
                    format!("model {} has no '{label}' run for '{cluster}'", record.meta.id)
                })
        })
        .collect()
}

fn compare(x: &[u8], y: &[u8]) -> anyhow::Result<Comparison> {
    let table = binary_to_table(x, y)?;
    let p_value = match mcnemar(&table) {
        Ok(p) => Some(p),
        Err(DppError::Domain(reason)) => {
            warn!(%reason, "no p-value");
            None
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Comparison { table, p_value })
}

/// Paired spiking comparisons across cells: each modulated run against its
/// control, and the clustered controls against each other.
pub fn run(inputs: Vec<PathBuf>) -> anyhow::Result<()> {
    let records = inputs
        .iter()
        .map(|path| {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ProtocolRecord>(&text)
                .with_context(|| format!("parsing {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let Some(first) = records.first() else {
        bail!("no protocol records given");
    };
    let clusters: Vec<String> = first.runs.keys().cloned().collect();

    let mut out: BTreeMap<String, BTreeMap<String, Comparison>> = BTreeMap::new();
    for cluster in &clusters {
        let control = spiked(&records, cluster, cluster)?;
        let mut by_label = BTreeMap::new();
        for label in first.runs[cluster].keys().filter(|l| *l != cluster) {
            let modulated = spiked(&records, cluster, label)?;
            by_label.insert(label.clone(), compare(&control, &modulated)?);
        }
        out.insert(cluster.clone(), by_label);
    }

    if let [a, b] = clusters.as_slice() {
        let comparison = compare(&spiked(&records, a, a)?, &spiked(&records, b, b)?)?;
        out.entry("control".to_string())
            .or_default()
            .insert(format!("{a} vs {b}"), comparison);
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
