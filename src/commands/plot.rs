use std::fs;
use std::path::Path;

use anyhow::Context;
use plotly::common::Mode;
use plotly::layout::Axis;
use plotly::{Layout, Plot, Scatter};
use tracing::info;

use crate::sim::driver::ProtocolRecord;

pub fn run(input: &Path, output: &Path) -> anyhow::Result<()> {
    let text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let record: ProtocolRecord = serde_json::from_str(&text)
        .with_context(|| format!("parsing protocol record {}", input.display()))?;

    let mut plot = Plot::new();
    let mut traces = 0;
    for (cluster, runs) in &record.runs {
        for (label, run) in runs {
            let name = if label == cluster {
                format!("{cluster}: control")
            } else {
                format!("{cluster}: {label}")
            };
            plot.add_trace(
                Scatter::new(run.tm.clone(), run.vm.clone())
                    .mode(Mode::Lines)
                    .name(&name),
            );
            traces += 1;
        }
    }

    let title = format!(
        "{} model {} (round {})",
        record.meta.cell_type.name(),
        record.meta.id,
        record.meta.round
    );
    plot.set_layout(
        Layout::new()
            .title(title.as_str())
            .x_axis(Axis::new().title("time (ms)"))
            .y_axis(Axis::new().title("membrane potential (mV)")),
    );
    plot.write_html(output);

    info!(traces, output = %output.display(), "plot written");
    Ok(())
}
