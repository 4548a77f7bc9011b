use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dpp",
    version,
    about = "Dendritic plateau potentials in SPNs under neuromodulation",
    long_about = None
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset, e.g. `info` or `dpp=debug`.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the clustered-input protocol for every configured model id.
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "temp_data")]
        out: PathBuf,
    },
    /// Print path distances from the soma.
    Distances {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, value_delimiter = ',', default_value = "dend")]
        class: Vec<String>,
        /// Measure these sections instead of whole classes.
        #[arg(long, value_delimiter = ',')]
        only: Option<Vec<String>>,
        /// Group dendritic segments into distance bands.
        #[arg(long)]
        bands: bool,
    },
    /// Render the traces of one protocol record as HTML.
    Plot {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// McNemar tests on spiking across protocol records.
    Compare {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}
