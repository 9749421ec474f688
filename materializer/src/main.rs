//! Command line runner for the SCD2 materialization engine.
//!
//! Reads a batch of change records from a JSON lines file, applies it to an in-memory historized
//! table optionally seeded with existing history, and writes the resulting history as JSON lines.

use anyhow::Context;
use clap::Parser;
use config::shared::MaterializationConfig;
use config::{Environment, load_config, load_config_from};
use scd::coordinator::BatchCoordinator;
use scd::store::memory::MemoryStateStore;
use scd::table::memory::MemoryTable;
use scd::types::{HistorizedRow, RawChangeRecord};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use telemetry::tracing::init_tracing;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON lines file with one change record per line.
    #[arg(long)]
    input: PathBuf,

    /// Identifier of the batch, used by `once_only` processing.
    #[arg(long, default_value = "batch-1")]
    batch_id: String,

    /// JSON lines file with existing historized rows to load before processing.
    #[arg(long)]
    history: Option<PathBuf>,

    /// File receiving the resulting history. Defaults to standard output.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory holding the configuration files. Defaults to `./configuration`.
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(error = %err, "materialization failed");
        return Err(err);
    }

    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config: MaterializationConfig = match &args.config_dir {
        Some(directory) => load_config_from(directory, Environment::load()?)?,
        None => load_config()?,
    };

    info!(
        target_table = %config.target,
        key_columns = ?config.key_columns,
        sequence_by = %config.sequence_by,
        "loaded materialization config"
    );

    let table = MemoryTable::new(config.target.as_str());
    if let Some(history) = &args.history {
        let rows: Vec<HistorizedRow> = read_json_lines(history)?;
        info!(rows = rows.len(), "loaded existing history");
        table.insert_rows(rows).await;
    }

    let records: Vec<RawChangeRecord> = read_json_lines(&args.input)?;
    let coordinator = BatchCoordinator::new(config, table.clone(), MemoryStateStore::new())?;
    let summary = coordinator.process_batch(args.batch_id, records).await?;

    eprintln!("{summary}");

    let rows = table.rows().await;
    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating `{}`", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for row in rows.values().flatten() {
        serde_json::to_writer(&mut output, row)?;
        writeln!(output)?;
    }
    output.flush()?;

    if !summary.is_complete() {
        anyhow::bail!(
            "{} keys failed and {} keys were abandoned",
            summary.keys_failed(),
            summary.abandoned_keys.len()
        );
    }

    Ok(())
}

/// Reads one JSON value per non-empty line of `path`.
fn read_json_lines<T>(path: &Path) -> anyhow::Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    let file = File::open(path).with_context(|| format!("opening `{}`", path.display()))?;

    let mut values = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let value = serde_json::from_str(&line)
            .with_context(|| format!("parsing line {} of `{}`", index + 1, path.display()))?;
        values.push(value);
    }

    Ok(values)
}
