// ============================================================
// Layer 6 - CSV Metrics Sink
// ============================================================
// Records training progress to two CSV files in the checkpoint
// directory, appending across runs:
//
//   metrics.csv
//     epoch,metric,value
//     1,loss,3.124500
//     1,bleu4,0.021300
//
//   examples.csv
//     epoch,image_id,reference,generated
//     1,1000268201_693b08cb0e.jpg,a child in a pink dress ...,a dog ...
//
// The long format keeps the header stable when a metric is added
// or skipped for an epoch (BLEU is only present when evaluation
// is enabled).

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::{caption::CaptionExample, traits::MetricsSink};

const METRICS_HEADER:  &str = "epoch,metric,value";
const EXAMPLES_HEADER: &str = "epoch,image_id,reference,generated";

pub struct CsvMetricsSink {
    metrics_path:  PathBuf,
    examples_path: PathBuf,
}

impl CsvMetricsSink {
    /// Open (or create) both CSV files under `dir`.
    /// Headers are written only when a file is new.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let metrics_path  = dir.join("metrics.csv");
        let examples_path = dir.join("examples.csv");
        ensure_header(&metrics_path, METRICS_HEADER)?;
        ensure_header(&examples_path, EXAMPLES_HEADER)?;

        Ok(Self { metrics_path, examples_path })
    }

    pub fn metrics_path(&self) -> &Path {
        &self.metrics_path
    }

    pub fn examples_path(&self) -> &Path {
        &self.examples_path
    }

    fn append(path: &Path, row: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open '{}'", path.display()))?;
        writeln!(f, "{row}")?;
        Ok(())
    }

    fn metric(&self, epoch: usize, name: &str, value: f64) -> Result<()> {
        Self::append(&self.metrics_path, &format!("{epoch},{name},{value:.6}"))?;
        tracing::debug!("Logged epoch {} {}={:.4}", epoch, name, value);
        Ok(())
    }
}

fn ensure_header(path: &Path, header: &str) -> Result<()> {
    if !path.exists() {
        let mut f = fs::File::create(path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        writeln!(f, "{header}")?;
        tracing::debug!("Created metrics CSV: '{}'", path.display());
    }
    Ok(())
}

/// Quote a field when it holds a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl MetricsSink for CsvMetricsSink {
    fn record_loss(&mut self, epoch: usize, loss: f64) -> Result<()> {
        self.metric(epoch, "loss", loss)
    }

    fn record_bleu(&mut self, epoch: usize, bleu: f64) -> Result<()> {
        self.metric(epoch, "bleu4", bleu)
    }

    fn record_example(&mut self, epoch: usize, example: &CaptionExample) -> Result<()> {
        let row = format!(
            "{},{},{},{}",
            epoch,
            csv_field(&example.image_id),
            csv_field(&example.reference),
            csv_field(&example.generated),
        );
        Self::append(&self.examples_path, &row)
    }
}
