use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::Backend;
use burn::tensor::cast::ToElement;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SsdError};
use crate::loss::MultiBoxLoss;

pub const LOG_NAME: &str = "log";

/// One line of the training log, averaged over the iterations since the previous entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: usize,
    pub iteration: usize,
    #[serde(rename = "main/loss")]
    pub loss: f32,
    #[serde(rename = "main/loss/loc")]
    pub loss_loc: f32,
    #[serde(rename = "main/loss/conf")]
    pub loss_conf: f32,
    pub lr: f64,
    pub elapsed_time: f64,
    pub timestamp: String,
}

/// Accumulates losses between reports and keeps `<out>/log` up to date as a JSON array.
pub struct LogReport {
    path: PathBuf,
    stopwatch: Instant,
    elapsed_offset: f64,
    entries: Vec<LogEntry>,
    loss: f32,
    loss_loc: f32,
    loss_conf: f32,
    count: usize,
}

impl LogReport {
    /// Opens the report in `out`.
    ///
    /// A run resumed at iteration `resume` keeps the entries of an existing log up to that
    /// iteration and appends to them. A fresh run starts an empty log.
    pub fn new(out: &Path, resume: Option<usize>) -> Result<Self> {
        fs::create_dir_all(out).map_err(|e| SsdError::io(out, e))?;

        let path = out.join(LOG_NAME);

        let entries: Vec<LogEntry> = match resume {
            Some(resume) if path.exists() => {
                let file = File::open(&path).map_err(|e| SsdError::io(&path, e))?;
                let mut entries: Vec<LogEntry> = serde_json::from_reader(file)?;
                entries.retain(|e| e.iteration <= resume);
                entries
            }
            _ => vec![],
        };

        let elapsed_offset = entries.last().map(|e| e.elapsed_time).unwrap_or(0.0);

        Ok(LogReport {
            path,
            stopwatch: Instant::now(),
            elapsed_offset,
            entries,
            loss: 0.0,
            loss_loc: 0.0,
            loss_conf: 0.0,
            count: 0,
        })
    }

    pub fn update<B: Backend>(&mut self, loss: &MultiBoxLoss<B>) {
        self.add(
            loss.total.clone().into_scalar().to_f32(),
            loss.loc.clone().into_scalar().to_f32(),
            loss.conf.clone().into_scalar().to_f32(),
        );
    }

    pub fn add(&mut self, loss: f32, loss_loc: f32, loss_conf: f32) {
        self.loss += loss;
        self.loss_loc += loss_loc;
        self.loss_conf += loss_conf;
        self.count += 1;
    }

    /// Writes an entry with the means accumulated so far and resets the accumulators.
    /// Nothing is written when no loss was recorded since the last report.
    pub fn report(&mut self, epoch: usize, iteration: usize, lr: f64) -> Result<Option<LogEntry>> {
        if self.count == 0 {
            return Ok(None);
        }

        let n = self.count as f32;
        let entry = LogEntry {
            epoch,
            iteration,
            loss: self.loss / n,
            loss_loc: self.loss_loc / n,
            loss_conf: self.loss_conf / n,
            lr,
            elapsed_time: self.elapsed_offset + self.stopwatch.elapsed().as_secs_f64(),
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        info!(
            epoch,
            iteration,
            loss = entry.loss,
            loc = entry.loss_loc,
            conf = entry.loss_conf,
            lr,
            elapsed = format!("{:.1}s", entry.elapsed_time),
            "report"
        );

        self.entries.push(entry.clone());
        self.flush()?;

        self.loss = 0.0;
        self.loss_loc = 0.0;
        self.loss_conf = 0.0;
        self.count = 0;

        Ok(Some(entry))
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    fn flush(&self) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| SsdError::io(&self.path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.entries)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::Tensor;

    type B = NdArray<f32>;

    #[test]
    fn test_report_averages_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let device = &NdArrayDevice::default();
        let mut report = LogReport::new(dir.path(), None).unwrap();

        for total in [2.0f32, 4.0] {
            let loss = MultiBoxLoss::<B> {
                total: Tensor::from_floats([total], device),
                loc: Tensor::from_floats([total / 2.0], device),
                conf: Tensor::from_floats([total / 2.0], device),
            };
            report.update(&loss);
        }

        let entry = report.report(1, 10, 0.01).unwrap().unwrap();

        assert_eq!(entry.epoch, 1);
        assert_eq!(entry.iteration, 10);
        assert_eq!(entry.loss, 3.0);
        assert_eq!(entry.loss_loc, 1.5);
        assert_eq!(entry.loss_conf, 1.5);

        // accumulators start over
        assert!(report.report(1, 11, 0.01).unwrap().is_none());
    }

    #[test]
    fn test_log_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = LogReport::new(dir.path(), None).unwrap();

        report.add(1.0, 0.25, 0.75);
        report.report(1, 10, 0.01).unwrap();

        let log: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(LOG_NAME)).unwrap()).unwrap();

        assert_eq!(log[0]["iteration"], 10);
        assert_eq!(log[0]["main/loss"], 1.0);
        assert_eq!(log[0]["main/loss/conf"], 0.75);
        assert_eq!(log[0]["lr"], 0.01);
    }

    fn write_log(out: &Path, iterations: &[usize]) {
        let mut report = LogReport::new(out, None).unwrap();
        for iteration in iterations {
            report.add(1.0, 0.5, 0.5);
            report.report(1, *iteration, 0.01).unwrap();
        }
    }

    #[test]
    fn test_resume_appends() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[10]);

        let mut resumed = LogReport::new(dir.path(), Some(10)).unwrap();
        assert_eq!(resumed.entries().len(), 1);

        resumed.add(0.5, 0.25, 0.25);
        resumed.report(2, 20, 0.01).unwrap();

        let reloaded = LogReport::new(dir.path(), Some(20)).unwrap();
        let iterations: Vec<usize> = reloaded.entries().iter().map(|e| e.iteration).collect();
        assert_eq!(iterations, vec![10, 20]);
        assert!(reloaded.entries()[1].elapsed_time >= reloaded.entries()[0].elapsed_time);
    }

    #[test]
    fn test_resume_drops_later_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[10, 20, 30]);

        let mut resumed = LogReport::new(dir.path(), Some(20)).unwrap();
        let iterations: Vec<usize> = resumed.entries().iter().map(|e| e.iteration).collect();
        assert_eq!(iterations, vec![10, 20]);
        assert_eq!(resumed.elapsed_offset, resumed.entries()[1].elapsed_time);

        resumed.add(1.0, 0.5, 0.5);
        resumed.report(3, 30, 0.01).unwrap();

        let reloaded = LogReport::new(dir.path(), Some(30)).unwrap();
        let iterations: Vec<usize> = reloaded.entries().iter().map(|e| e.iteration).collect();
        assert_eq!(iterations, vec![10, 20, 30]);
    }

    #[test]
    fn test_fresh_run_replaces_log() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), &[10, 20]);

        let report = LogReport::new(dir.path(), None).unwrap();
        assert!(report.entries().is_empty());
    }
}
