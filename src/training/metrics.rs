//! Training metrics for monitoring adversarial training
//!
//! Per-step scalars flow through the [`MetricSink`] capability so dashboards
//! and in-memory fakes can be swapped in; per-epoch aggregates are kept in
//! [`TrainingMetrics`] and persisted as CSV alongside checkpoints.

use crate::error::Result;

/// Sink for per-step scalar metrics (`g_loss`, `d_loss`, `d_loss_real`,
/// `d_loss_fake`, `val_loss`).
pub trait MetricSink {
    fn log_scalar(&mut self, name: &str, value: f64, epoch: usize, step: usize);
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricSink for NullSink {
    fn log_scalar(&mut self, _name: &str, _value: f64, _epoch: usize, _step: usize) {}
}

/// Sink that keeps every logged scalar; used in tests and small runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<(String, f64, usize, usize)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values logged under `name`.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(n, _, _, _)| n == name)
            .map(|(_, v, _, _)| *v)
            .collect()
    }
}

impl MetricSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, epoch: usize, step: usize) {
        self.records.push((name.to_string(), value, epoch, step));
    }
}

/// Per-epoch aggregates collected during training
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Mean generator loss per epoch
    pub g_losses: Vec<f64>,
    /// Mean critic loss per epoch
    pub d_losses: Vec<f64>,
    /// Mean critic response to real pairs per epoch
    pub d_losses_real: Vec<f64>,
    /// Mean critic response to fake pairs per epoch
    pub d_losses_fake: Vec<f64>,
    /// Validation L1 loss per epoch
    pub val_losses: Vec<f64>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one epoch of aggregates
    pub fn record_epoch(
        &mut self,
        g_loss: f64,
        d_loss: f64,
        d_loss_real: f64,
        d_loss_fake: f64,
        val_loss: f64,
    ) {
        self.g_losses.push(g_loss);
        self.d_losses.push(d_loss);
        self.d_losses_real.push(d_loss_real);
        self.d_losses_fake.push(d_loss_fake);
        self.val_losses.push(val_loss);
    }

    /// Get number of recorded epochs
    pub fn num_epochs(&self) -> usize {
        self.g_losses.len()
    }

    /// Get latest generator loss
    pub fn latest_g_loss(&self) -> Option<f64> {
        self.g_losses.last().copied()
    }

    /// Get latest critic loss
    pub fn latest_d_loss(&self) -> Option<f64> {
        self.d_losses.last().copied()
    }

    /// Get latest validation loss
    pub fn latest_val_loss(&self) -> Option<f64> {
        self.val_losses.last().copied()
    }

    /// Best (lowest) validation loss seen so far
    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_losses
            .iter()
            .copied()
            .fold(None, |best, v| match best {
                Some(b) if b <= v => Some(b),
                _ => Some(v),
            })
    }

    /// Save metrics to CSV file
    pub fn save_csv(&self, path: &str) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        writer.write_record([
            "epoch",
            "g_loss",
            "d_loss",
            "d_loss_real",
            "d_loss_fake",
            "val_loss",
        ])?;

        for i in 0..self.num_epochs() {
            writer.write_record([
                i.to_string(),
                self.g_losses[i].to_string(),
                self.d_losses[i].to_string(),
                self.d_losses_real[i].to_string(),
                self.d_losses_fake[i].to_string(),
                self.val_losses[i].to_string(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    pub fn load_csv(path: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.records() {
            let record = result?;
            metrics
                .g_losses
                .push(record[1].parse().unwrap_or(f64::NAN));
            metrics
                .d_losses
                .push(record[2].parse().unwrap_or(f64::NAN));
            metrics
                .d_losses_real
                .push(record[3].parse().unwrap_or(f64::NAN));
            metrics
                .d_losses_fake
                .push(record[4].parse().unwrap_or(f64::NAN));
            metrics
                .val_losses
                .push(record[5].parse().unwrap_or(f64::NAN));
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_training_metrics_record() {
        let mut metrics = TrainingMetrics::new();

        metrics.record_epoch(1.5, -0.8, 0.6, -0.7, 0.3);
        metrics.record_epoch(1.3, -0.75, 0.65, -0.68, 0.2);

        assert_eq!(metrics.num_epochs(), 2);
        assert_eq!(metrics.latest_g_loss(), Some(1.3));
        assert_eq!(metrics.latest_val_loss(), Some(0.2));
        assert_eq!(metrics.best_val_loss(), Some(0.2));
    }

    #[test]
    fn test_best_val_loss_keeps_minimum() {
        let mut metrics = TrainingMetrics::new();
        metrics.record_epoch(0.0, 0.0, 0.0, 0.0, 0.5);
        metrics.record_epoch(0.0, 0.0, 0.0, 0.0, 0.1);
        metrics.record_epoch(0.0, 0.0, 0.0, 0.0, 0.4);

        assert_eq!(metrics.best_val_loss(), Some(0.1));
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let path = path.to_str().unwrap();

        let mut metrics = TrainingMetrics::new();
        metrics.record_epoch(1.0, -2.0, 0.5, -0.5, 0.25);
        metrics.save_csv(path).unwrap();

        let loaded = TrainingMetrics::load_csv(path).unwrap();
        assert_eq!(loaded.num_epochs(), 1);
        assert_eq!(loaded.latest_d_loss(), Some(-2.0));
        assert_eq!(loaded.latest_val_loss(), Some(0.25));
    }

    #[test]
    fn test_memory_sink_series() {
        let mut sink = MemorySink::new();
        sink.log_scalar("d_loss", 1.0, 0, 0);
        sink.log_scalar("g_loss", 2.0, 0, 0);
        sink.log_scalar("d_loss", 3.0, 0, 1);

        assert_eq!(sink.series("d_loss"), vec![1.0, 3.0]);
    }
}
