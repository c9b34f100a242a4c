//! Progress reporting for long-running pipeline stages

use tracing::{info, warn};

/// Unit counter with a fixed reporting interval.
///
/// Started with a total, incremented once per completed unit (batches for
/// ingestion), and reset after a total failure so a retried run starts from a
/// clean count.
#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    total: usize,
    processed: usize,
    report_every: usize,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, report_every: usize) -> Self {
        Self {
            label: label.into(),
            total: 0,
            processed: 0,
            report_every: report_every.max(1),
        }
    }

    pub fn start(&mut self, total: usize) {
        self.total = total;
        self.processed = 0;
        info!(stage = %self.label, total, "starting");
    }

    pub fn increment(&mut self) {
        self.processed += 1;
        if self.processed % self.report_every == 0 || self.processed == self.total {
            info!(
                stage = %self.label,
                processed = self.processed,
                total = self.total,
                "progress"
            );
        }
    }

    /// Report how far the run got before a total failure, then reset.
    pub fn fail(&mut self) {
        warn!(
            stage = %self.label,
            processed = self.processed,
            total = self.total,
            "failed mid-run"
        );
        self.processed = 0;
        self.total = 0;
    }

    pub fn finish(&self) {
        info!(stage = %self.label, processed = self.processed, "done");
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_resets() {
        let mut progress = ProgressTracker::new("test", 10);
        progress.start(3);
        progress.increment();
        progress.increment();
        assert_eq!(progress.processed(), 2);
        progress.fail();
        assert_eq!(progress.processed(), 0);
    }
}
