//! Periodic training progress reports.

use std::{fmt, time::Instant};

use burn::LearningRate;

/// Formats a duration the way `datetime.timedelta` prints it: `H:MM:SS`, prefixed
/// with `N day(s), ` past 24 hours.
pub fn format_eta(seconds: u64) -> String {
    let days = seconds / 86_400;
    let rest = seconds % 86_400;
    let (h, m, s) = (rest / 3600, rest % 3600 / 60, rest % 60);

    match days {
        0 => format!("{h}:{m:02}:{s:02}"),
        1 => format!("1 day, {h}:{m:02}:{s:02}"),
        _ => format!("{days} days, {h}:{m:02}:{s:02}"),
    }
}

/// One periodic report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub iteration: usize,
    pub max_iter: usize,
    pub lr: LearningRate,
    /// Mean loss since the previous report.
    pub loss: f32,
    pub eta_secs: u64,
    /// Wall time since the previous report.
    pub interval_secs: f64,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "it: {}/{}, lr: {:.6}, loss: {:.4}, eta: {}, time: {:.4}",
            self.iteration,
            self.max_iter,
            self.lr,
            self.loss,
            format_eta(self.eta_secs),
            self.interval_secs,
        )
    }
}

/// Averages losses over a window of `msg_iter` iterations.
#[derive(Debug)]
pub struct ProgressTracker {
    msg_iter: usize,
    max_iter: usize,
    start_iter: usize,
    losses: Vec<f32>,
    started: Instant,
    window_started: Instant,
}

impl ProgressTracker {
    /// `start_iter` is the number of iterations already done when resuming.
    pub fn new(msg_iter: usize, max_iter: usize, start_iter: usize) -> Self {
        let now = Instant::now();
        Self {
            msg_iter: msg_iter.max(1),
            max_iter,
            start_iter,
            losses: Vec::with_capacity(msg_iter),
            started: now,
            window_started: now,
        }
    }

    /// Records the loss of the `iteration`-th (1-based) iteration, returning a report
    /// every `msg_iter` iterations.
    pub fn update(
        &mut self,
        iteration: usize,
        lr: LearningRate,
        loss: f32,
    ) -> Option<ProgressReport> {
        self.losses.push(loss);
        if iteration % self.msg_iter != 0 {
            return None;
        }

        let now = Instant::now();
        let interval_secs = now.duration_since(self.window_started).as_secs_f64();
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let done = iteration.saturating_sub(self.start_iter).max(1);
        let remaining = self.max_iter.saturating_sub(iteration);

        let report = ProgressReport {
            iteration,
            max_iter: self.max_iter,
            lr,
            loss: self.losses.iter().sum::<f32>() / self.losses.len() as f32,
            eta_secs: (remaining as f64 * elapsed / done as f64) as u64,
            interval_secs,
        };

        self.losses.clear();
        self.window_started = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_formats_like_timedelta() {
        assert_eq!(format_eta(0), "0:00:00");
        assert_eq!(format_eta(59), "0:00:59");
        assert_eq!(format_eta(3723), "1:02:03");
        assert_eq!(format_eta(86_400), "1 day, 0:00:00");
        assert_eq!(format_eta(2 * 86_400 + 36_000 + 61), "2 days, 10:01:01");
    }

    #[test]
    fn reports_every_msg_iter() {
        let mut tracker = ProgressTracker::new(3, 10, 0);
        assert!(tracker.update(1, 0.1, 1.0).is_none());
        assert!(tracker.update(2, 0.1, 2.0).is_none());

        let report = tracker.update(3, 0.1, 3.0).unwrap();
        assert_eq!(report.iteration, 3);
        assert!((report.loss - 2.0).abs() < 1e-6);

        // The window restarts after each report.
        tracker.update(4, 0.1, 10.0);
        tracker.update(5, 0.1, 10.0);
        let report = tracker.update(6, 0.1, 10.0).unwrap();
        assert!((report.loss - 10.0).abs() < 1e-6);
    }

    #[test]
    fn message_layout() {
        let report = ProgressReport {
            iteration: 50,
            max_iter: 80000,
            lr: 1.2345678e-5,
            loss: 3.14159,
            eta_secs: 3723,
            interval_secs: 12.5,
        };
        assert_eq!(
            report.to_string(),
            "it: 50/80000, lr: 0.000012, loss: 3.1416, eta: 1:02:03, time: 12.5000"
        );
    }
}
