// timing.rs — Per-run telemetry report.
//
// Both estimators fill one of these after every run: a wall-clock total
// plus one line per pipeline stage. GPU stage durations come from device
// timestamps and may be unavailable (`None`) when the adapter cannot
// record them. The report is for humans; its text format carries no
// compatibility promise.

use std::fmt;
use std::time::Duration;

/// Duration of one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    /// Human-readable stage name, e.g. "Left greyscale".
    pub label: String,
    /// Seconds spent in the stage, if measured.
    pub seconds: Option<f64>,
}

/// Telemetry for one depth-map computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileReport {
    /// Which estimator produced the report.
    pub estimator: &'static str,
    /// Wall-clock time of the pipeline, file decode/encode excluded.
    pub total: Duration,
    /// Stages in submission order.
    pub stages: Vec<StageTiming>,
}

impl ProfileReport {
    pub fn new(estimator: &'static str) -> Self {
        ProfileReport {
            estimator,
            total: Duration::ZERO,
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, seconds: Option<f64>) {
        self.stages.push(StageTiming {
            label: label.into(),
            seconds,
        });
    }

    /// Look up a stage by label.
    pub fn stage(&self, label: &str) -> Option<&StageTiming> {
        self.stages.iter().find(|s| s.label == label)
    }

    /// Emit the report through `tracing` at info level.
    pub fn log(&self) {
        tracing::info!(
            estimator = self.estimator,
            total_s = self.total.as_secs_f64(),
            "depth map complete"
        );
        for s in &self.stages {
            match s.seconds {
                Some(secs) => tracing::info!(stage = %s.label, seconds = secs, "stage timing"),
                None => tracing::info!(stage = %s.label, "stage timing unavailable"),
            }
        }
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---{}---", self.estimator)?;
        writeln!(f, "Total execution time: {:.6} S.", self.total.as_secs_f64())?;
        for s in &self.stages {
            match s.seconds {
                Some(secs) => writeln!(f, "{:<20}: {secs:.6} S.", s.label)?,
                None => writeln!(f, "{:<20}: n/a", s.label)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lines() {
        let mut r = ProfileReport::new("CPU Depth Estimator");
        r.total = Duration::from_millis(1500);
        r.push("Left greyscale", Some(0.25));
        r.push("Cross check", None);
        let text = r.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "---CPU Depth Estimator---");
        assert_eq!(lines[1], "Total execution time: 1.500000 S.");
        assert_eq!(lines[2], "Left greyscale      : 0.250000 S.");
        assert_eq!(lines[3], "Cross check         : n/a");
    }

    #[test]
    fn test_stage_lookup() {
        let mut r = ProfileReport::new("x");
        r.push("Occlusion fill", Some(1.0));
        assert_eq!(r.stage("Occlusion fill").unwrap().seconds, Some(1.0));
        assert!(r.stage("missing").is_none());
    }
}
