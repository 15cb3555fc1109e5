use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pipeline::{BuildOutcome, BuildResult, BuildStep};
use crate::targets::TargetId;

pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub target: TargetId,
    pub step: BuildStep,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation {
    pub target: TargetId,
    pub dir: PathBuf,
    pub firmware_bytes: u64,
}

/// Aggregate of one orchestrator run, in request order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub succeeded: Vec<TargetId>,
    pub failed: Vec<FailedTarget>,
    pub artifacts: Vec<ArtifactLocation>,
    pub results: Vec<BuildResult>,
}

impl Report {
    pub fn from_results(results: Vec<BuildResult>) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut artifacts = Vec::new();
        for r in &results {
            match &r.outcome {
                BuildOutcome::Succeeded {
                    firmware_bytes,
                    artifact_dir,
                    ..
                } => {
                    succeeded.push(r.target);
                    artifacts.push(ArtifactLocation {
                        target: r.target,
                        dir: artifact_dir.clone(),
                        firmware_bytes: *firmware_bytes,
                    });
                }
                BuildOutcome::Failed { step, reason } => failed.push(FailedTarget {
                    target: r.target,
                    step: *step,
                    reason: reason.clone(),
                }),
            }
        }
        Self {
            generated_at: Utc::now(),
            succeeded,
            failed,
            artifacts,
            results,
        }
    }

    /// The run failed iff any target failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("failed to create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| Error::io(format!("failed to write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(target: TargetId) -> BuildResult {
        BuildResult {
            target,
            outcome: BuildOutcome::Succeeded {
                firmware_bytes: 10,
                artifact_dir: PathBuf::from("builds").join(target.as_str()),
                artifacts: Vec::new(),
            },
            diagnostics: None,
            warnings: Vec::new(),
            states: Vec::new(),
            elapsed_ms: 1,
        }
    }

    fn failed(target: TargetId) -> BuildResult {
        BuildResult {
            outcome: BuildOutcome::Failed {
                step: BuildStep::Compile,
                reason: "boom".into(),
            },
            ..ok(target)
        }
    }

    #[test]
    fn splits_results_in_order() {
        let r = Report::from_results(vec![
            failed(TargetId::Esp32),
            ok(TargetId::Esp32c3),
            ok(TargetId::Esp32s2),
        ]);
        assert!(!r.is_success());
        assert_eq!(r.succeeded, vec![TargetId::Esp32c3, TargetId::Esp32s2]);
        assert_eq!(r.failed.len(), 1);
        assert_eq!(r.failed[0].step, BuildStep::Compile);
        assert_eq!(r.artifacts[1].dir, PathBuf::from("builds/esp32s2"));
    }

    #[test]
    fn writes_json_report() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("builds").join(REPORT_FILE);
        Report::from_results(vec![ok(TargetId::Esp32)])
            .write_json(&path)
            .expect("write");
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(v["succeeded"][0], "esp32");
        assert_eq!(v["results"][0]["outcome"]["status"], "succeeded");
        assert!(v["generated_at"].is_string());
    }
}
