use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::artifacts::{self, Artifact, ArtifactKind};
use crate::error::{Error, Result};
use crate::executor::{BuildEvent, ReportSink};
use crate::overlay::{OverlayResolver, OverlayValidation};
use crate::targets::TargetId;
use crate::workspace::{BuildDirLease, ProjectPaths};

mod toolchain;

pub use toolchain::{IdfToolchain, Toolchain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStep {
    SetTarget,
    ApplyConfig,
    Compile,
    CollectArtifacts,
}

impl BuildStep {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStep::SetTarget => "set-target",
            BuildStep::ApplyConfig => "apply-config",
            BuildStep::Compile => "compile",
            BuildStep::CollectArtifacts => "collect-artifacts",
        }
    }

    /// State the pipeline is in while this step runs.
    pub fn state(self) -> PipelineState {
        match self {
            BuildStep::SetTarget => PipelineState::SettingTarget,
            BuildStep::ApplyConfig => PipelineState::ApplyingConfig,
            BuildStep::Compile => PipelineState::Compiling,
            BuildStep::CollectArtifacts => PipelineState::CollectingArtifacts,
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    SettingTarget,
    ApplyingConfig,
    Compiling,
    CollectingArtifacts,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BuildOutcome {
    Succeeded {
        firmware_bytes: u64,
        artifact_dir: PathBuf,
        artifacts: Vec<Artifact>,
    },
    Failed {
        step: BuildStep,
        reason: String,
    },
}

/// One target's outcome. Built once at the end of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub target: TargetId,
    pub outcome: BuildOutcome,
    /// Tail of the failing tool's output, if a tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    pub warnings: Vec<String>,
    /// Every state entered, `Idle` first.
    pub states: Vec<PipelineState>,
    pub elapsed_ms: u64,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Succeeded { .. })
    }

    pub fn firmware_bytes(&self) -> Option<u64> {
        match &self.outcome {
            BuildOutcome::Succeeded { firmware_bytes, .. } => Some(*firmware_bytes),
            BuildOutcome::Failed { .. } => None,
        }
    }

    pub fn failed_step(&self) -> Option<BuildStep> {
        match &self.outcome {
            BuildOutcome::Failed { step, .. } => Some(*step),
            BuildOutcome::Succeeded { .. } => None,
        }
    }
}

struct StepFailure {
    step: BuildStep,
    error: Error,
}

/// Mutable bookkeeping for a single run; frozen into a `BuildResult`.
struct Attempt<'s> {
    target: TargetId,
    sink: &'s dyn ReportSink,
    states: Vec<PipelineState>,
    warnings: Vec<String>,
}

impl Attempt<'_> {
    fn warn(&mut self, message: String) {
        tracing::warn!(target_id = %self.target, "{message}");
        self.sink.emit(BuildEvent::Warning {
            target: Some(self.target),
            message: message.clone(),
        });
        self.warnings.push(message);
    }

    fn log_fn(&self) -> impl FnMut(&str) + '_ {
        let target = self.target;
        let sink = self.sink;
        move |line: &str| {
            sink.emit(BuildEvent::StepLog {
                target,
                line: line.to_string(),
            })
        }
    }
}

/// Builds one target: set target, apply its overlay, compile, collect.
/// Steps run strictly in order and the first failure ends the run.
pub struct Pipeline<'a> {
    paths: &'a ProjectPaths,
    toolchain: &'a dyn Toolchain,
    overlays: OverlayResolver,
    firmware_name: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        paths: &'a ProjectPaths,
        toolchain: &'a dyn Toolchain,
        firmware_name: impl Into<String>,
    ) -> Self {
        Self {
            overlays: OverlayResolver::new(&paths.configs_dir),
            paths,
            toolchain,
            firmware_name: firmware_name.into(),
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        self.paths
    }

    /// Never returns an error: every failure becomes a failed `BuildResult`.
    pub fn run(&self, target: TargetId, sink: &dyn ReportSink) -> BuildResult {
        let started = Instant::now();
        let mut attempt = Attempt {
            target,
            sink,
            states: vec![PipelineState::Idle],
            warnings: Vec::new(),
        };

        let (outcome, diagnostics) = match self.execute(&mut attempt) {
            Ok((artifact_dir, artifacts, firmware_bytes)) => {
                attempt.states.push(PipelineState::Succeeded);
                (
                    BuildOutcome::Succeeded {
                        firmware_bytes,
                        artifact_dir,
                        artifacts,
                    },
                    None,
                )
            }
            Err(StepFailure { step, error }) => {
                attempt.states.push(PipelineState::Failed);
                tracing::debug!(target_id = %target, %step, kind = error.kind().as_str(), "pipeline failed");
                (
                    BuildOutcome::Failed {
                        step,
                        reason: error.to_string(),
                    },
                    error.diagnostics().map(str::to_string),
                )
            }
        };

        BuildResult {
            target,
            outcome,
            diagnostics,
            warnings: attempt.warnings,
            states: attempt.states,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn execute(
        &self,
        attempt: &mut Attempt<'_>,
    ) -> std::result::Result<(PathBuf, Vec<Artifact>, u64), StepFailure> {
        let target = attempt.target;

        // The lease lives until this function returns, on success or failure.
        let lease = self.step(attempt, BuildStep::SetTarget, |a| {
            let lease = BuildDirLease::acquire(&self.paths.root, &self.paths.build_dir)?;
            self.toolchain.set_target(target, &mut a.log_fn())?;
            Ok(lease)
        })?;

        match self.overlays.validate(target) {
            OverlayValidation::Absent { path } => {
                let reason = format!("no overlay at {}", path.display());
                attempt.sink.emit(BuildEvent::StepSkipped {
                    target,
                    step: BuildStep::ApplyConfig,
                    reason,
                });
                if self.paths.defaults_file.exists() {
                    attempt.warn(format!(
                        "no overlay for {target}; building with existing {}",
                        self.paths.defaults_file.display()
                    ));
                }
            }
            validation => {
                self.step(attempt, BuildStep::ApplyConfig, |_| {
                    self.apply_overlay(validation)
                })?;
            }
        }

        self.step(attempt, BuildStep::Compile, |a| {
            self.toolchain.build(target, &mut a.log_fn())
        })?;

        self.step(attempt, BuildStep::CollectArtifacts, |a| {
            let firmware_src = lease
                .path()
                .join(ArtifactKind::Firmware.source_rel(&self.firmware_name));
            if !firmware_src.is_file() {
                return Err(Error::artifact_missing(format!(
                    "firmware image {} not produced by a successful build",
                    firmware_src.display()
                )));
            }
            let dest = self.paths.artifact_dir(target);
            let collection = artifacts::collect(lease.path(), &dest, &self.firmware_name)?;
            for kind in &collection.missing {
                a.warn(format!(
                    "{kind} ({}) missing after build",
                    kind.source_rel(&self.firmware_name).display()
                ));
            }
            let bytes = collection.firmware_bytes().ok_or_else(|| {
                Error::artifact_missing(format!(
                    "firmware image missing from {}",
                    collection.dest_dir.display()
                ))
            })?;
            Ok((collection.dest_dir, collection.artifacts, bytes))
        })
    }

    fn apply_overlay(&self, validation: OverlayValidation) -> Result<()> {
        match validation {
            OverlayValidation::Valid { path } => {
                fs::copy(&path, &self.paths.defaults_file).map_err(|e| {
                    Error::io(format!(
                        "failed to copy {} -> {}: {e}",
                        path.display(),
                        self.paths.defaults_file.display()
                    ))
                })?;
                tracing::debug!(overlay = %path.display(), "overlay applied");
                Ok(())
            }
            other => Err(Error::overlay(other.to_string())),
        }
    }

    /// Run one step: record its state, announce it, and tag any error with it.
    fn step<'s, T>(
        &self,
        attempt: &mut Attempt<'s>,
        step: BuildStep,
        f: impl FnOnce(&mut Attempt<'s>) -> Result<T>,
    ) -> std::result::Result<T, StepFailure> {
        let target = attempt.target;
        attempt.states.push(step.state());
        attempt.sink.emit(BuildEvent::StepStarted { target, step });
        let started = Instant::now();
        let res = f(attempt);
        attempt.sink.emit(BuildEvent::StepFinished {
            target,
            step,
            ok: res.is_ok(),
            elapsed_ms: started.elapsed().as_millis(),
        });
        res.map_err(|error| StepFailure { step, error })
    }
}
