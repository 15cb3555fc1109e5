use std::ffi::OsString;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::artifacts::ArtifactKind;
use crate::config::FlashConfig;
use crate::error::{Error, Result};
use crate::executor::{BuildEvent, Invocation, ProcessRunner, ReportSink};
use crate::targets::TargetId;

/// Write order and placement. Offsets are fixed by the boot ROM and the
/// partition layout, not by this tool.
pub const FLASH_MAP: [ArtifactKind; 3] = [
    ArtifactKind::Bootloader,
    ArtifactKind::PartitionTable,
    ArtifactKind::Firmware,
];

/// Canonical artifacts absent from `dir`, in flash order.
pub fn missing_artifacts(dir: &Path) -> Vec<ArtifactKind> {
    FLASH_MAP
        .iter()
        .copied()
        .filter(|k| !dir.join(k.file_name()).is_file())
        .collect()
}

pub struct FlashDriver<'a> {
    cfg: &'a FlashConfig,
    runner: &'a dyn ProcessRunner,
    env: Vec<(String, OsString)>,
}

impl<'a> FlashDriver<'a> {
    pub fn new(cfg: &'a FlashConfig, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            cfg,
            runner,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Runs from inside `artifact_dir` so the image arguments stay relative.
    pub fn invocation(&self, artifact_dir: &Path, target: TargetId, port: &str) -> Result<Invocation> {
        let mut inv = Invocation::from_command(&self.cfg.command)?
            .args(["--chip", target.as_str(), "--port", port])
            .arg("--baud")
            .arg(self.cfg.baud.to_string())
            .args(["--before", self.cfg.before.as_str()])
            .args(["--after", self.cfg.after.as_str()])
            .arg("write_flash")
            .args(["--flash_mode", self.cfg.flash_mode.as_str()])
            .args(["--flash_freq", self.cfg.flash_freq.as_str()])
            .args(["--flash_size", self.cfg.flash_size.as_str()]);
        for kind in FLASH_MAP {
            inv = inv
                .arg(format!("{:#x}", kind.flash_offset()))
                .arg(kind.file_name());
        }
        inv = inv.cwd(artifact_dir);
        for (k, v) in &self.env {
            inv = inv.env(k.clone(), v.clone());
        }
        Ok(inv)
    }

    /// One attempt, no retry. Missing artifacts fail before anything runs.
    pub fn flash(
        &self,
        artifact_dir: &Path,
        target: TargetId,
        port: &str,
        sink: &dyn ReportSink,
    ) -> Result<()> {
        let missing = missing_artifacts(artifact_dir);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|k| k.file_name()).collect();
            return Err(Error::artifact_missing(format!(
                "missing artifacts in {}: {}",
                artifact_dir.display(),
                names.join(", ")
            )));
        }

        let inv = self.invocation(artifact_dir, target, port)?;
        sink.emit(BuildEvent::FlashStarted {
            target,
            port: port.to_string(),
            dir: artifact_dir.to_path_buf(),
        });
        let res = self.runner.run(&inv, &mut |line| {
            sink.emit(BuildEvent::ToolLog {
                tool: "flash",
                line: line.to_string(),
            })
        });
        sink.emit(BuildEvent::FlashFinished {
            target,
            ok: res.is_ok(),
            error: res.as_ref().err().map(|e| e.to_string()),
        });
        res
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub target: TargetId,
    pub dir: PathBuf,
    pub missing: Vec<ArtifactKind>,
}

impl ArtifactSet {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// `builds/<target>/` directories holding at least a firmware image, in
/// catalog order. Unknown directory names are ignored.
pub fn discover_artifact_sets(builds_dir: &Path) -> Vec<ArtifactSet> {
    let mut sets: Vec<ArtifactSet> = WalkDir::new(builds_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let target = e.file_name().to_str()?.parse::<TargetId>().ok()?;
            let dir = e.into_path();
            dir.join(ArtifactKind::Firmware.file_name())
                .is_file()
                .then(|| ArtifactSet {
                    target,
                    missing: missing_artifacts(&dir),
                    dir,
                })
        })
        .collect();
    sets.sort_by_key(|s| s.target);
    sets
}
