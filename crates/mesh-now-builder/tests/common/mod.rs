#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};

use mesh_now_builder::config::{FrontendConfig, LayoutConfig};
use mesh_now_builder::executor::{BuildEvent, ChannelSink, Invocation, ProcessRunner};
use mesh_now_builder::pipeline::Toolchain;
use mesh_now_builder::targets::TargetId;
use mesh_now_builder::workspace::ProjectPaths;
use mesh_now_builder::{Error, Result};

pub fn project(root: &Path) -> ProjectPaths {
    ProjectPaths::resolve_from(root, &LayoutConfig::default(), &FrontendConfig::default()).unwrap()
}

pub fn write_overlay(paths: &ProjectPaths, target: TargetId, marker_for: TargetId) {
    fs::create_dir_all(&paths.configs_dir).unwrap();
    fs::write(
        paths.configs_dir.join(format!("sdkconfig.{target}")),
        format!("CONFIG_IDF_TARGET=\"{marker_for}\"\nCONFIG_ESPTOOLPY_FLASHSIZE_4MB=y\n"),
    )
    .unwrap();
}

/// Deterministic firmware bytes per target.
pub fn firmware_for(target: TargetId) -> Vec<u8> {
    let seed = target.as_str().as_bytes();
    (0..1000).map(|i| seed[i % seed.len()] ^ (i as u8)).collect()
}

/// Stands in for the real toolchain: records calls and writes artifacts
/// into the build directory on `build`.
pub struct FakeToolchain {
    pub build_dir: PathBuf,
    pub fail_compile: BTreeSet<TargetId>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeToolchain {
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            fail_compile: BTreeSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, target: TargetId) -> Self {
        self.fail_compile.insert(target);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Toolchain for FakeToolchain {
    fn set_target(&self, target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()> {
        self.calls.lock().unwrap().push(format!("set-target {target}"));
        assert!(
            !self.build_dir.exists(),
            "build dir must be cleared before set-target"
        );
        fs::create_dir_all(&self.build_dir)?;
        fs::write(self.build_dir.join("target"), target.as_str())?;
        log(&format!("Set target to: {target}"));
        Ok(())
    }

    fn build(&self, target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()> {
        self.calls.lock().unwrap().push(format!("build {target}"));
        if self.fail_compile.contains(&target) {
            return Err(Error::external(
                "`idf.py build` failed: exit status: 1",
                Some("ninja: build stopped: subcommand failed.".into()),
            ));
        }
        fs::write(self.build_dir.join("mesh-now.bin"), firmware_for(target))?;
        fs::create_dir_all(self.build_dir.join("bootloader"))?;
        fs::write(self.build_dir.join("bootloader/bootloader.bin"), b"bootloader")?;
        fs::create_dir_all(self.build_dir.join("partition_table"))?;
        fs::write(
            self.build_dir.join("partition_table/partition-table.bin"),
            b"partitions",
        )?;
        log("Project build complete.");
        Ok(())
    }
}

/// Records invocations; fails every call when `fail` is set.
#[derive(Default)]
pub struct RecordingRunner {
    pub fail: bool,
    pub invocations: Mutex<Vec<Invocation>>,
}

impl RecordingRunner {
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, inv: &Invocation, log: &mut dyn FnMut(&str)) -> Result<()> {
        self.invocations.lock().unwrap().push(inv.clone());
        log("Connecting....");
        if self.fail {
            return Err(Error::external(
                format!("`{}` failed: exit status: 2", inv.display()),
                Some("A fatal error occurred: Failed to connect".into()),
            ));
        }
        Ok(())
    }
}

pub fn channel_sink() -> (ChannelSink, mpsc::Receiver<BuildEvent>) {
    let (tx, rx) = mpsc::channel();
    (ChannelSink::new(tx), rx)
}
