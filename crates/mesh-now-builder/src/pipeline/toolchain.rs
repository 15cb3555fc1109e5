use std::path::PathBuf;

use crate::config::ToolchainConfig;
use crate::error::Result;
use crate::executor::{Invocation, ProcessRunner};
use crate::targets::TargetId;

/// The external firmware toolchain, one call per pipeline step.
pub trait Toolchain {
    fn set_target(&self, target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()>;
    fn build(&self, target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()>;
}

/// `idf.py`-style toolchain. The toolchain root is handed in, never read from
/// the process environment here.
pub struct IdfToolchain<'a> {
    command: Vec<String>,
    project_root: PathBuf,
    build_dir: PathBuf,
    root_env: String,
    toolchain_root: PathBuf,
    runner: &'a dyn ProcessRunner,
}

impl<'a> IdfToolchain<'a> {
    pub fn new(
        cfg: &ToolchainConfig,
        project_root: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        toolchain_root: impl Into<PathBuf>,
        runner: &'a dyn ProcessRunner,
    ) -> Self {
        Self {
            command: cfg.command.clone(),
            project_root: project_root.into(),
            build_dir: build_dir.into(),
            root_env: cfg.root_env.clone(),
            toolchain_root: toolchain_root.into(),
            runner,
        }
    }

    pub fn invocation(&self, action: &[&str]) -> Result<Invocation> {
        Ok(Invocation::from_command(&self.command)?
            .arg("-B")
            .arg(self.build_dir.to_string_lossy())
            .args(action.iter().copied())
            .cwd(&self.project_root)
            .env(&self.root_env, self.toolchain_root.as_os_str()))
    }
}

impl Toolchain for IdfToolchain<'_> {
    fn set_target(&self, target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()> {
        let inv = self.invocation(&["set-target", target.as_str()])?;
        self.runner.run(&inv, log)
    }

    fn build(&self, _target: TargetId, log: &mut dyn FnMut(&str)) -> Result<()> {
        let inv = self.invocation(&["build"])?;
        self.runner.run(&inv, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Invocation>>);

    impl ProcessRunner for Recorder {
        fn run(&self, inv: &Invocation, log: &mut dyn FnMut(&str)) -> Result<()> {
            log("recorded");
            if let Ok(mut g) = self.0.lock() {
                g.push(inv.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn passes_root_explicitly_and_uses_build_dir() {
        let rec = Recorder::default();
        let tc = IdfToolchain::new(
            &ToolchainConfig::default(),
            "/proj",
            "/proj/build",
            "/opt/esp-idf",
            &rec,
        );
        tc.set_target(TargetId::Esp32s3, &mut |_| {}).expect("set-target");
        tc.build(TargetId::Esp32s3, &mut |_| {}).expect("build");

        let calls = rec.0.lock().expect("lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "idf.py");
        assert_eq!(calls[0].args, vec!["-B", "/proj/build", "set-target", "esp32s3"]);
        assert_eq!(calls[1].args.last().map(String::as_str), Some("build"));
        assert_eq!(calls[0].cwd.as_deref(), Some(std::path::Path::new("/proj")));
        assert_eq!(
            calls[0].env,
            vec![("IDF_PATH".to_string(), std::ffi::OsString::from("/opt/esp-idf"))]
        );
    }
}
