use std::ffi::OsString;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, mpsc};
use std::time::Instant;

use crate::embed::EmbeddedAsset;
use crate::error::{Error, Result};
use crate::log_sanitize::{OutputTail, clean_line};
use crate::orchestrator::Report;
use crate::overlay::OverlayValidation;
use crate::pipeline::{BuildOutcome, BuildResult, BuildStep};
use crate::targets::TargetId;

mod rich;

pub use rich::{RichSink, prompt_targets};

/// Lines of output kept for a failing command's diagnostics.
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// One external command, fully described before it is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// First element is the program, the rest are leading arguments.
    pub fn from_command(command: &[String]) -> Result<Self> {
        let Some((program, rest)) = command.split_first() else {
            return Err(Error::config("empty command"));
        };
        Ok(Self::new(program.clone()).args(rest.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            if a.is_empty() || a.contains(char::is_whitespace) {
                s.push_str(&format!("{a:?}"));
            } else {
                s.push_str(a);
            }
        }
        s
    }
}

/// Runs external commands. Every line of output is passed to `log` as it
/// arrives; a non-zero exit is an `ExternalProcess` error.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, inv: &Invocation, log: &mut dyn FnMut(&str)) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, inv: &Invocation, log: &mut dyn FnMut(&str)) -> Result<()> {
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args);
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }

        // Own process group, so a terminal Ctrl-C reaches us and the tool together
        // without the tool grabbing the terminal.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        tracing::debug!(command = %inv.display(), cwd = ?inv.cwd, "spawning");
        let started = Instant::now();
        let mut child = cmd
            // A detached stdin keeps a backgrounded process group from being
            // stopped by SIGTTIN.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::external(format!("failed to start {}: {e}", inv.program), None))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        let mut tail = OutputTail::new(DIAGNOSTIC_TAIL_LINES);
        for line in rx {
            let line = clean_line(&line);
            if line.is_empty() {
                continue;
            }
            log(&line);
            tail.push(line);
        }

        let status = child
            .wait()
            .map_err(|e| Error::external(format!("wait failed for {}: {e}", inv.program), None))?;
        tracing::debug!(
            command = %inv.program,
            %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished"
        );
        if !status.success() {
            let diagnostics = (!tail.is_empty()).then(|| tail.render());
            return Err(Error::external(
                format!("`{}` failed: {status}", inv.display()),
                diagnostics,
            ));
        }
        Ok(())
    }
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for b in &buf[..n] {
            if *b == b'\n' || *b == b'\r' {
                if pending.is_empty() {
                    continue;
                }
                let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                pending.clear();
            } else {
                pending.push(*b);
                if pending.len() >= MAX_PENDING_BYTES {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

#[derive(Debug, Clone)]
pub enum BuildEvent {
    RunStarted {
        targets: Vec<TargetId>,
    },
    TargetStarted {
        target: TargetId,
        index: usize,
        total: usize,
    },
    StepStarted {
        target: TargetId,
        step: BuildStep,
    },
    StepLog {
        target: TargetId,
        line: String,
    },
    StepFinished {
        target: TargetId,
        step: BuildStep,
        ok: bool,
        elapsed_ms: u128,
    },
    StepSkipped {
        target: TargetId,
        step: BuildStep,
        reason: String,
    },
    Warning {
        target: Option<TargetId>,
        message: String,
    },
    TargetFinished {
        result: BuildResult,
    },
    RunFinished {
        report: Report,
    },
    OverlayChecked {
        target: TargetId,
        validation: OverlayValidation,
    },
    /// Output of a tool run outside any target pipeline (bundler, flasher).
    ToolLog {
        tool: &'static str,
        line: String,
    },
    AssetEmbedded {
        asset: EmbeddedAsset,
    },
    AssetSkipped {
        source: PathBuf,
        reason: String,
    },
    FlashStarted {
        target: TargetId,
        port: String,
        dir: PathBuf,
    },
    FlashFinished {
        target: TargetId,
        ok: bool,
        error: Option<String>,
    },
    Info {
        message: String,
    },
}

/// Where user-facing progress goes. Chosen once at startup.
pub trait ReportSink: Send + Sync {
    fn emit(&self, ev: BuildEvent);
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<BuildEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<BuildEvent>) -> Self {
        Self { tx }
    }
}

impl ReportSink for ChannelSink {
    fn emit(&self, ev: BuildEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Undecorated line-oriented output for CI logs and pipes.
#[derive(Default)]
pub struct PlainSink {
    state: Mutex<PlainSinkState>,
}

#[derive(Default)]
struct PlainSinkState {
    started_at: Option<Instant>,
    log_lines: usize,
}

impl ReportSink for PlainSink {
    fn emit(&self, ev: BuildEvent) {
        let mut wall_ms = None;
        if let Ok(mut s) = self.state.lock() {
            match &ev {
                BuildEvent::RunStarted { .. } => {
                    *s = PlainSinkState {
                        started_at: Some(Instant::now()),
                        log_lines: 0,
                    };
                }
                BuildEvent::StepLog { .. } | BuildEvent::ToolLog { .. } => {
                    s.log_lines = s.log_lines.saturating_add(1);
                }
                BuildEvent::RunFinished { .. } => {
                    wall_ms = s.started_at.map(|t| t.elapsed().as_millis());
                }
                _ => {}
            }
        }
        for line in plain_lines(&ev) {
            println!("{line}");
        }
        if let Some(ms) = wall_ms {
            println!("  elapsed: {}", format_elapsed_hms((ms / 1000) as u64));
        }
    }
}

/// Render one event the way `PlainSink` prints it.
pub fn plain_lines(ev: &BuildEvent) -> Vec<String> {
    match ev {
        BuildEvent::RunStarted { targets } => vec![format!(
            "RUN: {} ({} target{})",
            join_targets(targets),
            targets.len(),
            if targets.len() == 1 { "" } else { "s" }
        )],
        BuildEvent::TargetStarted {
            target,
            index,
            total,
        } => vec![format!("TARGET: {target} ({}/{total})", index + 1)],
        BuildEvent::StepStarted { target, step } => vec![format!("STEP: {target} {step}")],
        BuildEvent::StepLog { target, line } => vec![format!("[{target}] {line}")],
        BuildEvent::StepFinished {
            target,
            step,
            ok,
            elapsed_ms,
        } => vec![format!(
            "{}: {target} {step} ({elapsed_ms}ms)",
            if *ok { "DONE" } else { "FAIL" }
        )],
        BuildEvent::StepSkipped {
            target,
            step,
            reason,
        } => vec![format!("SKIP: {target} {step} ({reason})")],
        BuildEvent::Warning { target, message } => match target {
            Some(t) => vec![format!("WARN: [{t}] {message}")],
            None => vec![format!("WARN: {message}")],
        },
        BuildEvent::TargetFinished { result } => match &result.outcome {
            BuildOutcome::Succeeded {
                firmware_bytes,
                artifact_dir,
                ..
            } => vec![format!(
                "OK: {} firmware={firmware_bytes} bytes -> {}",
                result.target,
                artifact_dir.display()
            )],
            BuildOutcome::Failed { step, reason } => {
                let mut out = vec![format!("FAIL: {} at {step}: {reason}", result.target)];
                if let Some(d) = &result.diagnostics {
                    out.extend(d.lines().map(|l| format!("  | {l}")));
                }
                out
            }
        },
        BuildEvent::RunFinished { report } => {
            let mut out = vec![
                "SUMMARY:".to_string(),
                format!(
                    "  status: {}",
                    if report.is_success() { "ok" } else { "failed" }
                ),
                format!("  succeeded: {}", join_targets(&report.succeeded)),
            ];
            if !report.failed.is_empty() {
                out.push("  failed:".to_string());
                for f in &report.failed {
                    out.push(format!("    {} ({}): {}", f.target, f.step, f.reason));
                }
            }
            for a in &report.artifacts {
                out.push(format!("  artifacts: {} => {}", a.target, a.dir.display()));
            }
            out
        }
        BuildEvent::OverlayChecked { target, validation } => {
            vec![format!("CHECK: {target} {} {validation}", validation.label())]
        }
        BuildEvent::ToolLog { tool, line } => vec![format!("[{tool}] {line}")],
        BuildEvent::AssetEmbedded { asset } => vec![format!(
            "EMBED: {} -> {} ({} bytes)",
            asset.source.display(),
            asset.header.display(),
            asset.bytes
        )],
        BuildEvent::AssetSkipped { source, reason } => {
            vec![format!("SKIP: {} ({reason})", source.display())]
        }
        BuildEvent::FlashStarted { target, port, dir } => {
            vec![format!("FLASH: {target} on {port} from {}", dir.display())]
        }
        BuildEvent::FlashFinished { target, ok, error } => {
            if *ok {
                vec![format!("DONE: flash {target}")]
            } else {
                vec![format!(
                    "FAIL: flash {target}: {}",
                    error.as_deref().unwrap_or_default()
                )]
            }
        }
        BuildEvent::Info { message } => vec![format!("INFO: {message}")],
    }
}

fn join_targets(targets: &[TargetId]) -> String {
    if targets.is_empty() {
        return "-".to_string();
    }
    targets
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn format_elapsed_hms(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Relative display of `path` under `base` when possible.
pub(crate) fn short_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
