use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use crossterm::style::Stylize;

use super::{BuildEvent, ReportSink, format_elapsed_hms, short_path};
use crate::artifacts::ArtifactKind;
use crate::error::Result;
use crate::pipeline::BuildOutcome;
use crate::targets::{TargetId, list_targets};

/// Colored terminal output with step markers and a closing summary.
pub struct RichSink {
    show_logs: bool,
    root: PathBuf,
    state: Mutex<RichSinkState>,
}

#[derive(Default)]
struct RichSinkState {
    started_at: Option<Instant>,
}

impl RichSink {
    /// `show_logs` streams raw tool output; otherwise only failures show it.
    pub fn new(root: impl Into<PathBuf>, show_logs: bool) -> Self {
        Self {
            show_logs,
            root: root.into(),
            state: Mutex::new(RichSinkState::default()),
        }
    }
}

impl ReportSink for RichSink {
    fn emit(&self, ev: BuildEvent) {
        match ev {
            BuildEvent::RunStarted { targets } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started_at = Some(Instant::now());
                }
                println!(
                    "{} {}",
                    "Building".bold().cyan(),
                    targets
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            BuildEvent::TargetStarted {
                target,
                index,
                total,
            } => {
                println!();
                println!(
                    "{} {} {}",
                    format!("[{}/{total}]", index + 1).dim(),
                    target.as_str().bold(),
                    target.info().description().dim()
                );
            }
            BuildEvent::StepStarted { target: _, step } => {
                println!("  {} {step}", "→".cyan());
            }
            BuildEvent::StepLog { line, .. } | BuildEvent::ToolLog { line, .. } => {
                if self.show_logs {
                    println!("    {}", line.dim());
                }
            }
            BuildEvent::StepFinished {
                step,
                ok,
                elapsed_ms,
                ..
            } => {
                let mark = if ok { "✓".green() } else { "✗".red() };
                println!("  {mark} {step} {}", format!("({elapsed_ms}ms)").dim());
            }
            BuildEvent::StepSkipped { step, reason, .. } => {
                println!("  {} {step} {}", "-".yellow(), format!("({reason})").dim());
            }
            BuildEvent::Warning { target, message } => match target {
                Some(t) => println!("  {} [{t}] {message}", "warning:".yellow().bold()),
                None => println!("{} {message}", "warning:".yellow().bold()),
            },
            BuildEvent::TargetFinished { result } => match &result.outcome {
                BuildOutcome::Succeeded {
                    firmware_bytes,
                    artifact_dir,
                    artifacts,
                } => {
                    println!(
                        "  {} {} ({} bytes) -> {}",
                        "built".green().bold(),
                        result.target,
                        firmware_bytes,
                        short_path(&self.root, artifact_dir)
                    );
                    for a in artifacts {
                        println!(
                            "      {} {:<22} {:>9} bytes  @ {:#07x}",
                            "·".dim(),
                            a.kind.file_name(),
                            a.bytes,
                            a.kind.flash_offset()
                        );
                    }
                }
                BuildOutcome::Failed { step, reason } => {
                    println!(
                        "  {} {} at {step}: {reason}",
                        "failed".red().bold(),
                        result.target
                    );
                    if let Some(d) = &result.diagnostics {
                        for l in d.lines() {
                            println!("    {} {}", "│".red(), l);
                        }
                    }
                }
            },
            BuildEvent::RunFinished { report } => {
                let wall = self
                    .state
                    .lock()
                    .ok()
                    .and_then(|s| s.started_at)
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or_default();
                println!();
                println!("{}", "Build summary".bold());
                for t in &report.succeeded {
                    println!("  {} {t}", "✓".green());
                }
                for f in &report.failed {
                    println!("  {} {} ({}): {}", "✗".red(), f.target, f.step, f.reason);
                }
                println!("  {} {}", "elapsed".dim(), format_elapsed_hms(wall));
                if let Some(first) = report.artifacts.first() {
                    println!();
                    println!("{}", "Flash with:".bold());
                    println!(
                        "  meshnow flash {} <port>   {}",
                        first.target,
                        format!(
                            "# {}",
                            short_path(&self.root, &first.dir.join(ArtifactKind::Firmware.file_name()))
                        )
                        .dim()
                    );
                }
            }
            BuildEvent::OverlayChecked { target, validation } => {
                let label = match validation.label() {
                    "ok" => validation.label().green(),
                    "missing" => validation.label().yellow(),
                    other => other.red(),
                };
                println!("  {:<8} {label} {}", target.as_str(), validation.to_string().dim());
            }
            BuildEvent::AssetEmbedded { asset } => {
                println!(
                    "  {} {} -> {} ({} bytes)",
                    "✓".green(),
                    short_path(&self.root, &asset.source),
                    short_path(&self.root, &asset.header),
                    asset.bytes
                );
            }
            BuildEvent::AssetSkipped { source, reason } => {
                println!(
                    "  {} {} {}",
                    "-".yellow(),
                    short_path(&self.root, &source),
                    format!("({reason})").dim()
                );
            }
            BuildEvent::FlashStarted { target, port, dir } => {
                println!(
                    "{} {} on {} from {}",
                    "Flashing".bold().cyan(),
                    target,
                    port.bold(),
                    short_path(&self.root, &dir)
                );
            }
            BuildEvent::FlashFinished { target, ok, error } => {
                if ok {
                    println!("{} {target} flashed", "✓".green());
                } else {
                    println!(
                        "{} flashing {target} failed: {}",
                        "✗".red(),
                        error.unwrap_or_default()
                    );
                }
            }
            BuildEvent::Info { message } => println!("{message}"),
        }
    }
}

const MENU_ALL: usize = 6;

/// Numbered target menu. `Ok(None)` means the operator chose to exit or
/// input ended.
pub fn prompt_targets<R: BufRead, W: Write>(
    mut input: R,
    mut out: W,
) -> Result<Option<Vec<TargetId>>> {
    let catalog = list_targets();
    loop {
        writeln!(out, "Select a target:")?;
        for (i, t) in catalog.iter().enumerate() {
            writeln!(out, "  {}. {:<8} {}", i + 1, t.id.as_str(), t.description())?;
        }
        writeln!(out, "  {MENU_ALL}. all targets")?;
        writeln!(out, "  0. exit")?;
        write!(out, "Select target (0-{MENU_ALL}): ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<usize>() {
            Ok(0) => return Ok(None),
            Ok(MENU_ALL) => return Ok(Some(TargetId::all())),
            Ok(n) if (1..=catalog.len()).contains(&n) => {
                return Ok(Some(vec![catalog[n - 1].id]));
            }
            _ => writeln!(out, "Invalid choice. Please select 0-{MENU_ALL}.")?,
        }
    }
}
