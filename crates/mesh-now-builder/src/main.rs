use clap::{Parser, Subcommand};
use crossterm::tty::IsTty;
use std::path::PathBuf;
use std::process::ExitCode;

use mesh_now_builder::config::{self, ProjectConfig};
use mesh_now_builder::embed::{self, EmbedReport};
use mesh_now_builder::error::ErrorKind;
use mesh_now_builder::executor::{
    BuildEvent, PlainSink, ReportSink, RichSink, SystemRunner, prompt_targets,
};
use mesh_now_builder::flash::{FlashDriver, discover_artifact_sets};
use mesh_now_builder::orchestrator::Orchestrator;
use mesh_now_builder::overlay::{OverlayResolver, check_all};
use mesh_now_builder::pipeline::{IdfToolchain, Pipeline};
use mesh_now_builder::targets::{TargetId, list_targets, parse_selection};
use mesh_now_builder::workspace::ProjectPaths;
use mesh_now_builder::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-target firmware build and flash tool")]
struct Cli {
    /// Plain output, no prompts
    #[arg(long, global = true)]
    ci: bool,
    /// Debug logging and full tool output
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Project config file (default: meshnow.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List supported targets
    Targets,
    /// Build one or more targets
    Build {
        /// Target id, comma list, or "all" (repeatable)
        #[arg(long = "target", short)]
        targets: Vec<String>,
        /// Bundle and embed the web UI before building
        #[arg(long)]
        with_frontend: bool,
        /// Asset (identifier or file name) that must embed
        #[arg(long)]
        require: Vec<String>,
    },
    /// Validate every target's config overlay without building
    Check,
    /// Convert frontend dist files into C headers
    Embed {
        /// Run the configured bundler first
        #[arg(long)]
        bundle: bool,
        /// Asset (identifier or file name) that must embed
        #[arg(long)]
        require: Vec<String>,
    },
    /// List collected artifact sets
    Artifacts,
    /// Flash a target's artifact set
    Flash {
        target: TargetId,
        /// Serial port (default from config)
        port: Option<String>,
        /// Artifact directory (default: builds/<target>)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // The toolchain variable may come from .env.
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.ci);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e.detail());
            match e.kind() {
                ErrorKind::Precondition => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn init_tracing(verbose: bool, ci: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!ci && std::io::stderr().is_tty())
        .with_writer(std::io::stderr)
        .init();
}

struct Session {
    cfg: ProjectConfig,
    paths: ProjectPaths,
    sink: Box<dyn ReportSink>,
    ci: bool,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let cfg = config::load(cli.config.as_deref())?;
        let paths = ProjectPaths::resolve(&cfg.layout, &cfg.frontend)?;
        let interactive = !cli.ci && std::io::stdout().is_tty();
        let sink: Box<dyn ReportSink> = if interactive {
            Box::new(RichSink::new(&paths.root, cli.verbose))
        } else {
            Box::new(PlainSink::default())
        };
        Ok(Self {
            cfg,
            paths,
            sink,
            ci: cli.ci,
        })
    }

    /// Checked before any build-related command does work.
    fn toolchain_root(&self) -> Result<PathBuf> {
        config::resolve_toolchain_root(&self.cfg.toolchain.root_env, |k| std::env::var_os(k))
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let session = Session::open(&cli)?;
    match cli.cmd {
        Command::Targets => {
            cmd_targets();
            Ok(ExitCode::SUCCESS)
        }
        Command::Build {
            targets,
            with_frontend,
            require,
        } => cmd_build(&session, &targets, with_frontend, &require),
        Command::Check => cmd_check(&session),
        Command::Embed { bundle, require } => {
            cmd_embed(&session, bundle, &require)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Artifacts => {
            cmd_artifacts(&session);
            Ok(ExitCode::SUCCESS)
        }
        Command::Flash { target, port, dir } => {
            cmd_flash(&session, target, port, dir)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_targets() {
    for (i, t) in list_targets().iter().enumerate() {
        println!(
            "{:>2}. {:<8} {:<26} {}",
            i + 1,
            t.id.as_str(),
            t.board,
            t.description()
        );
    }
}

fn cmd_build(
    s: &Session,
    selected: &[String],
    with_frontend: bool,
    require: &[String],
) -> Result<ExitCode> {
    let toolchain_root = s.toolchain_root()?;

    let targets = if selected.is_empty() && !s.ci && std::io::stdin().is_tty() {
        match prompt_targets(std::io::stdin().lock(), std::io::stdout())? {
            Some(t) => t,
            None => return Ok(ExitCode::SUCCESS),
        }
    } else {
        parse_selection(selected)?
    };

    if with_frontend {
        cmd_embed(s, true, require)?;
    }

    let runner = SystemRunner;
    let toolchain = IdfToolchain::new(
        &s.cfg.toolchain,
        &s.paths.root,
        &s.paths.build_dir,
        toolchain_root,
        &runner,
    );
    let pipeline = Pipeline::new(&s.paths, &toolchain, s.cfg.toolchain.firmware_name.clone());
    let report = Orchestrator::new(pipeline, s.sink.as_ref()).run(&targets);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_check(s: &Session) -> Result<ExitCode> {
    s.toolchain_root()?;
    let resolver = OverlayResolver::new(&s.paths.configs_dir);
    let mut ok = true;
    for (target, validation) in check_all(&resolver, &TargetId::all()) {
        ok &= validation.is_acceptable();
        s.sink.emit(BuildEvent::OverlayChecked { target, validation });
    }
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_embed(s: &Session, bundle: bool, require: &[String]) -> Result<EmbedReport> {
    if bundle {
        // The bundler is an external process like any other.
        s.toolchain_root()?;
        embed::bundle(
            &s.cfg.frontend.bundle_command,
            &s.paths.frontend_dir,
            &SystemRunner,
            s.sink.as_ref(),
        )?;
    }
    let report = embed::embed_all(
        &s.cfg.frontend.assets,
        &s.paths.dist_dir,
        &s.paths.headers_dir,
        require,
    )?;
    for asset in &report.embedded {
        s.sink.emit(BuildEvent::AssetEmbedded {
            asset: asset.clone(),
        });
    }
    for (source, reason) in &report.skipped {
        s.sink.emit(BuildEvent::AssetSkipped {
            source: source.clone(),
            reason: reason.clone(),
        });
    }
    Ok(report)
}

fn cmd_artifacts(s: &Session) {
    let sets = discover_artifact_sets(&s.paths.builds_dir);
    if sets.is_empty() {
        s.sink.emit(BuildEvent::Info {
            message: format!("no artifact sets under {}", s.paths.builds_dir.display()),
        });
        return;
    }
    for set in sets {
        let status = if set.is_complete() {
            "complete".to_string()
        } else {
            let names: Vec<&str> = set.missing.iter().map(|k| k.file_name()).collect();
            format!("missing {}", names.join(", "))
        };
        s.sink.emit(BuildEvent::Info {
            message: format!("{:<8} {} ({status})", set.target.as_str(), set.dir.display()),
        });
    }
}

fn cmd_flash(
    s: &Session,
    target: TargetId,
    port: Option<String>,
    dir: Option<PathBuf>,
) -> Result<()> {
    let toolchain_root = s.toolchain_root()?;
    let dir = dir.unwrap_or_else(|| s.paths.artifact_dir(target));
    if !dir.is_dir() {
        return Err(Error::artifact_missing(format!(
            "no artifacts for {target} at {} (build it first)",
            dir.display()
        )));
    }
    let port = port.unwrap_or_else(|| s.cfg.flash.default_port.clone());
    let runner = SystemRunner;
    FlashDriver::new(&s.cfg.flash, &runner)
        .with_env(s.cfg.toolchain.root_env.clone(), toolchain_root)
        .flash(&dir, target, &port, s.sink.as_ref())
}
