mod completion;
mod doctor;
mod logging;
mod orchestrator;
mod prompt;
mod render;

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use codeupdate_core::{
    default_config_path, ConfigError, ConfigFile, ConfigOverrides, SystemProfile, UpdateConfig,
    EXIT_FAILURE,
};
use codeupdate_installer::{
    preflight_checks, BackupRunner, DesktopNotifier, DownloadManager, DownloadOutcome,
    DownloadPolicy, HostDetector, HttpTransport, InstallInteractionPolicy, Interrupt,
    NativeInstaller, NoopPresenter, ProcessTable, ScriptBackup, SystemProcessTable,
    UpdateLayout, UpdateServiceReleases, WarningPresenter, DEFAULT_UPDATE_SERVICE,
};

use crate::completion::{resolve_completion_shell, write_completions_script, CliCompletionShell};
use crate::doctor::doctor_lines;
use crate::logging::init_logging;
use crate::orchestrator::{Collaborators, RunOutcome, UpdateOrchestrator};
use crate::prompt::{InteractivePrompter, Prompter, TermLines, UnattendedPrompter};
use crate::render::{current_output_style, render_status_line, ConsoleReporter, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(name = "codeupdate", version)]
#[command(
    about = "Updates Visual Studio Code through the native package manager",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    update: UpdateArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Default)]
struct UpdateArgs {
    /// Edition to update: stable or insiders.
    #[arg(short, long, global = true)]
    edition: Option<String>,
    /// Never prompt; close the running application automatically.
    #[arg(short = 'y', long, global = true)]
    unattended: bool,
    /// Verbose logging on stderr.
    #[arg(short, long, global = true)]
    debug: bool,
    /// Directory for the resumable download cache.
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
    /// Partial downloads smaller than this are discarded instead of resumed.
    #[arg(long = "partial-threshold", global = true, value_name = "BYTES")]
    partial_threshold_bytes: Option<u64>,
    /// Seconds to wait for the application to exit, per shutdown stage.
    #[arg(long = "shutdown-timeout", global = true, value_name = "SECS")]
    shutdown_timeout_secs: Option<u64>,
    /// Seconds allowed for a single download attempt.
    #[arg(long = "download-timeout", global = true, value_name = "SECS")]
    download_timeout_secs: Option<u64>,
    #[arg(long, global = true, value_name = "N")]
    max_attempts: Option<u32>,
    #[arg(long = "retry-delay", global = true, value_name = "SECS")]
    retry_delay_secs: Option<u64>,
    /// Skip the host self-checks (root, sudo and package tools).
    #[arg(long, global = true)]
    skip_checks: bool,
    /// Reinstall even when the installed build is current.
    #[arg(long, global = true)]
    force: bool,
    /// Script run as `<script> <edition> <scratch-dir>` before installing.
    #[arg(long, global = true, value_name = "PATH")]
    backup_script: Option<PathBuf>,
    #[arg(long, global = true)]
    no_backup: bool,
    /// Config file; defaults to $XDG_CONFIG_HOME/codeupdate/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl UpdateArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            edition: self.edition.clone(),
            unattended: self.unattended,
            debug: self.debug,
            cache_dir: self.cache_dir.clone(),
            partial_threshold_bytes: self.partial_threshold_bytes,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            download_timeout_secs: self.download_timeout_secs,
            max_attempts: self.max_attempts,
            retry_delay_secs: self.retry_delay_secs,
            skip_checks: self.skip_checks,
            force: self.force,
            no_backup: self.no_backup,
            backup_script: self.backup_script.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a shell completion script (defaults to the shell in $SHELL).
    Completions {
        #[arg(value_enum)]
        shell: Option<CliCompletionShell>,
    },
    /// Show the detected system, cache and lock state without changing anything.
    Doctor,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "err", &format!("{err:#}"))
            );
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run_cli(cli: Cli) -> Result<u8> {
    if let Some(Commands::Completions { shell }) = cli.command {
        let shell = resolve_completion_shell(shell, std::env::var("SHELL").ok().as_deref());
        write_completions_script(shell, &mut io::stdout().lock())?;
        return Ok(0);
    }

    let config = load_config(&cli.update)?;
    init_logging(config.debug);
    let style = current_output_style();
    let layout = UpdateLayout::for_current_user(config.cache_dir.as_deref())?;

    if let Some(Commands::Doctor) = cli.command {
        let detector = HostDetector::new();
        let processes = SystemProcessTable::new();
        TerminalRenderer::from_style(style)
            .print_lines(&doctor_lines(&config, &layout, &detector, &processes, style));
        return Ok(0);
    }

    let interrupt = Interrupt::install()?;
    let collaborators = host_collaborators(&config, &interrupt)?;
    let mut orchestrator = UpdateOrchestrator::new(
        config,
        layout,
        interrupt,
        DEFAULT_UPDATE_SERVICE,
        collaborators,
    );
    let mut reporter = ConsoleReporter::new(style);
    let renderer = reporter.renderer();

    match orchestrator.run(&mut reporter) {
        Ok(outcome) => {
            renderer.print_status("ok", &format_outcome(&outcome));
            Ok(0)
        }
        Err(err) => {
            renderer.eprint_status("err", &err.to_string());
            Ok(err.exit_code())
        }
    }
}

/// Defaults, then the config file, then flags. Nothing has been created yet on failure.
fn load_config(args: &UpdateArgs) -> Result<UpdateConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => ConfigFile::load(path, true)?,
        None => match default_config_path() {
            Some(path) => ConfigFile::load(&path, false)?,
            None => None,
        },
    };
    UpdateConfig::resolve(file.as_ref(), &args.overrides())
}

fn host_collaborators(config: &UpdateConfig, interrupt: &Interrupt) -> Result<Collaborators> {
    let detector = HostDetector::new();
    let path_var = detector.path_var().map(OsStr::to_os_string);
    let processes: Rc<dyn ProcessTable> = Rc::new(SystemProcessTable::new());
    let transport = HttpTransport::new(interrupt.clone())?;

    let interaction_policy = if config.unattended {
        InstallInteractionPolicy::unattended()
    } else {
        InstallInteractionPolicy::default()
    };
    let presenter: Box<dyn WarningPresenter> = if DesktopNotifier::has_display() {
        Box::new(DesktopNotifier::new("Visual Studio Code update"))
    } else {
        Box::new(NoopPresenter)
    };
    let prompter: Box<dyn Prompter> = if config.unattended {
        Box::new(UnattendedPrompter)
    } else {
        Box::new(InteractivePrompter::new(
            TermLines::stderr(),
            interrupt.clone(),
        ))
    };
    let backup = config
        .backup_script
        .as_ref()
        .map(|script| Box::new(ScriptBackup::new(script)) as Box<dyn BackupRunner>);

    Ok(Collaborators {
        detector: Box::new(detector),
        preflight: Box::new(move |profile: &SystemProfile| preflight_checks(profile, path_var.as_deref())),
        processes,
        downloads: DownloadManager::new(
            Box::new(transport),
            DownloadPolicy::from_config(config),
            interrupt.clone(),
        ),
        installer: Box::new(NativeInstaller::new(interaction_policy)),
        releases: Some(Box::new(UpdateServiceReleases::new(DEFAULT_UPDATE_SERVICE)?)),
        backup,
        presenter,
        prompter,
    })
}

fn format_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::UpToDate { version } => format!("already up to date ({version})"),
        RunOutcome::Installed { version, download } => {
            let source = match download {
                DownloadOutcome::CacheHit => "cached package",
                DownloadOutcome::Downloaded { resumed_from } if *resumed_from > 0 => {
                    "resumed download"
                }
                DownloadOutcome::Downloaded { .. } => "fresh download",
            };
            match version {
                Some(version) => format!("updated to {version} from {source}"),
                None => format!("update installed from {source}"),
            }
        }
    }
}
