//! Runs one update from system detection to install, with teardown on every exit path.

use std::path::Path;
use std::rc::Rc;

use codeupdate_core::{
    is_up_to_date, ConfigError, Phase, PhaseError, ReleaseInfo, SystemProfile, UpdateConfig,
    UpdateError,
};
use codeupdate_installer::{
    download_url, sidecar_path, verify_artifact, AutoCloseGate, BackupRunner, CompletedDownload,
    ConcurrencyGuard, DownloadManager, DownloadOutcome, DownloadProgress, DownloadSession,
    Interrupt, PackageInstaller, ProcessLifecycleController, ProcessTable, ReleaseSource,
    ResourceRegistry, ShutdownOutcome, ShutdownPolicy, SystemDetector, TeardownPolicy,
    TeardownReport, UpdateLayout, WarningPresenter,
};
use tracing::{debug, info, warn};

use crate::prompt::{PromptGate, Prompter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Installed {
        version: Option<String>,
        download: DownloadOutcome,
    },
    UpToDate {
        version: String,
    },
}

/// Receives progress for a run. Everything but the download sink is optional.
pub(crate) trait RunReporter: DownloadProgress {
    fn phase_started(&mut self, _phase: Phase) {}
    fn phase_note(&mut self, _message: &str) {}
    fn phase_warning(&mut self, _message: &str) {}
    fn teardown_finished(&mut self, _report: &TeardownReport) {}
    fn download_progress(&mut self) -> &mut dyn DownloadProgress;
}

pub(crate) type PreflightCheck = Box<dyn Fn(&SystemProfile) -> Result<(), ConfigError>>;

pub(crate) struct Collaborators {
    pub(crate) detector: Box<dyn SystemDetector>,
    pub(crate) preflight: PreflightCheck,
    pub(crate) processes: Rc<dyn ProcessTable>,
    pub(crate) downloads: DownloadManager,
    pub(crate) installer: Box<dyn PackageInstaller>,
    pub(crate) releases: Option<Box<dyn ReleaseSource>>,
    pub(crate) backup: Option<Box<dyn BackupRunner>>,
    pub(crate) presenter: Box<dyn WarningPresenter>,
    pub(crate) prompter: Box<dyn Prompter>,
}

enum VersionCheck {
    Skipped,
    UpToDate(ReleaseInfo),
    Outdated(ReleaseInfo),
}

pub(crate) struct UpdateOrchestrator {
    config: UpdateConfig,
    layout: UpdateLayout,
    interrupt: Interrupt,
    download_base: String,
    owner_pid: u32,
    teardown_policy: TeardownPolicy,
    collaborators: Collaborators,
}

impl UpdateOrchestrator {
    pub(crate) fn new(
        config: UpdateConfig,
        layout: UpdateLayout,
        interrupt: Interrupt,
        download_base: impl Into<String>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            layout,
            interrupt,
            download_base: download_base.into(),
            owner_pid: std::process::id(),
            teardown_policy: TeardownPolicy::default(),
            collaborators,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_owner_pid(mut self, owner_pid: u32) -> Self {
        self.owner_pid = owner_pid;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    pub(crate) fn run(&mut self, reporter: &mut dyn RunReporter) -> Result<RunOutcome, PhaseError> {
        let mut registry = ResourceRegistry::new(
            self.layout.scratch_roots(),
            Rc::clone(&self.collaborators.processes),
        )
        .with_policy(self.teardown_policy)
        .with_owner_pid(self.owner_pid);

        let result = self.run_phases(&mut registry, reporter);
        let report = registry.teardown();
        reporter.teardown_finished(&report);

        match &result {
            Ok(outcome) => info!(?outcome, "update run finished"),
            Err(err) => debug!(phase = %err.phase, error = %err.source, "update run failed"),
        }
        result
    }

    fn run_phases(
        &mut self,
        registry: &mut ResourceRegistry,
        reporter: &mut dyn RunReporter,
    ) -> Result<RunOutcome, PhaseError> {
        let edition = self.config.edition;

        self.enter(Phase::DetectSystem, reporter)?;
        let profile = self.detect_system(reporter).map_err(at(Phase::DetectSystem))?;
        reporter.phase_note(&format!(
            "{} on {} ({}, {})",
            edition.display_name(),
            profile.distro_id,
            profile.package_manager,
            profile.arch
        ));

        self.enter(Phase::AcquireLock, reporter)?;
        self.acquire_lock(registry).map_err(at(Phase::AcquireLock))?;

        self.enter(Phase::CheckVersion, reporter)?;
        let latest = match self.check_version(&profile, reporter) {
            Ok(VersionCheck::UpToDate(latest)) => {
                reporter.phase_note(&format!(
                    "{} {} is already installed",
                    edition.display_name(),
                    latest.product_version
                ));
                return Ok(RunOutcome::UpToDate {
                    version: latest.product_version,
                });
            }
            Ok(VersionCheck::Outdated(latest)) => Some(latest),
            Ok(VersionCheck::Skipped) => None,
            Err(err) if err.is_interrupt() => return Err(PhaseError::new(Phase::CheckVersion, err)),
            Err(err) => {
                warn!(phase = %Phase::CheckVersion, error = %err, "version check failed; continuing");
                reporter.phase_warning(&format!("version check failed: {err}"));
                None
            }
        };

        self.enter(Phase::CheckTargetProcess, reporter)?;
        self.clear_target_process(registry, reporter)
            .map_err(at(Phase::CheckTargetProcess))?;

        self.enter(Phase::Backup, reporter)?;
        self.run_backup(registry, reporter).map_err(at(Phase::Backup))?;

        self.enter(Phase::Download, reporter)?;
        let completed = self
            .download(&profile, latest.as_ref(), reporter)
            .map_err(at(Phase::Download))?;

        self.enter(Phase::VerifyArtifact, reporter)?;
        if let Err(err) = verify_artifact(&completed.path, profile.package_format, completed.size) {
            register_cached_artifact(registry, &completed.path);
            return Err(PhaseError::new(Phase::VerifyArtifact, err));
        }
        reporter.phase_note(&format!(
            "{} package verified ({} bytes)",
            profile.package_format, completed.size
        ));

        self.enter(Phase::Install, reporter)?;
        self.collaborators
            .installer
            .install(&completed.path, &profile)
            .map_err(at(Phase::Install))?;

        self.enter(Phase::ReportSuccess, reporter)?;
        register_cached_artifact(registry, &completed.path);
        let version = latest.map(|latest| latest.product_version);
        reporter.phase_note(&match &version {
            Some(version) => format!("{} {version} installed", edition.display_name()),
            None => format!("{} installed", edition.display_name()),
        });

        Ok(RunOutcome::Installed {
            version,
            download: completed.outcome,
        })
    }

    fn enter(&self, phase: Phase, reporter: &mut dyn RunReporter) -> Result<(), PhaseError> {
        self.interrupt.check().map_err(at(phase))?;
        debug!(phase = %phase, "entering phase");
        reporter.phase_started(phase);
        Ok(())
    }

    fn detect_system(&self, reporter: &mut dyn RunReporter) -> Result<SystemProfile, UpdateError> {
        let profile = self.collaborators.detector.detect()?;
        if self.config.skip_checks {
            warn!("self-checks skipped by request");
            reporter.phase_warning("self-checks skipped");
        } else {
            (self.collaborators.preflight)(&profile)?;
        }
        Ok(profile)
    }

    fn acquire_lock(&self, registry: &mut ResourceRegistry) -> Result<(), UpdateError> {
        self.layout.ensure_base_dirs()?;
        ConcurrencyGuard::new(Rc::clone(&self.collaborators.processes))
            .with_owner_pid(self.owner_pid)
            .acquire(self.layout.lock_path(), registry)?;
        Ok(())
    }

    fn check_version(
        &self,
        profile: &SystemProfile,
        reporter: &mut dyn RunReporter,
    ) -> Result<VersionCheck, UpdateError> {
        if self.config.force {
            reporter.phase_note("forced reinstall; version check skipped");
            return Ok(VersionCheck::Skipped);
        }
        let Some(releases) = self.collaborators.releases.as_deref() else {
            return Ok(VersionCheck::Skipped);
        };

        let edition = self.config.edition;
        let latest = releases.latest(edition, profile)?;
        self.interrupt.check()?;
        match releases.installed(edition)? {
            Some(installed) if is_up_to_date(&installed, &latest) => {
                Ok(VersionCheck::UpToDate(latest))
            }
            Some(installed) => {
                reporter.phase_note(&format!(
                    "installed {}, latest {}",
                    installed.version, latest.product_version
                ));
                Ok(VersionCheck::Outdated(latest))
            }
            None => {
                reporter.phase_note(&format!(
                    "{} is not installed; latest is {}",
                    edition.process_name(),
                    latest.product_version
                ));
                Ok(VersionCheck::Outdated(latest))
            }
        }
    }

    fn clear_target_process(
        &mut self,
        registry: &mut ResourceRegistry,
        reporter: &mut dyn RunReporter,
    ) -> Result<(), UpdateError> {
        let edition = self.config.edition;
        let processes = Rc::clone(&self.collaborators.processes);
        let mut controller = ProcessLifecycleController::new(
            Rc::clone(&processes),
            edition.process_name(),
            ShutdownPolicy::from_config(&self.config),
            self.interrupt.clone(),
        );

        let outcome = if self.config.unattended {
            if !processes.snapshot(edition.process_name()).is_empty() {
                let message = format!(
                    "{} is being closed to install an update",
                    edition.display_name()
                );
                reporter.phase_warning(&message);
                self.collaborators.presenter.present(&message, registry);
            }
            controller.check(&mut AutoCloseGate)?
        } else {
            let mut gate = PromptGate::new(self.collaborators.prompter.as_mut());
            controller.check(&mut gate)?
        };

        match outcome {
            ShutdownOutcome::NotRunning => {
                reporter.phase_note(&format!("{} is not running", edition.process_name()))
            }
            ShutdownOutcome::Closed { forced, pids } => reporter.phase_note(&format!(
                "closed {} ({} process(es){})",
                edition.process_name(),
                pids.len(),
                if forced { ", forced" } else { "" }
            )),
        }
        Ok(())
    }

    fn run_backup(
        &mut self,
        registry: &mut ResourceRegistry,
        reporter: &mut dyn RunReporter,
    ) -> Result<(), UpdateError> {
        if !self.config.backup_enabled {
            reporter.phase_note("backup disabled");
            return Ok(());
        }
        let Some(backup) = self.collaborators.backup.as_mut() else {
            reporter.phase_note("no backup script configured");
            return Ok(());
        };

        let edition = self.config.edition;
        let result = self.layout.make_scratch_dir("backup").and_then(|scratch| {
            registry.register_dir(&scratch);
            backup.run_backup(edition, &scratch)
        });
        self.interrupt.check()?;

        let Err(err) = result else {
            reporter.phase_note("backup complete");
            return Ok(());
        };

        let message = format!("backup failed: {err:#}");
        warn!(phase = %Phase::Backup, error = %format!("{err:#}"), "backup failed");
        reporter.phase_warning(&message);
        if self.config.unattended {
            self.collaborators.presenter.present(&message, registry);
            return Ok(());
        }

        if self
            .collaborators
            .prompter
            .confirm("The backup failed. Continue with the update anyway?")?
        {
            Ok(())
        } else {
            Err(UpdateError::Aborted(
                "backup failed and the update was not confirmed".to_string(),
            ))
        }
    }

    fn download(
        &self,
        profile: &SystemProfile,
        latest: Option<&ReleaseInfo>,
        reporter: &mut dyn RunReporter,
    ) -> Result<CompletedDownload, UpdateError> {
        let edition = self.config.edition;
        let url = download_url(&self.download_base, edition, profile);
        let artifact_path = self.layout.artifact_cache_path(edition, profile);
        let mut session = DownloadSession::new(url, artifact_path, self.config.max_attempts);
        if let Some(latest) = latest {
            session = session.with_version(latest.product_version.clone());
        }

        let completed = self
            .collaborators
            .downloads
            .fetch(&mut session, reporter.download_progress())?;
        match completed.outcome {
            DownloadOutcome::CacheHit => reporter.phase_note("using cached package"),
            DownloadOutcome::Downloaded { resumed_from } if resumed_from > 0 => {
                reporter.phase_note(&format!("download resumed at byte {resumed_from}"))
            }
            DownloadOutcome::Downloaded { .. } => {}
        }
        Ok(completed)
    }
}

fn at(phase: Phase) -> impl FnOnce(UpdateError) -> PhaseError {
    move |err| PhaseError::new(phase, err)
}

/// The cached artifact and its sidecar go away with the rest of the run's resources.
fn register_cached_artifact(registry: &mut ResourceRegistry, path: &Path) {
    registry.register_file(path);
    registry.register_file(sidecar_path(path));
}
