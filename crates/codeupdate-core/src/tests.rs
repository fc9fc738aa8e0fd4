use std::path::PathBuf;
use std::time::Duration;

use super::*;

#[test]
fn edition_parse_accepts_supported_values() {
    assert_eq!(Edition::parse("stable"), Some(Edition::Stable));
    assert_eq!(Edition::parse(" Insiders "), Some(Edition::Insiders));
    assert_eq!("insiders".parse::<Edition>().ok(), Some(Edition::Insiders));
}

#[test]
fn edition_parse_rejects_unknown_values() {
    for raw in ["beta", "insider", "", "nightly"] {
        let err = raw.parse::<Edition>().expect_err("must reject");
        assert!(
            matches!(err, ConfigError::InvalidEdition(ref value) if value == raw),
            "unexpected error: {err}"
        );
    }
}

#[test]
fn edition_tokens_match_update_service_and_binaries() {
    assert_eq!(Edition::Stable.channel(), "stable");
    assert_eq!(Edition::Insiders.channel(), "insider");
    assert_eq!(Edition::Stable.process_name(), "code");
    assert_eq!(Edition::Insiders.process_name(), "code-insiders");
}

#[test]
fn profile_platform_token_combines_format_and_arch() {
    let profile = SystemProfile::new("ubuntu", PackageManager::Apt, Arch::X64);
    assert_eq!(profile.package_format, PackageFormat::Deb);
    assert_eq!(profile.platform(), "linux-deb-x64");

    let profile = SystemProfile::new("fedora", PackageManager::Dnf, Arch::Arm64);
    assert_eq!(profile.platform(), "linux-rpm-arm64");
}

#[test]
fn arch_from_machine_maps_kernel_and_rust_names() {
    assert_eq!(Arch::from_machine("x86_64"), Some(Arch::X64));
    assert_eq!(Arch::from_machine("aarch64"), Some(Arch::Arm64));
    assert_eq!(Arch::from_machine("armv7l"), Some(Arch::Armhf));
    assert_eq!(Arch::from_machine("riscv64"), None);
}

#[test]
fn resolve_uses_defaults_without_file_or_flags() {
    let config =
        UpdateConfig::resolve(None, &ConfigOverrides::default()).expect("defaults must resolve");
    assert_eq!(config, UpdateConfig::default());
    assert_eq!(config.max_attempts, 3);
    assert!(config.backup_enabled);
}

#[test]
fn resolve_prefers_flags_over_config_file() {
    let file = ConfigFile::from_toml_str(
        r#"
edition = "insiders"
max-attempts = 7
shutdown-timeout-secs = 30
cache-dir = "/var/tmp/from-file"
backup = false
"#,
    )
    .expect("config must parse");

    let overrides = ConfigOverrides {
        max_attempts: Some(2),
        cache_dir: Some(PathBuf::from("/tmp/from-flag")),
        unattended: true,
        ..ConfigOverrides::default()
    };

    let config = UpdateConfig::resolve(Some(&file), &overrides).expect("must resolve");
    assert_eq!(config.edition, Edition::Insiders);
    assert_eq!(config.max_attempts, 2);
    assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/from-flag")));
    assert!(config.unattended);
    assert!(!config.backup_enabled);
}

#[test]
fn resolve_rejects_invalid_edition_from_flag() {
    let overrides = ConfigOverrides {
        edition: Some("beta".to_string()),
        ..ConfigOverrides::default()
    };
    let err = UpdateConfig::resolve(None, &overrides).expect_err("must reject edition");
    assert!(matches!(err, ConfigError::InvalidEdition(_)));
    assert!(err.to_string().contains("stable, insiders"));
}

#[test]
fn resolve_rejects_invalid_edition_from_file() {
    let file = ConfigFile::from_toml_str("edition = \"preview\"\n").expect("config must parse");
    let err = UpdateConfig::resolve(Some(&file), &ConfigOverrides::default())
        .expect_err("must reject edition");
    assert!(matches!(err, ConfigError::InvalidEdition(ref raw) if raw == "preview"));
}

#[test]
fn resolve_rejects_zero_attempts_and_zero_timeouts() {
    let overrides = ConfigOverrides {
        max_attempts: Some(0),
        ..ConfigOverrides::default()
    };
    assert!(matches!(
        UpdateConfig::resolve(None, &overrides),
        Err(ConfigError::InvalidValue {
            key: "max-attempts",
            ..
        })
    ));

    let overrides = ConfigOverrides {
        download_timeout_secs: Some(0),
        ..ConfigOverrides::default()
    };
    assert!(matches!(
        UpdateConfig::resolve(None, &overrides),
        Err(ConfigError::InvalidValue {
            key: "download-timeout",
            ..
        })
    ));
}

#[test]
fn resolve_rejects_waits_that_overflow_deadlines() {
    let overrides = ConfigOverrides {
        retry_delay_secs: Some(u64::MAX),
        ..ConfigOverrides::default()
    };
    assert!(matches!(
        UpdateConfig::resolve(None, &overrides),
        Err(ConfigError::InvalidValue {
            key: "retry-delay",
            ..
        })
    ));

    let file = ConfigFile::from_toml_str("shutdown-timeout-secs = 9999999999\n")
        .expect("config must parse");
    assert!(matches!(
        UpdateConfig::resolve(Some(&file), &ConfigOverrides::default()),
        Err(ConfigError::InvalidValue {
            key: "shutdown-timeout",
            ..
        })
    ));

    let overrides = ConfigOverrides {
        download_timeout_secs: Some(MAX_WAIT_SECS),
        retry_delay_secs: Some(0),
        ..ConfigOverrides::default()
    };
    let config = UpdateConfig::resolve(None, &overrides).expect("bounds are inclusive");
    assert_eq!(config.download_timeout, Duration::from_secs(MAX_WAIT_SECS));
    assert_eq!(config.retry_delay, Duration::ZERO);
}

#[test]
fn config_file_rejects_unknown_keys() {
    let err = ConfigFile::from_toml_str("edtion = \"stable\"\n").expect_err("must reject typo");
    assert!(err.to_string().contains("edtion"));
}

#[test]
fn config_file_load_missing_optional_file_is_none() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    let path = dir.path().join("config.toml");
    assert!(ConfigFile::load(&path, false)
        .expect("missing optional file is fine")
        .is_none());
    assert!(matches!(
        ConfigFile::load(&path, true),
        Err(ConfigError::ReadConfig { .. })
    ));
}

#[test]
fn installed_build_parses_version_output() {
    let raw = "1.95.3\nf1a4fb101478ce6ec82fe9627c43efbf9e98c813\nx64\n";
    let build = InstalledBuild::from_version_output(raw).expect("must parse");
    assert_eq!(build.version, "1.95.3");
    assert_eq!(
        build.commit.as_deref(),
        Some("f1a4fb101478ce6ec82fe9627c43efbf9e98c813")
    );
    assert!(InstalledBuild::from_version_output("\n\n").is_none());
}

#[test]
fn up_to_date_prefers_commit_comparison() {
    let installed = InstalledBuild {
        version: "1.96.0-insider".to_string(),
        commit: Some("abcdef1234".to_string()),
    };
    let same = ReleaseInfo {
        product_version: "1.96.0-insider".to_string(),
        commit: Some("ABCDEF1234".to_string()),
    };
    let newer = ReleaseInfo {
        commit: Some("0123456789".to_string()),
        ..same.clone()
    };
    assert!(is_up_to_date(&installed, &same));
    assert!(!is_up_to_date(&installed, &newer));
}

#[test]
fn up_to_date_falls_back_to_stable_semver() {
    let installed = InstalledBuild {
        version: "1.95.3".to_string(),
        commit: None,
    };
    let latest = |version: &str| ReleaseInfo {
        product_version: version.to_string(),
        commit: None,
    };
    assert!(is_up_to_date(&installed, &latest("1.95.3")));
    assert!(!is_up_to_date(&installed, &latest("1.96.0")));
    assert!(!is_up_to_date(&installed, &latest("1.95.3-insider")));
    assert!(!is_up_to_date(&installed, &latest("not-a-version")));
}

#[test]
fn phase_errors_carry_phase_and_exit_code() {
    let err = PhaseError::new(Phase::Download, UpdateError::Interrupted);
    assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
    assert_eq!(err.to_string(), "download phase failed: interrupted");

    let err = PhaseError::new(
        Phase::CheckTargetProcess,
        UpdateError::Unkillable {
            process: "code".to_string(),
            pids: vec![10, 11],
        },
    );
    assert_eq!(err.exit_code(), EXIT_FAILURE);
    assert!(err.to_string().contains("pids: 10, 11"));
    assert!(Phase::Backup.is_optional());
    assert!(!Phase::Install.is_optional());
}
