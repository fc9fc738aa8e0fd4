mod detect;
mod download;
mod fs_utils;
mod http;
mod interrupt;
mod layout;
mod lock;
mod native;
mod notify;
mod process;
mod registry;
mod release;
mod shutdown;
mod sidecar;
mod verify;

pub use detect::{
    choose_package_manager, find_on_path, parse_os_release, preflight_checks, HostDetector,
    OsRelease, SystemDetector,
};
pub use download::{
    CompletedDownload, DownloadManager, DownloadOutcome, DownloadPolicy, DownloadProgress,
    DownloadSession, DownloadState, RangeRequest, RemoteMetadata, SilentProgress, TransferError,
    Transport,
};
pub use fs_utils::{current_euid, current_unix_timestamp, is_confined_to, remove_file_if_exists};
pub use http::HttpTransport;
pub use interrupt::Interrupt;
pub use layout::{default_cache_dir, default_lock_path, UpdateLayout};
pub use lock::{read_lock_record, ConcurrencyGuard, LockRecord};
pub use native::{InstallInteractionPolicy, NativeInstaller, PackageInstaller};
pub use notify::{BackupRunner, DesktopNotifier, NoopPresenter, ScriptBackup, WarningPresenter};
pub use process::{ProcessSnapshot, ProcessTable, Signal, SystemProcessTable};
pub use registry::{ResourceHandle, ResourceRegistry, TeardownPolicy, TeardownReport};
pub use release::{
    download_url, parse_latest_release, ReleaseSource, UpdateServiceReleases,
    DEFAULT_UPDATE_SERVICE,
};
pub use shutdown::{
    AutoCloseGate, ProcessLifecycleController, ShutdownChoice, ShutdownGate, ShutdownOutcome,
    ShutdownPolicy, ShutdownState,
};
pub use sidecar::{read_sidecar, sidecar_path, write_sidecar, DownloadMetadata};
pub use verify::{detect_package_format, verify_artifact};
