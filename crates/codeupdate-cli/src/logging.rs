use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` wins; otherwise engine warnings only, or everything at debug with `--debug`.
pub(crate) fn init_logging(debug: bool) {
    let fallback = if debug {
        "codeupdate=debug,codeupdate_core=debug,codeupdate_installer=debug"
    } else {
        "codeupdate=info,codeupdate_core=warn,codeupdate_installer=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
