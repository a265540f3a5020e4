use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use miette::{IntoDiagnostic, Result, WrapErr};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise this crate and the core log at
/// `info`, or `debug` with `--debug`.
pub fn init(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,terraforge={level},terraforge_core={level}"))
    });

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("creating log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .into_diagnostic()
        .wrap_err("initializing logging")?;

    tracing::debug!("debug logging enabled");
    Ok(())
}
