pub mod process;

use std::path::{Path, PathBuf};

pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use vmforge_shared::constants::{binaries, envs};
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub use process::{CommandOutput, run_command, run_with_stdin};

/// File name prefix of the daily rotated log written under `--log-dir`.
const LOG_FILE_PREFIX: &str = "vmforge.log";

/// Find a control surface binary in common locations.
///
/// Search order: `$VMFORGE_UTMCTL_DIR`, every `PATH` entry, then the UTM
/// application bundle.
///
/// # Returns
/// * `Ok(PathBuf)` - Path to the found binary
/// * `Err(...)` - Binary not found in any expected location
pub fn find_binary(binary_name: &str) -> ForgeResult<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(dir) = std::env::var(envs::UTMCTL_DIR) {
        candidates.push(PathBuf::from(dir).join(binary_name));
    }

    if let Some(paths) = std::env::var_os("PATH") {
        candidates.extend(std::env::split_paths(&paths).map(|dir| dir.join(binary_name)));
    }

    candidates.push(Path::new(binaries::UTM_APP_MACOS_DIR).join(binary_name));

    for candidate in &candidates {
        if candidate.is_file() {
            tracing::debug!(binary = %candidate.display(), "Found binary");
            return Ok(candidate.clone());
        }
    }

    let locations = candidates
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ForgeError::ControlSurfaceUnavailable(format!(
        "Binary '{}' not found.\nSearched locations:\n{}",
        binary_name, locations
    )))
}

/// Install the global tracing subscriber.
///
/// Human-readable output goes to stderr filtered by `RUST_LOG`, falling back
/// to `default_filter`. When `log_dir` is given, a daily rotated file log is
/// added; keep the returned guard alive until exit so buffered lines flush.
pub fn init_logging(
    log_dir: Option<&Path>,
    default_filter: &str,
) -> ForgeResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| ForgeError::Config(format!("invalid log filter: {}", e)))?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .try_init();

    Ok(guard)
}
