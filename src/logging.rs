//! Run logging.
//!
//! Every run writes to stderr and to its own append-only file,
//! `<logging.dir>/audit_YYYYMMDD_HHMMSS.log`. The level comes from
//! `RUST_LOG` and defaults to `info`.
//!
//! [`RunLog`] installs the subscriber as the default for the current thread
//! and removes it when dropped. The binary runs on a current-thread runtime,
//! so every task of the run logs through it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::LoggingConfig;

pub struct RunLog {
    path: Option<PathBuf>,
    _guard: DefaultGuard,
}

impl RunLog {
    /// Start logging for one run. If the log file cannot be created the run
    /// continues with console output only.
    pub fn start(config: &LoggingConfig) -> Self {
        let file_name = chrono::Local::now()
            .format("audit_%Y%m%d_%H%M%S.log")
            .to_string();
        let path = config.dir.join(file_name);
        let file = open_log_file(&path);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let file_layer = file.as_ref().ok().map(|f| {
            fmt::layer()
                .with_writer(Arc::clone(f))
                .with_ansi(false)
                .with_target(true)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .with(file_layer);
        let guard = tracing::subscriber::set_default(subscriber);

        let path = match file {
            Ok(_) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not create log file; logging to console only");
                None
            }
        };

        Self {
            path,
            _guard: guard,
        }
    }

    /// The run's log file, when one could be created.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn open_log_file(path: &Path) -> std::io::Result<Arc<File>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}
