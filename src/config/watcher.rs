//! Hot reload of the configuration file.
//!
//! # Design Decisions
//! - The parent directory is watched, not the file. Editors save by writing
//!   a temporary file and renaming it over the original, which swaps the
//!   inode a file watch is attached to.
//! - Events are filtered on the file name; siblings in the directory are
//!   ignored.
//! - Only configs that load and validate are forwarded. A bad edit keeps
//!   the running configuration.
//! - Once the receiver is gone, further events are ignored.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ShieldConfig;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("config path {0:?} has no file name")]
    NoFileName(PathBuf),

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Keeps the OS watch alive. Dropping it stops hot reload.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path` and stream every valid reloaded config.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<ShieldConfig>), WatchError> {
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| WatchError::NoFileName(path.to_path_buf()))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let reloader = Reloader {
            path: path.to_path_buf(),
            file_name,
            tx,
            closed: AtomicBool::new(false),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => reloader.on_event(&event),
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, dir = ?dir, "Config watcher started");
        Ok((
            Self {
                path: path.to_path_buf(),
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Reloader {
    path: PathBuf,
    file_name: OsString,
    tx: mpsc::UnboundedSender<ShieldConfig>,
    closed: AtomicBool,
}

impl Reloader {
    fn on_event(&self, event: &Event) {
        if self.closed.load(Ordering::Relaxed) || !touches(event, &self.file_name) {
            return;
        }
        let Some(config) = reload(&self.path) else {
            return;
        };
        if self.tx.send(config).is_err() {
            tracing::warn!(path = ?self.path, "Config update receiver dropped, ignoring further changes");
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}

/// Whether `event` creates or changes the watched file.
fn touches(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}

fn reload(path: &Path) -> Option<ShieldConfig> {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = ?path, "Config file changed, reloaded");
            Some(config)
        }
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Failed to reload config, keeping current configuration");
            None
        }
    }
}
