//! Hot reload of the daemon's configuration file.
//!
//! Only `[session]` is live. The listener and observability stack are set
//! up once at startup, so edits there are reported and otherwise ignored;
//! `[client]` is not read by the server at all. A file that fails to load
//! or validate leaves the running configuration in place.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::config::loader::load_config;
use crate::config::schema::BridgeConfig;

/// Sections of a reloaded file that differ from the running configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub listener: bool,
    pub session: bool,
    pub client: bool,
    pub observability: bool,
}

impl ConfigDiff {
    pub fn between(current: &BridgeConfig, next: &BridgeConfig) -> Self {
        Self {
            listener: current.listener != next.listener,
            session: current.session != next.session,
            client: current.client != next.client,
            observability: current.observability != next.observability,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Changed sections that only take effect after a restart.
    pub fn restart_required(&self) -> Vec<&'static str> {
        let mut sections = Vec::new();
        if self.listener {
            sections.push("listener");
        }
        if self.observability {
            sections.push("observability");
        }
        sections
    }
}

/// What a reload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    /// `[session]` changed; subscribers were notified.
    Published,
    /// Nothing the running server can adopt changed.
    Unchanged,
    /// The file did not load or validate.
    Rejected,
}

/// Re-read `path` and publish it if its session settings changed.
///
/// The sender's value is the last configuration read from the file, so a
/// restart-only edit is reported once rather than on every later save.
pub fn reload(path: &Path, updates: &watch::Sender<BridgeConfig>) -> Reload {
    let next = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Config reload rejected; keeping current configuration");
            return Reload::Rejected;
        }
    };

    let diff = ConfigDiff::between(&updates.borrow(), &next);
    if diff.is_empty() {
        tracing::debug!(path = ?path, "Config file saved without changes");
        return Reload::Unchanged;
    }
    for section in diff.restart_required() {
        tracing::warn!(section, "Config section changed; restart required to apply it");
    }

    if diff.session {
        tracing::info!(
            request_interval_ticks = next.session.request_interval_ticks,
            timeout_multiplier = next.session.timeout_multiplier,
            "Session settings changed"
        );
        updates.send_replace(next);
        Reload::Published
    } else {
        updates.send_if_modified(|current| {
            *current = next;
            false
        });
        Reload::Unchanged
    }
}

/// Watches the configuration file and publishes session changes.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: watch::Sender<BridgeConfig>,
}

impl ConfigWatcher {
    /// `loaded` is the configuration as read from `path` at startup.
    /// The receiver yields every later revision with new session settings.
    pub fn new(path: &Path, loaded: BridgeConfig) -> (Self, watch::Receiver<BridgeConfig>) {
        let (updates, rx) = watch::channel(loaded);
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive; dropping it
    /// closes the receiver.
    ///
    /// The parent directory is watched rather than the file, so editors
    /// that save by renaming a temporary file over it are still seen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsStr::to_os_string);
        let path = self.path.clone();
        let updates = self.updates;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_ref()) => {
                    reload(&path, &updates);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default(),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&OsString>) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == file_name.map(OsString::as_os_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    struct ConfigFile(PathBuf);

    impl ConfigFile {
        fn new(content: &str) -> Self {
            let path = std::env::temp_dir().join(format!("script-bridge-{}.toml", uuid::Uuid::new_v4()));
            std::fs::write(&path, content).unwrap();
            Self(path)
        }

        fn write(&self, content: &str) {
            std::fs::write(&self.0, content).unwrap();
        }
    }

    impl Drop for ConfigFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_diff_sections() {
        let current = BridgeConfig::default();
        let mut next = current.clone();
        assert!(ConfigDiff::between(&current, &next).is_empty());

        next.listener.bind_address = "127.0.0.1:9999".into();
        next.session.request_interval_ticks = 3;
        let diff = ConfigDiff::between(&current, &next);
        assert!(diff.listener && diff.session);
        assert!(!diff.client && !diff.observability);
        assert_eq!(diff.restart_required(), vec!["listener"]);
    }

    #[test]
    fn test_session_change_is_published() {
        let file = ConfigFile::new("");
        let (tx, mut rx) = watch::channel(BridgeConfig::default());

        file.write("[session]\nrequest_interval_ticks = 3\n");
        assert_eq!(reload(&file.0, &tx), Reload::Published);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().session.request_interval_ticks, 3);

        // Saving the same content again is not news.
        assert_eq!(reload(&file.0, &tx), Reload::Unchanged);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_restart_only_change_is_not_published() {
        let file = ConfigFile::new("");
        let (tx, rx) = watch::channel(BridgeConfig::default());

        file.write("[listener]\nbind_address = \"127.0.0.1:9999\"\n");
        assert_eq!(reload(&file.0, &tx), Reload::Unchanged);
        assert!(!rx.has_changed().unwrap());
        // Remembered, so the next save does not warn again.
        assert_eq!(tx.borrow().listener.bind_address, "127.0.0.1:9999");
    }

    #[test]
    fn test_invalid_file_keeps_current() {
        let file = ConfigFile::new("");
        let (tx, rx) = watch::channel(BridgeConfig::default());

        file.write("[session]\nrequest_interval_ticks = 0\n");
        assert_eq!(reload(&file.0, &tx), Reload::Rejected);
        file.write("[session\n");
        assert_eq!(reload(&file.0, &tx), Reload::Rejected);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*tx.borrow(), BridgeConfig::default());
    }

    #[test]
    fn test_touches_only_the_watched_file() {
        let name = OsString::from("bridge.toml");
        let event = |path: &str| Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from(path));

        assert!(touches(&event("/etc/bridge/bridge.toml"), Some(&name)));
        assert!(!touches(&event("/etc/bridge/other.toml"), Some(&name)));
        assert!(!touches(
            &Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(PathBuf::from("/etc/bridge/bridge.toml")),
            Some(&name)
        ));
    }
}
