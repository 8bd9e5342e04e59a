//! Hot reload of the rules file via `notify`.
//!
//! The watcher sits on the file's parent directory so editors that save by
//! rename are picked up too. A file that fails to parse or validate is
//! logged and the engine keeps serving the last good version.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::{ActiveRules, LoadError, RuleSet, RuleSetDefinition};

/// Keeps the filesystem watcher alive; dropping it stops hot reload.
pub struct RulesWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl RulesWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of re-reading the rules file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    Installed(u64),
    /// Same version, same rules: a plain re-save.
    Unchanged,
    /// Same version but different content; skipped until the version is bumped.
    NotBumped,
}

/// Read the rules file and install it if it carries a new version.
pub fn reload_from_file(path: &Path, active: &ActiveRules) -> Result<Reload, LoadError> {
    let def = RuleSetDefinition::from_file(path)?;
    let version = def.version;
    if version != active.version() {
        let installed = active.install(def)?;
        return Ok(Reload::Installed(installed.version()));
    }

    let current = active.snapshot();
    match RuleSet::compile(def) {
        Ok(parsed) if parsed == *current => {
            debug!(version, path = %path.display(), "rules file unchanged");
            Ok(Reload::Unchanged)
        }
        _ => {
            warn!(
                version,
                path = %path.display(),
                "rules file changed without a version bump, ignored"
            );
            Ok(Reload::NotBumped)
        }
    }
}

pub fn watch_rules_file(
    path: &Path,
    active: Arc<ActiveRules>,
) -> Result<RulesWatcher, notify::Error> {
    let target = path.to_path_buf();
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = target.file_name().map(|n| n.to_os_string());

    let watched = target.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "rules watcher error");
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
            return;
        }
        match reload_from_file(&watched, &active) {
            Ok(Reload::Installed(version)) => {
                info!(version, path = %watched.display(), "rules reloaded")
            }
            Ok(Reload::Unchanged | Reload::NotBumped) => {}
            Err(e) => warn!(
                path = %watched.display(),
                error = %e,
                "rules reload rejected, keeping active version"
            ),
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    info!(path = %target.display(), "watching rules file");
    Ok(RulesWatcher {
        path: target,
        _watcher: watcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    use crate::ruleset::RuleSet;

    fn rules_toml(version: u64, predicate: &str) -> String {
        format!(
            "version = {version}\n\n[[rules]]\nrule_id = \"r\"\n\
             predicate = \"{predicate}\"\naction = \"WARN\"\n"
        )
    }

    fn active(version: u64) -> Arc<ActiveRules> {
        let def = RuleSetDefinition::from_toml_str(&rules_toml(version, "score > 0.5")).unwrap();
        Arc::new(ActiveRules::new(RuleSet::compile(def).unwrap()))
    }

    #[test]
    fn reload_installs_newer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, rules_toml(2, "score > 0.7")).unwrap();

        let active = active(1);
        assert_eq!(reload_from_file(&path, &active).unwrap(), Reload::Installed(2));
        assert_eq!(active.version(), 2);
        assert_eq!(active.snapshot().rules()[0].predicate_text, "score > 0.7");
    }

    #[test]
    fn same_version_resave_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, rules_toml(1, "score > 0.5")).unwrap();

        let active = active(1);
        assert_eq!(reload_from_file(&path, &active).unwrap(), Reload::Unchanged);
    }

    #[test]
    fn edit_without_version_bump_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, rules_toml(1, "score > 0.9")).unwrap();

        let active = active(1);
        assert_eq!(reload_from_file(&path, &active).unwrap(), Reload::NotBumped);
        assert_eq!(active.snapshot().rules()[0].predicate_text, "score > 0.5");
    }

    #[test]
    fn broken_file_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        let active = active(1);

        fs::write(&path, "version = 2\n[[rules]\n").unwrap();
        assert!(matches!(reload_from_file(&path, &active), Err(LoadError::Parse(_))));

        fs::write(&path, rules_toml(2, "nonsense > 1")).unwrap();
        assert!(matches!(reload_from_file(&path, &active), Err(LoadError::Invalid(_))));

        assert!(matches!(
            reload_from_file(&dir.path().join("absent.toml"), &active),
            Err(LoadError::Io(_))
        ));
        assert_eq!(active.version(), 1);
    }

    #[test]
    fn watcher_picks_up_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, rules_toml(1, "score > 0.5")).unwrap();

        let active = active(1);
        let watcher = watch_rules_file(&path, Arc::clone(&active)).unwrap();
        assert_eq!(watcher.path(), path.as_path());

        fs::write(&path, rules_toml(2, "score > 0.6")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while active.version() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(active.version(), 2);
    }
}
