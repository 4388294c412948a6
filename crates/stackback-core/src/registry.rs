//! The set of backup-candidate directories and their selection flags.
//!
//! Two kinds of entry share one uniquely-keyed, ordered map:
//! - discovered: a bare name, found by scanning the stacks root;
//! - external: an absolute path registered explicitly by the operator.
//!
//! Whether an entry is external is derived from its identifier, never stored.
//!
//! # File format
//!
//! ```text
//! # Discovered directories (relative to the stacks root)
//! web=true
//! db=false
//!
//! # External directories (absolute paths)
//! /opt/ext/stack=true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, StackbackError};
use crate::io;
use crate::lock::RegistryLock;
use crate::paths;
use crate::snapshot::tags;

const DISCOVERED_HEADER: &str = "# Discovered directories (relative to the stacks root)";
const EXTERNAL_HEADER: &str = "# External directories (absolute paths)";

pub fn is_external_identifier(identifier: &str) -> bool {
    identifier.starts_with('/')
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub identifier: String,
    pub enabled: bool,
}

impl DirectoryEntry {
    pub fn is_external(&self) -> bool {
        is_external_identifier(&self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_no: usize,
    pub content: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub skipped: Vec<SkippedLine>,
}

/// Discovered entries added or removed by one `sync()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DirectoryRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    stacks_root: PathBuf,
    file: PathBuf,
    entries: BTreeMap<String, DirectoryEntry>,
}

impl DirectoryRegistry {
    pub fn new(stacks_root: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            stacks_root: stacks_root.into(),
            file: file.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Read the persisted list. A missing file is an empty registry.
    /// Malformed lines are skipped, logged, and returned in the report.
    pub fn load(stacks_root: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Result<(Self, LoadReport)> {
        let mut reg = Self::new(stacks_root, file);
        if !reg.file.exists() {
            return Ok((reg, LoadReport::default()));
        }
        let text = std::fs::read_to_string(&reg.file)?;
        let report = reg.parse(&text);
        for s in &report.skipped {
            tracing::warn!(
                file = %reg.file.display(),
                line = s.line_no,
                content = %s.content,
                "skipping registry line: {}",
                s.reason
            );
        }
        Ok((reg, report))
    }

    /// Run `f` against the on-disk registry under the registry lock. The file
    /// is rewritten only if `f` changed its content.
    pub fn update<T, F>(
        stacks_root: &Path,
        file: &Path,
        lock_timeout: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut DirectoryRegistry) -> Result<T>,
    {
        let _lock = RegistryLock::acquire(&paths::registry_lock_file(file), lock_timeout)?;
        let (mut reg, _) = Self::load(stacks_root, file)?;
        let before = reg.render();
        let out = f(&mut reg)?;
        if reg.render() != before || !file.exists() {
            reg.save()?;
        }
        Ok(out)
    }

    fn parse(&mut self, text: &str) -> LoadReport {
        let mut report = LoadReport::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut skip = |reason: &str| {
                report.skipped.push(SkippedLine {
                    line_no: idx + 1,
                    content: raw.to_string(),
                    reason: reason.to_string(),
                })
            };
            let Some((id, flag)) = line.rsplit_once('=') else {
                skip("expected identifier=true|false");
                continue;
            };
            let id = normalize_identifier(id);
            let enabled = match flag.trim() {
                "true" => true,
                "false" => false,
                _ => {
                    skip("flag must be true or false");
                    continue;
                }
            };
            if let Err(reason) = check_identifier(&id) {
                skip(reason);
                continue;
            }
            if self.entries.contains_key(&id) {
                skip("duplicate identifier");
                continue;
            }
            self.entries.insert(
                id.clone(),
                DirectoryEntry {
                    identifier: id,
                    enabled,
                },
            );
        }
        report
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(DISCOVERED_HEADER);
        out.push('\n');
        for e in self.entries.values().filter(|e| !e.is_external()) {
            out.push_str(&format!("{}={}\n", e.identifier, e.enabled));
        }
        out.push('\n');
        out.push_str(EXTERNAL_HEADER);
        out.push('\n');
        for e in self.entries.values().filter(|e| e.is_external()) {
            out.push_str(&format!("{}={}\n", e.identifier, e.enabled));
        }
        out
    }

    pub fn save(&self) -> Result<()> {
        io::atomic_write(&self.file, self.render().as_bytes())
    }

    // -----------------------------------------------------------------------
    // Filesystem synchronization
    // -----------------------------------------------------------------------

    /// Reconcile discovered entries with the stacks root. External entries
    /// are never added, removed or toggled here. New entries start disabled.
    pub fn sync(&mut self) -> Result<SyncDelta> {
        let found = self.scan_stacks_root()?;
        let mut delta = SyncDelta::default();

        for name in &found {
            if !self.entries.contains_key(name) {
                self.entries.insert(
                    name.clone(),
                    DirectoryEntry {
                        identifier: name.clone(),
                        enabled: false,
                    },
                );
                delta.added.push(name.clone());
            }
        }

        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.is_external() && !found.contains(&e.identifier))
            .map(|e| e.identifier.clone())
            .collect();
        for id in stale {
            self.entries.remove(&id);
            delta.removed.push(id);
        }

        if !delta.is_empty() {
            tracing::info!(added = ?delta.added, removed = ?delta.removed, "registry synchronized");
        }
        Ok(delta)
    }

    fn scan_stacks_root(&self) -> Result<Vec<String>> {
        if !self.stacks_root.is_dir() {
            return Err(StackbackError::StacksRootMissing(self.stacks_root.clone()));
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.stacks_root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %path.display(), "skipping non UTF-8 directory name");
                continue;
            };
            if name.starts_with('.') || check_identifier(&name).is_err() {
                continue;
            }
            if paths::has_compose_file(&path) {
                found.push(name);
            }
        }
        found.sort();
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // External entries
    // -----------------------------------------------------------------------

    /// Register an absolute directory outside the stacks root. Returns the
    /// identifier it was stored under.
    pub fn add_external(&mut self, path: &Path, enabled: bool) -> Result<String> {
        let invalid = |reason: &str| StackbackError::InvalidExternalPath {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if !path.is_absolute() {
            return Err(invalid("path must be absolute"));
        }
        let normalized = paths::normalize(path);
        if !normalized.exists() {
            return Err(invalid("path does not exist"));
        }
        if !normalized.is_dir() {
            return Err(invalid("path is not a directory"));
        }
        if !paths::has_compose_file(&normalized) {
            return Err(invalid("no compose file found in directory"));
        }
        if paths::is_within(&normalized, &self.stacks_root) {
            return Err(invalid(
                "path is inside the stacks root; it is picked up by sync instead",
            ));
        }
        let id = normalized
            .to_str()
            .ok_or_else(|| invalid("path is not valid UTF-8"))?
            .to_string();
        check_identifier(&id).map_err(invalid)?;
        if self.entries.contains_key(&id) {
            return Err(StackbackError::DirectoryExists(id));
        }
        self.entries.insert(
            id.clone(),
            DirectoryEntry {
                identifier: id.clone(),
                enabled,
            },
        );
        Ok(id)
    }

    pub fn remove_external(&mut self, identifier: &str) -> Result<()> {
        let id = normalize_identifier(identifier);
        match self.entries.get(&id) {
            None => Err(StackbackError::DirectoryNotFound(id)),
            Some(e) if !e.is_external() => Err(StackbackError::NotExternal(id)),
            Some(_) => {
                self.entries.remove(&id);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Returns true if the flag actually changed.
    pub fn set_enabled(&mut self, identifier: &str, enabled: bool) -> Result<bool> {
        let id = normalize_identifier(identifier);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(StackbackError::DirectoryNotFound(id))?;
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Ok(changed)
    }

    /// Returns how many entries changed.
    pub fn set_all_enabled(&mut self, enabled: bool) -> usize {
        let mut changed = 0;
        for e in self.entries.values_mut() {
            if e.enabled != enabled {
                e.enabled = enabled;
                changed += 1;
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn get(&self, identifier: &str) -> Option<&DirectoryEntry> {
        self.entries.get(&normalize_identifier(identifier))
    }

    /// All entries ordered by identifier.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.entries.values().cloned().collect()
    }

    /// Enabled entries ordered by identifier.
    pub fn enabled(&self) -> Vec<DirectoryEntry> {
        self.entries.values().filter(|e| e.enabled).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn full_path(&self, identifier: &str) -> PathBuf {
        full_path(&self.stacks_root, identifier)
    }

    pub fn stacks_root(&self) -> &Path {
        &self.stacks_root
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

/// External identifiers resolve to themselves; discovered ones are joined
/// onto the stacks root.
pub fn full_path(stacks_root: &Path, identifier: &str) -> PathBuf {
    if is_external_identifier(identifier) {
        PathBuf::from(identifier)
    } else {
        stacks_root.join(identifier)
    }
}

fn normalize_identifier(identifier: &str) -> String {
    if is_external_identifier(identifier) {
        paths::normalize(Path::new(identifier))
            .to_string_lossy()
            .into_owned()
    } else {
        identifier.trim().to_string()
    }
}

fn check_identifier(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("empty identifier");
    }
    if id.contains('=') || id.contains('\n') || id.contains(',') {
        return Err("identifier contains a reserved character ('=', ',' or newline)");
    }
    if !is_external_identifier(id) && (id.contains('/') || id == "." || id == "..") {
        return Err("discovered identifier must be a bare directory name");
    }
    if tags::is_reserved(id) {
        return Err("identifier collides with a reserved snapshot tag");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        outside: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                outside: TempDir::new().unwrap(),
            }
        }

        fn stack(&self, name: &str) -> PathBuf {
            let dir = self.root.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("docker-compose.yml"), "services: {}\n").unwrap();
            dir
        }

        fn external(&self, name: &str) -> PathBuf {
            let dir = self.outside.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("compose.yaml"), "services: {}\n").unwrap();
            dir
        }

        fn registry(&self) -> DirectoryRegistry {
            DirectoryRegistry::new(
                self.root.path(),
                self.root.path().join(paths::REGISTRY_FILE_NAME),
            )
        }
    }

    #[test]
    fn sync_adds_disabled_and_is_idempotent() {
        let fx = Fixture::new();
        fx.stack("web");
        fx.stack("db");
        std::fs::create_dir_all(fx.root.path().join("no-compose")).unwrap();

        let mut reg = fx.registry();
        let delta = reg.sync().unwrap();
        assert_eq!(delta.added, vec!["db", "web"]);
        assert!(delta.removed.is_empty());
        assert!(reg.entries().iter().all(|e| !e.enabled));

        let again = reg.sync().unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn sync_removes_vanished_discovered_entries() {
        let fx = Fixture::new();
        let web = fx.stack("web");
        fx.stack("db");
        let mut reg = fx.registry();
        reg.sync().unwrap();
        reg.set_enabled("web", true).unwrap();

        std::fs::remove_dir_all(web).unwrap();
        let delta = reg.sync().unwrap();
        assert_eq!(delta.removed, vec!["web"]);
        assert!(reg.get("web").is_none());
        assert!(reg.get("db").is_some());
    }

    #[test]
    fn sync_never_touches_external_entries() {
        let fx = Fixture::new();
        fx.stack("web");
        let ext = fx.external("ext-stack");
        let mut reg = fx.registry();
        let id = reg.add_external(&ext, true).unwrap();

        // External directory vanishing from disk does not remove it.
        std::fs::remove_dir_all(&ext).unwrap();
        let delta = reg.sync().unwrap();
        assert_eq!(delta.added, vec!["web"]);
        assert!(delta.removed.is_empty());
        let entry = reg.get(&id).unwrap();
        assert!(entry.enabled);
        assert!(entry.is_external());
    }

    #[test]
    fn sync_fails_for_missing_root() {
        let mut reg = DirectoryRegistry::new("/nonexistent/stacks-root", "/tmp/x");
        assert!(matches!(
            reg.sync().unwrap_err(),
            StackbackError::StacksRootMissing(_)
        ));
    }

    #[test]
    fn reserved_tag_names_are_not_discovered() {
        let fx = Fixture::new();
        fx.stack("stackback");
        fx.stack("external");
        fx.stack("2026-03-14");
        fx.stack("web");
        let mut reg = fx.registry();
        assert_eq!(reg.sync().unwrap().added, vec!["web"]);

        let report = reg.parse("selective=true\nstackback=false\n");
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped[0].reason.contains("reserved snapshot tag"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn parse_normalizes_external_identifiers() {
        let mut reg = DirectoryRegistry::new("/srv/stacks", "/tmp/unused");
        let report = reg.parse("/opt/ext/app/=true\n/opt/ext/app=false\n/opt/ext/./db=true\n");
        let skipped: Vec<usize> = report.skipped.iter().map(|s| s.line_no).collect();
        assert_eq!(skipped, vec![2]);
        let ids: Vec<String> = reg.entries().into_iter().map(|e| e.identifier).collect();
        assert_eq!(ids, vec!["/opt/ext/app", "/opt/ext/db"]);

        reg.remove_external("/opt/ext/app/").unwrap();
        assert!(reg.get("/opt/ext/app").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn hidden_directories_are_not_discovered() {
        let fx = Fixture::new();
        fx.stack(".trash");
        let mut reg = fx.registry();
        assert!(reg.sync().unwrap().is_empty());
    }

    #[test]
    fn add_external_validation() {
        let fx = Fixture::new();
        let mut reg = fx.registry();

        let err = reg.add_external(Path::new("relative/dir"), true).unwrap_err();
        assert!(err.to_string().contains("absolute"));

        let missing = fx.outside.path().join("missing");
        assert!(reg.add_external(&missing, true).is_err());

        let file = fx.outside.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(reg
            .add_external(&file, true)
            .unwrap_err()
            .to_string()
            .contains("not a directory"));

        let bare = fx.outside.path().join("bare");
        std::fs::create_dir_all(&bare).unwrap();
        assert!(reg
            .add_external(&bare, true)
            .unwrap_err()
            .to_string()
            .contains("no compose file"));

        let ext = fx.external("app");
        reg.add_external(&ext, false).unwrap();
        assert!(matches!(
            reg.add_external(&ext, false).unwrap_err(),
            StackbackError::DirectoryExists(_)
        ));
    }

    #[test]
    fn add_external_rejects_paths_inside_stacks_root() {
        let fx = Fixture::new();
        let inner = fx.stack("web");
        let mut reg = fx.registry();
        let err = reg.add_external(&inner, true).unwrap_err();
        assert!(err.to_string().contains("inside the stacks root"));

        let nested = inner.join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("compose.yml"), "services: {}\n").unwrap();
        assert!(reg.add_external(&nested, true).is_err());
    }

    #[test]
    fn add_external_normalizes_trailing_slash() {
        let fx = Fixture::new();
        let ext = fx.external("app");
        let mut reg = fx.registry();
        let with_slash = PathBuf::from(format!("{}/", ext.display()));
        let id = reg.add_external(&with_slash, true).unwrap();
        assert_eq!(id, ext.to_str().unwrap());
        assert!(reg.get(&format!("{id}/")).is_some());
    }

    #[test]
    fn remove_external_only_for_external_entries() {
        let fx = Fixture::new();
        fx.stack("web");
        let ext = fx.external("app");
        let mut reg = fx.registry();
        reg.sync().unwrap();
        let id = reg.add_external(&ext, true).unwrap();

        assert!(matches!(
            reg.remove_external("web").unwrap_err(),
            StackbackError::NotExternal(_)
        ));
        assert!(matches!(
            reg.remove_external("/not/registered").unwrap_err(),
            StackbackError::DirectoryNotFound(_)
        ));
        reg.remove_external(&id).unwrap();
        assert!(reg.get(&id).is_none());
        assert!(reg.get("web").is_some());
    }

    #[test]
    fn full_path_resolution() {
        let root = Path::new("/srv/stacks");
        assert_eq!(full_path(root, "web"), PathBuf::from("/srv/stacks/web"));
        assert_eq!(
            full_path(root, "/opt/ext/stack"),
            PathBuf::from("/opt/ext/stack")
        );
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let mut reg = DirectoryRegistry::new("/srv/stacks", "/tmp/unused");
        let report = reg.parse(
            "# header\n\
             web=true\n\
             no-flag\n\
             db=maybe\n\
             nested/name=true\n\
             web=false\n\
             /opt/ext/stack=false\n\
             =true\n",
        );
        let skipped: Vec<usize> = report.skipped.iter().map(|s| s.line_no).collect();
        assert_eq!(skipped, vec![3, 4, 5, 6, 8]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get("web").unwrap().enabled);
        let ext = reg.get("/opt/ext/stack").unwrap();
        assert!(ext.is_external());
        assert!(!ext.enabled);
    }

    #[test]
    fn save_writes_two_sections_and_reloads() {
        let fx = Fixture::new();
        fx.stack("web");
        fx.stack("db");
        let ext = fx.external("app");
        let mut reg = fx.registry();
        reg.sync().unwrap();
        reg.set_enabled("web", true).unwrap();
        let ext_id = reg.add_external(&ext, true).unwrap();
        reg.save().unwrap();

        let text = std::fs::read_to_string(reg.file()).unwrap();
        let discovered_at = text.find(DISCOVERED_HEADER).unwrap();
        let external_at = text.find(EXTERNAL_HEADER).unwrap();
        let web_at = text.find("web=true").unwrap();
        let ext_at = text.find(&format!("{ext_id}=true")).unwrap();
        assert!(discovered_at < web_at && web_at < external_at && external_at < ext_at);

        let (loaded, report) = DirectoryRegistry::load(fx.root.path(), reg.file()).unwrap();
        assert!(report.skipped.is_empty());
        assert_eq!(loaded.entries(), reg.entries());
    }

    #[test]
    fn enabled_is_sorted_and_filtered() {
        let mut reg = DirectoryRegistry::new("/srv/stacks", "/tmp/unused");
        reg.parse("zeta=true\nalpha=true\nmid=false\n/opt/b=true\n");
        let ids: Vec<String> = reg.enabled().into_iter().map(|e| e.identifier).collect();
        assert_eq!(ids, vec!["/opt/b", "alpha", "zeta"]);
        assert_eq!(reg.set_all_enabled(false), 3);
        assert!(reg.enabled().is_empty());
    }

    #[test]
    fn update_persists_only_on_change() {
        let fx = Fixture::new();
        fx.stack("web");
        let file = fx.root.path().join(paths::REGISTRY_FILE_NAME);
        let timeout = Duration::from_secs(2);

        let delta = DirectoryRegistry::update(fx.root.path(), &file, timeout, |reg| reg.sync())
            .unwrap();
        assert_eq!(delta.added, vec!["web"]);
        let first = std::fs::metadata(&file).unwrap().modified().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        DirectoryRegistry::update(fx.root.path(), &file, timeout, |reg| reg.sync()).unwrap();
        let second = std::fs::metadata(&file).unwrap().modified().unwrap();
        assert_eq!(first, second, "no-op sync does not rewrite the file");

        DirectoryRegistry::update(fx.root.path(), &file, timeout, |reg| {
            reg.set_enabled("web", true)
        })
        .unwrap();
        let (reg, _) = DirectoryRegistry::load(fx.root.path(), &file).unwrap();
        assert!(reg.get("web").unwrap().enabled);
    }
}
