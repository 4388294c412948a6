use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File names recognized as a service-composition file, in lookup order.
pub const COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

pub const DEFAULT_CONFIG_FILE: &str = "/etc/stackback/config.yaml";
pub const DEFAULT_LOCK_FILE: &str = "/tmp/stackback.lock";
pub const REGISTRY_FILE_NAME: &str = ".stackback-dirs";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Returns the first recognized compose file inside `dir`, if any.
pub fn compose_file(dir: &Path) -> Option<PathBuf> {
    COMPOSE_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

pub fn has_compose_file(dir: &Path) -> bool {
    compose_file(dir).is_some()
}

pub fn default_registry_file(stacks_root: &Path) -> PathBuf {
    stacks_root.join(REGISTRY_FILE_NAME)
}

/// Lock file guarding read-modify-write of `registry_file`.
pub fn registry_lock_file(registry_file: &Path) -> PathBuf {
    let mut name = registry_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    registry_file.with_file_name(name)
}

/// Lexically normalize an absolute path: drops `.` segments, resolves `..`,
/// and strips any trailing separator. Does not touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `candidate` is `root` itself or lives beneath it. Both sides are
/// canonicalized when possible so symlinked roots are caught.
pub fn is_within(candidate: &Path, root: &Path) -> bool {
    let canon = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| normalize(p));
    canon(candidate).starts_with(canon(root))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
