//! Path validation and TOCTOU-safe file opens.
//!
//! Every filesystem-touching tool goes through [`PathPolicy`]: paths are
//! canonicalized (symlinks resolved), confined to a set of allowed roots,
//! checked against blocked system locations and shell startup files, and
//! opened with a post-open re-validation so a symlink swapped in between
//! validation and open is detected rather than followed.

use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::SecurityError;
use crate::security::Permission;

// ─── Containment ──────────────────────────────────────────────────────────────

/// Boundary-safe containment check: `path` is within `dir` iff they are
/// equal or `path` has `dir` as a whole-component prefix. A plain string
/// prefix test would let `/home/userEVIL` pass for root `/home/user`.
pub fn is_path_within_dir(path: &Path, dir: &Path) -> bool {
    path == dir || path.starts_with(dir)
}

// ─── Static rule tables ───────────────────────────────────────────────────────

/// Basenames that configure a shell or hold login secrets. Reading or
/// writing these through the agent is never automatic.
const SHELL_STARTUP_FILES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".bash_login",
    ".bash_logout",
    ".zshrc",
    ".zshenv",
    ".zprofile",
    ".zlogin",
    ".profile",
    ".login",
    ".cshrc",
    ".tcshrc",
    ".kshrc",
];

/// Directory components whose entire subtree is treated as a shell/credential
/// area regardless of basename.
const PROTECTED_DIR_COMPONENTS: &[&str] =
    &[".ssh", ".aws", ".gnupg", ".kube", ".docker", ".gcloud", ".azure"];

fn sensitive_name_patterns() -> &'static [&'static str] {
    &[
        ".env",
        ".env.*",
        "*.pem",
        "*.key",
        "*.crt",
        "*.p12",
        "*.pfx",
        "credentials*",
        "secrets*",
        "*.npmrc",
        ".npmrc",
        ".netrc",
        "id_rsa*",
        "id_ed25519*",
        "id_ecdsa*",
        "authorized_keys",
        "known_hosts",
    ]
}

fn sensitive_path_patterns() -> &'static [&'static str] {
    &[
        "**/.aws/**",
        "**/.kube/**",
        "**/.azure/**",
        "**/.gcloud/**",
        "**/.gnupg/**",
        "**/.ssh/**",
        "**/.git/config",
    ]
}

#[cfg(unix)]
fn default_blocked_roots() -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from("/etc/shadow"),
        PathBuf::from("/etc/sudoers"),
        PathBuf::from("/proc"),
        PathBuf::from("/sys"),
        PathBuf::from("/dev"),
        PathBuf::from("/boot"),
        PathBuf::from("/root/.ssh"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".ssh"));
        roots.push(home.join(".gnupg"));
    }
    roots
}

#[cfg(windows)]
fn default_blocked_roots() -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from("c:/windows/system32/config"),
        PathBuf::from("c:/windows/system32/drivers"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".ssh"));
    }
    roots
}

// ─── Normalization ────────────────────────────────────────────────────────────

/// Normalize a resolved path for rule matching. On Windows this lowercases
/// and flips separators so rule tables written with `/` compare correctly;
/// on POSIX canonicalization already yields a clean form.
#[cfg(windows)]
fn normalize(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase().replace('\\', "/"))
}

#[cfg(not(windows))]
fn normalize(path: &Path) -> PathBuf {
    path.to_path_buf()
}

// ─── PathPolicy ───────────────────────────────────────────────────────────────

/// Canonicalizes and vets filesystem paths.
///
/// Shared across tools via `Arc`; all state is immutable after construction.
pub struct PathPolicy {
    allowed_roots: Vec<PathBuf>,
    blocked_roots: Vec<PathBuf>,
    sensitive_names: GlobSet,
    sensitive_paths: GlobSet,
}

impl PathPolicy {
    /// Policy confined to the given roots, with platform-default blocked
    /// locations on top.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self::with_blocked_roots(allowed_roots, default_blocked_roots())
    }

    pub fn with_blocked_roots(allowed_roots: Vec<PathBuf>, blocked_roots: Vec<PathBuf>) -> Self {
        let allowed_roots = allowed_roots
            .into_iter()
            .map(|r| r.canonicalize().unwrap_or(r))
            .map(|r| normalize(&r))
            .collect();
        let blocked_roots = blocked_roots.into_iter().map(|r| normalize(&r)).collect();
        Self {
            allowed_roots,
            blocked_roots,
            sensitive_names: build_globset(sensitive_name_patterns()),
            sensitive_paths: build_globset(sensitive_path_patterns()),
        }
    }

    /// Default host policy: current working directory, the user's home, and
    /// the system temp directory.
    pub fn host_defaults() -> Self {
        let mut roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(home) = dirs::home_dir() {
            roots.push(home);
        }
        roots.push(std::env::temp_dir());
        Self::new(roots)
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    // ── Validation ────────────────────────────────────────────────────────────

    /// Resolve `path` to a canonical real path and check it against every
    /// rule. Missing leaves are resolved through the nearest existing
    /// ancestor and rejoined, then re-validated.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, SecurityError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| SecurityError::PathResolution {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?
                .join(path)
        };

        let resolved = resolve_symlinks(&absolute)?;
        let real = normalize(&resolved);
        self.check_rules(&real, path)?;
        Ok(real)
    }

    fn check_rules(&self, real: &Path, original: &Path) -> Result<(), SecurityError> {
        if !self
            .allowed_roots
            .iter()
            .any(|root| is_path_within_dir(real, root))
        {
            return Err(SecurityError::PathTraversal {
                path: original.to_path_buf(),
            });
        }

        for blocked in &self.blocked_roots {
            if is_path_within_dir(real, blocked) {
                return Err(SecurityError::BlockedPath {
                    path: real.to_path_buf(),
                });
            }
        }

        if let Some(name) = real.file_name().and_then(|n| n.to_str())
            && SHELL_STARTUP_FILES.contains(&name)
        {
            return Err(SecurityError::BlockedShellFile {
                path: real.to_path_buf(),
            });
        }
        for component in real.components() {
            if let Component::Normal(c) = component
                && let Some(c) = c.to_str()
                && PROTECTED_DIR_COMPONENTS.contains(&c)
            {
                return Err(SecurityError::BlockedShellFile {
                    path: real.to_path_buf(),
                });
            }
        }

        Ok(())
    }

    // ── Secure open ───────────────────────────────────────────────────────────

    /// TOCTOU-safe open: validate, open, then re-resolve the opened name and
    /// re-validate. If the resolution changed after the open, the handle is
    /// closed and `toctou_detected` is reported. Callers must do all reads
    /// and stats through the returned handle, never through a fresh
    /// `stat(path)`.
    pub fn open_secure(
        &self,
        path: &Path,
        options: &OpenOptions,
    ) -> Result<(File, PathBuf), SecurityError> {
        let real = self.validate(path)?;
        let file = options
            .open(&real)
            .map_err(|source| SecurityError::FileOpen {
                path: real.clone(),
                source,
            })?;

        // Re-resolve after the open. A swap of any path component to a new
        // symlink shows up as a different canonical path here.
        let post = resolve_symlinks(&real).map(|p| normalize(&p));
        match post {
            Ok(post) if post == real => {
                self.check_rules(&post, path)?;
                Ok((file, real))
            }
            _ => {
                drop(file);
                Err(SecurityError::ToctouDetected {
                    path: real.clone(),
                })
            }
        }
    }

    /// Convenience: secure read-only open.
    pub fn open_secure_read(&self, path: &Path) -> Result<(File, PathBuf), SecurityError> {
        self.open_secure(path, OpenOptions::new().read(true))
    }

    // ── Classification ────────────────────────────────────────────────────────

    /// `Ask` when the path matches a sensitive pattern (credentials, keys,
    /// env files, cloud configs), `Auto` otherwise. This is the
    /// security-owned half of permission resolution; the registry cannot
    /// downgrade an `Ask` from here.
    pub fn classify(&self, path: &Path) -> Permission {
        let normalized = normalize(path);
        if let Some(name) = normalized.file_name()
            && self.sensitive_names.is_match(Path::new(name))
        {
            return Permission::Ask;
        }
        if self.sensitive_paths.is_match(&normalized) {
            return Permission::Ask;
        }
        Permission::Auto
    }

    /// True when [`classify`](Self::classify) would require approval.
    pub fn is_sensitive(&self, path: &Path) -> bool {
        self.classify(path) == Permission::Ask
    }
}

// ─── Symlink resolution ───────────────────────────────────────────────────────

/// Canonicalize `path`, tolerating a missing suffix: walk up to the nearest
/// existing ancestor, canonicalize that, and rejoin the remaining
/// components. `..` segments in the unresolved suffix are rejected since
/// they cannot be resolved safely against a path that does not exist yet.
fn resolve_symlinks(path: &Path) -> Result<PathBuf, SecurityError> {
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut existing = path.to_path_buf();
            let mut suffix = Vec::new();
            loop {
                match existing.file_name() {
                    Some(name) => suffix.push(name.to_os_string()),
                    None => {
                        return Err(SecurityError::PathResolution {
                            path: path.to_path_buf(),
                            reason: "no existing ancestor".into(),
                        });
                    }
                }
                existing = match existing.parent() {
                    Some(p) => p.to_path_buf(),
                    None => {
                        return Err(SecurityError::PathResolution {
                            path: path.to_path_buf(),
                            reason: "no existing ancestor".into(),
                        });
                    }
                };
                if existing.exists() {
                    break;
                }
            }

            if path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(SecurityError::PathTraversal {
                    path: path.to_path_buf(),
                });
            }

            let mut resolved =
                existing
                    .canonicalize()
                    .map_err(|e| SecurityError::PathResolution {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
            for part in suffix.iter().rev() {
                resolved.push(part);
            }
            Ok(resolved)
        }
        Err(e) => Err(SecurityError::PathResolution {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn build_globset(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn policy_for(dir: &TempDir) -> PathPolicy {
        PathPolicy::with_blocked_roots(vec![dir.path().to_path_buf()], default_blocked_roots())
    }

    // ── Containment ───────────────────────────────────────────────────────────

    #[test]
    fn containment_rejects_sibling_prefix() {
        assert!(!is_path_within_dir(
            Path::new("/home/userEVIL"),
            Path::new("/home/user")
        ));
    }

    #[test]
    fn containment_accepts_child_and_self() {
        assert!(is_path_within_dir(
            Path::new("/home/user/x"),
            Path::new("/home/user")
        ));
        assert!(is_path_within_dir(
            Path::new("/home/user"),
            Path::new("/home/user")
        ));
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn validate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let policy = policy_for(&dir);
        let once = policy.validate(&file).unwrap();
        let twice = policy.validate(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn validate_rejects_escape_via_dotdot() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let policy = PathPolicy::with_blocked_roots(vec![sub.clone()], vec![]);
        let escape = sub.join("..").join("outside.txt");
        let err = policy.validate(&escape).unwrap_err();
        assert!(matches!(
            err,
            SecurityError::PathTraversal { .. } | SecurityError::PathResolution { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn validate_rejects_symlink_pointing_outside() {
        let allowed = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        fs::write(&target, "secret").unwrap();

        let link = allowed.path().join("innocent.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let policy = PathPolicy::with_blocked_roots(vec![allowed.path().to_path_buf()], vec![]);
        let err = policy.validate(&link).unwrap_err();
        assert_eq!(err.kind(), "path_traversal");
    }

    #[test]
    fn validate_resolves_missing_leaf_through_parent() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let missing = dir.path().join("not-yet-created.txt");
        let real = policy.validate(&missing).unwrap();
        assert!(real.ends_with("not-yet-created.txt"));
    }

    #[test]
    fn validate_resolves_missing_nested_path() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let missing = dir.path().join("deep/nested/file.txt");
        let real = policy.validate(&missing).unwrap();
        assert!(real.ends_with("deep/nested/file.txt"));
    }

    #[test]
    fn validate_blocks_proc() {
        let policy = PathPolicy::new(vec![PathBuf::from("/")]);
        let err = policy.validate(Path::new("/proc/self/environ")).unwrap_err();
        assert_eq!(err.kind(), "blocked_path");
    }

    #[test]
    fn validate_blocks_shell_startup_files() {
        let dir = TempDir::new().unwrap();
        let rc = dir.path().join(".bashrc");
        fs::write(&rc, "alias ll='ls -la'").unwrap();

        let policy = policy_for(&dir);
        let err = policy.validate(&rc).unwrap_err();
        assert_eq!(err.kind(), "blocked_shell_file");
    }

    #[test]
    fn validate_blocks_ssh_subtree() {
        let dir = TempDir::new().unwrap();
        let ssh = dir.path().join(".ssh");
        fs::create_dir(&ssh).unwrap();
        let key = ssh.join("config");
        fs::write(&key, "Host *").unwrap();

        let policy = policy_for(&dir);
        let err = policy.validate(&key).unwrap_err();
        assert_eq!(err.kind(), "blocked_shell_file");
    }

    // ── Secure open ───────────────────────────────────────────────────────────

    #[test]
    fn open_secure_reads_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "hello").unwrap();

        let policy = policy_for(&dir);
        let (handle, real) = policy.open_secure_read(&file).unwrap();
        assert!(real.ends_with("data.txt"));
        assert_eq!(handle.metadata().unwrap().len(), 5);
    }

    #[test]
    fn open_secure_missing_file_is_file_open() {
        let dir = TempDir::new().unwrap();
        let policy = policy_for(&dir);
        let err = policy
            .open_secure_read(&dir.path().join("nope.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), "file_open");
    }

    // ── Classification ────────────────────────────────────────────────────────

    #[test]
    fn classify_env_and_keys_ask() {
        let policy = PathPolicy::new(vec![PathBuf::from("/")]);
        assert_eq!(policy.classify(Path::new("/app/.env")), Permission::Ask);
        assert_eq!(
            policy.classify(Path::new("/app/.env.production")),
            Permission::Ask
        );
        assert_eq!(policy.classify(Path::new("/app/server.pem")), Permission::Ask);
        assert_eq!(
            policy.classify(Path::new("/home/u/.aws/credentials")),
            Permission::Ask
        );
        assert_eq!(
            policy.classify(Path::new("/repo/.git/config")),
            Permission::Ask
        );
    }

    #[test]
    fn classify_plain_source_auto() {
        let policy = PathPolicy::new(vec![PathBuf::from("/")]);
        assert_eq!(policy.classify(Path::new("/repo/src/main.rs")), Permission::Auto);
        assert_eq!(policy.classify(Path::new("/repo/README.md")), Permission::Auto);
    }
}
