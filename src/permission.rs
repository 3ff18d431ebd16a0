//! Directory access rules
//!
//! Each configured top-level directory carries a set of permissions; any
//! subdirectory inherits the rules of its top-level entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub path: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl DirectoryConfig {
    pub fn new(path: &str, permissions: &[Permission]) -> Self {
        Self {
            path: path.to_string(),
            permissions: permissions.to_vec(),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Invalid directory path: {0}")]
    InvalidPath(String),

    #[error("Directory is not configured: {0}")]
    UnknownDirectory(String),

    #[error("No {permission} permission on {directory}")]
    Denied {
        directory: String,
        permission: Permission,
    },
}

pub type PermissionResult<T> = Result<T, PermissionError>;

#[derive(Debug, Clone, Default)]
pub struct PermissionChecker {
    directories: Vec<DirectoryConfig>,
}

impl PermissionChecker {
    pub fn new(directories: Vec<DirectoryConfig>) -> Self {
        Self { directories }
    }

    pub fn directories(&self) -> &[DirectoryConfig] {
        &self.directories
    }

    /// Check `permission` on `directory` and return its normalized form.
    pub fn check(&self, directory: &str, permission: Permission) -> PermissionResult<String> {
        let normalized = normalize_directory(directory)?;
        let root = normalized.split('/').next().unwrap_or_default();

        let config = self
            .directories
            .iter()
            .find(|d| d.path == root)
            .ok_or_else(|| PermissionError::UnknownDirectory(root.to_string()))?;

        if !config.has_permission(permission) {
            return Err(PermissionError::Denied {
                directory: normalized,
                permission,
            });
        }

        Ok(normalized)
    }
}

/// Relative, `/`-separated path with no `.`/`..`/empty components.
pub fn normalize_directory(directory: &str) -> PermissionResult<String> {
    let invalid = || PermissionError::InvalidPath(directory.to_string());

    if directory.starts_with('/') || directory.contains('\\') || directory.contains('\0') {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    for part in directory.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid()),
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        return Err(invalid());
    }

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> PermissionChecker {
        PermissionChecker::new(vec![
            DirectoryConfig::new("public", &[Permission::Read, Permission::Write]),
            DirectoryConfig::new("archive", &[Permission::Read]),
        ])
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_directory("public").unwrap(), "public");
        assert_eq!(normalize_directory("public/./a//b/").unwrap(), "public/a/b");
        assert!(normalize_directory("public/../etc").is_err());
        assert!(normalize_directory("/etc").is_err());
        assert!(normalize_directory("a\\b").is_err());
        assert!(normalize_directory("").is_err());
        assert!(normalize_directory("./").is_err());
    }

    #[test]
    fn test_write_allowed() {
        assert_eq!(
            checker().check("public/photos", Permission::Write).unwrap(),
            "public/photos"
        );
    }

    #[test]
    fn test_write_denied_on_read_only() {
        assert!(matches!(
            checker().check("archive", Permission::Write),
            Err(PermissionError::Denied { .. })
        ));
        assert!(checker().check("archive", Permission::Read).is_ok());
    }

    #[test]
    fn test_unknown_directory() {
        assert!(matches!(
            checker().check("private", Permission::Read),
            Err(PermissionError::UnknownDirectory(_))
        ));
    }

    #[test]
    fn test_permission_serde() {
        let dir: DirectoryConfig =
            serde_json::from_str(r#"{"path": "x", "permissions": ["read", "delete"]}"#).unwrap();
        assert!(dir.has_permission(Permission::Delete));
        assert!(!dir.has_permission(Permission::Write));
    }
}
