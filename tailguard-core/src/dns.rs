//! Local resolver file management
//!
//! Makes sure the local nameserver lines sit at the top of the resolver
//! file so lookups inside the container go through AdGuard Home first.
//! Anything else already in the file is kept as is.

use crate::error::DnsError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

/// Default resolver file
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Lines that must lead the resolver file, in order
pub const LOCAL_NAMESERVERS: [&str; 2] = ["nameserver 127.0.0.1", "nameserver ::1"];

const DEFAULT_MODE: u32 = 0o644;

/// What a merge did to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The file did not exist and was created
    Created,
    /// This many missing lines were prepended
    Prepended(usize),
    /// Every required line was already present
    Unchanged,
}

/// Existing file content next to the lines it must contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsFileState {
    existing: Option<String>,
    desired: Vec<String>,
}

impl DnsFileState {
    /// `existing` is `None` when the file does not exist
    pub fn new(existing: Option<String>, desired: &[&str]) -> Self {
        Self {
            existing,
            desired: desired.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Desired lines absent from the existing content, in desired order
    pub fn missing(&self) -> Vec<&str> {
        let Some(existing) = &self.existing else {
            return self.desired.iter().map(String::as_str).collect();
        };

        let present: Vec<&str> = existing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        self.desired
            .iter()
            .map(String::as_str)
            .filter(|d| !present.contains(d))
            .collect()
    }

    /// Content the file should hold, or `None` if it needs no rewrite
    pub fn merged(&self) -> Option<String> {
        let missing = self.missing();
        if missing.is_empty() {
            return None;
        }

        let mut content = missing.join("\n");
        content.push('\n');
        if let Some(existing) = &self.existing {
            content.push_str(existing);
            if !content.ends_with('\n') {
                content.push('\n');
            }
        }
        Some(content)
    }
}

/// Ensure `desired` lines are present at the top of the file at `path`
///
/// Missing lines are prepended; existing content is never reordered or
/// dropped. The file is replaced atomically, so readers see either the old
/// or the new content and a failure leaves the original untouched.
pub fn ensure_nameservers(path: &Path, desired: &[&str]) -> Result<MergeOutcome, DnsError> {
    let existing = match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(source) => {
            return Err(DnsError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let created = existing.is_none();

    let state = DnsFileState::new(existing, desired);
    let missing = state.missing().len();
    let Some(content) = state.merged() else {
        debug!("{} already lists the local nameservers", path.display());
        return Ok(MergeOutcome::Unchanged);
    };

    let mode = fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(DEFAULT_MODE);
    write_atomic(path, &content, mode)?;

    if created {
        Ok(MergeOutcome::Created)
    } else {
        Ok(MergeOutcome::Prepended(missing))
    }
}

/// Write to a temporary sibling, sync it, then rename it over `path`
fn write_atomic(path: &Path, content: &str, mode: u32) -> Result<(), DnsError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let write_failed = |source| DnsError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".resolv.conf.")
        .tempfile_in(dir)
        .map_err(write_failed)?;
    tmp.write_all(content.as_bytes()).map_err(write_failed)?;
    tmp.as_file().sync_all().map_err(write_failed)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(write_failed)?;

    // On failure the temporary file is removed when the handle drops.
    tmp.persist(path).map_err(|e| DnsError::ReplaceFailed {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_preserves_desired_order() {
        let state = DnsFileState::new(
            Some("nameserver ::1\n".to_string()),
            &["nameserver 127.0.0.1", "nameserver 10.0.0.2", "nameserver ::1"],
        );
        assert_eq!(state.missing(), vec!["nameserver 127.0.0.1", "nameserver 10.0.0.2"]);
    }

    #[test]
    fn test_membership_uses_trimmed_lines() {
        let state = DnsFileState::new(
            Some("  nameserver 127.0.0.1  \n\tnameserver ::1\n".to_string()),
            &LOCAL_NAMESERVERS,
        );
        assert!(state.missing().is_empty());
        assert_eq!(state.merged(), None);
    }

    #[test]
    fn test_merged_keeps_blank_lines_and_comments() {
        let existing = "# generated\n\nsearch example.com\n";
        let state = DnsFileState::new(Some(existing.to_string()), &LOCAL_NAMESERVERS);
        assert_eq!(
            state.merged().unwrap(),
            "nameserver 127.0.0.1\nnameserver ::1\n# generated\n\nsearch example.com\n"
        );
    }

    #[test]
    fn test_merged_adds_trailing_newline() {
        let state = DnsFileState::new(Some("search example.com".to_string()), &LOCAL_NAMESERVERS);
        assert_eq!(
            state.merged().unwrap(),
            "nameserver 127.0.0.1\nnameserver ::1\nsearch example.com\n"
        );
    }

    #[test]
    fn test_missing_file_gets_exactly_desired_lines() {
        let state = DnsFileState::new(None, &LOCAL_NAMESERVERS);
        assert_eq!(state.merged().unwrap(), "nameserver 127.0.0.1\nnameserver ::1\n");
    }
}
