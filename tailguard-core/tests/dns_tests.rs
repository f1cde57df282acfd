use std::fs;
use std::os::unix::fs::PermissionsExt;
use tailguard_core::dns::{ensure_nameservers, MergeOutcome, LOCAL_NAMESERVERS};
use tailguard_core::error::DnsError;
use tempfile::TempDir;

/// Test a missing resolver file is created with exactly the local lines
#[test]
fn test_creates_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");

    let outcome = ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    assert_eq!(outcome, MergeOutcome::Created);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "nameserver 127.0.0.1\nnameserver ::1\n"
    );
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}

/// Test foreign content survives and the local lines are prepended
#[test]
fn test_prepends_and_keeps_foreign_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::write(&path, "search example.com\nnameserver 10.0.0.2\n").unwrap();

    let outcome = ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    assert_eq!(outcome, MergeOutcome::Prepended(2));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "nameserver 127.0.0.1\nnameserver ::1\nsearch example.com\nnameserver 10.0.0.2\n"
    );
}

/// Test only the absent line is added
#[test]
fn test_prepends_only_missing_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::write(&path, "options ndots:5\nnameserver ::1\n").unwrap();

    let outcome = ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    assert_eq!(outcome, MergeOutcome::Prepended(1));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "nameserver 127.0.0.1\noptions ndots:5\nnameserver ::1\n"
    );
}

/// Test a second merge is a no-op
#[test]
fn test_merge_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::write(&path, "search example.com\n").unwrap();

    ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();
    let after_first = fs::read_to_string(&path).unwrap();

    let outcome = ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    assert_eq!(outcome, MergeOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
}

/// Test an already complete file is left untouched, even out of order
#[test]
fn test_complete_file_is_not_rewritten() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    let content = "nameserver ::1\n  nameserver 127.0.0.1\n";
    fs::write(&path, content).unwrap();
    let before = fs::metadata(&path).unwrap().modified().unwrap();

    let outcome = ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    assert_eq!(outcome, MergeOutcome::Unchanged);
    assert_eq!(fs::read_to_string(&path).unwrap(), content);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
}

/// Test the existing file mode is carried over to the replacement
#[test]
fn test_rewrite_preserves_mode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::write(&path, "search example.com\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

    ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);
}

/// Test no temporary files are left next to the resolver file
#[test]
fn test_no_temporary_files_left_behind() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::write(&path, "search example.com\n").unwrap();

    ensure_nameservers(&path, &LOCAL_NAMESERVERS).unwrap();

    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("resolv.conf")]);
}

/// Test an unreadable target fails without touching anything
#[test]
fn test_unreadable_target_reports_read_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolv.conf");
    fs::create_dir(&path).unwrap();

    let result = ensure_nameservers(&path, &LOCAL_NAMESERVERS);

    assert!(matches!(result, Err(DnsError::ReadFailed { .. })));
    assert!(path.is_dir());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

/// Test a missing parent directory surfaces as a write failure
#[test]
fn test_missing_parent_reports_write_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent").join("resolv.conf");

    let result = ensure_nameservers(&path, &LOCAL_NAMESERVERS);

    match result {
        Err(DnsError::WriteFailed { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert!(!path.exists());
}
