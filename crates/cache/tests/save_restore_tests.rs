//! Integration tests for saving and restoring through a local object store
//!
//! Tests cover upload skipping for unchanged content, fallback branches,
//! digest verification modes and the overwrite policy on restore.

use depot_archive::{
    CompressionAlgorithm, OverwritePolicy, PathSet, TempArchive, WriteOptions, archive_name,
    write_archive,
};
use depot_cache::{
    Depot, DepotConfig, Error, LocalObjectStore, ObjectStore, RestoreOutcome, SaveOutcome,
    VerifyMode,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directories for one scenario
struct Fixture {
    _tmp: TempDir,
    source: PathBuf,
    store: PathBuf,
    restore: PathBuf,
    staging: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let base = std::fs::canonicalize(tmp.path()).unwrap();
        let source = base.join("src/x");
        std::fs::create_dir_all(source.join("empty")).unwrap();
        std::fs::write(source.join("f"), "hello").unwrap();
        Self {
            source,
            store: base.join("store"),
            restore: base.join("restore"),
            staging: base.join("staging"),
            _tmp: tmp,
        }
    }

    fn config(&self, branch: &str) -> DepotConfig {
        let mut config = DepotConfig::new("app");
        config.branch = Some(branch.to_string());
        config.paths = vec![self.source.clone()];
        config.compression = CompressionAlgorithm::Gzip;
        config.overwrite = OverwritePolicy::Fail;
        config.restore_root = self.restore.clone();
        config.store_dir = Some(self.store.clone());
        config.temp_dir = Some(self.staging.clone());
        config
    }

    fn depot(&self, config: DepotConfig) -> Depot<LocalObjectStore> {
        Depot::from_config(config).unwrap()
    }

    /// Where a source file lands after restore
    fn restored(&self, source: &Path) -> PathBuf {
        self.restore.join(archive_name(source))
    }

    fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(&self.staging)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}

// =============================================================================
// Save
// =============================================================================

#[test]
fn test_save_then_unchanged() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));

    let first = depot.save().unwrap();
    assert!(matches!(first, SaveOutcome::Uploaded { .. }));
    let key = depot.config().cache_key().unwrap();
    assert_eq!(depot.store().head(&key).unwrap().as_ref(), Some(first.metadata()));

    let second = depot.save().unwrap();
    assert!(matches!(second, SaveOutcome::Unchanged { .. }));
    assert_eq!(second.metadata().digest, first.metadata().digest);
    assert!(fx.staging_is_empty());
}

#[test]
fn test_save_reuploads_changed_content() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    let first = depot.save().unwrap();

    std::fs::write(fx.source.join("f"), "changed").unwrap();
    let second = depot.save().unwrap();
    assert!(matches!(second, SaveOutcome::Uploaded { .. }));
    assert_ne!(second.metadata().digest, first.metadata().digest);
}

#[test]
fn test_save_reports_missing_paths() {
    let fx = Fixture::new();
    let mut config = fx.config("main");
    let gone = fx.source.join("does-not-exist");
    config.paths.push(gone.clone());
    let outcome = fx.depot(config).save().unwrap();
    match outcome {
        SaveOutcome::Uploaded { missing, .. } => assert_eq!(missing, vec![gone]),
        other => panic!("expected upload, got {other:?}"),
    }
}

#[test]
fn test_save_with_nothing_to_cache() {
    let fx = Fixture::new();
    let mut config = fx.config("main");
    config.paths = vec![fx.source.join("nope")];
    let err = fx.depot(config).save().unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(depot_archive::Error::NothingToCache)
    ));
}

// =============================================================================
// Restore
// =============================================================================

#[test]
fn test_restore_roundtrip() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    let saved = depot.save().unwrap();

    match depot.restore().unwrap() {
        RestoreOutcome::Restored {
            key,
            report,
            verified,
            metadata,
        } => {
            assert_eq!(key.branch, "main");
            assert!(verified);
            assert_eq!(report.digest, saved.metadata().digest);
            assert_eq!(metadata, *saved.metadata());
        }
        RestoreOutcome::Miss => panic!("expected a hit"),
    }
    assert_eq!(
        std::fs::read_to_string(fx.restored(&fx.source.join("f"))).unwrap(),
        "hello"
    );
    assert!(fx.restored(&fx.source.join("empty")).is_dir());
    assert!(fx.staging_is_empty());
}

#[test]
fn test_restore_miss() {
    let fx = Fixture::new();
    let outcome = fx.depot(fx.config("main")).restore().unwrap();
    assert!(!outcome.is_hit());
}

#[test]
fn test_restore_falls_back_to_other_branch() {
    let fx = Fixture::new();
    fx.depot(fx.config("main")).save().unwrap();

    let mut config = fx.config("feature/login");
    config.fallback_branches = vec!["develop".into(), "main".into()];
    match fx.depot(config).restore().unwrap() {
        RestoreOutcome::Restored { key, .. } => assert_eq!(key.branch, "main"),
        RestoreOutcome::Miss => panic!("expected fallback hit"),
    }
}

#[test]
fn test_restore_conflict_with_fail_policy() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    depot.save().unwrap();
    depot.restore().unwrap();

    let err = depot.restore().unwrap_err();
    match err {
        Error::Archive(depot_archive::Error::RestoreConflict { path }) => {
            assert_eq!(path, fx.restored(&fx.source.join("f")));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(fx.staging_is_empty());
}

#[test]
fn test_restore_skip_with_warning_keeps_local_edits() {
    let fx = Fixture::new();
    let mut config = fx.config("main");
    config.overwrite = OverwritePolicy::SkipWithWarning;
    let depot = fx.depot(config);
    depot.save().unwrap();
    depot.restore().unwrap();

    let restored = fx.restored(&fx.source.join("f"));
    std::fs::write(&restored, "local").unwrap();
    match depot.restore().unwrap() {
        RestoreOutcome::Restored {
            report, verified, ..
        } => {
            assert!(verified);
            assert_eq!(report.warnings, 1);
            assert_eq!(report.skipped, vec![restored.clone()]);
        }
        RestoreOutcome::Miss => panic!("expected a hit"),
    }
    assert_eq!(std::fs::read_to_string(restored).unwrap(), "local");
}

#[test]
fn test_restore_ignores_entry_recorded_for_another_key() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    depot.save().unwrap();

    // Plant the entry of app@main under the directory of other@main
    let mut config = fx.config("main");
    config.project = "other".to_string();
    let other = fx.depot(config);
    let from = fx.store.join(depot.config().cache_key().unwrap().prefix());
    let to = fx.store.join(other.config().cache_key().unwrap().prefix());
    std::fs::create_dir_all(&to).unwrap();
    for entry in std::fs::read_dir(&from).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), to.join(entry.file_name())).unwrap();
    }

    let key = other.config().cache_key().unwrap();
    assert!(other.store().head(&key).unwrap().is_some());
    assert!(!other.restore().unwrap().is_hit());
    assert!(!fx.restored(&fx.source.join("f")).exists());
    assert!(matches!(other.save().unwrap(), SaveOutcome::Uploaded { .. }));
}

// =============================================================================
// Verification
// =============================================================================

/// Replace the stored archive bytes with an archive of different content
fn tamper(fx: &Fixture, depot: &Depot<LocalObjectStore>) {
    let other = fx.source.parent().unwrap().join("other");
    std::fs::create_dir_all(&other).unwrap();
    std::fs::write(other.join("g"), "tampered").unwrap();

    let set = PathSet::from_existing([&other]).unwrap();
    let options = WriteOptions {
        compression: CompressionAlgorithm::Gzip,
        ..Default::default()
    };
    let mut artifact = write_archive(
        &set,
        &options,
        TempArchive::new(CompressionAlgorithm::Gzip).unwrap(),
    )
    .unwrap();
    let mut bytes = Vec::new();
    artifact.file.read_to_end(&mut bytes).unwrap();

    let key = depot.config().cache_key().unwrap();
    let stored = depot.store().head(&key).unwrap().unwrap();
    std::fs::write(depot.store().object_path(&key, &stored), bytes).unwrap();
}

#[test]
fn test_strict_verification_fails_on_mismatch() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    depot.save().unwrap();
    tamper(&fx, &depot);

    let err = depot.restore().unwrap_err();
    assert!(matches!(err, Error::Verification { .. }), "{err:?}");
}

#[test]
fn test_warn_verification_reports_mismatch() {
    let fx = Fixture::new();
    let mut config = fx.config("main");
    config.verify = VerifyMode::Warn;
    let depot = fx.depot(config);
    depot.save().unwrap();
    tamper(&fx, &depot);

    match depot.restore().unwrap() {
        RestoreOutcome::Restored { verified, .. } => assert!(!verified),
        RestoreOutcome::Miss => panic!("expected a hit"),
    }
}

#[test]
fn test_delete_turns_hit_into_miss() {
    let fx = Fixture::new();
    let depot = fx.depot(fx.config("main"));
    depot.save().unwrap();
    assert!(depot.delete().unwrap());
    assert!(!depot.restore().unwrap().is_hit());
}
