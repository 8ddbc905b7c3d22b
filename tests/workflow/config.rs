//! Workspaces built from config files

use crate::common::*;
use portex::CONFIG_FILE_NAME;
use tempfile::TempDir;

#[test]
fn workspace_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "upload_workers = 2\nchunk_size = 3\nretry_backoff_ms = 1\n").unwrap();

    let remote = InMemoryRemote::shared();
    let workspace = Workspace::builder()
        .remote(remote.clone())
        .config_file(&path)
        .build()
        .unwrap();
    assert_eq!(workspace.config().upload_workers, 2);
    assert_eq!(workspace.config().max_retries, ClientConfig::default().max_retries);

    let mut ds = workspace.datasets().create("pets", None, None).unwrap();
    ds.insert_sheet("train", pets(0..10)).unwrap();
    ds.commit("pets", None).unwrap();
    // 10 rows in chunks of 3
    assert_eq!(remote.calls("add_rows"), 4);
}

#[test]
fn invalid_config_file_fails_build() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "upload_workers = 0\n").unwrap();

    let result = Workspace::builder()
        .remote(InMemoryRemote::shared())
        .config_file(&path)
        .build();
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    let missing = Workspace::builder()
        .remote(InMemoryRemote::shared())
        .config_file(dir.path().join("absent.toml"))
        .build();
    assert!(matches!(missing, Err(Error::Io(_))));
}

#[test]
fn builder_requires_collaborators() {
    let result = Workspace::builder().build();
    assert!(matches!(result, Err(Error::InvalidState(_))));
}
