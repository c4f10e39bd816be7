//! Tests for topology persistence.

use super::*;
use crate::topology::DEFAULT_CLUSTER_NAME;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    dir: Utf8PathBuf,
    store: FileTopologyStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let store = FileTopologyStore::in_dir(&dir, DEFAULT_CLUSTER_NAME);
    StoreFixture {
        _tmp: tmp,
        dir,
        store,
    }
}

#[rstest]
fn load_without_document_returns_empty_topology(store_fixture: StoreFixture) {
    let topology = store_fixture
        .store
        .load()
        .unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(topology.cluster_name, DEFAULT_CLUSTER_NAME);
    assert!(topology.nodes.is_empty());
    assert!(topology.nfs_servers.is_empty());
    assert!(
        !store_fixture.store.path().exists(),
        "loading must not create the document"
    );
}

#[rstest]
fn persist_then_load_round_trips(store_fixture: StoreFixture) {
    let mut topology = ClusterTopology::new("lab");
    topology.global_settings.backup_location = String::from("/srv/backup");
    topology.touch();

    store_fixture
        .store
        .persist(&topology)
        .unwrap_or_else(|err| panic!("persist: {err}"));
    let loaded = store_fixture
        .store
        .load()
        .unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(loaded, topology);
    assert_eq!(
        store_fixture.store.path(),
        store_fixture.dir.join(TOPOLOGY_FILE_NAME)
    );
}

#[rstest]
#[case("")]
#[case("nodes: [")]
#[case("cluster_name: lab\n")]
fn load_rejects_invalid_documents(store_fixture: StoreFixture, #[case] contents: &str) {
    std::fs::write(store_fixture.store.path(), contents)
        .unwrap_or_else(|err| panic!("seed document: {err}"));

    let Err(err) = store_fixture.store.load() else {
        panic!("load should fail for {contents:?}");
    };
    let TopologyStoreError::Parse { path, .. } = err else {
        panic!("expected parse error, got {err:?}");
    };
    assert_eq!(path, store_fixture.store.path());
}

#[cfg(unix)]
#[rstest]
fn persist_failure_keeps_previous_document(store_fixture: StoreFixture) {
    use std::os::unix::fs::PermissionsExt;

    let original = ClusterTopology::new("before");
    store_fixture
        .store
        .persist(&original)
        .unwrap_or_else(|err| panic!("seed: {err}"));

    std::fs::set_permissions(&store_fixture.dir, std::fs::Permissions::from_mode(0o500))
        .unwrap_or_else(|err| panic!("make dir read-only: {err}"));
    let outcome = store_fixture.store.persist(&ClusterTopology::new("after"));
    std::fs::set_permissions(&store_fixture.dir, std::fs::Permissions::from_mode(0o700))
        .unwrap_or_else(|err| panic!("restore dir permissions: {err}"));

    // Running as root bypasses directory permissions, so only assert the
    // failure path when the write was actually refused.
    if let Err(err) = outcome {
        assert!(
            matches!(err, TopologyStoreError::Persist { .. }),
            "unexpected error: {err:?}"
        );
        let loaded = store_fixture
            .store
            .load()
            .unwrap_or_else(|load_err| panic!("load: {load_err}"));
        assert_eq!(loaded.cluster_name, "before");
    }
}

#[test]
fn memory_store_failing_persist_reports_persist_error() {
    let store = MemoryTopologyStore::failing(ClusterTopology::new(DEFAULT_CLUSTER_NAME));
    let err = store
        .persist(&ClusterTopology::new("other"))
        .expect_err("persist should fail");
    assert!(matches!(err, TopologyStoreError::Persist { .. }));
    assert_eq!(
        store.load().expect("load").cluster_name,
        DEFAULT_CLUSTER_NAME
    );
}
