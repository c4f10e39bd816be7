//! Tests for the node registry.

use super::*;
use crate::credentials::KEY_DIR_NAME;
use crate::topology::DEFAULT_CLUSTER_NAME;
use crate::topology_store::{FileTopologyStore, MemoryTopologyStore};
use camino::Utf8Path;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct RegistryFixture {
    _tmp: TempDir,
    root: Utf8PathBuf,
    registry: NodeRegistry<FileTopologyStore>,
}

impl RegistryFixture {
    fn key(&self, name: &str) -> Utf8PathBuf {
        let dir = self.root.join("incoming");
        std::fs::create_dir_all(&dir).unwrap_or_else(|err| panic!("create key dir: {err}"));
        let path = dir.join(name);
        std::fs::write(&path, format!("KEY {name}"))
            .unwrap_or_else(|err| panic!("write key: {err}"));
        path
    }

    fn stored_key(&self, node: &str) -> Utf8PathBuf {
        self.root.join(KEY_DIR_NAME).join(format!("{node}_rsa"))
    }
}

#[fixture]
fn reg() -> RegistryFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let registry = NodeRegistry::new(
        FileTopologyStore::in_dir(&root, DEFAULT_CLUSTER_NAME),
        CredentialStore::in_config_dir(&root),
    );
    RegistryFixture {
        _tmp: tmp,
        root,
        registry,
    }
}

fn failing_registry(root: &Utf8Path) -> NodeRegistry<MemoryTopologyStore> {
    NodeRegistry::new(
        MemoryTopologyStore::failing(ClusterTopology::new(DEFAULT_CLUSTER_NAME)),
        CredentialStore::in_config_dir(root),
    )
}

#[rstest]
fn add_then_show_returns_registered_node(reg: RegistryFixture) {
    let key = reg.key("id_rsa");
    let added = reg
        .registry
        .add_node(
            NodeSpec::new("db1", "10.0.0.11", NodeRole::Database)
                .ssh_key(Some(key))
                .sid(Some(String::from("ORCL"))),
        )
        .unwrap_or_else(|err| panic!("add node: {err}"));

    let shown = reg
        .registry
        .show_node("db1")
        .unwrap_or_else(|err| panic!("show node: {err}"));

    assert_eq!(shown, added);
    assert_eq!(shown.name, "db1");
    assert_eq!(shown.ip, "10.0.0.11");
    assert_eq!(shown.role, NodeRole::Database);
    assert_eq!(shown.ssh_user, DEFAULT_SSH_USER);
    assert_eq!(shown.status, NodeStatus::Registered);
    assert_eq!(shown.ssh_key.as_deref(), Some("db1_rsa"));
    assert_eq!(shown.sid.as_deref(), Some("ORCL"));
    assert_eq!(shown.oracle_base.as_deref(), Some("/u01/app/oracle"));
    assert_eq!(
        shown.oracle_home.as_deref(),
        Some("/u01/app/oracle/product/19.3.0/dbhome_1")
    );
    assert!(reg.stored_key("db1").exists());

    let topology = reg
        .registry
        .topology()
        .unwrap_or_else(|err| panic!("topology: {err}"));
    assert_eq!(
        topology.ssh_keys.get("db1").map(String::as_str),
        Some(reg.stored_key("db1").as_str())
    );
    assert!(topology.updated_at.is_some());
}

#[rstest]
#[case(NodeRole::Nfs)]
#[case(NodeRole::Grid)]
#[case(NodeRole::Standby)]
fn non_database_nodes_have_no_oracle_paths(reg: RegistryFixture, #[case] role: NodeRole) {
    let node = reg
        .registry
        .add_node(NodeSpec::new("n1", "10.0.0.50", role).ssh_user("grid"))
        .unwrap_or_else(|err| panic!("add node: {err}"));

    assert_eq!(node.oracle_base, None);
    assert_eq!(node.oracle_home, None);
    assert_eq!(node.ssh_key, None);
    assert_eq!(node.ssh_user, "grid");
}

#[rstest]
fn duplicate_add_keeps_first_record_and_key(reg: RegistryFixture) {
    let first_key = reg.key("first");
    let second_key = reg.key("second");
    let first = reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database).ssh_key(Some(first_key)))
        .unwrap_or_else(|err| panic!("add node: {err}"));

    let err = reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.99", NodeRole::Grid).ssh_key(Some(second_key)))
        .expect_err("duplicate should fail");

    assert_eq!(
        err,
        RegistryError::AlreadyExists {
            name: String::from("db1")
        }
    );
    assert_eq!(reg.registry.show_node("db1").ok(), Some(first));
    let stored = std::fs::read_to_string(reg.stored_key("db1"))
        .unwrap_or_else(|err| panic!("read key: {err}"));
    assert_eq!(stored, "KEY first");
}

#[rstest]
#[case(NodeSpec::new("", "10.0.0.1", NodeRole::Database), "name")]
#[case(NodeSpec::new("../db", "10.0.0.1", NodeRole::Database), "name")]
#[case(NodeSpec::new(" db1", "10.0.0.1", NodeRole::Database), "name")]
#[case(NodeSpec::new("db1", "  ", NodeRole::Database), "ip")]
#[case(NodeSpec::new("db1", "10.0.0.1", NodeRole::Database).ssh_user(""), "ssh_user")]
fn add_rejects_blank_fields(
    reg: RegistryFixture,
    #[case] spec: NodeSpec,
    #[case] expected_field: &str,
) {
    let err = reg
        .registry
        .add_node(spec)
        .expect_err("invalid spec should fail");

    let RegistryError::InvalidField { field, .. } = err else {
        panic!("expected invalid field, got {err:?}");
    };
    assert_eq!(field, expected_field);
    assert!(
        !reg.registry.store.path().exists(),
        "nothing should be persisted"
    );
}

#[rstest]
fn missing_key_aborts_registration(reg: RegistryFixture) {
    let err = reg
        .registry
        .add_node(
            NodeSpec::new("db1", "10.0.0.11", NodeRole::Database)
                .ssh_key(Some(reg.root.join("absent"))),
        )
        .expect_err("missing key should fail");

    assert!(
        matches!(
            err,
            RegistryError::Credential(crate::credentials::CredentialError::NotFound { .. })
        ),
        "{err:?}"
    );
    assert!(matches!(
        reg.registry.show_node("db1"),
        Err(RegistryError::NodeNotFound { .. })
    ));
}

#[rstest]
fn failed_persist_removes_copied_key(reg: RegistryFixture) {
    let key = reg.key("id_rsa");
    let registry = failing_registry(&reg.root);

    let err = registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database).ssh_key(Some(key)))
        .expect_err("persist should fail");

    assert!(matches!(err, RegistryError::Persistence(_)), "{err:?}");
    assert!(!reg.stored_key("db1").exists());
    assert!(
        registry
            .list_nodes(None)
            .unwrap_or_else(|err| panic!("list: {err}"))
            .is_empty()
    );
}

#[rstest]
fn remove_deletes_node_and_key(reg: RegistryFixture) {
    let key = reg.key("id_rsa");
    reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database).ssh_key(Some(key)))
        .unwrap_or_else(|err| panic!("add node: {err}"));

    let removed = reg
        .registry
        .remove_node("db1")
        .unwrap_or_else(|err| panic!("remove: {err}"));

    assert_eq!(removed.name, "db1");
    assert!(matches!(
        reg.registry.show_node("db1"),
        Err(RegistryError::NodeNotFound { .. })
    ));
    assert!(!reg.stored_key("db1").exists());
    let topology = reg
        .registry
        .topology()
        .unwrap_or_else(|err| panic!("topology: {err}"));
    assert!(!topology.ssh_keys.contains_key("db1"));
    assert_eq!(
        reg.registry.resolve_key("db1"),
        Ok(None),
        "removed node must not resolve a key"
    );
}

#[rstest]
fn remove_unknown_node_is_not_found(reg: RegistryFixture) {
    assert_eq!(
        reg.registry.remove_node("ghost"),
        Err(RegistryError::NodeNotFound {
            name: String::from("ghost")
        })
    );
}

#[rstest]
fn list_nodes_is_sorted_and_filters_by_role(reg: RegistryFixture) {
    for (name, role) in [
        ("db2", NodeRole::Database),
        ("nfs1", NodeRole::Nfs),
        ("db1", NodeRole::Database),
        ("grid1", NodeRole::Grid),
    ] {
        reg
            .registry
            .add_node(NodeSpec::new(name, "10.0.0.1", role))
            .unwrap_or_else(|err| panic!("add {name}: {err}"));
    }

    let names = |nodes: Vec<Node>| nodes.into_iter().map(|node| node.name).collect::<Vec<_>>();
    let all = reg
        .registry
        .list_nodes(None)
        .unwrap_or_else(|err| panic!("list: {err}"));
    let databases = reg
        .registry
        .list_nodes(Some(NodeRole::Database))
        .unwrap_or_else(|err| panic!("list: {err}"));

    assert_eq!(names(all), ["db1", "db2", "grid1", "nfs1"]);
    assert_eq!(names(databases), ["db1", "db2"]);
}

#[rstest]
fn nfs_scenario_records_binding_and_client(reg: RegistryFixture) {
    let server = reg
        .registry
        .add_nfs_server(
            NodeSpec::new("nfs1", "10.0.0.5", NodeRole::Database),
            &[String::from("/export/backup"), String::from(" ")],
        )
        .unwrap_or_else(|err| panic!("add nfs: {err}"));
    assert_eq!(server.export_paths, ["/export/backup"]);
    assert!(server.clients.is_empty());
    reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db1: {err}"));

    reg
        .registry
        .mount_nfs("db1", "nfs1", "/export/backup", "/backup")
        .unwrap_or_else(|err| panic!("mount: {err}"));

    let record = reg
        .registry
        .nfs_server("nfs1")
        .unwrap_or_else(|err| panic!("nfs server: {err}"));
    assert_eq!(record.clients, BTreeSet::from([String::from("10.0.0.11")]));
    let node = reg
        .registry
        .show_node("db1")
        .unwrap_or_else(|err| panic!("show: {err}"));
    let [binding] = node.nfs_mounts.as_slice() else {
        panic!("expected one binding, got {:?}", node.nfs_mounts);
    };
    assert_eq!(binding.nfs_server, "nfs1");
    assert_eq!(binding.remote_path, "/export/backup");
    assert_eq!(binding.mount_point, "/backup");
    assert_eq!(
        reg
            .registry
            .show_node("nfs1")
            .map(|nfs| nfs.role)
            .ok(),
        Some(NodeRole::Nfs)
    );
}

#[rstest]
fn repeated_mounts_add_client_once(reg: RegistryFixture) {
    reg
        .registry
        .add_nfs_server(
            NodeSpec::new("nfs1", "10.0.0.5", NodeRole::Nfs),
            &[String::from("/export/backup")],
        )
        .unwrap_or_else(|err| panic!("add nfs: {err}"));
    reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db1: {err}"));

    for mount_point in ["/backup", "/backup2"] {
        reg
            .registry
            .mount_nfs("db1", "nfs1", "/export/backup", mount_point)
            .unwrap_or_else(|err| panic!("mount: {err}"));
    }

    let record = reg
        .registry
        .nfs_server("nfs1")
        .unwrap_or_else(|err| panic!("nfs server: {err}"));
    assert_eq!(record.clients.len(), 1);
    let node = reg
        .registry
        .show_node("db1")
        .unwrap_or_else(|err| panic!("show: {err}"));
    let mount_points: Vec<&str> = node
        .nfs_mounts
        .iter()
        .map(|binding| binding.mount_point.as_str())
        .collect();
    assert_eq!(mount_points, ["/backup", "/backup2"]);
}

#[rstest]
fn mount_requires_both_ends(reg: RegistryFixture) {
    reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db1: {err}"));

    assert_eq!(
        reg
            .registry
            .mount_nfs("db1", "nfs9", "/export", "/mnt"),
        Err(RegistryError::NfsServerNotFound {
            name: String::from("nfs9")
        })
    );
    assert_eq!(
        reg
            .registry
            .mount_nfs("ghost", "nfs9", "/export", "/mnt"),
        Err(RegistryError::NodeNotFound {
            name: String::from("ghost")
        })
    );
}

#[rstest]
fn add_nfs_server_requires_exports_and_unique_name(reg: RegistryFixture) {
    let err = reg
        .registry
        .add_nfs_server(NodeSpec::new("nfs1", "10.0.0.5", NodeRole::Nfs), &[])
        .expect_err("exports required");
    assert!(matches!(err, RegistryError::InvalidField { .. }), "{err:?}");

    reg
        .registry
        .add_node(NodeSpec::new("nfs1", "10.0.0.5", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add: {err}"));
    let duplicate = reg.registry.add_nfs_server(
        NodeSpec::new("nfs1", "10.0.0.6", NodeRole::Nfs),
        &[String::from("/export")],
    );
    assert_eq!(
        duplicate,
        Err(RegistryError::AlreadyExists {
            name: String::from("nfs1")
        })
    );
    assert!(
        reg
            .registry
            .list_nfs_servers()
            .unwrap_or_else(|err| panic!("list: {err}"))
            .is_empty()
    );
}

#[rstest]
fn removed_nfs_server_can_be_registered_again(reg: RegistryFixture) {
    let exports = [String::from("/nfs/backup")];
    reg.registry
        .add_nfs_server(NodeSpec::new("nfs1", "10.0.0.5", NodeRole::Nfs), &exports)
        .unwrap_or_else(|err| panic!("add nfs1: {err}"));
    reg.registry
        .add_node(NodeSpec::new("db1", "10.0.0.10", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db1: {err}"));
    reg.registry
        .mount_nfs("db1", "nfs1", "/nfs/backup", "/backup")
        .unwrap_or_else(|err| panic!("mount: {err}"));
    reg.registry
        .remove_node("nfs1")
        .unwrap_or_else(|err| panic!("remove nfs1: {err}"));

    let readded = reg
        .registry
        .add_nfs_server(
            NodeSpec::new("nfs1", "10.0.0.6", NodeRole::Nfs),
            &[String::from("/nfs/fra")],
        )
        .unwrap_or_else(|err| panic!("re-add nfs1: {err}"));

    assert_eq!(readded.ip, "10.0.0.6");
    assert_eq!(readded.export_paths, [String::from("/nfs/fra")]);
    assert_eq!(
        readded.clients.iter().map(String::as_str).collect::<Vec<_>>(),
        ["10.0.0.10"]
    );
    let stored = reg
        .registry
        .nfs_server("nfs1")
        .unwrap_or_else(|err| panic!("nfs_server: {err}"));
    assert_eq!(stored, readded);
    let node = reg
        .registry
        .show_node("nfs1")
        .unwrap_or_else(|err| panic!("show nfs1: {err}"));
    assert_eq!(node.role, NodeRole::Nfs);
    assert_eq!(node.ip, "10.0.0.6");
}

#[rstest]
fn ssh_target_requires_node_and_key(reg: RegistryFixture) {
    let key = reg.key("id_rsa");
    reg
        .registry
        .add_node(
            NodeSpec::new("db1", "10.0.0.11", NodeRole::Database)
                .ssh_user("oracle")
                .ssh_key(Some(key)),
        )
        .unwrap_or_else(|err| panic!("add db1: {err}"));
    reg
        .registry
        .add_node(NodeSpec::new("db2", "10.0.0.12", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db2: {err}"));

    let target = reg
        .registry
        .ssh_target("db1")
        .unwrap_or_else(|err| panic!("target: {err}"));
    assert_eq!(
        target,
        SshTarget {
            node: String::from("db1"),
            host: String::from("10.0.0.11"),
            user: String::from("oracle"),
            key_path: reg.stored_key("db1"),
        }
    );
    assert_eq!(
        reg.registry.ssh_target("db2"),
        Err(ExecutionError::NoCredential {
            node: String::from("db2")
        })
    );
    assert_eq!(
        reg.registry.ssh_target("ghost"),
        Err(ExecutionError::NodeNotFound {
            node: String::from("ghost")
        })
    );
}

#[rstest]
fn mark_deployed_updates_status(reg: RegistryFixture) {
    reg
        .registry
        .add_node(NodeSpec::new("db1", "10.0.0.11", NodeRole::Database))
        .unwrap_or_else(|err| panic!("add db1: {err}"));

    reg
        .registry
        .mark_deployed("db1")
        .unwrap_or_else(|err| panic!("mark: {err}"));

    let node = reg
        .registry
        .show_node("db1")
        .unwrap_or_else(|err| panic!("show: {err}"));
    assert_eq!(node.status, NodeStatus::Deployed);
    assert_eq!(node.oracledba_installed, Some(true));
}
