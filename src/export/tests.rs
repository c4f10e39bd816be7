//! Tests for snapshot and inventory exports.

use super::*;
use crate::topology::{DEFAULT_SSH_USER, NodeStatus};
use chrono::Utc;
use rstest::{fixture, rstest};
use tempfile::TempDir;

fn node(name: &str, ip: &str, role: NodeRole) -> Node {
    Node {
        name: name.to_owned(),
        ip: ip.to_owned(),
        role,
        ssh_user: DEFAULT_SSH_USER.to_owned(),
        ssh_key: None,
        sid: None,
        oracle_base: None,
        oracle_home: None,
        status: NodeStatus::Registered,
        nfs_mounts: Vec::new(),
        added_at: Utc::now(),
        oracledba_installed: None,
    }
}

#[fixture]
fn topology() -> ClusterTopology {
    let mut topology = ClusterTopology::new("lab");
    let mut db1 = node("db1", "10.0.0.11", NodeRole::Database);
    db1.sid = Some(String::from("ORCL1"));
    db1.oracle_home = Some(String::from("/u01/app/oracle/product/19.3.0/dbhome_1"));
    db1.ssh_key = Some(String::from("db1_rsa"));
    let db2 = node("db2", "10.0.0.12", NodeRole::Database);
    for record in [
        db1,
        db2,
        node("nfs1", "10.0.0.5", NodeRole::Nfs),
        node("grid1", "10.0.0.21", NodeRole::Grid),
        node("sb1", "10.0.0.31", NodeRole::Standby),
    ] {
        topology.nodes.insert(record.name.clone(), record);
    }
    topology.ssh_keys.insert(
        String::from("db1"),
        String::from("/home/ops/.oracledba/ssh_keys/db1_rsa"),
    );
    topology
}

struct ExportDir {
    _tmp: TempDir,
    exporter: TopologyExporter,
}

#[fixture]
fn export_dir() -> ExportDir {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    ExportDir {
        _tmp: tmp,
        exporter: TopologyExporter::new(root),
    }
}

#[rstest]
fn inventory_groups_database_and_nfs_hosts(topology: ClusterTopology) {
    let inventory = AutomationInventory::from_topology(&topology);
    let groups = &inventory.all.children;

    let database: Vec<&str> = groups.database_nodes.hosts.keys().map(String::as_str).collect();
    let nfs: Vec<&str> = groups.nfs_servers.hosts.keys().map(String::as_str).collect();
    assert_eq!(database, ["db1", "db2"]);
    assert_eq!(nfs, ["nfs1"]);

    let db1 = groups
        .database_nodes
        .hosts
        .get("db1")
        .unwrap_or_else(|| panic!("db1 missing"));
    assert_eq!(db1.ansible_host, "10.0.0.11");
    assert_eq!(db1.ansible_user, "root");
    assert_eq!(
        db1.ansible_ssh_private_key_file.as_deref(),
        Some("/home/ops/.oracledba/ssh_keys/db1_rsa")
    );
    assert_eq!(db1.oracle_sid.as_deref(), Some("ORCL1"));

    let db2 = groups
        .database_nodes
        .hosts
        .get("db2")
        .unwrap_or_else(|| panic!("db2 missing"));
    assert_eq!(db2.ansible_ssh_private_key_file, None);
    assert_eq!(db2.oracle_sid.as_deref(), Some(""));
    assert_eq!(db2.oracle_home.as_deref(), Some(""));

    let nfs1 = groups
        .nfs_servers
        .hosts
        .get("nfs1")
        .unwrap_or_else(|| panic!("nfs1 missing"));
    assert_eq!(nfs1.oracle_sid, None);
}

#[rstest]
fn inventory_file_has_expected_shape(export_dir: ExportDir, topology: ClusterTopology) {
    let path = export_dir
        .exporter
        .export_automation_inventory(&topology)
        .unwrap_or_else(|err| panic!("export inventory: {err}"));

    assert_eq!(path, export_dir.exporter.inventory_path());
    let contents =
        std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read inventory: {err}"));
    let document: serde_yaml::Value =
        serde_yaml::from_str(&contents).unwrap_or_else(|err| panic!("parse inventory: {err}"));
    let hosts = &document["all"]["children"]["database_nodes"]["hosts"];
    assert_eq!(hosts["db1"]["ansible_host"].as_str(), Some("10.0.0.11"));
    assert!(hosts["db2"]["ansible_ssh_private_key_file"].is_null());
    assert!(
        document["all"]["children"]["nfs_servers"]["hosts"]["db1"].is_null(),
        "database hosts must not appear under nfs_servers"
    );
    assert!(!contents.contains("grid1"));
    assert!(!contents.contains("sb1"));
}

#[rstest]
fn snapshot_round_trips(export_dir: ExportDir, topology: ClusterTopology) {
    let path = export_dir
        .exporter
        .export_snapshot(&topology)
        .unwrap_or_else(|err| panic!("export snapshot: {err}"));

    let reloaded =
        TopologyExporter::read_snapshot(&path).unwrap_or_else(|err| panic!("read back: {err}"));

    assert_eq!(path, export_dir.exporter.snapshot_path());
    assert_eq!(reloaded, topology);
}

#[rstest]
fn read_snapshot_reports_missing_and_invalid_files(export_dir: ExportDir) {
    let missing = export_dir.exporter.snapshot_path();
    assert!(matches!(
        TopologyExporter::read_snapshot(&missing),
        Err(ExportError::Read { .. })
    ));

    std::fs::write(&missing, "nodes: [").unwrap_or_else(|err| panic!("write: {err}"));
    assert!(matches!(
        TopologyExporter::read_snapshot(&missing),
        Err(ExportError::Parse { .. })
    ));
}
