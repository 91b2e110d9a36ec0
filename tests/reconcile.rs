//! Import/export and reconciliation through the full client.

mod fixtures;

use serde_json::json;

use grove::core::open_acl_unsafe;
use grove::{Coordination, CreateMode, DeleteOptions, ImportOptions, PropertyMap};

use fixtures::{connected, mknode};

const CLUSTER: &str = "\
/databases
  /main
    threads = 4
/services
  db -> /databases/main
  /web
    port = 8080
";

#[test]
fn import_builds_the_described_tree() {
    let (svc, client) = connected();
    let report = client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    assert_eq!(report.created, 4);
    assert!(report.notices.is_empty());

    assert!(svc.exists("/databases/main").unwrap());
    let main = client.get_properties("/databases/main").unwrap();
    assert_eq!(main.get("threads"), Some(&json!(4)));
    let services = client.get_properties("/services").unwrap();
    assert_eq!(services.get("db ->"), Some(&json!("/databases/main")));
    assert_eq!(client.resolve("/services/db").unwrap(), "/databases/main");
}

#[test]
fn import_is_idempotent() {
    let (_svc, client) = connected();
    client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    let second = client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    assert!(second.is_clean(), "second import reported {second:?}");
}

#[test]
fn import_updates_are_additive() {
    let (svc, client) = connected();
    mknode(&svc, "/services", "{\"operator\": \"pat\"}");
    client
        .import_tree("/services\n  threads = 2\n", "/", &ImportOptions::default())
        .unwrap();
    let props = client.get_properties("/services").unwrap();
    // Keys absent from the definition are preserved.
    assert_eq!(props.get("operator"), Some(&json!("pat")));
    assert_eq!(props.get("threads"), Some(&json!(2)));
}

#[test]
fn import_at_a_base_path() {
    let (svc, client) = connected();
    mknode(&svc, "/apps", "{}");
    client
        .import_tree("/web\n  port = 80\n", "/apps", &ImportOptions::default())
        .unwrap();
    assert!(svc.exists("/apps/web").unwrap());
}

#[test]
fn dry_run_reports_without_mutating() {
    let (svc, client) = connected();
    mknode(&svc, "/services", "{\"threads\": 1}");
    let opts = ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    };
    let report = client
        .import_tree("/services\n  threads = 4\n/new\n", "/", &opts)
        .unwrap();
    assert!(!svc.exists("/new").unwrap());
    assert_eq!(
        client.get_properties("/services").unwrap().get("threads"),
        Some(&json!(1))
    );
    // Definition children are visited in name order.
    assert_eq!(
        report.notices,
        vec![
            "add /new".to_string(),
            "/services threads change from 1 to 4".to_string(),
        ]
    );
}

#[test]
fn trim_removes_undescribed_children_below_top_level() {
    let (svc, client) = connected();
    client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    mknode(&svc, "/services/stale", "{}");
    mknode(&svc, "/unrelated", "{}");

    let opts = ImportOptions {
        trim: true,
        ..ImportOptions::default()
    };
    let report = client.import_tree(CLUSTER, "/", &opts).unwrap();
    assert!(!svc.exists("/services/stale").unwrap());
    // Top-level children of the reconcile root are never trimmed.
    assert!(svc.exists("/unrelated").unwrap());
    assert_eq!(report.deleted, 1);
}

#[test]
fn without_trim_extras_are_noticed_but_kept() {
    let (svc, client) = connected();
    client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    mknode(&svc, "/services/stale", "{}");
    let report = client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    assert!(svc.exists("/services/stale").unwrap());
    assert_eq!(
        report.notices,
        vec!["extra path not trimmed: /services/stale".to_string()]
    );
}

#[test]
fn trim_spares_ephemeral_extras() {
    let (svc, client) = connected();
    client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    svc.create(
        "/services/web/worker:9",
        "{}",
        &open_acl_unsafe(),
        CreateMode::Ephemeral,
    )
    .unwrap();
    let opts = ImportOptions {
        trim: true,
        ..ImportOptions::default()
    };
    let report = client.import_tree(CLUSTER, "/", &opts).unwrap();
    assert!(svc.exists("/services/web/worker:9").unwrap());
    assert_eq!(report.deleted, 0);
    assert!(report.notices.is_empty(), "got {:?}", report.notices);
}

#[test]
fn export_round_trips_import() {
    let (_svc, client) = connected();
    client
        .import_tree(CLUSTER, "/", &ImportOptions::default())
        .unwrap();
    let text = client.export_tree("/", false, None).unwrap();
    assert_eq!(
        text,
        "\
/databases
  /main
    threads = 4
/services
  db -> /databases/main
  /web
    port = 8080
"
    );
}

#[test]
fn export_skips_ephemerals_unless_asked() {
    let (svc, client) = connected();
    mknode(&svc, "/svc", "{}");
    svc.create("/svc/w:1", "{}", &open_acl_unsafe(), CreateMode::Ephemeral)
        .unwrap();
    assert_eq!(client.export_tree("/", false, None).unwrap(), "/svc\n");
    assert_eq!(client.export_tree("/", true, None).unwrap(), "/svc\n  /w:1\n");
}

#[test]
fn export_of_a_subtree_names_its_root() {
    let (svc, client) = connected();
    mknode(&svc, "/a", "{}");
    mknode(&svc, "/a/b", "{\"x\": 1}");
    assert_eq!(
        client.export_tree("/a/b", false, None).unwrap(),
        "/b\n  x = 1\n"
    );
}

#[test]
fn export_with_an_explicit_root_name() {
    let (svc, client) = connected();
    mknode(&svc, "/a", "{}");
    mknode(&svc, "/a/b", "{\"x\": 1}");
    // Renaming a subtree export.
    assert_eq!(
        client.export_tree("/a/b", false, Some("renamed")).unwrap(),
        "/renamed\n  x = 1\n"
    );
    // Naming the namespace root wraps everything under one node.
    assert_eq!(
        client.export_tree("/", false, Some("top")).unwrap(),
        "/top\n  /a\n    /b\n      x = 1\n"
    );
}

#[test]
fn delete_recursive_removes_a_subtree() {
    let (svc, client) = connected();
    mknode(&svc, "/a", "{}");
    mknode(&svc, "/a/b", "{}");
    mknode(&svc, "/a/b/c", "{}");
    let report = client
        .delete_recursive("/a", &DeleteOptions::default())
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert!(!svc.exists("/a").unwrap());
}

#[test]
fn delete_recursive_protects_ephemerals() {
    let (svc, client) = connected();
    mknode(&svc, "/a", "{}");
    svc.create("/a/e", "{}", &open_acl_unsafe(), CreateMode::Ephemeral)
        .unwrap();
    let report = client
        .delete_recursive("/a", &DeleteOptions::default())
        .unwrap();
    assert!(svc.exists("/a/e").unwrap());
    assert_eq!(
        report.notices,
        vec![
            "not deleting /a/e because it's ephemeral.".to_string(),
            "/a not deleted due to ephemeral descendent.".to_string(),
        ]
    );

    let force = DeleteOptions {
        force: true,
        ..DeleteOptions::default()
    };
    let report = client.delete_recursive("/a", &force).unwrap();
    assert!(!svc.exists("/a").unwrap());
    assert!(report.notices.is_empty());
}

#[test]
fn delete_recursive_dry_run_narrates_only() {
    let (svc, client) = connected();
    mknode(&svc, "/a", "{}");
    mknode(&svc, "/a/b", "{}");
    let opts = DeleteOptions {
        dry_run: true,
        ..DeleteOptions::default()
    };
    let report = client.delete_recursive("/a", &opts).unwrap();
    assert!(svc.exists("/a/b").unwrap());
    assert_eq!(
        report.notices,
        vec!["would delete /a/b.".to_string(), "would delete /a.".to_string()]
    );
    // The counter reports simulated deletions, matching a wet run exactly.
    assert_eq!(report.deleted, 2);
}

#[test]
fn bad_definition_text_is_rejected_before_any_write() {
    let (svc, client) = connected();
    let err = client
        .import_tree("/a\n  x = nonsense\n", "/", &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, grove::Error::Import(_)));
    assert!(!svc.exists("/a").unwrap());
}

#[test]
fn register_and_unregister_maintain_an_ephemeral_child() {
    let (svc, client) = connected();
    mknode(&svc, "/svc", "{}");
    client
        .register("/svc", "10.0.0.1:8080", &PropertyMap::new(), &open_acl_unsafe())
        .unwrap();
    let (_, meta) = svc.get("/svc/10.0.0.1:8080").unwrap();
    assert!(meta.is_ephemeral());
    let props = client.get_properties("/svc/10.0.0.1:8080").unwrap();
    assert_eq!(props.get("pid"), Some(&json!(std::process::id())));
    assert_eq!(client.registration_count(), 1);

    client.unregister("/svc", "10.0.0.1:8080").unwrap();
    assert!(!svc.exists("/svc/10.0.0.1:8080").unwrap());
    assert_eq!(client.registration_count(), 0);
}

#[test]
fn ln_writes_a_link_property() {
    let (svc, client) = connected();
    mknode(&svc, "/databases", "{}");
    mknode(&svc, "/databases/main", "{}");
    mknode(&svc, "/app", "{}");
    client.ln("/databases/main", "/app/db").unwrap();
    assert_eq!(client.resolve("/app/db").unwrap(), "/databases/main");

    // Trailing slash appends the source's leaf name to the target.
    client.ln("/databases/", "/app/main").unwrap();
    assert_eq!(client.resolve("/app/main").unwrap(), "/databases/main");
}
