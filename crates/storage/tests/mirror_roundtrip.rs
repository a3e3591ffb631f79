use braid_core::model::Status;
use braid_core::timefmt::ms_to_rfc3339;
use braid_storage::{
    CreateIssue, ExportOptions, ImportOptions, IssueUpdate, OrphanHandling, SqliteStore,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("braid-{label}-{}-{nanos}", std::process::id()));
    path.push("wk");
    path
}

fn open(path: &Path) -> SqliteStore {
    SqliteStore::open(path).expect("workspace should open")
}

fn wipe_database(workspace: &Path) {
    for name in ["beads.db", "beads.db-wal", "beads.db-shm"] {
        let _ = std::fs::remove_file(workspace.join(name));
    }
}

fn full_export(store: &mut SqliteStore) {
    store
        .export(&ExportOptions {
            full: true,
            ..Default::default()
        })
        .expect("full export");
}

#[test]
fn round_trip_preserves_content_hash_labels_and_comments() {
    // S2: export, wipe, re-import; nothing substantive changes.
    let ws = temp_workspace("s2");
    let mut store = open(&ws);
    let issue = store
        .create_issue(
            CreateIssue {
                title: "Round trip".to_string(),
                labels: vec!["x".to_string(), "y".to_string()],
                ..Default::default()
            },
            "tester",
        )
        .expect("create");
    store
        .add_comment(&issue.id, "alice", "hi", "alice")
        .expect("comment");
    let original = store
        .get_issue(&issue.id)
        .expect("get")
        .expect("present");

    full_export(&mut store);
    let mirror = ws.join("issues.jsonl");
    let first_bytes = std::fs::read(&mirror).expect("mirror bytes");
    assert!(
        !String::from_utf8_lossy(&first_bytes).contains("content_hash"),
        "content hash never serializes"
    );

    drop(store);
    wipe_database(&ws);
    let mut store = open(&ws);
    assert_eq!(store.count_issues().expect("count"), 0);

    store.import(&ImportOptions::default()).expect("import");
    let restored = store
        .get_issue(&issue.id)
        .expect("get")
        .expect("restored");
    assert_eq!(restored.content_hash, original.content_hash);
    let mut labels = restored.labels.clone();
    labels.sort();
    assert_eq!(labels, vec!["x".to_string(), "y".to_string()]);
    assert_eq!(restored.comments.len(), 1);
    assert_eq!(restored.comments[0].text, "hi");

    // Property 7: a second export reproduces the mirror byte-for-byte.
    full_export(&mut store);
    let second_bytes = std::fs::read(&mirror).expect("mirror bytes");
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn import_clears_export_hashes() {
    let ws = temp_workspace("clear-hashes");
    let mut store = open(&ws);
    let id = store
        .create_issue(
            CreateIssue {
                title: "A".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create")
        .id;
    full_export(&mut store);
    assert!(store.has_been_exported(&id).expect("exported"));

    store.import(&ImportOptions::default()).expect("import");
    assert!(
        !store.has_been_exported(&id).expect("exported"),
        "any import invalidates the export-hash table"
    );
}

#[test]
fn incremental_export_skips_unchanged_and_clears_dirty() {
    // Property 9: equal hashes skip the write but still clear dirty bits.
    let ws = temp_workspace("incremental");
    let mut store = open(&ws);
    let id = store
        .create_issue(
            CreateIssue {
                title: "Original".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create")
        .id;
    full_export(&mut store);
    assert!(store.get_dirty_ids().expect("dirty").is_empty());

    // Change and change back: dirty, but content hash equals the export.
    store
        .update_issue(
            &id,
            &IssueUpdate {
                title: Some("Changed".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("update");
    store
        .update_issue(
            &id,
            &IssueUpdate {
                title: Some("Original".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("revert");
    assert_eq!(store.get_dirty_ids().expect("dirty"), vec![id.clone()]);

    let before = std::fs::read(ws.join("issues.jsonl")).expect("mirror");
    let report = store.export(&ExportOptions::default()).expect("incremental");
    assert!(report.skipped, "nothing to write");
    assert_eq!(report.unchanged, 1);
    assert!(store.get_dirty_ids().expect("dirty").is_empty());
    let after = std::fs::read(ws.join("issues.jsonl")).expect("mirror");
    assert_eq!(before, after, "mirror untouched");
}

#[test]
fn tombstones_survive_sync_and_never_resurrect() {
    // S3 across two workspaces.
    let ws1 = temp_workspace("s3-a");
    let mut store1 = open(&ws1);
    let a = store1
        .create_issue(
            CreateIssue {
                title: "Doomed".to_string(),
                description: Some("same content".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("create")
        .id;
    store1.delete_issue(&a, "obsolete", "tester").expect("delete");
    full_export(&mut store1);

    let ws2 = temp_workspace("s3-b");
    std::fs::create_dir_all(&ws2).expect("ws2");
    std::fs::copy(ws1.join("issues.jsonl"), ws2.join("issues.jsonl")).expect("copy M1");
    let mut store2 = open(&ws2);
    store2.import(&ImportOptions::default()).expect("import M1");
    let tombstone = store2
        .get_issue_any(&a)
        .expect("get")
        .expect("tombstone present");
    assert_eq!(tombstone.status, Status::Tombstone);

    // Same title/description re-created in ws1 under a fresh ID.
    let a2 = store1
        .create_issue(
            CreateIssue {
                title: "Doomed".to_string(),
                description: Some("same content".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("recreate")
        .id;
    assert_ne!(a, a2);
    full_export(&mut store1);
    std::fs::copy(ws1.join("issues.jsonl"), ws2.join("issues.jsonl")).expect("copy M2");

    let report = store2.import(&ImportOptions::default()).expect("import M2");
    assert!(report.tombstone_skipped >= 1, "tombstone stays authoritative");
    assert_eq!(
        store2
            .get_issue_any(&a)
            .expect("get")
            .expect("still present")
            .status,
        Status::Tombstone
    );
    assert_eq!(
        store2.get_issue(&a2).expect("get").expect("new issue").status,
        Status::Open
    );
}

#[test]
fn merge_markers_abort_import_without_side_effects() {
    // S4.
    let ws = temp_workspace("s4");
    let mut store = open(&ws);
    let id = store
        .create_issue(
            CreateIssue {
                title: "Survivor".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create")
        .id;
    full_export(&mut store);

    let mirror = ws.join("issues.jsonl");
    let mut contents = std::fs::read_to_string(&mirror).expect("read mirror");
    contents.push_str("<<<<<<< HEAD\n");
    std::fs::write(&mirror, contents).expect("corrupt mirror");

    let err = store
        .import(&ImportOptions::default())
        .expect_err("markers abort");
    assert_eq!(err.code(), "CORRUPT_INPUT");
    assert_eq!(store.count_issues().expect("count"), 1);
    assert!(
        store.get_dirty_ids().expect("dirty").is_empty(),
        "no dirty bits from a failed import"
    );
    assert_eq!(
        store.get_issue(&id).expect("get").expect("present").title,
        "Survivor"
    );
}

#[test]
fn timestamp_protection_skips_stale_echoes() {
    // S6: a replayed stale record must not clobber the local row.
    let ws = temp_workspace("s6");
    let mut store = open(&ws);
    let issue = store
        .create_issue(
            CreateIssue {
                title: "Fresh".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create");
    full_export(&mut store);

    let mirror = ws.join("issues.jsonl");
    let contents = std::fs::read_to_string(&mirror).expect("read");
    let mut lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("parse line"))
        .collect();
    for line in &mut lines {
        if line["id"] == serde_json::json!(issue.id) {
            line["title"] = serde_json::json!("Stale echo");
        }
    }
    let rewritten: String = lines
        .iter()
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(&mirror, rewritten).expect("write stale mirror");

    let mut protect = HashMap::new();
    protect.insert(issue.id.clone(), issue.updated_at);
    let report = store
        .import(&ImportOptions {
            protect_ids: protect,
            ..Default::default()
        })
        .expect("import");
    assert_eq!(report.protected_skipped, 1);

    let stored = store.get_issue(&issue.id).expect("get").expect("present");
    assert_eq!(stored.title, "Fresh");
    assert_eq!(stored.updated_at, issue.updated_at);
}

#[test]
fn newer_incoming_records_win_by_updated_at() {
    let ws = temp_workspace("lww");
    let mut store = open(&ws);
    let issue = store
        .create_issue(
            CreateIssue {
                title: "Old title".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create");
    full_export(&mut store);

    let mirror = ws.join("issues.jsonl");
    let contents = std::fs::read_to_string(&mirror).expect("read");
    let mut value: serde_json::Value =
        serde_json::from_str(contents.lines().next().expect("one line")).expect("parse");
    value["title"] = serde_json::json!("New title");
    value["updated_at"] = serde_json::json!(ms_to_rfc3339(issue.updated_at + 60_000));
    std::fs::write(&mirror, format!("{value}\n")).expect("write");

    let report = store.import(&ImportOptions::default()).expect("import");
    assert_eq!(report.updated, 1);
    let stored = store.get_issue(&issue.id).expect("get").expect("present");
    assert_eq!(stored.title, "New title");
}

#[test]
fn empty_store_refuses_full_export_over_nonempty_mirror() {
    let ws = temp_workspace("refusal");
    let mut store = open(&ws);
    store
        .create_issue(
            CreateIssue {
                title: "Existing".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create");
    full_export(&mut store);
    let mirror = ws.join("issues.jsonl");
    let before = std::fs::read(&mirror).expect("mirror");

    drop(store);
    wipe_database(&ws);
    let mut store = open(&ws);

    let err = store
        .export(&ExportOptions {
            full: true,
            ..Default::default()
        })
        .expect_err("refuse catastrophic overwrite");
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(std::fs::read(&mirror).expect("mirror"), before, "byte-identical");

    store
        .export(&ExportOptions {
            full: true,
            allow_empty_overwrite: true,
            ..Default::default()
        })
        .expect("explicit override wins");
    assert_eq!(std::fs::read(&mirror).expect("mirror"), Vec::<u8>::new());
}

#[test]
fn ephemerals_stay_out_of_the_mirror() {
    let ws = temp_workspace("ephemeral");
    let mut store = open(&ws);
    store
        .create_issue(
            CreateIssue {
                title: "Durable".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("durable");
    store
        .create_issue(
            CreateIssue {
                title: "Scratch".to_string(),
                ephemeral: true,
                ..Default::default()
            },
            "tester",
        )
        .expect("ephemeral");
    full_export(&mut store);

    let contents = std::fs::read_to_string(ws.join("issues.jsonl")).expect("mirror");
    assert!(contents.contains("Durable"));
    assert!(!contents.contains("Scratch"));
}

#[test]
fn staleness_detection_uses_the_mirror_hash() {
    let ws = temp_workspace("staleness");
    let mut store = open(&ws);
    store
        .create_issue(
            CreateIssue {
                title: "A".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create");
    full_export(&mut store);
    assert!(!store.is_mirror_stale().expect("fresh after export"));

    let mirror = ws.join("issues.jsonl");
    let mut contents = std::fs::read_to_string(&mirror).expect("read");
    contents.push_str(
        "{\"id\":\"wk-extern1\",\"title\":\"Added elsewhere\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    );
    std::fs::write(&mirror, contents).expect("mutate mirror");

    assert!(store.is_mirror_stale().expect("stale after external edit"));
    store.import(&ImportOptions::default()).expect("import");
    assert!(!store.is_mirror_stale().expect("fresh after import"));
    assert!(store.get_issue("wk-extern1").expect("get").is_some());
}

#[test]
fn out_of_band_mirror_edits_force_a_full_export() {
    let ws = temp_workspace("integrity");
    let mut store = open(&ws);
    let id = store
        .create_issue(
            CreateIssue {
                title: "A".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create")
        .id;
    full_export(&mut store);

    // Mangle the mirror out of band; nothing is dirty locally.
    std::fs::write(ws.join("issues.jsonl"), b"").expect("truncate mirror");
    let report = store.export(&ExportOptions::default()).expect("export");
    assert!(!report.skipped, "integrity guard forces the write");
    assert_eq!(report.written, 1);
    let contents = std::fs::read_to_string(ws.join("issues.jsonl")).expect("mirror");
    assert!(contents.contains(&id), "mirror restored to convergence");
}

#[test]
fn mismatched_prefixes_reject_unless_renamed() {
    let ws = temp_workspace("prefix");
    let mut store = open(&ws);
    let mirror = ws.join("issues.jsonl");
    std::fs::write(
        &mirror,
        concat!(
            "{\"id\":\"other-abc1\",\"title\":\"References other-abc2 inline\",",
            "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
            "{\"id\":\"other-abc2\",\"title\":\"Second\",",
            "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
        ),
    )
    .expect("foreign mirror");

    let err = store
        .import(&ImportOptions::default())
        .expect_err("foreign prefix rejected");
    assert_eq!(err.code(), "PREFIX_MISMATCH");
    assert_eq!(store.count_issues().expect("count"), 0, "batch rejected whole");

    let report = store
        .import(&ImportOptions {
            rename_on_import: true,
            ..Default::default()
        })
        .expect("rename on import");
    assert_eq!(report.renamed, 2);

    let renamed = store
        .get_issue("wk-abc1")
        .expect("get")
        .expect("renamed record");
    assert_eq!(
        renamed.title, "References wk-abc2 inline",
        "textual references are rewritten with token boundaries"
    );
    assert!(store.get_issue("wk-abc2").expect("get").is_some());
}

#[test]
fn foreign_tombstones_are_dropped_as_noise() {
    let ws = temp_workspace("foreign-tombstone");
    let mut store = open(&ws);
    std::fs::write(
        ws.join("issues.jsonl"),
        concat!(
            "{\"id\":\"other-dead1\",\"title\":\"Gone\",\"status\":\"tombstone\",",
            "\"deleted_at\":\"2026-01-01T00:00:00Z\",",
            "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
        ),
    )
    .expect("mirror");

    let report = store.import(&ImportOptions::default()).expect("import");
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count_issues().expect("count"), 0);
}

#[test]
fn orphan_handling_modes() {
    let orphan_line = concat!(
        "{\"id\":\"wk-zzz.1\",\"title\":\"Orphan child\",",
        "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\",",
        "\"dependencies\":[{\"issue_id\":\"wk-zzz.1\",\"depends_on_id\":\"wk-zzz\",",
        "\"type\":\"parent-child\",\"created_at\":\"2026-01-01T00:00:00Z\"}]}\n",
    );

    // strict: fail the batch.
    let ws = temp_workspace("orphan-strict");
    let mut store = open(&ws);
    std::fs::write(ws.join("issues.jsonl"), orphan_line).expect("mirror");
    let err = store
        .import(&ImportOptions {
            orphan_handling: OrphanHandling::Strict,
            ..Default::default()
        })
        .expect_err("strict fails");
    assert_eq!(err.code(), "CONFLICT");

    // skip: drop the child with a warning.
    let ws = temp_workspace("orphan-skip");
    let mut store = open(&ws);
    std::fs::write(ws.join("issues.jsonl"), orphan_line).expect("mirror");
    let report = store
        .import(&ImportOptions {
            orphan_handling: OrphanHandling::Skip,
            ..Default::default()
        })
        .expect("skip succeeds");
    assert_eq!(report.orphans_dropped, 1);
    assert!(store.get_issue("wk-zzz.1").expect("get").is_none());

    // allow: keep the dangling edge.
    let ws = temp_workspace("orphan-allow");
    let mut store = open(&ws);
    std::fs::write(ws.join("issues.jsonl"), orphan_line).expect("mirror");
    store
        .import(&ImportOptions {
            orphan_handling: OrphanHandling::Allow,
            ..Default::default()
        })
        .expect("allow succeeds");
    assert!(store.get_issue("wk-zzz.1").expect("get").is_some());

    // resurrect: a closed placeholder parent appears.
    let ws = temp_workspace("orphan-resurrect");
    let mut store = open(&ws);
    std::fs::write(ws.join("issues.jsonl"), orphan_line).expect("mirror");
    let report = store
        .import(&ImportOptions {
            orphan_handling: OrphanHandling::Resurrect,
            ..Default::default()
        })
        .expect("resurrect succeeds");
    assert_eq!(report.resurrected, 1);
    let parent = store
        .get_issue("wk-zzz")
        .expect("get")
        .expect("placeholder parent");
    assert_eq!(parent.status, Status::Closed);
}

#[test]
fn duplicate_ids_in_batch_are_corrupt_input() {
    let ws = temp_workspace("dup-ids");
    let mut store = open(&ws);
    let line = "{\"id\":\"wk-dup1\",\"title\":\"One\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n";
    std::fs::write(ws.join("issues.jsonl"), format!("{line}{line}")).expect("mirror");
    let err = store
        .import(&ImportOptions::default())
        .expect_err("duplicate ids rejected");
    assert_eq!(err.code(), "CORRUPT_INPUT");
}

#[test]
fn duplicate_external_refs_fail_or_dedupe() {
    let ws = temp_workspace("dup-ext");
    let mut store = open(&ws);
    let mirror = concat!(
        "{\"id\":\"wk-ext1\",\"title\":\"One\",\"external_ref\":\"gh-1\",",
        "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
        "{\"id\":\"wk-ext2\",\"title\":\"Two\",\"external_ref\":\"gh-1\",",
        "\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    );
    std::fs::write(ws.join("issues.jsonl"), mirror).expect("mirror");

    let err = store
        .import(&ImportOptions::default())
        .expect_err("duplicates fail by default");
    assert_eq!(err.code(), "CONFLICT");

    let report = store
        .import(&ImportOptions {
            dedupe_external_refs: true,
            ..Default::default()
        })
        .expect("keep-first policy");
    assert_eq!(report.created, 2);
    assert_eq!(
        store
            .get_issue("wk-ext1")
            .expect("get")
            .expect("first")
            .external_ref
            .as_deref(),
        Some("gh-1")
    );
    assert_eq!(
        store
            .get_issue("wk-ext2")
            .expect("get")
            .expect("second")
            .external_ref,
        None,
        "subsequent duplicates are nulled"
    );
}

#[test]
fn external_ref_updates_match_in_place() {
    // Phase 0: an incoming record with a known external_ref updates the
    // stored row even when its ID differs.
    let ws = temp_workspace("phase0");
    let mut store = open(&ws);
    let local = store
        .create_issue(
            CreateIssue {
                title: "Tracked upstream".to_string(),
                external_ref: Some("gh-7".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("create");

    let incoming = format!(
        "{{\"id\":\"wk-foreign1\",\"title\":\"Upstream edit\",\"external_ref\":\"gh-7\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"{}\"}}\n",
        ms_to_rfc3339(local.updated_at + 60_000)
    );
    std::fs::write(ws.join("issues.jsonl"), incoming).expect("mirror");

    let report = store.import(&ImportOptions::default()).expect("import");
    assert_eq!(report.updated, 1);
    let stored = store.get_issue(&local.id).expect("get").expect("present");
    assert_eq!(stored.title, "Upstream edit", "matched by external ref");
    assert!(
        store.get_issue("wk-foreign1").expect("get").is_none(),
        "no second row under the incoming id"
    );
}
