use braid_core::model::{Priority, Status};
use braid_storage::{CreateIssue, DepEdgeInput, IssueUpdate, ListFilters, MatchType, SqliteStore};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("braid-{label}-{}-{nanos}", std::process::id()));
    // The leaf name becomes the issue prefix on cold start.
    path.push("wk");
    path
}

fn open(label: &str) -> SqliteStore {
    SqliteStore::open(temp_workspace(label)).expect("fresh workspace should open")
}

fn quick(store: &mut SqliteStore, title: &str) -> String {
    store
        .create_issue(
            CreateIssue {
                title: title.to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("create issue")
        .id
}

#[test]
fn create_generates_prefixed_id_and_records_side_effects() {
    let mut store = open("create");
    let issue = store
        .create_issue(
            CreateIssue {
                title: "  Fix the widget  ".to_string(),
                priority: Some(Priority::HIGH),
                labels: vec!["ui".to_string()],
                ..Default::default()
            },
            "tester",
        )
        .expect("create issue");

    assert!(issue.id.starts_with("wk-"), "id was {}", issue.id);
    assert_eq!(issue.title, "Fix the widget", "title is trimmed");
    assert_eq!(issue.status, Status::Open);
    assert_eq!(issue.labels, vec!["ui".to_string()]);
    assert!(issue.content_hash.is_some(), "hash computed at creation");

    let events = store.get_events(&issue.id, 0).expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type.as_str(), "created");

    assert_eq!(store.get_dirty_ids().expect("dirty"), vec![issue.id.clone()]);
}

#[test]
fn title_and_priority_bounds_are_enforced() {
    let mut store = open("bounds");
    let too_long = "x".repeat(501);
    let err = store
        .create_issue(
            CreateIssue {
                title: too_long,
                ..Default::default()
            },
            "tester",
        )
        .expect_err("overlong title rejected");
    assert_eq!(err.code(), "VALIDATION");

    let err = store
        .create_issue(
            CreateIssue {
                title: "   ".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect_err("blank title rejected");
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn update_manages_closed_boundary_and_content_hash() {
    let mut store = open("update");
    let id = quick(&mut store, "Close me");
    let before = store.get_issue(&id).expect("get").expect("present");

    let updated = store
        .update_issue(
            &id,
            &IssueUpdate {
                status: Some(Status::Closed),
                close_reason: Some(Some("done".to_string())),
                ..Default::default()
            },
            "tester",
        )
        .expect("close via update");
    assert_eq!(updated.status, Status::Closed);
    assert!(updated.closed_at.is_some(), "closed implies closed_at");
    assert_ne!(
        updated.content_hash, before.content_hash,
        "status participates in the hash"
    );

    let reopened = store
        .update_issue(
            &id,
            &IssueUpdate {
                status: Some(Status::Open),
                ..Default::default()
            },
            "tester",
        )
        .expect("reopen via update");
    assert_eq!(reopened.closed_at, None);
    assert_eq!(reopened.close_reason, None);

    let kinds: Vec<String> = store
        .get_events(&id, 0)
        .expect("events")
        .into_iter()
        .map(|event| event.event_type.as_str().to_string())
        .collect();
    assert!(kinds.contains(&"closed".to_string()));
    assert!(kinds.contains(&"reopened".to_string()));
}

#[test]
fn update_rejects_tombstone_transition() {
    let mut store = open("no-tombstone-update");
    let id = quick(&mut store, "A");
    let err = store
        .update_issue(
            &id,
            &IssueUpdate {
                status: Some(Status::Tombstone),
                ..Default::default()
            },
            "tester",
        )
        .expect_err("tombstone via update is rejected");
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn timestamp_only_changes_keep_the_hash() {
    let mut store = open("hash-stability");
    let id = quick(&mut store, "Stable");
    let before = store.get_issue(&id).expect("get").expect("present");

    // An update that touches no substantive field leaves the hash alone.
    let updated = store
        .update_issue(
            &id,
            &IssueUpdate {
                due_at: Some(Some(1_900_000_000_000)),
                ..Default::default()
            },
            "tester",
        )
        .expect("update due_at");
    assert_eq!(updated.content_hash, before.content_hash);
}

#[test]
fn soft_delete_and_restore_round_trip() {
    let mut store = open("tombstone");
    let id = quick(&mut store, "Doomed");

    let deleted = store
        .delete_issue(&id, "obsolete", "tester")
        .expect("soft delete");
    assert_eq!(deleted.status, Status::Tombstone);
    assert!(deleted.deleted_at.is_some(), "tombstone implies deleted_at");
    assert_eq!(deleted.original_type.as_deref(), Some("task"));

    assert!(
        store.get_issue(&id).expect("get").is_none(),
        "default read excludes tombstones"
    );
    assert!(
        store.get_issue_any(&id).expect("get any").is_some(),
        "tombstone still present"
    );

    let restored = store.restore_issue(&id, "tester").expect("restore");
    assert_eq!(restored.status, Status::Open);
    assert_eq!(restored.deleted_at, None);
    assert_eq!(restored.original_type, None);
}

#[test]
fn hard_delete_is_limited_to_never_exported_ephemerals() {
    let mut store = open("hard-delete");
    let durable = quick(&mut store, "Durable");
    let err = store
        .hard_delete_issue(&durable)
        .expect_err("non-ephemeral refused");
    assert_eq!(err.code(), "VALIDATION");

    let ephemeral = store
        .create_issue(
            CreateIssue {
                title: "Scratch".to_string(),
                ephemeral: true,
                ..Default::default()
            },
            "tester",
        )
        .expect("create ephemeral")
        .id;
    store.hard_delete_issue(&ephemeral).expect("hard delete");
    assert!(store.get_issue_any(&ephemeral).expect("get").is_none());
}

#[test]
fn failed_mutation_leaves_no_side_effects() {
    let mut store = open("rollback");
    let id = quick(&mut store, "A");
    store.clear_all_dirty().expect("reset dirty");

    let err = store
        .add_dependency(&id, DepEdgeInput::blocks("wk-missing"), "tester")
        .expect_err("dangling internal target rejected");
    assert_eq!(err.code(), "NOT_FOUND");

    assert_eq!(
        store.get_dependencies(&id).expect("deps"),
        Vec::<String>::new()
    );
    assert_eq!(
        store.get_dirty_ids().expect("dirty"),
        Vec::<String>::new(),
        "rollback must clear dirty marks"
    );
    let events = store.get_events(&id, 0).expect("events");
    assert_eq!(events.len(), 1, "only the creation event survives");
}

#[test]
fn labels_are_idempotent_and_provides_is_reserved() {
    let mut store = open("labels");
    let id = quick(&mut store, "A");

    assert!(store.add_label(&id, "backend", "tester").expect("add"));
    assert!(!store.add_label(&id, "backend", "tester").expect("re-add"));
    let err = store
        .add_label(&id, "provides:auth", "tester")
        .expect_err("reserved namespace");
    assert_eq!(err.code(), "VALIDATION");

    assert!(store.remove_label(&id, "backend", "tester").expect("remove"));
    assert!(!store.remove_label(&id, "backend", "tester").expect("re-remove"));
}

#[test]
fn comments_are_append_only() {
    let mut store = open("comments");
    let id = quick(&mut store, "A");

    store
        .add_comment(&id, "alice", "first", "alice")
        .expect("comment");
    store
        .add_comment(&id, "alice", "first", "alice")
        .expect("duplicate comment is appended, not deduped");
    assert_eq!(store.get_comments(&id).expect("comments").len(), 2);

    let err = store
        .add_comment(&id, "", "text", "alice")
        .expect_err("author required");
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn external_ref_uniqueness_is_enforced() {
    let mut store = open("external-ref");
    store
        .create_issue(
            CreateIssue {
                title: "First".to_string(),
                external_ref: Some("gh-42".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect("first ref");
    let err = store
        .create_issue(
            CreateIssue {
                title: "Second".to_string(),
                external_ref: Some("gh-42".to_string()),
                ..Default::default()
            },
            "tester",
        )
        .expect_err("duplicate external_ref rejected");
    assert_ne!(err.code(), "NOT_FOUND");
}

#[test]
fn child_ids_use_dotted_counters() {
    let mut store = open("children");
    let parent = quick(&mut store, "Parent");
    let child = store
        .create_issue(
            CreateIssue {
                title: "Child".to_string(),
                parent: Some(parent.clone()),
                ..Default::default()
            },
            "tester",
        )
        .expect("child");
    assert_eq!(child.id, format!("{parent}.1"));

    let second = store
        .create_issue(
            CreateIssue {
                title: "Second child".to_string(),
                parent: Some(parent.clone()),
                ..Default::default()
            },
            "tester",
        )
        .expect("second child");
    assert_eq!(second.id, format!("{parent}.2"));

    assert_eq!(
        store.get_parent_id(&child.id).expect("parent"),
        Some(parent)
    );
}

#[test]
fn partial_id_resolution_prefers_exact_matches() {
    let mut store = open("resolve");
    for suffix in ["1", "10", "100"] {
        store
            .create_issue(
                CreateIssue {
                    id: Some(format!("wk-{suffix}")),
                    title: format!("Issue {suffix}"),
                    ..Default::default()
                },
                "tester",
            )
            .expect("explicit id");
    }

    let resolved = store.resolve_id("wk-1").expect("resolve");
    assert_eq!(resolved.id, "wk-1");
    assert_eq!(resolved.match_type, MatchType::Exact);

    let resolved = store.resolve_id("100").expect("normalized");
    assert_eq!(resolved.id, "wk-100");
    assert_eq!(resolved.match_type, MatchType::Normalized);

    let err = store.resolve_id("wk-9").expect_err("no match");
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn ambiguous_partials_list_candidates() {
    let mut store = open("ambiguous");
    for id in ["wk-abc1", "wk-abc2"] {
        store
            .create_issue(
                CreateIssue {
                    id: Some(id.to_string()),
                    title: id.to_string(),
                    ..Default::default()
                },
                "tester",
            )
            .expect("explicit id");
    }
    let err = store.resolve_id("abc").expect_err("ambiguous");
    assert_eq!(err.code(), "AMBIGUOUS_ID");
    let message = err.to_string();
    assert!(message.contains("wk-abc1") && message.contains("wk-abc2"));
}

#[test]
fn tombstones_lose_substring_disambiguation() {
    let mut store = open("resolve-tombstone");
    store
        .create_issue(
            CreateIssue {
                id: Some("wk-live1".to_string()),
                title: "Live".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("live");
    store
        .create_issue(
            CreateIssue {
                id: Some("wk-live2".to_string()),
                title: "Dead".to_string(),
                ..Default::default()
            },
            "tester",
        )
        .expect("dead");
    store
        .delete_issue("wk-live2", "gone", "tester")
        .expect("tombstone");

    let resolved = store.resolve_id("live").expect("resolve substring");
    assert_eq!(resolved.id, "wk-live1");
    assert_eq!(resolved.match_type, MatchType::Substring);
}

#[test]
fn list_filters_exclude_closed_and_templates_by_default() {
    let mut store = open("list");
    let open_id = quick(&mut store, "Open one");
    let closed_id = quick(&mut store, "Closed one");
    store
        .close_issue(&closed_id, "done", None, false, "tester")
        .expect("close");
    store
        .create_issue(
            CreateIssue {
                title: "Template".to_string(),
                is_template: true,
                ..Default::default()
            },
            "tester",
        )
        .expect("template");

    let listed = store.list_issues(&ListFilters::default()).expect("list");
    let ids: Vec<&str> = listed.iter().map(|issue| issue.id.as_str()).collect();
    assert_eq!(ids, vec![open_id.as_str()]);

    let all = store
        .list_issues(&ListFilters {
            include_closed: true,
            include_templates: true,
            ..Default::default()
        })
        .expect("list all");
    assert_eq!(all.len(), 3);

    let found = store
        .search_issues("Open", &ListFilters::default())
        .expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, open_id);
}

#[test]
fn issue_details_aggregate_relations() {
    let mut store = open("details");
    let a = quick(&mut store, "A");
    let b = store
        .create_issue(
            CreateIssue {
                title: "B".to_string(),
                dependencies: vec![DepEdgeInput::blocks(a.clone())],
                labels: vec!["x".to_string()],
                ..Default::default()
            },
            "tester",
        )
        .expect("b")
        .id;
    store.add_comment(&b, "alice", "hi", "alice").expect("comment");

    let details = store
        .get_issue_details(&b, true, true, 0)
        .expect("details")
        .expect("present");
    assert_eq!(details.labels, vec!["x".to_string()]);
    assert_eq!(details.dependencies.len(), 1);
    assert_eq!(details.dependencies[0].id, a);
    assert_eq!(details.comments.len(), 1);
    assert!(!details.events.is_empty());

    let dependents = store.get_dependents_with_metadata(&a).expect("dependents");
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].id, b);
}
