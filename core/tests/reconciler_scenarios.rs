/// Reconciler behaviour tests
/// Snapshot replacement, optimistic overlay, failure and timeout handling
extern crate voxie_core;

use chrono::{TimeZone, Utc};
use std::time::Duration;
use tokio::time::Instant;
use voxie_core::error::{BackendError, ErrorKind};
use voxie_core::feed::reconciler::overlay;
use voxie_core::feed::{FeedReconciler, FeedStatus, MutationKind};
use voxie_core::{CurrentUser, FeedSnapshot, Post, PostId};

const ME: &str = "me";

fn post(id: &str, content: &str, secs: i64) -> Post {
    Post {
        id: PostId::from(id),
        title: String::new(),
        content: content.to_string(),
        author_id: ME.to_string(),
        author_display_name: "me".to_string(),
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        updated_at: None,
    }
}

fn snapshot(posts: &[(&str, &str, i64)]) -> FeedSnapshot {
    FeedSnapshot::new(posts.iter().map(|(id, c, t)| post(id, c, *t)).collect())
}

fn rendered(rec: &FeedReconciler) -> Vec<(String, String)> {
    rec.render()
        .into_iter()
        .map(|p| (p.id.to_string(), p.content))
        .collect()
}

fn pair(id: &str, content: &str) -> (String, String) {
    (id.to_string(), content.to_string())
}

fn reconciler() -> FeedReconciler {
    FeedReconciler::new(Some(CurrentUser::new(ME)))
}

#[test]
fn test_edit_confirmed_by_snapshot() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "old text", 1)]), t0);

    rec.begin_edit(&PostId::from("p"), "new text", t0).unwrap();
    assert_eq!(rendered(&rec), vec![pair("p", "new text")]);

    let errors = rec.on_snapshot(snapshot(&[("p", "new text", 1)]), t0 + Duration::from_secs(1));
    assert!(errors.is_empty());
    assert!(rec.pending().is_empty());
    assert_eq!(rendered(&rec), vec![pair("p", "new text")]);
}

#[test]
fn test_unrelated_snapshot_keeps_edit_overlaid() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "old", 1)]), t0);
    rec.begin_edit(&PostId::from("p"), "new", t0).unwrap();

    // Another post arrives before our write lands
    let errors = rec.on_snapshot(
        snapshot(&[("q", "hello", 2), ("p", "old", 1)]),
        t0 + Duration::from_secs(2),
    );
    assert!(errors.is_empty());
    assert_eq!(rendered(&rec), vec![pair("q", "hello"), pair("p", "new")]);
}

#[test]
fn test_repeated_mutation_result_is_noop() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "A", 1)]), t0);
    let req = rec.begin_edit(&PostId::from("p"), "B", t0).unwrap();

    let fail = || Err(BackendError::new("permission-denied", "denied"));
    let first = rec.on_mutation_result(&req.ticket, fail()).unwrap();
    assert_eq!(first.kind, ErrorKind::MutationFailure);
    assert_eq!(first.post_id, Some(PostId::from("p")));
    assert!(first.message.contains("permission"));
    assert_eq!(rendered(&rec), vec![pair("p", "A")]);

    assert!(rec.on_mutation_result(&req.ticket, fail()).is_none());
    assert!(rec.on_mutation_result(&req.ticket, Ok(())).is_none());
    assert_eq!(rendered(&rec), vec![pair("p", "A")]);
}

#[test]
fn test_failure_takes_priority_over_timeout() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "A", 1)]), t0);
    let req = rec.begin_delete(&PostId::from("p"), t0).unwrap();
    assert_eq!(req.ticket.kind, MutationKind::Delete);
    assert!(rendered(&rec).is_empty());

    let err = rec
        .on_mutation_result(&req.ticket, Err(BackendError::new("unavailable", "down")))
        .unwrap();
    assert_eq!(err.kind, ErrorKind::MutationFailure);
    assert_eq!(rendered(&rec), vec![pair("p", "A")]);

    // Nothing left to time out
    assert!(rec.poll_timeouts(t0 + Duration::from_secs(60)).is_empty());
    assert!(rec
        .on_snapshot(snapshot(&[("p", "A", 1)]), t0 + Duration::from_secs(60))
        .is_empty());
}

#[test]
fn test_edit_timeout_reverts_exactly_once() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "before", 1)]), t0);
    rec.begin_edit(&PostId::from("p"), "x", t0).unwrap();

    assert!(rec.poll_timeouts(t0 + Duration::from_secs(5)).is_empty());
    assert_eq!(rendered(&rec), vec![pair("p", "x")]);

    let errors = rec.poll_timeouts(t0 + Duration::from_millis(10_001));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Timeout);
    assert_eq!(rendered(&rec), vec![pair("p", "before")]);

    assert!(rec.poll_timeouts(t0 + Duration::from_secs(20)).is_empty());
    assert!(rec
        .on_snapshot(snapshot(&[("p", "before", 1)]), t0 + Duration::from_secs(21))
        .is_empty());
}

#[test]
fn test_edit_timeout_detected_on_snapshot() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "before", 1)]), t0);
    rec.begin_edit(&PostId::from("p"), "x", t0).unwrap();

    let errors = rec.on_snapshot(snapshot(&[("p", "other", 1)]), t0 + Duration::from_secs(11));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Timeout);
    assert!(errors[0].message.starts_with("save failed"));
    assert_eq!(rendered(&rec), vec![pair("p", "other")]);
}

#[test]
fn test_delete_timeout_restores_post() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "A", 1)]), t0);
    rec.begin_delete(&PostId::from("p"), t0).unwrap();

    let errors = rec.on_snapshot(snapshot(&[("p", "A", 1)]), t0 + Duration::from_secs(11));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("delete failed"));
    assert_eq!(rendered(&rec), vec![pair("p", "A")]);
}

#[test]
fn test_delete_confirmed_by_absence() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("a", "A", 2), ("b", "B", 1)]), t0);
    rec.begin_delete(&PostId::from("b"), t0).unwrap();
    assert_eq!(rendered(&rec), vec![pair("a", "A")]);

    let errors = rec.on_snapshot(snapshot(&[("a", "A", 2)]), t0 + Duration::from_secs(1));
    assert!(errors.is_empty());
    assert!(rec.pending().is_empty());
    assert_eq!(rendered(&rec), vec![pair("a", "A")]);
}

#[test]
fn test_edit_after_delete_conflicts() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("p", "A", 1)]), t0);
    rec.begin_delete(&PostId::from("p"), t0).unwrap();

    let err = rec.begin_edit(&PostId::from("p"), "y", t0).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.message, "post is being deleted");
    assert!(rendered(&rec).is_empty());
    assert!(rec.pending().delete(&PostId::from("p")).is_some());
}

#[test]
fn test_edit_target_deleted_elsewhere() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("1", "A", 2), ("2", "B", 1)]), t0);

    rec.begin_edit(&PostId::from("2"), "B2", t0).unwrap();
    assert_eq!(rendered(&rec), vec![pair("1", "A"), pair("2", "B2")]);

    let errors = rec.on_snapshot(snapshot(&[("1", "A", 2)]), t0 + Duration::from_secs(1));
    assert!(errors.is_empty());
    assert!(rec.pending().is_empty());
    assert_eq!(rendered(&rec), vec![pair("1", "A")]);
}

#[test]
fn test_render_only_draws_from_latest_snapshot() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    rec.on_snapshot(snapshot(&[("a", "A", 3), ("b", "B", 2), ("c", "C", 1)]), t0);
    rec.begin_edit(&PostId::from("a"), "A2", t0).unwrap();
    rec.begin_delete(&PostId::from("b"), t0).unwrap();

    let sequences = [
        snapshot(&[("c", "C", 1)]),
        snapshot(&[("d", "D", 4), ("a", "A", 3)]),
        snapshot(&[]),
        snapshot(&[("b", "B", 2), ("a", "A2", 3)]),
    ];
    for (i, s2) in sequences.into_iter().enumerate() {
        rec.on_snapshot(s2.clone(), t0 + Duration::from_secs(i as u64));
        for shown in rec.render() {
            assert!(s2.contains(&shown.id), "{} not in latest snapshot", shown.id);
        }
    }
}

#[test]
fn test_overlay_is_pure() {
    let mut rec = reconciler();
    let t0 = Instant::now();
    let base = snapshot(&[("p", "A", 1)]);
    rec.on_snapshot(base.clone(), t0);
    rec.begin_edit(&PostId::from("p"), "B", t0).unwrap();

    let once = overlay(&base, rec.pending());
    let twice = overlay(&base, rec.pending());
    assert_eq!(once, twice);
    assert_eq!(base.posts()[0].content, "A");
}

#[test]
fn test_status_transitions() {
    let mut rec = reconciler();
    assert_eq!(rec.status(), FeedStatus::Loading);
    assert!(rec.render().is_empty());
    rec.on_snapshot(snapshot(&[]), Instant::now());
    assert_eq!(rec.status(), FeedStatus::Live);
}
