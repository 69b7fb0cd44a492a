use chrono::Utc;
use client_portal_progress_lib::{AssessmentPart, Database, PartThreeStatus, ProgressService, Responses};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;

fn answers(count: usize, prefix: &str) -> Responses {
    (0..count)
        .map(|index| (format!("{}{}", prefix, index), serde_json::json!(format!("answer {}", index))))
        .collect()
}

fn raw(dir: &Path) -> Connection {
    Connection::open(dir.join("progress.sqlite")).expect("raw connection")
}

/// Part One row as the old web client left it: answers but no status.
fn seed_intake(conn: &Connection, user_id: &str, group_id: &str, count: usize) {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO client_intake (id, user_id, email, group_id, responses, created_at, updated_at)
         VALUES (?1, ?2, 'legacy@practice.co.uk', ?3, ?4, ?5, ?5)",
        params![
            format!("intake-{}", user_id),
            user_id,
            group_id,
            serde_json::to_string(&answers(count, "p1_")).expect("json"),
            now
        ],
    )
    .expect("seed intake");
}

fn seed_legacy_part_two(conn: &Connection, group_id: &str, responses: &Responses) {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO client_intake_part2 (group_id, responses, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![group_id, serde_json::to_string(responses).expect("json"), now],
    )
    .expect("seed legacy part two");
}

#[tokio::test]
async fn new_user_reconciles_to_all_false() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");

    let progress = service.force_refresh_progress("brand-new-user").await;
    assert!(!progress.part1_complete);
    assert!(!progress.part2_complete);
    assert!(!progress.part3_complete);
    assert!(!progress.roadmap_generated);
    assert!(!progress.board_generated);
    assert!(progress.degraded.is_empty());
}

#[tokio::test]
async fn part_one_with_twenty_answers_and_no_status_is_complete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    seed_intake(&raw(dir.path()), "user-2", "group-2", 20);

    let progress = service.load_progress("user-2").await;
    assert!(progress.part1_complete);
    assert_eq!(progress.part1_answers.len(), 20);
    assert!(!progress.part2_complete);
}

#[tokio::test]
async fn legacy_part_two_keyed_only_by_group_is_found_and_completes_by_volume() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    let conn = raw(dir.path());
    seed_intake(&conn, "user-3", "group-3", 2);
    seed_legacy_part_two(&conn, "group-3", &answers(52, "p2_"));

    let progress = service.load_progress("user-3").await;
    assert!(!progress.part1_complete);
    assert!(progress.part2_complete);
    assert_eq!(progress.part2_answers.len(), 52);
}

#[tokio::test]
async fn concurrent_disjoint_saves_both_survive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    service
        .save_part_one("user-4", "owner@practice.co.uk", &answers(1, "p1_"), None)
        .await
        .expect("part one");

    let mut first = Responses::new();
    first.insert("a".to_string(), serde_json::json!(1));
    let mut second = Responses::new();
    second.insert("b".to_string(), serde_json::json!(2));

    let left = Arc::clone(&service);
    let right = Arc::clone(&service);
    let handles = vec![
        tokio::spawn(async move { left.save_responses("user-4", None, AssessmentPart::Two, &first).await }),
        tokio::spawn(async move { right.save_responses("user-4", None, AssessmentPart::Two, &second).await }),
    ];
    for handle in handles {
        handle.await.expect("join").expect("save");
    }

    let progress = service.force_refresh_progress("user-4").await;
    assert_eq!(progress.part2_answers.get("a"), Some(&serde_json::json!(1)));
    assert_eq!(progress.part2_answers.get("b"), Some(&serde_json::json!(2)));
    assert_eq!(progress.part2_answers.len(), 2);
}

#[tokio::test]
async fn roadmap_in_config_counts_without_part_two_flag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    let conn = raw(dir.path());
    seed_intake(&conn, "user-5", "group-5", 15);
    seed_legacy_part_two(&conn, "group-5", &answers(3, "p2_"));
    conn.execute(
        "INSERT INTO client_config (group_id, roadmap, updated_at) VALUES ('group-5', '{\"weeks\":12}', ?1)",
        [Utc::now().to_rfc3339()],
    )
    .expect("seed config");

    let progress = service.load_progress("user-5").await;
    assert!(progress.roadmap_generated);
    assert!(!progress.part2_complete);
    assert_eq!(progress.roadmap, Some(serde_json::json!({ "weeks": 12 })));

    let status = service.roadmap_status("user-5").await;
    assert!(status.roadmap_exists);
    assert!(!status.board_exists);
}

#[tokio::test]
async fn group_id_is_stable_across_reconciliations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    let saved = service
        .save_part_one("user-6", "owner@practice.co.uk", &answers(4, "p1_"), None)
        .await
        .expect("part one");
    service
        .save_part_one("user-6", "owner@practice.co.uk", &answers(6, "more_"), None)
        .await
        .expect("more answers");

    let first = service.force_refresh_progress("user-6").await;
    let second = service.force_refresh_progress("user-6").await;
    assert_eq!(first.group_id.as_deref(), Some(saved.group_id.as_str()));
    assert_eq!(first.group_id, second.group_id);
}

#[tokio::test]
async fn embedded_part_three_is_complete_only_with_value_analysis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    let conn = raw(dir.path());
    seed_intake(&conn, "user-7", "group-7", 15);
    seed_legacy_part_two(&conn, "group-7", &answers(5, "p2_"));
    conn.execute(
        "UPDATE client_intake_part2 SET part3_data = ?1 WHERE group_id = 'group-7'",
        [serde_json::to_string(&answers(4, "asset_")).expect("json")],
    )
    .expect("embed responses");

    let in_progress = service.force_refresh_progress("user-7").await;
    assert_eq!(in_progress.part3_status, PartThreeStatus::InProgress);
    assert!(!in_progress.part3_complete);
    assert_eq!(in_progress.part3_answers.len(), 4);

    conn.execute(
        "UPDATE client_intake_part2 SET value_analysis_data = '{\"hiddenValue\":125000}' WHERE group_id = 'group-7'",
        [],
    )
    .expect("embed analysis");

    let complete = service.force_refresh_progress("user-7").await;
    assert_eq!(complete.part3_status, PartThreeStatus::Complete);
    assert!(complete.part3_complete);
    assert!(complete.value_analysis_complete);
}

#[tokio::test]
async fn legacy_users_are_migrated_on_first_write() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = ProgressService::open(dir.path()).expect("service");
    let conn = raw(dir.path());
    seed_intake(&conn, "user-8", "group-8", 15);
    seed_legacy_part_two(&conn, "group-8", &answers(10, "old_"));

    service
        .save_part_two("user-8", Some("group-8"), &answers(3, "new_"))
        .await
        .expect("save");
    let migrated: i64 = conn
        .query_row("SELECT COUNT(*) FROM assessments WHERE user_id = 'user-8'", [], |row| row.get(0))
        .expect("count");
    assert_eq!(migrated, 1);

    let progress = service.force_refresh_progress("user-8").await;
    assert_eq!(progress.part2_answers.len(), 13);

    let error = service
        .save_part_two("user-8", Some("some-other-group"), &answers(1, "x"))
        .await
        .expect_err("group is immutable");
    assert!(error.to_string().starts_with("VALIDATION"));
}

#[tokio::test]
async fn database_can_back_a_service_directly() {
    let db = Database::open_in_memory().expect("db");
    let service = ProgressService::with_database(db).expect("service");
    service
        .save_part_one("user-9", "owner@practice.co.uk", &answers(15, "p1_"), None)
        .await
        .expect("part one");
    service.start_part_two("user-9").await.expect("start");
    service.set_part_two_section("user-9", 3).await.expect("section");

    let progress = service.load_progress("user-9").await;
    assert!(progress.part1_complete);
    assert_eq!(progress.current_part2_section, 3);
}
