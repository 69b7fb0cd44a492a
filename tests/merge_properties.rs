use client_portal_progress_lib::{
    is_part_two_complete, AssessmentPart, CompletionRules, Database, PartTwoRecord, ProgressService, ProgressStore,
    Responses, WriteStrategy,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn responses(keys: &[String], tag: &str) -> Responses {
    keys.iter()
        .map(|key| (format!("{}_{}", tag, key), serde_json::json!(key.len())))
        .collect()
}

/// Applies each delta in order through the service and returns the stored answers.
fn apply_in_order(deltas: &[Responses]) -> Responses {
    runtime().block_on(async {
        let service = ProgressService::with_database(Database::open_in_memory().expect("db")).expect("service");
        service
            .save_part_one("prop-user", "owner@practice.co.uk", &Responses::new(), None)
            .await
            .expect("part one");
        for delta in deltas {
            service
                .save_responses("prop-user", None, AssessmentPart::Two, delta)
                .await
                .expect("save");
        }
        service.force_refresh_progress("prop-user").await.part2_answers
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_disjoint_deltas_merge_in_any_order(
        left in proptest::collection::vec("[a-z]{1,6}", 0..12),
        right in proptest::collection::vec("[a-z]{1,6}", 0..12),
    ) {
        let first = responses(&left, "l");
        let second = responses(&right, "r");

        let forward = apply_in_order(&[first.clone(), second.clone()]);
        let backward = apply_in_order(&[second.clone(), first.clone()]);
        prop_assert_eq!(&forward, &backward);

        let mut expected = first;
        expected.extend(second);
        prop_assert_eq!(forward, expected);
    }

    #[test]
    fn prop_completion_never_regresses(
        initial in 50..80usize,
        later in proptest::collection::vec(0..10usize, 1..6),
    ) {
        runtime().block_on(async {
            let service = ProgressService::with_database(Database::open_in_memory().expect("db")).expect("service");
            service
                .save_part_one("prop-user", "owner@practice.co.uk", &Responses::new(), None)
                .await
                .expect("part one");

            let opening: Responses = (0..initial)
                .map(|index| (format!("q{}", index), serde_json::json!(index)))
                .collect();
            let outcome = service
                .save_responses("prop-user", None, AssessmentPart::Two, &opening)
                .await
                .expect("opening save");
            assert!(outcome.completed);

            for (round, count) in later.into_iter().enumerate() {
                let smaller: Responses = (0..count)
                    .map(|index| (format!("q{}", index), serde_json::json!(format!("edit {}", round))))
                    .collect();
                let outcome = service
                    .save_responses("prop-user", None, AssessmentPart::Two, &smaller)
                    .await
                    .expect("later save");
                assert!(outcome.completed);
                assert!(service.force_refresh_progress("prop-user").await.part2_complete);
            }
        });
    }
}

#[test]
fn stored_record_stays_complete_after_small_rewrite() {
    let db = Database::open_in_memory().expect("db");
    db.upsert_part_one("user-1", Some("owner@practice.co.uk"), &Responses::new(), None, None)
        .expect("part one");
    let group_id = db
        .get_part_one("user-1")
        .expect("get")
        .and_then(|record| record.group_id)
        .expect("group");

    let mut record = PartTwoRecord::empty("user-1", &group_id, chrono::Utc::now());
    record.responses = (0..55).map(|index| (format!("q{}", index), serde_json::json!(index))).collect();
    record.completed = true;
    db.write_part_two(WriteStrategy::Upsert, &record, &[])
        .expect("complete");

    record.responses = Responses::new();
    record.completed = false;
    db.write_part_two(WriteStrategy::FieldByField, &record, &[])
        .expect("sparse rewrite");

    let stored = db.get_part_two("user-1", None).expect("get");
    assert!(is_part_two_complete(stored.as_ref(), &CompletionRules::default()));
}
