//! End-to-end pipeline runs through the in-process queue and worker pool.

mod common;

use common::ai::{CLASSIFY_MODEL, EXTRACT_MODEL, TOKENS_PER_CALL, VISION_MODEL};
use common::*;

use lexflow::db::{action_repo, document_repo, finding_repo, matter_repo};
use lexflow::model::{ActionType, FindingStatus, RunStatus, StageStatusKind};
use lexflow::pipeline::Stage;
use lexflow::taxonomy::{ConflictDetectionMode, DataType};

const LEASE_TEXT: &[u8] = b"THIS LEASE is made between Acme Holdings Ltd and Brightside Cafe Ltd.\n\
Completion shall take place on 2025-03-01.\n";

#[tokio::test]
async fn test_single_field_run_completes_with_action_and_risk() {
    let h = TestHarness::start(lease_pack()).await;
    h.ai.reply(CLASSIFY_MODEL, classification("lease", 0.93));
    h.ai.always(
        EXTRACT_MODEL,
        finding("dates", "completion_date", "2025-03-01", 0.9),
    );
    h.add_matter("m1");
    let doc = h.add_document("m1", "lease.txt", LEASE_TEXT).await;

    let run = h.run("m1", &doc).await;

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.classified_doc_type.as_deref(), Some("lease"));
    assert_eq!(run.classification_confidence.as_deref(), Some("0.930"));
    assert_eq!(run.taxonomy_pack_id.as_deref(), Some("property-v1"));
    assert_eq!(run.findings_count, 1);
    assert_eq!(run.actions_count, 1);
    assert_eq!(run.total_tokens_used, 2 * TOKENS_PER_CALL);
    assert!(run.document_hash.is_some());
    for stage in Stage::ALL {
        assert_eq!(
            run.stage_status(stage).map(|s| s.status),
            Some(StageStatusKind::Completed),
            "{stage}"
        );
    }

    let findings = finding_repo::list_for_run(&h.db, &run.id).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].value, "2025-03-01");
    assert_eq!(findings[0].status, FindingStatus::AutoApplied);
    assert_eq!(findings[0].label, "Completion date");

    let actions = action_repo::list_for_run(&h.db, &run.id).unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type, ActionType::CreateTask);
    assert_eq!(actions[0].title, "Diary completion for 2025-03-01");
    assert_eq!(actions[0].trigger_rule_id.as_deref(), Some("diary-completion"));
    assert_eq!(actions[0].trigger_finding_id.as_deref(), Some(findings[0].id.as_str()));

    let matter = matter_repo::find_by_id(&h.db, "m1").unwrap().unwrap();
    assert!(matter.risk_updated_at.is_some());
    assert!(matter.risk_score.is_some());

    let text = document_repo::find_by_id(&h.db, &doc).unwrap().unwrap().extracted_text;
    assert!(text.unwrap().contains("Completion shall take place"));

    let timeline = h.timeline("m1");
    assert_eq!(
        timeline.iter().filter(|e| *e == "stage.completed").count(),
        6
    );
    assert_eq!(timeline.last().map(String::as_str), Some("pipeline.completed"));
}

#[tokio::test]
async fn test_date_range_conflict_flags_risk_once() {
    let pack = PackBuilder::new("property-v1")
        .category("dates", "Key dates")
        .field("dates", "completion_date", "Completion date", DataType::Date)
        .document_type("lease", "Lease", &["dates"])
        .rule("completion_date", ConflictDetectionMode::DateRange)
        .build();
    let h = TestHarness::start(pack).await;
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.95));
    h.ai.reply(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.92));
    h.ai.reply(EXTRACT_MODEL, finding("dates", "completion_date", "1 April 2025", 0.92));
    h.add_matter("m1");

    let first_doc = h.add_document("m1", "lease.txt", LEASE_TEXT).await;
    let first = h.run("m1", &first_doc).await;
    assert_eq!(first.status, RunStatus::Completed);
    assert!(action_repo::list_for_run(&h.db, &first.id).unwrap().is_empty());

    let second_doc = h
        .add_document("m1", "variation.txt", b"Deed of variation: completion moves to 1 April 2025.")
        .await;
    let second = h.run("m1", &second_doc).await;
    assert_eq!(second.status, RunStatus::Completed, "error: {:?}", second.error);

    let findings = finding_repo::list_for_run(&h.db, &second.id).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].status, FindingStatus::Conflict);
    assert_eq!(findings[0].existing_value.as_deref(), Some("2025-03-01"));

    let flags: Vec<_> = action_repo::list_for_run(&h.db, &second.id)
        .unwrap()
        .into_iter()
        .filter(|a| a.action_type == ActionType::FlagRisk)
        .collect();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].priority, 1);
    assert_eq!(flags[0].trigger_finding_id.as_deref(), Some(findings[0].id.as_str()));
    assert_eq!(flags[0].payload["existingValue"], "2025-03-01");
}

#[tokio::test]
async fn test_same_day_in_another_format_is_confirmed() {
    let pack = PackBuilder::new("property-v1")
        .category("dates", "Key dates")
        .field("dates", "completion_date", "Completion date", DataType::Date)
        .rule("completion_date", ConflictDetectionMode::DateRange)
        .build();
    let h = TestHarness::start(pack).await;
    h.ai.reply(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.9));
    h.ai.reply(EXTRACT_MODEL, finding("dates", "completion_date", "1st March 2025", 0.4));
    h.add_matter("m1");

    let first_doc = h.add_document("m1", "a.txt", b"Completion: 2025-03-01").await;
    h.run("m1", &first_doc).await;
    let second_doc = h.add_document("m1", "b.txt", b"Completion: 1st March 2025").await;
    let second = h.run("m1", &second_doc).await;

    let findings = finding_repo::list_for_run(&h.db, &second.id).unwrap();
    assert_eq!(findings[0].status, FindingStatus::AutoApplied);
    assert_eq!(findings[0].existing_value.as_deref(), Some("2025-03-01"));
}

#[tokio::test]
async fn test_existing_text_skips_ocr_and_still_advances() {
    let h = TestHarness::start(lease_pack()).await;
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.9));
    h.ai.always(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.9));
    h.add_matter("m1");
    let doc = h
        .add_document_with_text(
            "m1",
            "scan.png",
            b"\x89PNG not really",
            "Completion shall take place on 2025-03-01.",
        )
        .await;

    let run = h.run("m1", &doc).await;

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    let ocr = run.stage_status(Stage::Ocr).unwrap();
    assert_eq!(ocr.status, StageStatusKind::Skipped);
    assert_eq!(ocr.note.as_deref(), Some("text already extracted"));
    assert_eq!(h.ai.calls_to(VISION_MODEL), 0);
    assert!(h.timeline("m1").contains(&"stage.skipped".to_string()));

    let stored = document_repo::find_by_id(&h.db, &doc).unwrap().unwrap();
    assert_eq!(
        stored.extracted_text.as_deref(),
        Some("Completion shall take place on 2025-03-01.")
    );
}

#[tokio::test]
async fn test_image_is_transcribed_by_vision_model() {
    let h = TestHarness::start(lease_pack()).await;
    h.ai.reply(VISION_MODEL, "LEASE\nCompletion: 2025-03-01");
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.9));
    h.ai.always(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.9));
    h.add_matter("m1");
    let doc = h.add_document("m1", "page1.png", b"\x89PNG fake image").await;

    let run = h.run("m1", &doc).await;

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    let vision = h
        .ai
        .calls()
        .into_iter()
        .find(|r| r.model == VISION_MODEL)
        .unwrap();
    assert!(vision.has_image());
    let stored = document_repo::find_by_id(&h.db, &doc).unwrap().unwrap();
    assert_eq!(stored.extracted_text.as_deref(), Some("LEASE\nCompletion: 2025-03-01"));
    assert_eq!(run.total_tokens_used, 3 * TOKENS_PER_CALL);
}

#[tokio::test]
async fn test_duplicate_findings_across_chunks_are_stored_once() {
    let h = TestHarness::with_settings(lease_pack(), |s| {
        s.extraction.chunk_size = 40;
        s.extraction.chunk_overlap = 5;
    })
    .await;
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.9));
    h.ai.reply(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.6));
    h.ai.always(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.95));
    h.add_matter("m1");
    let doc = h.add_document("m1", "lease.txt", LEASE_TEXT).await;

    let run = h.run("m1", &doc).await;

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert!(h.ai.calls_to(EXTRACT_MODEL) >= 2);
    let findings = finding_repo::list_for_run(&h.db, &run.id).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].confidence, 0.95);
    assert_eq!(run.findings_count, 1);
}

#[tokio::test]
async fn test_classification_limits_extraction_to_activated_categories() {
    let pack = PackBuilder::new("property-v1")
        .category("dates", "Key dates")
        .field("dates", "completion_date", "Completion date", DataType::Date)
        .category("money", "Money")
        .field("money", "rent", "Annual rent", DataType::Currency)
        .document_type("notice", "Notice", &["dates"])
        .build();
    let h = TestHarness::start(pack).await;
    h.ai.always(CLASSIFY_MODEL, classification("notice", 0.9));
    h.ai.always(
        EXTRACT_MODEL,
        findings(&[
            ("dates", "completion_date", "2025-03-01", 0.9),
            ("money", "rent", "£12,000", 0.9),
        ]),
    );
    h.add_matter("m1");
    let doc = h.add_document("m1", "notice.txt", b"Notice. Completion 2025-03-01. Rent \xc2\xa312,000.").await;

    let run = h.run("m1", &doc).await;

    let findings = finding_repo::list_for_run(&h.db, &run.id).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].field_key, "completion_date");
    let prompt = h
        .ai
        .calls()
        .into_iter()
        .find(|r| r.model == EXTRACT_MODEL)
        .unwrap()
        .prompt_text();
    assert!(prompt.contains("completion_date"));
    assert!(!prompt.contains("`rent`"));
}

#[tokio::test]
async fn test_low_confidence_classification_opens_review_task() {
    let h = TestHarness::start(lease_pack()).await;
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.41));
    h.ai.always(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.9));
    h.add_matter("m1");
    let doc = h.add_document("m1", "lease.txt", LEASE_TEXT).await;

    let run = h.run("m1", &doc).await;

    assert_eq!(run.status, RunStatus::Completed);
    let tasks = lexflow::db::task_repo::list_for_matter(&h.db, "m1").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Confirm document classification");
    assert_eq!(tasks[0].run_id.as_deref(), Some(run.id.as_str()));
}

#[tokio::test]
async fn test_resume_incomplete_finishes_orphaned_runs() {
    let h = TestHarness::start(lease_pack()).await;
    h.ai.always(CLASSIFY_MODEL, classification("lease", 0.9));
    h.ai.always(EXTRACT_MODEL, finding("dates", "completion_date", "2025-03-01", 0.9));
    h.add_matter("m1");
    let doc = h.add_document("m1", "lease.txt", LEASE_TEXT).await;

    // A run row left behind by a previous process, with no job in flight.
    let orphan = lexflow::model::PipelineRun::new(FIRM, "m1", doc.as_str(), None);
    lexflow::db::run_repo::insert(&h.db, &orphan).unwrap();

    assert_eq!(h.orchestrator.resume_incomplete().await.unwrap(), 1);
    h.settle().await;

    assert_eq!(h.run_row(&orphan.id).status, RunStatus::Completed);
}
