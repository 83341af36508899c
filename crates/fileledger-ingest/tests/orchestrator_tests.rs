//! End-to-end runs of the importer against the in-memory journal

mod common;

use common::{
    import_config, importer, init_test_tracing, members_csv, memory_journal, write_file,
    CollectingPersisterFactory, Member,
};
use fileledger_ingest::error::IngestError;
use fileledger_ingest::hash::FileHasher;
use fileledger_ingest::journal::Journal;
use fileledger_ingest::orchestrator::{self, extension_filter};
use fileledger_ingest::parser::{LineContext, ReadHooks};
use fileledger_ingest::policy::ExceptionPolicy;
use fileledger_ingest::{ImportEvent, ImportStatus};
use std::path::Path;

fn event_for<'a>(events: &'a [ImportEvent], name: &str) -> &'a ImportEvent {
    events
        .iter()
        .find(|e| e.original_name == name)
        .unwrap_or_else(|| panic!("no import event for {}", name))
}

fn ten_files(dir: &Path) {
    for i in 1..=10 {
        write_file(dir, &format!("f{:02}.csv", i), &members_csv(i * 10, 3));
    }
}

#[tokio::test]
async fn test_duplicate_content_is_imported_once() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "A.csv", &members_csv(1, 2));
    write_file(dir.path(), "B.csv", &members_csv(1, 2));
    write_file(dir.path(), "C.csv", &members_csv(100, 3));

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::new();
    let summary = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.complete, 2);
    assert_eq!(summary.error, 0);
    assert!(summary.pass());

    let events = journal.events().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.status == ImportStatus::Complete));
    assert_eq!(sink.attempted_names(), vec!["A.csv", "C.csv"]);
    assert_eq!(sink.committed().len(), 5);
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.csv", &members_csv(1, 4));
    write_file(dir.path(), "b.csv", &members_csv(10, 4));

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::new();
    let run = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue);

    let first = run.run().await.unwrap();
    let second = run.run().await.unwrap();

    assert_eq!(first.complete, 2);
    assert_eq!(second.total, 0);
    assert_eq!(second.complete, 0);
    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(sink.committed().len(), 8);
    assert_eq!(journal.events().await.len(), 2);
}

#[tokio::test]
async fn test_failed_file_leaves_no_rows() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.csv", &members_csv(1, 3));
    write_file(dir.path(), "b.csv", &members_csv(50, 3));

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::failing_when(|ctx| ctx.file_path.ends_with("b.csv"));
    let summary = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.complete, 1);
    assert_eq!(summary.error, 1);
    assert!(!summary.pass());

    let committed = sink.committed();
    assert_eq!(committed.len(), 3);
    assert!(committed.iter().all(|m: &Member| m.member_id != "M50"));

    let events = journal.events().await;
    let failed = event_for(&events, "b.csv");
    assert_eq!(failed.status, ImportStatus::Error);
    assert_eq!(failed.record_count, 0);
    assert!(failed.summary.as_deref().unwrap().starts_with("Error, Exception: "));
    assert!(failed.notes.is_some());

    let loaded = event_for(&events, "a.csv");
    assert_eq!(loaded.record_count, 3);
    assert_eq!(loaded.summary.as_deref(), Some("Success, Loaded 3 records"));
}

#[tokio::test]
async fn test_continue_policy_attempts_remaining_files() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    ten_files(dir.path());

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::failing_when(|ctx| ctx.file_path.ends_with("f04.csv"));
    let summary = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(sink.attempted_names().len(), 10);
    assert_eq!(summary.total, 10);
    assert_eq!(summary.complete, 9);
    assert_eq!(summary.error, 1);
}

#[tokio::test]
async fn test_rethrow_policy_stops_after_failure() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    ten_files(dir.path());

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::failing_when(|ctx| ctx.file_path.ends_with("f04.csv"));
    let result = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Rethrow)
        .run()
        .await;

    assert!(matches!(result, Err(IngestError::Persistence(_))));
    assert_eq!(
        sink.attempted_names(),
        vec!["f01.csv", "f02.csv", "f03.csv", "f04.csv"]
    );

    let events = journal.events().await;
    assert_eq!(events.len(), 4);
    assert_eq!(event_for(&events, "f04.csv").status, ImportStatus::Error);
}

#[tokio::test]
async fn test_callback_policy_decides_per_error() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    ten_files(dir.path());

    let sink = CollectingPersisterFactory::failing_when(|ctx| ctx.file_path.ends_with("f04.csv"));
    let policy = ExceptionPolicy::callback(|err| matches!(err, IngestError::Connectivity(_)));
    let summary = importer(import_config(dir.path()), memory_journal(), &sink, policy)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.error, 1);
    assert_eq!(summary.complete, 9);
}

#[tokio::test]
async fn test_failures_retried_only_when_requested() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.csv", &members_csv(1, 2));

    let journal = memory_journal();
    let failing = CollectingPersisterFactory::failing_when(|_| true);
    let first = importer(import_config(dir.path()), journal.clone(), &failing, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();
    assert_eq!(first.error, 1);

    let healthy = CollectingPersisterFactory::new();
    let second = importer(import_config(dir.path()), journal.clone(), &healthy, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();
    assert_eq!(second.total, 0);
    assert!(healthy.attempted_names().is_empty());

    let mut config = import_config(dir.path());
    config.reprocess_failures = true;
    let third = importer(config, journal.clone(), &healthy, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();
    assert_eq!(third.complete, 1);

    let events = journal.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, ImportStatus::Complete);
    assert_eq!(events[0].record_count, 2);
}

#[tokio::test]
async fn test_unknown_events_need_reprocess_flag() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "legacy.csv", &members_csv(1, 2));

    let journal = memory_journal();
    let old_batch = journal.new_batch().await.unwrap();
    let file = FileHasher::default().compute(&path).await.unwrap();
    let legacy = ImportEvent {
        id: 0,
        content_hash: file.hash.clone(),
        original_name: "legacy.csv".to_string(),
        source_path: path.display().to_string(),
        created_moment: None,
        last_write_moment: None,
        byte_length: file.byte_length as i64,
        record_count: 0,
        import_moment: chrono::Utc::now(),
        importer_name: "members".to_string(),
        importer_version: "0.0.1".to_string(),
        status: ImportStatus::Unknown,
        batch_id: old_batch.id,
        summary: None,
        notes: None,
        error_line: None,
    };
    journal.insert_raw(legacy, Some("Unknown"), &[old_batch.id]).await;

    let sink = CollectingPersisterFactory::new();
    let skipped = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();
    assert_eq!(skipped.total, 0);
    assert!(sink.attempted_names().is_empty());

    let mut config = import_config(dir.path());
    config.reprocess_unknowns = true;
    let retried = importer(config, journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();
    assert_eq!(retried.complete, 1);
    assert_eq!(journal.events().await[0].status, ImportStatus::Complete);
}

#[tokio::test]
async fn test_acknowledged_file_is_never_imported() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "broken.csv", "member_id,name,age\nM1,Ada,old\nM2,Bob,3\n");

    let journal = memory_journal();
    let event = orchestrator::acknowledge(
        journal.as_ref(),
        &FileHasher::default(),
        &path,
        "upstream sent a corrupt extract",
    )
    .await
    .unwrap();
    assert_eq!(event.status, ImportStatus::Complete);
    assert_eq!(event.record_count, 0);

    let mut config = import_config(dir.path());
    config.reprocess_failures = true;
    config.reprocess_unknowns = true;
    let sink = CollectingPersisterFactory::new();
    let summary = importer(config, journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
    assert!(sink.attempted_names().is_empty());

    let again = orchestrator::acknowledge(journal.as_ref(), &FileHasher::default(), &path, "again").await;
    assert!(matches!(again, Err(IngestError::AlreadyJournaled { .. })));
}

#[tokio::test]
async fn test_parse_error_is_journaled_with_line() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "bad.csv",
        "member_id,name,age\nM1,Ada,36\nM2,Bob,unknown\nM3,Cy,40\n",
    );

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::new();
    let summary = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.error, 1);
    assert!(sink.committed().is_empty());

    let events = journal.events().await;
    assert_eq!(events[0].status, ImportStatus::Error);
    assert_eq!(events[0].error_line, Some(3));
}

#[tokio::test]
async fn test_latin1_file_fails_on_the_offending_line() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("latin1.csv"),
        b"member_id,name,age\nM1,Ada,36\nM2,Jos\xE9,41\nM3,Cy,40\n",
    )
    .unwrap();

    let journal = memory_journal();
    let sink = CollectingPersisterFactory::new();
    let summary = importer(import_config(dir.path()), journal.clone(), &sink, ExceptionPolicy::Continue)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.error, 1);
    assert!(sink.committed().is_empty());

    let events = journal.events().await;
    assert_eq!(events[0].status, ImportStatus::Error);
    assert_eq!(events[0].error_line, Some(3));
    assert!(events[0].summary.as_deref().unwrap().contains("UTF-8"));
}

#[tokio::test]
async fn test_hooks_shape_the_records() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "members.csv",
        "member_id,name,age\n# exported 2024-03-15\nM1,Ada,36\nM2,Bob,71\nm3,Cy,40\n",
    );

    let sink = CollectingPersisterFactory::new();
    let summary = importer(import_config(dir.path()), memory_journal(), &sink, ExceptionPolicy::Continue)
        .with_hooks(|_| {
            ReadHooks::new()
                .before_read(|line: &mut LineContext<'_, Member>| {
                    if line.raw_line.starts_with('#') {
                        line.skip = true;
                    } else {
                        line.raw_line = line.raw_line.to_uppercase();
                    }
                })
                .after_read(|line: &mut LineContext<'_, Member>| {
                    line.skip = line.record.as_ref().and_then(|m| m.age).unwrap_or(0) > 65;
                })
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.complete, 1);
    let ids: Vec<String> = sink.committed().into_iter().map(|m| m.member_id).collect();
    assert_eq!(ids, vec!["M1", "M3"]);
    assert!(sink.committed().iter().all(|m| m.import_id == 1));
}

#[tokio::test]
async fn test_discovery_respects_recursion_and_filter() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "top.csv", &members_csv(1, 1));
    write_file(dir.path(), "notes.txt", "not a member file");
    write_file(dir.path(), "2024/03/nested.CSV", &members_csv(5, 1));

    let sink = CollectingPersisterFactory::new();
    let flat = importer(import_config(dir.path()), memory_journal(), &sink, ExceptionPolicy::Continue)
        .with_filter(extension_filter(["csv"]))
        .run()
        .await
        .unwrap();
    assert_eq!(flat.total, 1);

    let mut config = import_config(dir.path());
    config.recursive = true;
    let sink = CollectingPersisterFactory::new();
    let deep = importer(config, memory_journal(), &sink, ExceptionPolicy::Continue)
        .with_filter(extension_filter(["*.csv"]))
        .run()
        .await
        .unwrap();
    assert_eq!(deep.total, 2);
    assert_eq!(sink.attempted_names(), vec!["nested.CSV", "top.csv"]);
}

#[tokio::test]
async fn test_missing_root_fails_the_run() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let journal = memory_journal();
    let sink = CollectingPersisterFactory::new();
    let result = importer(
        import_config(&dir.path().join("absent")),
        journal.clone(),
        &sink,
        ExceptionPolicy::Continue,
    )
    .run()
    .await;

    assert!(matches!(result, Err(IngestError::Io(_))));
    assert!(journal.last_batch().await.unwrap().is_none());
}
