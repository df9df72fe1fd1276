//! Loads into the on-disk backends selected by `storage_kind`.

mod common;

use bibflow::backend::{RelationalBackend, SearchIndexBackend};
use bibflow::{ImportOutcome, StorageKind};

use common::{numbered_records, RecordBuilder, TestHarness};

#[test]
fn test_relational_load_counts_new_and_updated() {
    let harness = TestHarness::new();
    harness.write_xml("incoming", "first.xml", &numbered_records("r", 3));
    harness.write_xml("incoming", "second.xml", &numbered_records("r", 2));
    let config = harness
        .config()
        .load()
        .source_dir(harness.dir("incoming"))
        .build();

    let result = harness.run_configured(config);

    let load = result.statistics.load.expect("load ran");
    assert_eq!(load.count(ImportOutcome::New), 3);
    assert_eq!(load.count(ImportOutcome::Updated), 2);

    let db = RelationalBackend::open(&harness.root().join("db/records.sqlite")).unwrap();
    assert_eq!(db.record_count().unwrap(), 3);
    assert_eq!(db.is_deleted("r1").unwrap(), Some(false));
}

#[test]
fn test_relational_load_applies_deletions() {
    let harness = TestHarness::new();
    harness.write_xml(
        "incoming",
        "a.xml",
        &[
            RecordBuilder::new("keep").build(),
            RecordBuilder::new("gone").deleted().build(),
        ],
    );
    let config = harness
        .config()
        .load()
        .source_dir(harness.dir("incoming"))
        .build();

    let result = harness.run_configured(config);

    let load = result.statistics.load.expect("load ran");
    assert_eq!(load.count(ImportOutcome::Deleted), 1);
    let db = RelationalBackend::open(&harness.root().join("db/records.sqlite")).unwrap();
    assert_eq!(db.is_deleted("gone").unwrap(), Some(true));
}

#[test]
fn test_search_index_load_is_visible_after_reopen() {
    let harness = TestHarness::new();
    harness.write_marc("a.mrc", &numbered_records("s", 4));
    let config = harness
        .config()
        .convert()
        .load()
        .storage_kind(StorageKind::SearchIndex, harness.root())
        .build();

    let result = harness.run_configured(config);

    assert_eq!(result.statistics.load.unwrap().count(ImportOutcome::New), 4);
    let index = SearchIndexBackend::open(&harness.root().join("index")).unwrap();
    assert_eq!(index.document_count(), 4);
    // Optimize folded every segment into the snapshot.
    assert_eq!(index.segment_count().unwrap(), 0);
    assert!(index.document("s2").is_some());
}

#[test]
fn test_composite_load_writes_both_stores() {
    let harness = TestHarness::new();
    harness.write_xml("incoming", "a.xml", &numbered_records("c", 2));
    let config = harness
        .config()
        .load()
        .source_dir(harness.dir("incoming"))
        .storage_kind(StorageKind::Composite, harness.root())
        .build();

    let result = harness.run_configured(config);

    assert_eq!(result.statistics.load.unwrap().count(ImportOutcome::New), 2);
    let db = RelationalBackend::open(&harness.root().join("db/records.sqlite")).unwrap();
    assert_eq!(db.record_count().unwrap(), 2);
    let index = SearchIndexBackend::open(&harness.root().join("index")).unwrap();
    assert_eq!(index.document_count(), 2);
}

#[test]
fn test_unopenable_backend_skips_load_and_keeps_inputs() {
    let harness = TestHarness::new();
    harness.write_xml("incoming", "a.xml", &numbered_records("c", 1));
    let mut config = harness
        .config()
        .load()
        .source_dir(harness.dir("incoming"))
        .build();
    config.database_path = None;

    let result = harness.run_configured(config);

    assert!(result.statistics.load.is_none());
    assert_eq!(harness.files_in("incoming"), vec!["a.xml"]);
    assert!(result.events.iter().any(|e| matches!(
        e,
        bibflow::PipelineEvent::StageSkipped { stage: bibflow::Stage::Load, .. }
    )));
}
