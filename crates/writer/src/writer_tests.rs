use rowship_codec::{ColumnDescriptor, ColumnKind, ColumnValue, RowCodec, Schema};
use rowship_common::{RemoteErrorCode, RetryPolicy, RunId, SkipPolicy, WriteMode};
use rowship_reduce::LogicalRecord;

use crate::mapper::PayloadMapper;
use crate::retry::RetryExecutor;
use crate::testing::MockRemoteStore;
use crate::writer::BatchedWriter;

fn fast_retry() -> RetryExecutor {
    RetryExecutor::new(
        RetryPolicy {
            limit: 5,
            initial_wait_ms: 1,
            max_wait_ms: 2,
        },
        RunId(1),
    )
}

fn id_schema() -> Schema {
    Schema::new(vec![
        ColumnDescriptor::new("id", ColumnKind::Integer),
        ColumnDescriptor::new("name", ColumnKind::Text),
        ColumnDescriptor::new("lines.qty", ColumnKind::Integer),
    ])
    .with_id_column("id")
}

fn key_schema() -> Schema {
    Schema::new(vec![
        ColumnDescriptor::new("code", ColumnKind::Text),
        ColumnDescriptor::new("name", ColumnKind::Text),
    ])
    .with_update_key("code")
}

fn id_record(codec: &RowCodec, id: Option<i64>, name: &str, qty: Option<i64>) -> LogicalRecord {
    codec
        .encode_row(&[
            id.map(ColumnValue::Int).unwrap_or(ColumnValue::Null),
            ColumnValue::Text(name.to_string()),
            qty.map(ColumnValue::Int).unwrap_or(ColumnValue::Null),
        ])
        .expect("encode")
        .into()
}

fn key_record(codec: &RowCodec, code: Option<&str>, name: &str) -> LogicalRecord {
    codec
        .encode_row(&[
            code.map(|c| ColumnValue::Text(c.to_string()))
                .unwrap_or(ColumnValue::Null),
            ColumnValue::Text(name.to_string()),
        ])
        .expect("encode")
        .into()
}

fn write(
    store: &mut MockRemoteStore,
    schema: &Schema,
    mode: WriteMode,
    policy: SkipPolicy,
    chunk: usize,
    upsert_chunk: usize,
    records: Vec<LogicalRecord>,
) -> rowship_common::Result<crate::report::TaskReport> {
    let mapper = PayloadMapper::new(schema).expect("mapper");
    let mut writer = BatchedWriter::new(
        store,
        &mapper,
        fast_retry(),
        chunk,
        upsert_chunk,
        policy,
        RunId(1),
    );
    writer.write(mode, records.into_iter().map(Ok))
}

#[test]
fn insert_batches_at_chunk_size_with_partial_tail() {
    // Five records at chunk size 2: exactly three create calls, 2+2+1.
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records: Vec<LogicalRecord> = (0..5)
        .map(|i| id_record(&codec, None, &format!("r{i}"), Some(i)))
        .collect();

    let mut store = MockRemoteStore::new();
    let report = write(
        &mut store,
        &schema,
        WriteMode::Insert,
        SkipPolicy::Auto,
        2,
        1000,
        records,
    )
    .expect("insert");

    let sizes: Vec<usize> = store.created.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(report.created, 5);
    assert_eq!(report.batches, 3);
}

#[test]
fn update_sends_by_identity_and_skips_missing_under_auto() {
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![
        id_record(&codec, Some(10), "a", None),
        id_record(&codec, None, "orphan", None),
        id_record(&codec, Some(11), "b", None),
    ];

    let mut store = MockRemoteStore::new();
    let report = write(
        &mut store,
        &schema,
        WriteMode::Update,
        SkipPolicy::Auto,
        2,
        1000,
        records,
    )
    .expect("update");

    assert_eq!(store.updated_records(), 2);
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 1);
    assert!(report.warnings[0].contains("without identity"));
}

#[test]
fn update_without_identity_is_fatal_under_never() {
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![id_record(&codec, None, "orphan", None)];

    let mut store = MockRemoteStore::new();
    let err = write(
        &mut store,
        &schema,
        WriteMode::Update,
        SkipPolicy::Never,
        2,
        1000,
        records,
    )
    .expect_err("fatal");
    assert!(err.to_string().contains("no remote identity"));
    assert_eq!(store.updated_records(), 0);
}

#[test]
fn upsert_auto_skips_non_existing_surrogate_id() {
    // Present-but-missing id under auto: skip with the id in the warning.
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![id_record(&codec, Some(99), "ghost", None)];

    let mut store = MockRemoteStore::new().with_existing(["1", "2"]);
    let report = write(
        &mut store,
        &schema,
        WriteMode::Upsert,
        SkipPolicy::Auto,
        10,
        100,
        records,
    )
    .expect("upsert");

    assert_eq!(store.created_records(), 0);
    assert_eq!(store.updated_records(), 0);
    assert_eq!(report.skipped, 1);
    assert!(report.warnings[0].contains("non existing id '99'"));
}

#[test]
fn upsert_never_inserts_on_empty_natural_key_with_warning() {
    let schema = key_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![key_record(&codec, None, "fresh")];

    let mut store = MockRemoteStore::new();
    let report = write(
        &mut store,
        &schema,
        WriteMode::Upsert,
        SkipPolicy::Never,
        10,
        100,
        records,
    )
    .expect("upsert");

    assert_eq!(store.created_records(), 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 0);
    assert!(report.warnings[0].contains("without identity"));
}

#[test]
fn upsert_auto_skips_missing_natural_key_but_inserts_unresolved_one() {
    let schema = key_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![
        key_record(&codec, None, "absent-key"),
        key_record(&codec, Some("nope"), "unresolved-key"),
        key_record(&codec, Some("hit"), "existing"),
    ];

    let mut store = MockRemoteStore::new().with_existing(["hit"]);
    let report = write(
        &mut store,
        &schema,
        WriteMode::Upsert,
        SkipPolicy::Auto,
        10,
        100,
        records,
    )
    .expect("upsert");

    assert_eq!(report.skipped, 1);
    assert_eq!(store.created_records(), 1);
    assert_eq!(store.updated_records(), 1);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("without key value")));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("non existing key 'nope'")));
}

#[test]
fn upsert_flushes_insert_and_update_sub_batches_independently() {
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    // Three records resolve as updates, four (no id, auto) as inserts.
    let records = vec![
        id_record(&codec, Some(1), "u1", None),
        id_record(&codec, None, "i1", None),
        id_record(&codec, Some(2), "u2", None),
        id_record(&codec, None, "i2", None),
        id_record(&codec, Some(3), "u3", None),
        id_record(&codec, None, "i3", None),
        id_record(&codec, None, "i4", None),
    ];

    let mut store = MockRemoteStore::new().with_existing(["1", "2", "3"]);
    let report = write(
        &mut store,
        &schema,
        WriteMode::Upsert,
        SkipPolicy::Auto,
        2,
        100,
        records,
    )
    .expect("upsert");

    let created: Vec<usize> = store.created.iter().map(Vec::len).collect();
    let updated: Vec<usize> = store.updated.iter().map(Vec::len).collect();
    assert_eq!(created, vec![2, 2]);
    assert_eq!(updated, vec![2, 1]);
    assert_eq!(report.created, 4);
    assert_eq!(report.updated, 3);
    assert_eq!(report.skipped, 0);
}

#[test]
fn upsert_existence_query_paginates_until_exhausted() {
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records: Vec<LogicalRecord> = (1..=5)
        .map(|i| id_record(&codec, Some(i), &format!("u{i}"), None))
        .collect();

    let mut store =
        MockRemoteStore::new().with_existing(["1", "2", "3", "4", "5"]);
    store.page_size = 2;
    let report = write(
        &mut store,
        &schema,
        WriteMode::Upsert,
        SkipPolicy::Auto,
        10,
        100,
        records,
    )
    .expect("upsert");

    assert_eq!(report.updated, 5);
    assert_eq!(store.created_records(), 0);
}

#[test]
fn transient_create_failure_recovers_without_data_loss() {
    // Two scripted contention failures, success on the third attempt.
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records: Vec<LogicalRecord> = (0..3)
        .map(|i| id_record(&codec, None, &format!("r{i}"), None))
        .collect();

    let mut store = MockRemoteStore::new();
    store.fail_next.push_back(RemoteErrorCode::Contention);
    store.fail_next.push_back(RemoteErrorCode::Contention);

    let report = write(
        &mut store,
        &schema,
        WriteMode::Insert,
        SkipPolicy::Auto,
        10,
        100,
        records,
    )
    .expect("insert after retries");

    assert_eq!(store.created_records(), 3);
    assert_eq!(report.created, 3);
    assert_eq!(report.batches, 1);
}

#[test]
fn fatal_create_failure_aborts_the_run() {
    let schema = id_schema();
    let codec = RowCodec::new(schema.clone());
    let records = vec![id_record(&codec, None, "r", None)];

    let mut store = MockRemoteStore::new();
    store.fail_next.push_back(RemoteErrorCode::InvalidRequest);

    let err = write(
        &mut store,
        &schema,
        WriteMode::Insert,
        SkipPolicy::Auto,
        10,
        100,
        records,
    )
    .expect_err("fatal");
    assert!(!err.is_transient());
    assert_eq!(store.created_records(), 0);
}
