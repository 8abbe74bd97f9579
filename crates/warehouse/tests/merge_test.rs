//! Table merge behaviour through the public `TableMerge` API, backed by the
//! in-memory warehouse.

use std::sync::Arc;

use arrow::array::{Array, AsArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow::datatypes::{DataType, Field, Int64Type, Schema};

use cmsfeed_warehouse::{MemoryWarehouse, MergeError, TableMerge, TableRef, WriteAction};

fn setup() -> (Arc<MemoryWarehouse>, TableMerge) {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let merge = TableMerge::new(warehouse.clone());
    (warehouse, merge)
}

fn id_val(ids: Vec<i64>, vals: Vec<&str>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("val", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(ids)), Arc::new(StringArray::from(vals))],
    )
    .unwrap()
}

fn partitioned(partition: &str, ids: Vec<i64>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("partition_key", DataType::Utf8, true),
    ]));
    let keys = vec![partition; ids.len()];
    RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(ids)), Arc::new(StringArray::from(keys))],
    )
    .unwrap()
}

/// Rows as sorted (i64, String) pairs from the first two columns.
fn rows(batch: &RecordBatch) -> Vec<(i64, String)> {
    let ids = batch.column(0).as_primitive::<Int64Type>();
    let vals = batch.column(1).as_string::<i32>();
    let mut out: Vec<(i64, String)> = (0..batch.num_rows())
        .map(|i| (ids.value(i), vals.value(i).to_string()))
        .collect();
    out.sort();
    out
}

fn target() -> TableRef {
    TableRef::new("cms", "enrollment").unwrap()
}

#[tokio::test]
async fn create_then_append_accumulates_rows() {
    let (warehouse, merge) = setup();
    assert!(!merge.table_exists("cms", "enrollment").await.unwrap());

    let first = merge.append("cms", "enrollment", &id_val(vec![1, 2], vec!["a", "b"])).await.unwrap();
    assert_eq!(first.action, WriteAction::Created);
    assert!(merge.table_exists("cms", "enrollment").await.unwrap());

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(1, "a".to_string()), (2, "b".to_string())]);

    let second = merge.append("cms", "enrollment", &id_val(vec![3, 4, 5], vec!["c", "d", "e"])).await.unwrap();
    assert_eq!(second.action, WriteAction::Appended);
    assert_eq!(warehouse.row_count(&target()).await, Some(2 + 3));
}

#[tokio::test]
async fn append_is_order_independent_for_disjoint_partitions() {
    let a = partitioned("January-2024", vec![1, 2, 3]);
    let b = partitioned("February-2024", vec![1, 4]);

    let (wh_ab, merge_ab) = setup();
    merge_ab.append("cms", "enrollment", &a).await.unwrap();
    merge_ab.append("cms", "enrollment", &b).await.unwrap();

    let (wh_ba, merge_ba) = setup();
    merge_ba.append("cms", "enrollment", &b).await.unwrap();
    merge_ba.append("cms", "enrollment", &a).await.unwrap();

    let ab = rows(&wh_ab.snapshot(&target()).await.unwrap());
    let ba = rows(&wh_ba.snapshot(&target()).await.unwrap());
    assert_eq!(ab.len(), 5);
    assert_eq!(ab, ba);
}

#[tokio::test]
async fn reappending_same_batch_duplicates_rows() {
    let (warehouse, merge) = setup();
    let batch = partitioned("March-2024", vec![1, 2]);
    merge.append("cms", "enrollment", &batch).await.unwrap();
    merge.append("cms", "enrollment", &batch).await.unwrap();
    assert_eq!(warehouse.row_count(&target()).await, Some(4));
}

#[tokio::test]
async fn upsert_overwrites_matched_and_inserts_unmatched() {
    let (warehouse, merge) = setup();
    let keys = vec!["id".to_string()];

    merge.upsert("cms", "enrollment", &id_val(vec![1], vec!["x"]), &keys).await.unwrap();

    let out = merge.upsert("cms", "enrollment", &id_val(vec![1], vec!["y"]), &keys).await.unwrap();
    assert_eq!(out.action, WriteAction::Upserted);
    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(1, "y".to_string())]);

    merge.upsert("cms", "enrollment", &id_val(vec![2], vec!["z"]), &keys).await.unwrap();
    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(1, "y".to_string()), (2, "z".to_string())]);
}

#[tokio::test]
async fn upsert_with_spaced_key_column() {
    let (warehouse, merge) = setup();
    let schema = Arc::new(Schema::new(vec![
        Field::new("Contract ID", DataType::Int64, true),
        Field::new("Enrolled", DataType::Utf8, true),
    ]));
    let make = |id: i64, v: &str| {
        RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![id])), Arc::new(StringArray::from(vec![v]))],
        )
        .unwrap()
    };
    let keys = vec!["Contract ID".to_string()];

    merge.upsert("cms", "enrollment", &make(7, "10"), &keys).await.unwrap();
    merge.upsert("cms", "enrollment", &make(7, "12"), &keys).await.unwrap();

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(7, "12".to_string())]);
}

#[tokio::test]
async fn upsert_rejects_repeated_keys_in_batch() {
    let (warehouse, merge) = setup();
    let keys = vec!["id".to_string()];
    merge.upsert("cms", "enrollment", &id_val(vec![1], vec!["x"]), &keys).await.unwrap();

    let err = merge
        .upsert("cms", "enrollment", &id_val(vec![1, 1], vec!["y", "z"]), &keys)
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::DuplicateKey(_)));

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(1, "x".to_string())]);
}

#[tokio::test]
async fn schema_mismatch_fails_and_keeps_table() {
    let (warehouse, merge) = setup();
    merge.append("cms", "enrollment", &id_val(vec![1], vec!["a"])).await.unwrap();

    let err = merge
        .append("cms", "enrollment", &partitioned("April-2024", vec![9]))
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::SchemaMismatch { .. }));
    assert_eq!(warehouse.row_count(&target()).await, Some(1));
}

#[tokio::test]
async fn load_with_overwrite_replaces_table() {
    let (warehouse, merge) = setup();
    merge.load("cms", "enrollment", &id_val(vec![1, 2], vec!["a", "b"]), false).await.unwrap();
    let out = merge.load("cms", "enrollment", &id_val(vec![3], vec!["c"]), true).await.unwrap();
    assert_eq!(out.action, WriteAction::Replaced);

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(3, "c".to_string())]);
}

#[tokio::test]
async fn invalid_identifiers_are_rejected_before_writing() {
    let (warehouse, merge) = setup();
    let err = merge.append("", "enrollment", &id_val(vec![1], vec!["a"])).await.unwrap_err();
    assert!(matches!(err, MergeError::InvalidIdentifier(..)));
    assert!(warehouse.schemas().await.is_empty());
}

#[tokio::test]
async fn nulls_survive_append() {
    let (warehouse, merge) = setup();
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("val", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![Some(1), None])),
            Arc::new(StringArray::from(vec![None, Some("b")])),
        ],
    )
    .unwrap();
    merge.append("cms", "enrollment", &batch).await.unwrap();
    merge.append("cms", "enrollment", &batch).await.unwrap();

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(snap.num_rows(), 4);
    assert_eq!(snap.column(0).null_count(), 2);
}

#[tokio::test]
async fn upsert_rejects_null_key_and_keeps_table() {
    let (warehouse, merge) = setup();
    let keys = vec!["id".to_string()];
    merge.upsert("cms", "enrollment", &id_val(vec![1], vec!["x"]), &keys).await.unwrap();

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("val", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![None])),
            Arc::new(StringArray::from(vec![Some("y")])),
        ],
    )
    .unwrap();
    let err = merge.upsert("cms", "enrollment", &batch, &keys).await.unwrap_err();
    assert!(matches!(err, MergeError::NullKey(k) if k == "id"));

    let snap = warehouse.snapshot(&target()).await.unwrap();
    assert_eq!(rows(&snap), vec![(1, "x".to_string())]);
}
