//! Local and online query/apply

use parking_lot::Mutex;
use portex_core::{Error, Field, Result, SchemaType, Value};
use portex_frame::{col, online, Criteria, DataFrame, Predicate, RowMap, SearchBackend, SearchTarget};
use std::sync::Arc;

fn schema() -> SchemaType {
    SchemaType::record(vec![
        Field::new("id", SchemaType::int64()),
        Field::new("label", SchemaType::enumeration(["cat", "dog", "fox"]).unwrap()),
        Field::new(
            "box",
            SchemaType::record(vec![
                Field::new("w", SchemaType::float64()),
                Field::new("h", SchemaType::float64()),
            ])
            .unwrap(),
        ),
        Field::new("note", SchemaType::string().nullable()),
    ])
    .unwrap()
}

fn rows() -> Vec<Value> {
    let labels = ["cat", "dog", "fox", "cat", "dog", "cat", "fox", "dog"];
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            Value::record([
                ("id", Value::Int(i as i64)),
                ("label", Value::from(*label)),
                (
                    "box",
                    Value::record([("w", Value::Float(i as f64 * 1.5)), ("h", Value::Float(10.0 - i as f64))]),
                ),
                ("note", if i % 3 == 0 { Value::Null } else { Value::from(format!("n{}", i)) }),
            ])
        })
        .collect()
}

fn target() -> SearchTarget {
    SearchTarget {
        dataset: "animals".into(),
        commit_id: "c1".into(),
        sheet: "train".into(),
    }
}

/// Search backend filtering stored rows with `Criteria::matches`.
struct RowStore {
    rows: Vec<Value>,
    seen: Mutex<Vec<Option<Criteria>>>,
}

impl SearchBackend for RowStore {
    fn search(&self, target: &SearchTarget, criteria: Option<&Criteria>) -> Result<Vec<Value>> {
        if target != &self::target() {
            return Err(Error::not_found("sheet", target.sheet.clone()));
        }
        self.seen.lock().push(criteria.cloned());
        Ok(self
            .rows
            .iter()
            .filter(|row| criteria.map_or(true, |c| c.matches(row)))
            .cloned()
            .collect())
    }
}

fn backend() -> Arc<RowStore> {
    Arc::new(RowStore {
        rows: rows(),
        seen: Mutex::new(Vec::new()),
    })
}

fn frame() -> DataFrame {
    DataFrame::from_rows(schema(), rows()).unwrap().with_origin(target())
}

fn ids(df: &DataFrame) -> Vec<Value> {
    df.column("id").unwrap().to_values().unwrap()
}

fn assert_same_online(predicate: Predicate) {
    let df = frame();
    let local = df.query(&predicate).unwrap();
    let store = backend();
    let remote = online(store.clone(), || df.query(&predicate)).unwrap();
    assert_eq!(ids(&local), ids(&remote), "{predicate:?}");
    assert_eq!(local.to_rows().unwrap(), remote.to_rows().unwrap());
    assert_eq!(store.seen.lock().len(), 1);
}

#[test]
fn test_equality() {
    assert_same_online(col("label").eq("cat"));
}

#[test]
fn test_negation_and_ranges() {
    assert_same_online(col("label").ne("dog"));
    assert_same_online(col("box.w").gte(3).and(col("box.h").lt(8.5)));
    assert_same_online(col("label").not_in(["cat", "fox"]));
}

#[test]
fn test_nested_logic() {
    assert_same_online(
        col("label")
            .eq("cat")
            .and(col("id").gt(0))
            .or(col("label").is_in(["fox"]).and(col("box.h").lte(4))),
    );
}

#[test]
fn test_null_comparisons() {
    assert_same_online(col("note").eq(Value::Null));
    assert_same_online(col("note").ne(Value::Null).and(col("note").gt("n4")));
}

#[test]
fn test_local_query_keeps_order() {
    let matched = frame().query(&col("label").eq("dog")).unwrap();
    assert_eq!(ids(&matched), vec![Value::Int(1), Value::Int(4), Value::Int(7)]);
    assert!(matched.origin().is_none());
}

#[test]
fn test_custom_predicate_fails_fast_online() {
    let df = frame();
    let store = backend();
    let predicate = Predicate::custom(|row| Ok(row.get("id")?.as_int() == Some(2)));
    assert_eq!(ids(&df.query(&predicate).unwrap()), vec![Value::Int(2)]);
    let err = online(store.clone(), || df.query(&predicate)).unwrap_err();
    assert!(matches!(err, Error::Criteria(_)));
    assert!(store.seen.lock().is_empty());
}

#[test]
fn test_online_rejects_local_edits_and_local_frames() {
    let mut df = frame();
    df.set("note", 0, "edited".into()).unwrap();
    let err = online(backend(), || df.query(&col("id").eq(0))).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let local = DataFrame::from_rows(schema(), rows()).unwrap();
    let err = online(backend(), || local.query(&col("id").eq(0))).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_apply_column_local_and_online() {
    let df = frame();
    let local = df.apply(&RowMap::Column("box.w".into())).unwrap();
    assert_eq!(local.schema(), &SchemaType::float64());
    let remote = online(backend(), || df.apply(&RowMap::Column("box.w".into()))).unwrap();
    assert_eq!(local.to_values().unwrap(), remote.to_values().unwrap());
    assert_eq!(local.len(), df.len());
}

#[test]
fn test_apply_custom() {
    let df = frame();
    let area = RowMap::custom(|row| {
        let w = row.get("box.w")?.as_number().unwrap_or(0.0);
        let h = row.get("box.h")?.as_number().unwrap_or(0.0);
        Ok(Value::Float(w * h))
    });
    let series = df.apply(&area).unwrap();
    assert_eq!(series.schema(), &SchemaType::float64());
    assert_eq!(series.get(2).unwrap(), Value::Float(3.0 * 8.0));
    assert!(matches!(
        online(backend(), || df.apply(&area)),
        Err(Error::Criteria(_))
    ));
}

#[test]
fn test_apply_as_explicit_type() {
    let df = frame();
    let labels = df
        .apply_as(&RowMap::custom(|row| row.get("label")), SchemaType::string())
        .unwrap();
    assert_eq!(labels.get(1).unwrap(), Value::from("dog"));
    assert!(df
        .apply_as(&RowMap::Column("label".into()), SchemaType::int32())
        .unwrap_err()
        .is_schema_validation());
}
