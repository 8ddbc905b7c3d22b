//! Draft upload: ordering, retries, file transfer and sheet plans

use portex_core::{Error, Field, FileRef, PackageRef, SchemaType, Value};
use portex_engine::testing::{stored_file, InMemoryRemote};
use portex_engine::{ClientConfig, Dataset, SheetAction, SheetSource, Workspace};
use portex_frame::DataFrame;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

fn config(chunk_size: usize, max_retries: u32) -> ClientConfig {
    ClientConfig {
        upload_workers: 4,
        max_retries,
        retry_backoff_ms: 1,
        chunk_size,
        ..ClientConfig::default()
    }
}

fn setup(config: ClientConfig) -> (Arc<InMemoryRemote>, Workspace) {
    let remote = InMemoryRemote::shared();
    let workspace = Workspace::builder()
        .remote(remote.clone())
        .config(config)
        .build()
        .unwrap();
    (remote, workspace)
}

fn samples() -> SchemaType {
    SchemaType::record(vec![
        Field::new("id", SchemaType::int64()),
        Field::new("label", SchemaType::string()),
    ])
    .unwrap()
}

fn sample(id: i64) -> Value {
    Value::record([("id", Value::Int(id)), ("label", Value::from(format!("s{}", id)))])
}

fn frame(ids: Range<i64>) -> DataFrame {
    DataFrame::from_rows(samples(), ids.map(sample).collect()).unwrap()
}

fn ids(rows: &[Value]) -> Vec<i64> {
    rows.iter()
        .map(|row| row.get_path("id").and_then(Value::as_int).unwrap())
        .collect()
}

fn seeded(workspace: &Workspace, rows: Range<i64>) -> Dataset {
    let mut ds = workspace.datasets().create("ds", None, None).unwrap();
    ds.insert_sheet("train", frame(rows)).unwrap();
    ds.commit("seed", None).unwrap();
    ds
}

// ============================================================================
// Ordering and retries
// ============================================================================

#[test]
fn test_row_order_survives_out_of_order_completion() {
    let (remote, workspace) = setup(config(2, 0));
    let ds = workspace.datasets().create("ds", None, None).unwrap();
    // later chunks finish first
    remote.set_add_rows_delay(|_, position| Duration::from_millis((40 - position as u64) * 2));

    let mut draft = ds.drafts().create("bulk", None, None).unwrap();
    draft.insert_sheet("train", frame(0..40)).unwrap();
    let report = draft.upload().unwrap();

    let sheet = report.sheet("train").unwrap();
    assert_eq!(sheet.action, SheetAction::Create);
    assert_eq!(sheet.rows, 40);
    assert_eq!(sheet.chunks, 20);
    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(ids(&stored), (0..40).collect::<Vec<_>>());
    // the staged frame now reads the uploaded rows
    assert_eq!(ids(&draft.sheet("train").unwrap().to_rows().unwrap()), (0..40).collect::<Vec<_>>());
    assert!(!draft.is_modified());
}

#[test]
fn test_chunk_retried_then_succeeds() {
    let (remote, workspace) = setup(config(5, 3));
    let ds = workspace.datasets().create("ds", None, None).unwrap();
    let mut draft = ds.drafts().create("flaky", None, None).unwrap();
    draft.insert_sheet("train", frame(0..10)).unwrap();

    remote.fail_next_add_rows(2);
    let report = draft.upload().unwrap();
    assert_eq!(report.rows_sent(), 10);
    assert_eq!(remote.calls("add_rows"), 2 + 2);
    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(ids(&stored), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_exhausted_retries_fail_upload_then_replace_recovers() {
    let (remote, workspace) = setup(config(4, 2));
    let ds = workspace.datasets().create("ds", None, None).unwrap();
    let mut draft = ds.drafts().create("broken", None, None).unwrap();
    draft.insert_sheet("train", frame(0..8)).unwrap();

    remote.fail_sheet("train");
    match draft.upload().unwrap_err() {
        Error::UploadWorker { sheet, attempts, .. } => {
            assert_eq!(sheet, "train");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(draft.is_modified());

    remote.heal_sheet("train");
    let report = draft.upload().unwrap();
    assert_eq!(report.sheet("train").unwrap().action, SheetAction::Replace);
    assert_eq!(remote.calls("delete_sheet"), 1);
    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(ids(&stored), (0..8).collect::<Vec<_>>());
}

// ============================================================================
// Plans
// ============================================================================

#[test]
fn test_append_sends_only_new_rows() {
    let (remote, workspace) = setup(config(100, 0));
    let ds = seeded(&workspace, 0..5);
    let mut draft = ds.drafts().create("grow", None, None).unwrap();
    draft.sheet_mut("train").unwrap().extend_rows(vec![sample(5), sample(6)]).unwrap();

    let before = remote.calls("add_rows");
    let report = draft.upload().unwrap();
    let sheet = report.sheet("train").unwrap();
    assert_eq!(sheet.action, SheetAction::Append { from: 5 });
    assert_eq!(sheet.rows, 2);
    assert_eq!(remote.calls("add_rows") - before, 1);
    assert_eq!(remote.calls("create_sheet"), 1);

    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(ids(&stored), (0..7).collect::<Vec<_>>());
}

#[test]
fn test_single_cell_edit_sends_one_chunk() {
    let (remote, workspace) = setup(config(4, 0));
    let ds = seeded(&workspace, 0..40);
    let mut draft = ds.drafts().create("fix", None, None).unwrap();
    draft.sheet_mut("train").unwrap().set("label", 17, Value::from("fixed")).unwrap();

    let before = remote.calls("add_rows");
    let report = draft.upload().unwrap();
    let sheet = report.sheet("train").unwrap();
    assert_eq!(sheet.action, SheetAction::Update { rows: 1, from: 40 });
    assert_eq!(sheet.rows, 1);
    assert_eq!(sheet.chunks, 1);
    assert_eq!(remote.calls("update_rows"), 1);
    assert_eq!(remote.calls("add_rows"), before);
    assert_eq!(remote.calls("delete_sheet"), 0);

    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(stored.len(), 40);
    assert_eq!(stored[17].get_path("label"), Some(&Value::from("fixed")));
    assert_eq!(stored[16], sample(16));
    assert_eq!(ids(&stored), (0..40).collect::<Vec<_>>());
}

#[test]
fn test_edits_and_appends_in_one_upload() {
    let (remote, workspace) = setup(config(2, 0));
    let ds = seeded(&workspace, 0..6);
    let mut draft = ds.drafts().create("mixed", None, None).unwrap();
    {
        let sheet = draft.sheet_mut("train").unwrap();
        for index in [0, 2, 5] {
            sheet.set("label", index, Value::from("edited")).unwrap();
        }
        sheet.extend_rows(vec![sample(6), sample(7), sample(8)]).unwrap();
        sheet.set("label", 7, Value::from("late")).unwrap();
    }

    let before = remote.calls("add_rows");
    let report = draft.upload().unwrap();
    let sheet = report.sheet("train").unwrap();
    assert_eq!(sheet.action, SheetAction::Update { rows: 3, from: 6 });
    assert_eq!(sheet.rows, 6);
    assert_eq!(sheet.chunks, 4);
    assert_eq!(remote.calls("update_rows"), 2);
    assert_eq!(remote.calls("add_rows") - before, 2);

    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(ids(&stored), (0..9).collect::<Vec<_>>());
    let labels: Vec<&Value> = stored.iter().map(|row| row.get_path("label").unwrap()).collect();
    assert_eq!(labels[0], &Value::from("edited"));
    assert_eq!(labels[1], &Value::from("s1"));
    assert_eq!(labels[5], &Value::from("edited"));
    assert_eq!(labels[7], &Value::from("late"));

    assert!(draft.upload().unwrap().is_noop());
}

#[test]
fn test_column_change_replaces_sheet() {
    let (remote, workspace) = setup(config(100, 0));
    let ds = seeded(&workspace, 0..3);
    let mut draft = ds.drafts().create("widen", None, None).unwrap();
    draft
        .sheet_mut("train")
        .unwrap()
        .insert_column("extra", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        .unwrap();

    let report = draft.upload().unwrap();
    assert_eq!(report.sheet("train").unwrap().action, SheetAction::Replace);
    assert_eq!(remote.calls("delete_sheet"), 1);
    assert_eq!(remote.calls("update_rows"), 0);
    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(stored[2].get_path("extra"), Some(&Value::Int(3)));
}

#[test]
fn test_failed_update_replaces_on_next_upload() {
    let (remote, workspace) = setup(config(100, 0));
    let ds = seeded(&workspace, 0..3);
    let mut draft = ds.drafts().create("retry", None, None).unwrap();
    draft.sheet_mut("train").unwrap().set("label", 1, Value::from("fixed")).unwrap();

    remote.fail_next_add_rows(1);
    assert!(draft.upload().is_err());

    let report = draft.upload().unwrap();
    assert_eq!(report.sheet("train").unwrap().action, SheetAction::Replace);
    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap();
    assert_eq!(stored[1].get_path("label"), Some(&Value::from("fixed")));
    assert_eq!(stored.len(), 3);
}

#[test]
fn test_unchanged_and_removed_sheets() {
    let (remote, workspace) = setup(config(100, 0));
    let ds = seeded(&workspace, 0..3);
    let mut draft = ds.drafts().create("prune", None, None).unwrap();
    draft.insert_sheet("val", frame(0..1)).unwrap();
    draft.upload().unwrap();

    let report = draft.upload().unwrap();
    assert!(report.is_noop());

    draft.remove_sheet("train").unwrap();
    let report = draft.upload().unwrap();
    assert_eq!(report.sheets[0].action, SheetAction::Delete);
    assert_eq!(report.sheet("val").unwrap().action, SheetAction::Skip);
    assert_eq!(draft.sheet_names().unwrap(), vec!["val".to_string()]);
    assert!(remote.rows("ds", &SheetSource::Draft(draft.number()), "train").unwrap_err().is_not_found());
}

#[test]
fn test_chunks_bounded_by_item_budget() {
    let (_, workspace) = setup(ClientConfig {
        chunk_size: 100,
        max_items_per_chunk: 6,
        ..config(100, 0)
    });
    let schema = SchemaType::record(vec![
        Field::new("id", SchemaType::int64()),
        Field::new(
            "bbox",
            SchemaType::record(vec![
                Field::new("x", SchemaType::float32()),
                Field::new("y", SchemaType::float32()),
            ])
            .unwrap(),
        ),
    ])
    .unwrap();
    let rows = (0..7)
        .map(|i| {
            Value::record([
                ("id", Value::Int(i)),
                ("bbox", Value::record([("x", Value::Float(0.5)), ("y", Value::Float(1.5))])),
            ])
        })
        .collect();

    let ds = workspace.datasets().create("ds", None, None).unwrap();
    let mut draft = ds.drafts().create("boxes", None, None).unwrap();
    draft.insert_sheet("boxes", DataFrame::from_rows(schema, rows).unwrap()).unwrap();
    let report = draft.upload().unwrap();
    // 3 leaf columns, 6 items per chunk: 2 rows per chunk
    assert_eq!(report.sheet("boxes").unwrap().chunks, 4);
}

// ============================================================================
// Files
// ============================================================================

fn media() -> SchemaType {
    SchemaType::record(vec![
        Field::new("id", SchemaType::int64()),
        Field::new("image", SchemaType::binary()),
    ])
    .unwrap()
}

fn read_all(remote: &InMemoryRemote, file: &FileRef) -> Vec<u8> {
    let mut content = Vec::new();
    file.open(remote).unwrap().read_to_end(&mut content).unwrap();
    content
}

#[test]
fn test_files_are_put_before_their_rows() {
    let (remote, workspace) = setup(config(2, 0));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.jpg");
    std::fs::File::create(&path).unwrap().write_all(b"from disk").unwrap();

    let rows = vec![
        Value::record([("id", Value::Int(0)), ("image", Value::File(FileRef::path(&path)))]),
        Value::record([("id", Value::Int(1)), ("image", Value::File(FileRef::bytes(b"in memory".to_vec())))]),
        Value::record([("id", Value::Int(2)), ("image", Value::from(b"raw".to_vec()))]),
    ];
    let ds = workspace.datasets().create("ds", None, None).unwrap();
    let mut draft = ds.drafts().create("media", None, None).unwrap();
    draft.insert_sheet("images", DataFrame::from_rows(media(), rows).unwrap()).unwrap();

    let report = draft.upload().unwrap();
    assert_eq!(report.files_sent(), 3);
    assert_eq!(remote.puts(), 3);

    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "images").unwrap();
    let files: Vec<&FileRef> = stored
        .iter()
        .map(|row| row.get_path("image").and_then(Value::as_file).unwrap())
        .collect();
    assert!(files.iter().all(|f| f.key().is_some_and(|k| k.starts_with("obj/"))));
    assert_eq!(read_all(&remote, files[0]), b"from disk");
    assert_eq!(read_all(&remote, files[2]), b"raw");
}

#[test]
fn test_retried_chunk_does_not_put_files_again() {
    let (remote, workspace) = setup(config(2, 2));
    let rows = (0..4)
        .map(|i| Value::record([("id", Value::Int(i)), ("image", Value::File(FileRef::bytes(vec![i as u8; 3])))]))
        .collect();
    let ds = workspace.datasets().create("ds", None, None).unwrap();
    let mut draft = ds.drafts().create("media", None, None).unwrap();
    draft.insert_sheet("images", DataFrame::from_rows(media(), rows).unwrap()).unwrap();

    remote.fail_next_add_rows(2);
    let report = draft.upload().unwrap();
    assert_eq!(remote.puts(), 4);
    assert_eq!(report.files_sent(), 4);
    assert_eq!(remote.calls("add_rows"), 2 + 2);

    let stored = remote.rows("ds", &SheetSource::Draft(draft.number()), "images").unwrap();
    let file = stored[3].get_path("image").and_then(Value::as_file).unwrap();
    assert_eq!(read_all(&remote, file), vec![3u8; 3]);
}

#[test]
fn test_copy_files_between_datasets_without_put() {
    let (remote, workspace) = setup(config(100, 0));
    let mut source = workspace.datasets().create("src", None, Some("shared")).unwrap();
    let target = workspace.datasets().create("dst", None, Some("shared")).unwrap();
    let elsewhere = workspace.datasets().create("far", None, None).unwrap();

    let rows = vec![
        Value::record([("id", Value::Int(0)), ("image", Value::File(stored_file(&remote, b"a").unwrap()))]),
        Value::record([("id", Value::Int(1)), ("image", Value::File(stored_file(&remote, b"b").unwrap()))]),
    ];
    source.insert_sheet("images", DataFrame::from_rows(media(), rows).unwrap()).unwrap();
    source.commit("seed", None).unwrap();
    let puts = remote.puts();

    let mut rows = source.sheet("images").unwrap().to_rows().unwrap();
    assert_eq!(target.copy_files_in(&source, &mut rows).unwrap(), 2);
    assert_eq!(remote.puts(), puts);
    assert_eq!(remote.calls("copy_objects"), 1);

    let copied = rows[1].get_path("image").and_then(Value::as_file).unwrap();
    assert!(copied.key().is_some_and(|k| k.starts_with("dst/")));
    assert_eq!(read_all(&remote, copied), b"b");

    let local = vec![FileRef::bytes(b"pending".to_vec())];
    assert_eq!(target.copy_files(&source, local.clone()).unwrap(), local);
    assert!(matches!(
        elsewhere.copy_files(&source, vec![FileRef::remote("obj/x", 1, "x")]),
        Err(Error::InvalidArgument(_))
    ));
}

// ============================================================================
// Packages
// ============================================================================

#[test]
fn test_external_package_fetched_once_per_session() {
    let (remote, workspace) = setup(config(100, 0));
    let package = PackageRef::new("https://github.com/acme/templates", "v1");
    remote.publish_package(
        package.clone(),
        BTreeMap::from([(
            "Box".to_string(),
            json!({
                "type": "template",
                "declaration": {"type": "record", "fields": [
                    {"name": "x", "type": "float32"},
                    {"name": "y", "type": "float32"},
                ]},
            }),
        )]),
    );
    let schema = workspace
        .registry()
        .load_canonical(&json!({
            "imports": [{"repo": package.to_string(), "types": [{"name": "Box"}]}],
            "type": "record",
            "fields": [{"name": "id", "type": "int64"}, {"name": "box", "type": "Box"}],
        }))
        .unwrap();
    assert_eq!(remote.calls("fetch_package"), 1);

    let row = Value::record([
        ("id", Value::Int(1)),
        ("box", Value::record([("x", Value::Float(1.0)), ("y", Value::Float(2.0))])),
    ]);
    let mut ds = workspace.datasets().create("ds", None, None).unwrap();
    ds.insert_sheet("boxes", DataFrame::from_rows(schema, vec![row.clone()]).unwrap()).unwrap();
    ds.commit("boxes", None).unwrap();

    let mut reopened = workspace.datasets().get("ds").unwrap();
    let boxes = reopened.sheet("boxes").unwrap();
    assert_eq!(boxes.to_rows().unwrap(), vec![row]);
    assert!(boxes.column("box").unwrap().schema().is_template());
    assert_eq!(remote.calls("fetch_package"), 1);
    assert_eq!(workspace.registry().cached_packages(), 1);
}
