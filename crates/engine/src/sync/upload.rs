//! Draft upload: reconcile staged sheets with the remote draft
//!
//! For every planned sheet the structural step (delete, create) runs on the
//! caller thread. Rows to send are then extracted from the frame, still on
//! the caller thread, and split into chunks with pre-assigned row positions.
//! Workers push the local file content of their chunk to object storage
//! first, rewrite those cells to the returned keys, then send the rows.
//! Rows edited in place are sent as overwrites of their indices; appended
//! and new rows are sent at their positions.

use super::plan::{chunk_ranges, plan, SheetAction};
use super::pool::WorkerPool;
use crate::sheets::{remote_frame, Sheets};
use crate::remote::SheetSource;
use crate::workspace::Context;
use parking_lot::Mutex;
use portex_core::{FileRef, ObjectStorage, PackageRegistry, Result, Value};
use portex_frame::DataFrame;
use std::time::Instant;
use tracing::{debug, error, info};

/// What an upload did to one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetReport {
    /// Sheet name
    pub sheet: String,
    /// Action taken
    pub action: SheetAction,
    /// Rows sent
    pub rows: usize,
    /// Local files pushed to object storage
    pub files: usize,
    /// Chunks sent
    pub chunks: usize,
}

/// Summary of one upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// One entry per staged or deleted sheet, deletions first
    pub sheets: Vec<SheetReport>,
}

impl UploadReport {
    /// Total rows sent.
    pub fn rows_sent(&self) -> usize {
        self.sheets.iter().map(|s| s.rows).sum()
    }

    /// Total files pushed to object storage.
    pub fn files_sent(&self) -> usize {
        self.sheets.iter().map(|s| s.files).sum()
    }

    /// Report for `sheet`.
    pub fn sheet(&self, sheet: &str) -> Option<&SheetReport> {
        self.sheets.iter().find(|s| s.sheet == sheet)
    }

    /// True if nothing was sent.
    pub fn is_noop(&self) -> bool {
        self.sheets.iter().all(|s| s.action == SheetAction::Skip)
    }
}

/// Where the rows of a chunk land
enum Target {
    /// Written so the first row lands at this position
    Position(usize),
    /// Overwrite existing rows at these indices
    Rows(Vec<usize>),
}

/// Rows of a chunk and the files pushed for them so far
struct Pending {
    rows: Vec<Value>,
    files: usize,
}

/// One unit of transfer. File cells are rewritten in place as their content
/// is pushed, so a retried chunk never pushes the same file twice.
struct Chunk {
    target: Target,
    pending: Mutex<Pending>,
}

impl Chunk {
    fn new(target: Target, rows: Vec<Value>) -> Self {
        Chunk {
            target,
            pending: Mutex::new(Pending { rows, files: 0 }),
        }
    }
}

/// Replace local file cells with uploaded references, counting each push.
///
/// Cells are rewritten one at a time, so after a failure every file pushed
/// before it already points at its remote key.
fn push_files(value: &mut Value, storage: &dyn ObjectStorage, pushed: &mut usize) -> Result<()> {
    match value {
        Value::File(file) => {
            let FileRef::Local(local) = file else {
                return Ok(());
            };
            let remote = local.upload(storage)?;
            *file = FileRef::Remote(remote);
            *pushed += 1;
            Ok(())
        }
        Value::Array(items) => items.iter_mut().try_for_each(|v| push_files(v, storage, pushed)),
        Value::Record(fields) => fields.values_mut().try_for_each(|v| push_files(v, storage, pushed)),
        _ => Ok(()),
    }
}

/// Split the rows `indices` of `frame` into chunks of `size` rows.
fn chunks_of(frame: &DataFrame, indices: &[usize], size: usize, target: impl Fn(&[usize]) -> Target) -> Result<Vec<Chunk>> {
    let mut rows = frame.take(indices)?.to_rows()?.into_iter();
    Ok(chunk_ranges(0..indices.len(), size)
        .into_iter()
        .map(|range| {
            let part = &indices[range];
            Chunk::new(target(part), rows.by_ref().take(part.len()).collect())
        })
        .collect())
}

/// Upload every staged change of `sheets` into draft `number`.
///
/// On success every uploaded sheet is re-pointed at the draft's remote rows
/// and its change tracking is cleared. When a sheet fails, it is flagged so
/// the next upload replaces it entirely; chunks already sent stay on the
/// remote until then.
pub(crate) fn upload_sheets(ctx: &Context, dataset: &str, number: u64, sheets: &mut Sheets) -> Result<UploadReport> {
    let started = Instant::now();
    let pool = WorkerPool::from_config(&ctx.config);
    let mut report = UploadReport::default();

    for sheet_plan in plan(sheets) {
        let name = sheet_plan.sheet;
        let action = sheet_plan.action;
        match action {
            SheetAction::Skip => {
                report.sheets.push(SheetReport {
                    sheet: name,
                    action,
                    rows: 0,
                    files: 0,
                    chunks: 0,
                });
                continue;
            }
            SheetAction::Delete => {
                ctx.api.delete_sheet(dataset, number, &name)?;
                sheets.removed.remove(&name);
                debug!(target: "portex::sync", dataset, draft = number, sheet = %name, "Deleted sheet");
                report.sheets.push(SheetReport {
                    sheet: name,
                    action,
                    rows: 0,
                    files: 0,
                    chunks: 0,
                });
                continue;
            }
            _ => {}
        }

        let Some(staged) = sheets.entries.get_mut(&name) else {
            continue;
        };
        let from = match action {
            SheetAction::Replace => {
                if staged.remote_rows.is_some() {
                    ctx.api.delete_sheet(dataset, number, &name)?;
                }
                0
            }
            SheetAction::Append { from } | SheetAction::Update { from, .. } => from,
            _ => 0,
        };
        if matches!(action, SheetAction::Create | SheetAction::Replace) {
            let schema = PackageRegistry::to_canonical_with_imports(staged.frame.schema());
            ctx.api.create_sheet(dataset, number, &name, &schema)?;
            staged.remote_rows = Some(0);
        }

        let total = staged.frame.len();
        let rows_per_chunk = ctx.config.rows_per_chunk(staged.frame.schema().leaf_count());
        let mut chunks = Vec::new();
        if matches!(action, SheetAction::Update { .. }) {
            let edited: Vec<usize> = staged.frame.changes().edited.iter().copied().collect();
            chunks.extend(chunks_of(&staged.frame, &edited, rows_per_chunk, |part| {
                Target::Rows(part.to_vec())
            })?);
        }
        let appended: Vec<usize> = (from..total).collect();
        chunks.extend(chunks_of(&staged.frame, &appended, rows_per_chunk, |part| {
            Target::Position(part[0])
        })?);
        let rows_sent: usize = chunks.iter().map(|c| c.pending.lock().rows.len()).sum();

        let result = pool.run(&name, &chunks, |_, chunk| {
            let mut pending = chunk.pending.lock();
            let Pending { rows, files } = &mut *pending;
            for row in rows.iter_mut() {
                push_files(row, ctx.storage.as_ref(), files)?;
            }
            match &chunk.target {
                Target::Position(position) => ctx.api.add_rows(dataset, number, &name, *position, rows)?,
                Target::Rows(indices) => {
                    let updates: Vec<(usize, Value)> = indices.iter().copied().zip(rows.iter().cloned()).collect();
                    ctx.api.update_rows(dataset, number, &name, &updates)?
                }
            }
            Ok(*files)
        });
        let files = match result {
            Ok(files) => files.into_iter().sum(),
            Err(e) => {
                staged.needs_replace = true;
                error!(target: "portex::sync", dataset, draft = number, sheet = %name, error = %e, "Sheet upload failed; next upload will replace it");
                return Err(e);
            }
        };

        let schema = staged.frame.schema().clone();
        staged.frame = remote_frame(ctx, dataset, &SheetSource::Draft(number), &name, schema, total)?;
        staged.remote_rows = Some(total);
        staged.needs_replace = false;
        debug!(target: "portex::sync", dataset, draft = number, sheet = %name, %action, rows = rows_sent, chunks = chunks.len(), "Uploaded sheet");
        report.sheets.push(SheetReport {
            sheet: name,
            action,
            rows: rows_sent,
            files,
            chunks: chunks.len(),
        });
    }

    info!(
        target: "portex::sync",
        dataset,
        draft = number,
        rows = report.rows_sent(),
        files = report.files_sent(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Upload complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portex_core::Error;
    use std::collections::HashMap;
    use std::io::Read;

    #[derive(Default)]
    struct Objects(Mutex<HashMap<String, Vec<u8>>>);

    impl ObjectStorage for Objects {
        fn put(&self, content: &[u8]) -> Result<String> {
            let key = format!("k{}", self.0.lock().len());
            self.0.lock().insert(key.clone(), content.to_vec());
            Ok(key)
        }

        fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
            Err(Error::not_found("object", key))
        }
    }

    #[test]
    fn test_push_files_rewrites_nested_cells() {
        let storage = Objects::default();
        let mut row = Value::record([
            ("image", Value::File(FileRef::bytes(b"abc".to_vec()))),
            ("masks", Value::Array(vec![Value::File(FileRef::bytes(b"m".to_vec())), Value::Null])),
            ("done", Value::File(FileRef::remote("old", 1, "x"))),
        ]);
        let mut pushed = 0;
        push_files(&mut row, &storage, &mut pushed).unwrap();
        assert_eq!(pushed, 2);
        let image = row.get_path("image").and_then(Value::as_file).unwrap();
        assert_eq!(image.key(), Some("k0"));
        assert_eq!(row.get_path("done").and_then(Value::as_file).unwrap().key(), Some("old"));
        assert_eq!(storage.0.lock().len(), 2);

        push_files(&mut row, &storage, &mut pushed).unwrap();
        assert_eq!(pushed, 2);
        assert_eq!(storage.0.lock().len(), 2);
    }

    #[test]
    fn test_chunks_split_rows_in_order() {
        let schema = portex_core::SchemaType::record(vec![portex_core::Field::new("id", portex_core::SchemaType::int64())]).unwrap();
        let rows = (0..5).map(|i| Value::record([("id", Value::Int(i))])).collect();
        let frame = DataFrame::from_rows(schema, rows).unwrap();
        let chunks = chunks_of(&frame, &[1, 3, 4], 2, |part| Target::Rows(part.to_vec())).unwrap();
        assert_eq!(chunks.len(), 2);
        let Target::Rows(first) = &chunks[0].target else { panic!("expected row targets") };
        assert_eq!(first, &vec![1, 3]);
        let ids: Vec<i64> = chunks[0].pending.lock().rows.iter().map(|r| r.get_path("id").and_then(Value::as_int).unwrap()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(chunks[1].pending.lock().rows.len(), 1);
    }

    #[test]
    fn test_report_totals() {
        let report = UploadReport {
            sheets: vec![
                SheetReport { sheet: "a".into(), action: SheetAction::Create, rows: 3, files: 1, chunks: 1 },
                SheetReport { sheet: "b".into(), action: SheetAction::Skip, rows: 0, files: 0, chunks: 0 },
            ],
        };
        assert_eq!(report.rows_sent(), 3);
        assert_eq!(report.files_sent(), 1);
        assert!(!report.is_noop());
        assert_eq!(report.sheet("b").unwrap().action, SheetAction::Skip);
    }
}
