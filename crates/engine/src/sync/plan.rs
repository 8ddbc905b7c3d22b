//! Per-sheet upload plans

use crate::sheets::Sheets;
use std::fmt;
use std::ops::Range;

/// What an upload does to one sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetAction {
    /// Nothing changed
    Skip,
    /// New sheet: create it, then send every row
    Create,
    /// Delete the remote sheet, recreate it, then send every row
    Replace,
    /// Only rows were appended: send rows from `from` onwards
    Append {
        /// First row not yet on the remote
        from: usize,
    },
    /// Rows were edited in place: overwrite them, then send rows from `from`
    /// onwards if any were appended
    Update {
        /// Rows edited in place
        rows: usize,
        /// First appended row; the row count when nothing was appended
        from: usize,
    },
    /// Delete the remote sheet
    Delete,
}

impl fmt::Display for SheetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetAction::Skip => f.write_str("skip"),
            SheetAction::Create => f.write_str("create"),
            SheetAction::Replace => f.write_str("replace"),
            SheetAction::Append { from } => write!(f, "append from row {}", from),
            SheetAction::Update { rows, from } => write!(f, "update {} rows, append from row {}", rows, from),
            SheetAction::Delete => f.write_str("delete"),
        }
    }
}

/// Planned action for one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPlan {
    /// Sheet name
    pub sheet: String,
    /// Action
    pub action: SheetAction,
}

/// Plan every staged sheet. Deletions come first so a sheet removed and
/// re-added under another name never collides.
pub(crate) fn plan(sheets: &Sheets) -> Vec<SheetPlan> {
    let deletions = sheets.removed.iter().map(|name| SheetPlan {
        sheet: name.clone(),
        action: SheetAction::Delete,
    });
    let updates = sheets.entries.iter().map(|(name, staged)| {
        let changes = staged.frame.changes();
        let from = staged.frame.len() - changes.appended;
        let action = match staged.remote_rows {
            None => SheetAction::Create,
            Some(remote) if staged.needs_replace || changes.rewritten || remote != from => SheetAction::Replace,
            Some(_) if !changes.edited.is_empty() => SheetAction::Update {
                rows: changes.edited.len(),
                from,
            },
            Some(_) if changes.appended > 0 => SheetAction::Append { from },
            Some(_) => SheetAction::Skip,
        };
        SheetPlan {
            sheet: name.clone(),
            action,
        }
    });
    deletions.chain(updates).collect()
}

/// Split `rows` into consecutive ranges of at most `size` rows.
pub(crate) fn chunk_ranges(rows: Range<usize>, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (rows.start..rows.end)
        .step_by(size)
        .map(|start| start..(start + size).min(rows.end))
        .collect()
}
