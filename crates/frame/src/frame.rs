//! Sheets as ordered columns

use crate::infer::infer_primitive;
use crate::online::{self, SearchTarget};
use crate::query::{Predicate, RowMap};
use crate::row::Row;
use crate::series::Series;
use crate::{at, out_of_range};
use portex_core::{Error, Field, RecordType, Result, SchemaType, Value};
use portex_paging::PagingCache;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Edits made since the frame was last synchronized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Rows appended at the end
    pub appended: usize,
    /// Indices of synced rows edited in place; appended rows are not listed
    pub edited: BTreeSet<usize>,
    /// Column set changed or a column was handed out mutably; rows can no
    /// longer be diffed
    pub rewritten: bool,
}

impl Changes {
    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.appended == 0 && self.edited.is_empty() && !self.rewritten
    }
}

/// Ordered columns sharing one row count and one record schema
#[derive(Debug, Clone)]
pub struct DataFrame {
    schema: SchemaType,
    columns: Vec<Series>,
    len: usize,
    origin: Option<SearchTarget>,
    changes: Changes,
}

fn record_of(schema: &SchemaType) -> Result<&RecordType> {
    schema.as_record().ok_or_else(|| {
        Error::schema("", format!("a sheet schema must be a record, got {}", schema))
    })
}

// ============================================================================
// Construction
// ============================================================================

impl DataFrame {
    /// Empty frame over a record schema.
    pub fn new(schema: SchemaType) -> Result<Self> {
        DataFrame::from_coerced_rows(schema, Vec::new())
    }

    /// Frame over `rows`, each validated against `schema`.
    pub fn from_rows(schema: SchemaType, rows: Vec<Value>) -> Result<Self> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| schema.coerce(row).map_err(|e| at(e, &format!("[{}]", i))))
            .collect::<Result<Vec<_>>>()?;
        DataFrame::from_coerced_rows(schema, rows)
    }

    pub(crate) fn from_coerced_rows(schema: SchemaType, rows: Vec<Value>) -> Result<Self> {
        let record = record_of(&schema)?;
        let len = rows.len();
        let mut cells: Vec<Vec<Value>> = vec![Vec::with_capacity(len); record.fields.len()];
        for row in rows {
            let mut fields = match row {
                Value::Record(fields) => fields,
                other => {
                    return Err(Error::schema("", format!("expected record row, got {}", other.type_name())))
                }
            };
            for (column, field) in cells.iter_mut().zip(&record.fields) {
                column.push(fields.remove(&field.name).unwrap_or(Value::Null));
            }
        }
        let columns = record
            .fields
            .iter()
            .zip(cells)
            .map(|(field, values)| Series::from_coerced(field.name.clone(), field.ty.clone(), values))
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame {
            schema,
            columns,
            len,
            origin: None,
            changes: Changes::default(),
        })
    }

    /// Frame of `len` rows read lazily from `rows`.
    ///
    /// Every column shares the cache, so a page is fetched once for all of
    /// them. Nothing is fetched until a cell is read.
    pub fn from_remote(schema: SchemaType, len: usize, rows: Arc<PagingCache<Value>>) -> Result<Self> {
        DataFrame::remote_at(schema, len, rows, &[])
    }

    pub(crate) fn remote_at(
        schema: SchemaType,
        len: usize,
        rows: Arc<PagingCache<Value>>,
        prefix: &[String],
    ) -> Result<Self> {
        let record = record_of(&schema)?;
        let columns = record
            .fields
            .iter()
            .map(|field| {
                let mut path = prefix.to_vec();
                path.push(field.name.clone());
                Series::remote(field.name.clone(), field.ty.clone(), Arc::clone(&rows), path, len)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame {
            schema,
            columns,
            len,
            origin: None,
            changes: Changes::default(),
        })
    }

    /// Frame over named series of equal length; the schema is a direct record.
    pub fn from_columns(columns: Vec<Series>) -> Result<Self> {
        let len = columns.first().map_or(0, Series::len);
        if let Some(bad) = columns.iter().find(|s| s.len() != len) {
            return Err(Error::InvalidArgument(format!(
                "column '{}' has {} rows, expected {}",
                bad.name(),
                bad.len(),
                len
            )));
        }
        let schema = SchemaType::record(
            columns
                .iter()
                .map(|s| Field::new(s.name(), s.schema().clone()))
                .collect(),
        )?;
        Ok(DataFrame {
            schema,
            columns,
            len,
            origin: None,
            changes: Changes::default(),
        })
    }

    /// Attach the remote sheet this frame was loaded from.
    pub fn with_origin(mut self, origin: SearchTarget) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Remote sheet this frame was loaded from, if any.
    pub fn origin(&self) -> Option<&SearchTarget> {
        self.origin.as_ref()
    }
}

// ============================================================================
// Reading
// ============================================================================

impl DataFrame {
    /// Row schema.
    pub fn schema(&self) -> &SchemaType {
        &self.schema
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.len, self.columns.len())
    }

    /// False when the schema came out of a template.
    pub fn is_mutable(&self) -> bool {
        self.schema.is_mutable()
    }

    /// Edits since the last sync.
    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    /// Forget tracked edits after a successful sync.
    pub fn mark_synced(&mut self) {
        self.changes = Changes::default();
    }

    /// True when no cell depends on a remote cache.
    pub fn is_materialized(&self) -> bool {
        self.columns.iter().all(Series::is_materialized)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Series::name).collect()
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns.iter().find(|s| s.name() == name)
    }

    /// Column by dotted path through record columns (`"box.x"`).
    pub fn column_path(&self, path: &str) -> Option<&Series> {
        match path.split_once('.') {
            None => self.column(path),
            Some((head, rest)) => self.column(head)?.as_frame()?.column_path(rest),
        }
    }

    /// Mutable access to a column.
    ///
    /// Fails with `ImmutableField` on template-derived frames, even if the
    /// caller only reads through the reference.
    pub fn column_mut(&mut self, name: &str) -> Result<&mut Series> {
        self.ensure_mutable(name)?;
        let position = self.position(name)?;
        self.changes.rewritten = true;
        Ok(&mut self.columns[position])
    }

    /// Row view at `index`.
    pub fn row(&self, index: usize) -> Result<Row<'_>> {
        if index >= self.len {
            return Err(out_of_range(index, self.len));
        }
        Ok(Row::new(self, index))
    }

    /// Row views in order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.len).map(move |i| Row::new(self, i))
    }

    /// Every row as a record value.
    pub fn to_rows(&self) -> Result<Vec<Value>> {
        let mut columns = self
            .columns
            .iter()
            .map(|s| Ok((s.name(), s.to_values()?.into_iter())))
            .collect::<Result<Vec<_>>>()?;
        let mut rows = Vec::with_capacity(self.len);
        for _ in 0..self.len {
            let mut fields = BTreeMap::new();
            for (name, values) in columns.iter_mut() {
                fields.insert(name.to_string(), values.next().unwrap_or(Value::Null));
            }
            rows.push(Value::Record(fields));
        }
        Ok(rows)
    }

    /// Rows at `indices`, in that order, as a new local frame.
    pub fn take(&self, indices: &[usize]) -> Result<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|s| s.take(indices))
            .collect::<Result<Vec<_>>>()?;
        Ok(DataFrame {
            schema: self.schema.clone(),
            columns,
            len: indices.len(),
            origin: None,
            changes: Changes::default(),
        })
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Result<DataFrame> {
        let indices: Vec<usize> = (0..n.min(self.len)).collect();
        self.take(&indices)
    }

    /// Last `n` rows.
    pub fn tail(&self, n: usize) -> Result<DataFrame> {
        let indices: Vec<usize> = (self.len.saturating_sub(n)..self.len).collect();
        self.take(&indices)
    }

    /// Fully independent deep copy.
    ///
    /// Remote-backed cells are fetched into the copy; the copy never reads
    /// the source's cache afterwards.
    pub fn copy(&self) -> Result<DataFrame> {
        let mut copy = self.clone();
        copy.materialize_all()?;
        copy.origin = None;
        copy.changes = Changes::default();
        Ok(copy)
    }

    pub(crate) fn materialize_all(&mut self) -> Result<()> {
        for column in &mut self.columns {
            column.materialize()?;
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| Error::not_found("column", name))
    }
}

// ============================================================================
// Writing
// ============================================================================

impl DataFrame {
    fn ensure_mutable(&self, field: &str) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(Error::immutable(field))
        }
    }

    /// Set one cell; `column` may be a dotted path into record columns.
    pub fn set(&mut self, column: &str, index: usize, value: Value) -> Result<()> {
        self.ensure_mutable(column)?;
        if index >= self.len {
            return Err(out_of_range(index, self.len));
        }
        match column.split_once('.') {
            None => {
                let position = self.position(column)?;
                self.columns[position].set(index, value)?;
            }
            Some((head, rest)) => {
                let position = self.position(head)?;
                let nested = self.columns[position]
                    .as_frame_mut()
                    .ok_or_else(|| Error::not_found("column", column))?;
                nested.set(rest, index, value).map_err(|e| match e {
                    Error::ImmutableField { .. } => Error::immutable(column),
                    other => other,
                })?;
            }
        }
        self.mark_edited(index..index + 1);
        Ok(())
    }

    /// Replace a whole row after validating it against the row schema.
    pub fn set_row(&mut self, index: usize, row: Value) -> Result<()> {
        self.ensure_mutable(&format!("[{}]", index))?;
        if index >= self.len {
            return Err(out_of_range(index, self.len));
        }
        let row = self
            .schema
            .coerce(row)
            .map_err(|e| at(e, &format!("[{}]", index)))?;
        if let Some(column) = self.columns.iter().find(|s| !s.is_mutable()) {
            return Err(Error::immutable(column.name()));
        }
        self.replace_row_coerced(index, row)?;
        self.mark_edited(index..index + 1);
        Ok(())
    }

    pub(crate) fn replace_row_coerced(&mut self, index: usize, row: Value) -> Result<()> {
        let mut fields = match row {
            Value::Record(fields) => fields,
            other => return Err(Error::schema(format!("[{}]", index), format!("expected record, got {}", other.type_name()))),
        };
        for column in &mut self.columns {
            let value = fields.remove(column.name()).unwrap_or(Value::Null);
            column.replace_coerced(index, value)?;
        }
        Ok(())
    }

    /// Assign `values` to `range` of one column; lengths must match.
    pub fn set_slice(&mut self, column: &str, range: Range<usize>, values: Vec<Value>) -> Result<()> {
        self.ensure_mutable(column)?;
        let position = self.position(column)?;
        self.columns[position].set_slice(range.clone(), values)?;
        self.mark_edited(range);
        Ok(())
    }

    /// Record in-place edits of `rows`, skipping rows appended since the
    /// last sync.
    fn mark_edited(&mut self, rows: Range<usize>) {
        let synced = self.len - self.changes.appended;
        self.changes.edited.extend(rows.start..rows.end.min(synced));
    }

    /// Assign raw values to a column.
    ///
    /// An existing column keeps its type and validates the values against
    /// it. A new column gets a primitive type inferred from the values;
    /// records, arrays and enums need [`insert_series`](Self::insert_series).
    pub fn insert_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        self.ensure_mutable(name)?;
        if let Some(existing) = self.column(name) {
            let series = Series::new(name, existing.schema().clone(), values)?;
            return self.insert_series(name, series);
        }
        let schema = infer_primitive(&values).map_err(|e| at(e, name))?;
        let series = Series::new(name, schema, values)?;
        self.insert_series(name, series)
    }

    /// Add or replace a column with an explicitly typed series.
    pub fn insert_series(&mut self, name: &str, mut series: Series) -> Result<()> {
        self.ensure_mutable(name)?;
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidArgument(format!("invalid column name '{}'", name)));
        }
        if !self.columns.is_empty() && series.len() != self.len {
            return Err(Error::InvalidArgument(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                series.len(),
                self.len
            )));
        }
        series.rename(name);
        let field = Field::new(name, series.schema().clone());
        let SchemaType::Record(record) = &mut self.schema else {
            return Err(Error::immutable(name));
        };
        match self.columns.iter().position(|s| s.name() == name) {
            Some(position) => {
                record.fields[position] = field;
                self.columns[position] = series;
            }
            None => {
                record.fields.push(field);
                self.columns.push(series);
            }
        }
        self.len = self.columns[0].len();
        self.changes.rewritten = true;
        debug!(target: "portex::frame", column = name, rows = self.len, "Inserted column");
        Ok(())
    }

    /// Remove a column and return it.
    pub fn remove_column(&mut self, name: &str) -> Result<Series> {
        self.ensure_mutable(name)?;
        let position = self.position(name)?;
        let SchemaType::Record(record) = &mut self.schema else {
            return Err(Error::immutable(name));
        };
        record.fields.remove(position);
        self.changes.rewritten = true;
        Ok(self.columns.remove(position))
    }

    /// Append rows; each must match the row schema exactly.
    ///
    /// Appending is allowed on template-derived frames: existing cells are
    /// never modified.
    pub fn extend_rows(&mut self, rows: Vec<Value>) -> Result<()> {
        let base = self.len;
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| self.schema.coerce(row).map_err(|e| at(e, &format!("[{}]", base + i))))
            .collect::<Result<Vec<_>>>()?;
        let appended = rows.len();
        self.append_coerced_rows(rows)?;
        self.changes.appended += appended;
        Ok(())
    }

    /// Append every row of `other`; the record fields must match exactly.
    pub fn extend(&mut self, other: &DataFrame) -> Result<()> {
        if !self.schema.structurally_eq(&other.schema) {
            return Err(Error::schema(
                "",
                format!(
                    "cannot extend {} with {}",
                    self.schema.expand(),
                    other.schema.expand()
                ),
            ));
        }
        self.extend_rows(other.to_rows()?)
    }

    pub(crate) fn append_coerced_rows(&mut self, rows: Vec<Value>) -> Result<()> {
        let record = record_of(&self.schema)?;
        let added = rows.len();
        let mut cells: Vec<Vec<Value>> = vec![Vec::with_capacity(added); record.fields.len()];
        for row in rows {
            let mut fields = match row {
                Value::Record(fields) => fields,
                other => return Err(Error::schema("", format!("expected record row, got {}", other.type_name()))),
            };
            for (column, field) in cells.iter_mut().zip(&record.fields) {
                column.push(fields.remove(&field.name).unwrap_or(Value::Null));
            }
        }
        for (series, values) in self.columns.iter_mut().zip(cells) {
            series.append_coerced(values)?;
        }
        self.len += added;
        Ok(())
    }
}

// ============================================================================
// Query / apply
// ============================================================================

impl DataFrame {
    fn online_target(&self) -> Result<&SearchTarget> {
        let target = self.origin.as_ref().ok_or_else(|| {
            Error::InvalidState("online mode needs a frame loaded from a remote sheet".into())
        })?;
        if !self.changes.is_empty() {
            return Err(Error::InvalidState(
                "online mode cannot see local edits; upload them first".into(),
            ));
        }
        Ok(target)
    }

    /// Rows matching `predicate`, in row order.
    ///
    /// Inside an online scope the predicate is translated and executed by
    /// the search backend; untranslatable predicates fail.
    pub fn query(&self, predicate: &Predicate) -> Result<DataFrame> {
        if let Some(backend) = online::current() {
            let criteria = predicate.to_criteria()?;
            let target = self.online_target()?;
            debug!(target: "portex::frame", sheet = %target.sheet, "Running online query");
            let rows = backend.search(target, Some(&criteria))?;
            return DataFrame::from_rows(self.schema.clone(), rows);
        }
        let mut matched = Vec::new();
        for row in self.rows() {
            if predicate.evaluate(&row)? {
                matched.push(row.index());
            }
        }
        self.take(&matched)
    }

    /// Map every row to one value; the result type is inferred
    /// (column projections keep the column's type).
    pub fn apply(&self, map: &RowMap) -> Result<Series> {
        if let RowMap::Column(path) = map {
            let schema = self
                .column_path(path)
                .ok_or_else(|| Error::not_found("column", path.as_str()))?
                .schema()
                .clone();
            return self.apply_as(map, schema);
        }
        let values = self.map_rows(map)?;
        let schema = infer_primitive(&values)?;
        Series::new("", schema, values)
    }

    /// Map every row to one value of an explicit type.
    pub fn apply_as(&self, map: &RowMap, schema: SchemaType) -> Result<Series> {
        let values = self.map_rows(map)?;
        Series::new("", schema, values)
    }

    fn map_rows(&self, map: &RowMap) -> Result<Vec<Value>> {
        if let Some(backend) = online::current() {
            let path = match map {
                RowMap::Column(path) => path,
                RowMap::Custom(_) => {
                    return Err(Error::Criteria(
                        "a custom row function cannot run on the server".into(),
                    ))
                }
            };
            let target = self.online_target()?;
            let rows = backend.search(target, None)?;
            return Ok(rows
                .iter()
                .map(|row| row.get_path(path).cloned().unwrap_or(Value::Null))
                .collect());
        }
        self.rows().map(|row| map.evaluate(&row)).collect()
    }
}
