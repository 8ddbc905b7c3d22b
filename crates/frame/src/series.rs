//! Typed columns

use crate::frame::DataFrame;
use crate::{at, out_of_range};
use portex_core::{Error, Result, SchemaType, Value};
use portex_paging::PagingCache;
use std::ops::Range;
use std::sync::Arc;

/// A column of values sharing one [`SchemaType`]
#[derive(Debug, Clone)]
pub struct Series {
    name: String,
    schema: SchemaType,
    data: SeriesData,
}

#[derive(Debug, Clone)]
enum SeriesData {
    Values(Vec<Value>),
    Remote(RemoteColumn),
    Record(Box<DataFrame>),
    Array(Vec<Series>),
}

/// Column read lazily out of shared remote rows, plus rows appended locally
#[derive(Debug, Clone)]
struct RemoteColumn {
    rows: Arc<PagingCache<Value>>,
    path: Vec<String>,
    len: usize,
    appended: Vec<Value>,
}

impl RemoteColumn {
    fn total(&self) -> usize {
        self.len + self.appended.len()
    }

    fn get(&self, index: usize) -> Result<Value> {
        if index >= self.len {
            return self
                .appended
                .get(index - self.len)
                .cloned()
                .ok_or_else(|| out_of_range(index, self.total()));
        }
        let row = self.rows.get(index as i64)?.ok_or_else(|| {
            Error::InvalidState(format!("remote sheet ended before row {}", index))
        })?;
        Ok(project(&row, &self.path))
    }

    fn values(&self) -> Result<Vec<Value>> {
        let rows = self.rows.get_slice(Some(0), Some(self.len as i64), 1)?;
        if rows.len() < self.len {
            return Err(Error::InvalidState(format!(
                "remote sheet has {} rows, expected {}",
                rows.len(),
                self.len
            )));
        }
        let mut values: Vec<Value> = rows.iter().map(|row| project(row, &self.path)).collect();
        values.extend(self.appended.iter().cloned());
        Ok(values)
    }
}

fn project(row: &Value, path: &[String]) -> Value {
    path.iter()
        .try_fold(row, |current, segment| current.as_record()?.get(segment))
        .cloned()
        .unwrap_or(Value::Null)
}

impl Series {
    /// Series over `values`, each validated and coerced against `schema`.
    pub fn new(name: impl Into<String>, schema: SchemaType, values: Vec<Value>) -> Result<Self> {
        let name = name.into();
        let values = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| schema.coerce(v).map_err(|e| at(e, &format!("{}[{}]", name, i))))
            .collect::<Result<Vec<_>>>()?;
        Series::from_coerced(name, schema, values)
    }

    pub(crate) fn from_coerced(name: String, schema: SchemaType, values: Vec<Value>) -> Result<Self> {
        let data = match schema.expand() {
            SchemaType::Record(_) => {
                SeriesData::Record(Box::new(DataFrame::from_coerced_rows(schema.clone(), values)?))
            }
            SchemaType::Array(a) => SeriesData::Array(
                values
                    .into_iter()
                    .map(|v| array_item(&name, &a.items, v))
                    .collect::<Result<_>>()?,
            ),
            _ => SeriesData::Values(values),
        };
        Ok(Series { name, schema, data })
    }

    pub(crate) fn remote(
        name: String,
        schema: SchemaType,
        rows: Arc<PagingCache<Value>>,
        path: Vec<String>,
        len: usize,
    ) -> Result<Self> {
        let data = match schema.expand() {
            SchemaType::Record(_) => SeriesData::Record(Box::new(DataFrame::remote_at(
                schema.clone(),
                len,
                rows,
                &path,
            )?)),
            _ => SeriesData::Remote(RemoteColumn {
                rows,
                path,
                len,
                appended: Vec::new(),
            }),
        };
        Ok(Series { name, schema, data })
    }

    /// Column name; empty for standalone series.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Element type.
    pub fn schema(&self) -> &SchemaType {
        &self.schema
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        match &self.data {
            SeriesData::Values(v) => v.len(),
            SeriesData::Remote(r) => r.total(),
            SeriesData::Record(df) => df.len(),
            SeriesData::Array(v) => v.len(),
        }
    }

    /// True if the series has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False when the element type came out of a template.
    pub fn is_mutable(&self) -> bool {
        self.schema.is_mutable()
    }

    /// True when no cell still depends on the remote cache.
    pub fn is_materialized(&self) -> bool {
        match &self.data {
            SeriesData::Remote(_) => false,
            SeriesData::Record(df) => df.is_materialized(),
            _ => true,
        }
    }

    /// Cell at `index`. Record and array cells are returned as nested values.
    pub fn get(&self, index: usize) -> Result<Value> {
        if index >= self.len() {
            return Err(out_of_range(index, self.len()));
        }
        match &self.data {
            SeriesData::Values(v) => Ok(v[index].clone()),
            SeriesData::Remote(r) => r.get(index),
            SeriesData::Record(df) => df.row(index)?.to_value(),
            SeriesData::Array(v) => Ok(Value::Array(v[index].to_values()?)),
        }
    }

    /// Every cell in order.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        match &self.data {
            SeriesData::Values(v) => Ok(v.clone()),
            SeriesData::Remote(r) => r.values(),
            SeriesData::Record(df) => df.to_rows(),
            SeriesData::Array(v) => v
                .iter()
                .map(|s| s.to_values().map(Value::Array))
                .collect(),
        }
    }

    /// The nested series of an array cell; `None` for non-array columns.
    pub fn nested(&self, index: usize) -> Result<Option<Series>> {
        if index >= self.len() {
            return Err(out_of_range(index, self.len()));
        }
        match (&self.data, self.schema.as_array()) {
            (SeriesData::Array(v), _) => Ok(Some(v[index].clone())),
            (SeriesData::Remote(r), Some(a)) => {
                array_item(&self.name, &a.items, r.get(index)?).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Nested frame of a record column.
    pub fn as_frame(&self) -> Option<&DataFrame> {
        match &self.data {
            SeriesData::Record(df) => Some(df),
            _ => None,
        }
    }

    pub(crate) fn as_frame_mut(&mut self) -> Option<&mut DataFrame> {
        match &mut self.data {
            SeriesData::Record(df) => Some(df),
            _ => None,
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(Error::immutable(&self.name))
        }
    }

    /// Replace one cell after validating `value`.
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_mutable()?;
        if index >= self.len() {
            return Err(out_of_range(index, self.len()));
        }
        let value = self
            .schema
            .coerce(value)
            .map_err(|e| at(e, &format!("{}[{}]", self.name, index)))?;
        self.replace_coerced(index, value)
    }

    /// Replace `range` with `values`; lengths must match. Nothing changes
    /// unless every value validates.
    pub fn set_slice(&mut self, range: Range<usize>, values: Vec<Value>) -> Result<()> {
        self.ensure_mutable()?;
        if range.end > self.len() || range.start > range.end {
            return Err(Error::InvalidArgument(format!(
                "slice {}..{} out of range for length {}",
                range.start,
                range.end,
                self.len()
            )));
        }
        if values.len() != range.len() {
            return Err(Error::InvalidArgument(format!(
                "slice of length {} cannot be assigned {} values",
                range.len(),
                values.len()
            )));
        }
        let coerced = values
            .into_iter()
            .zip(range.clone())
            .map(|(v, i)| {
                self.schema
                    .coerce(v)
                    .map_err(|e| at(e, &format!("{}[{}]", self.name, i)))
            })
            .collect::<Result<Vec<_>>>()?;
        for (i, value) in range.zip(coerced) {
            self.replace_coerced(i, value)?;
        }
        Ok(())
    }

    pub(crate) fn replace_coerced(&mut self, index: usize, value: Value) -> Result<()> {
        self.materialize()?;
        let name = self.name.clone();
        let items = self.schema.as_array().map(|a| (*a.items).clone());
        match &mut self.data {
            SeriesData::Values(v) => v[index] = value,
            SeriesData::Record(df) => df.replace_row_coerced(index, value)?,
            SeriesData::Array(v) => {
                let items = items.ok_or_else(|| Error::InvalidState("array column without item type".into()))?;
                v[index] = array_item(&name, &items, value)?;
            }
            SeriesData::Remote(_) => {
                return Err(Error::InvalidState("column still remote after materialize".into()))
            }
        }
        Ok(())
    }

    pub(crate) fn append_coerced(&mut self, values: Vec<Value>) -> Result<()> {
        let name = self.name.clone();
        let items = self.schema.as_array().map(|a| (*a.items).clone());
        match &mut self.data {
            SeriesData::Values(v) => v.extend(values),
            SeriesData::Remote(r) => r.appended.extend(values),
            SeriesData::Record(df) => df.append_coerced_rows(values)?,
            SeriesData::Array(v) => {
                let items = items.ok_or_else(|| Error::InvalidState("array column without item type".into()))?;
                for value in values {
                    v.push(array_item(&name, &items, value)?);
                }
            }
        }
        Ok(())
    }

    /// Resolve remote cells of this column into local values.
    pub(crate) fn materialize(&mut self) -> Result<()> {
        match &mut self.data {
            SeriesData::Remote(remote) => {
                let values = remote.values()?;
                self.data = Series::from_coerced(self.name.clone(), self.schema.clone(), values)?.data;
            }
            SeriesData::Record(df) => df.materialize_all()?,
            _ => {}
        }
        Ok(())
    }

    /// Series holding the cells at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Result<Series> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(out_of_range(bad, len));
        }
        let data = match &self.data {
            SeriesData::Values(v) => SeriesData::Values(indices.iter().map(|&i| v[i].clone()).collect()),
            SeriesData::Remote(r) => {
                let values = indices.iter().map(|&i| r.get(i)).collect::<Result<Vec<_>>>()?;
                return Series::from_coerced(self.name.clone(), self.schema.clone(), values);
            }
            SeriesData::Record(df) => SeriesData::Record(Box::new(df.take(indices)?)),
            SeriesData::Array(v) => SeriesData::Array(indices.iter().map(|&i| v[i].clone()).collect()),
        };
        Ok(Series {
            name: self.name.clone(),
            schema: self.schema.clone(),
            data,
        })
    }

    /// Independent deep copy; remote cells are fetched into the copy.
    pub fn copy(&self) -> Result<Series> {
        let mut copy = self.clone();
        copy.materialize()?;
        Ok(copy)
    }
}

fn array_item(name: &str, items: &SchemaType, value: Value) -> Result<Series> {
    match value {
        Value::Array(elements) => Series::from_coerced(String::new(), items.clone(), elements),
        other => Err(Error::schema(
            name,
            format!("expected array, got {}", other.type_name()),
        )),
    }
}
