//! Row views

use crate::frame::DataFrame;
use portex_core::{Error, Result, Value};
use std::collections::BTreeMap;

/// Borrowed view of one row of a [`DataFrame`]
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    frame: &'a DataFrame,
    index: usize,
}

impl<'a> Row<'a> {
    pub(crate) fn new(frame: &'a DataFrame, index: usize) -> Self {
        Row { frame, index }
    }

    /// Position of the row in its frame.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cell at a column path such as `"label"` or `"box.x"`.
    pub fn get(&self, path: &str) -> Result<Value> {
        let column = self
            .frame
            .column_path(path)
            .ok_or_else(|| Error::not_found("column", path))?;
        column.get(self.index)
    }

    /// Column names of the row.
    pub fn columns(&self) -> Vec<&'a str> {
        self.frame.column_names()
    }

    /// The row as a record value.
    pub fn to_value(&self) -> Result<Value> {
        let mut fields = BTreeMap::new();
        for name in self.frame.column_names() {
            fields.insert(name.to_string(), self.get(name)?);
        }
        Ok(Value::Record(fields))
    }
}
