// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row-level cursor over a decoded chunk.

use crate::chunk::decode::ColumnMeta;
use crate::chunk::state::ChunkStatus;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use arrow_array::{
    Array, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, TimeUnit};
use std::fmt;

/// A single cell, converted out of its Arrow column.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    /// Days since the Unix epoch.
    Date32(i32),
    /// Microseconds since the Unix epoch.
    TimestampMicros(i64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Self::Date32(v) => write!(f, "{v}"),
            Self::TimestampMicros(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! primitive_cell {
    ($array:expr, $row:expr, $arrow_ty:ty, $variant:ident) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$arrow_ty>()
            .ok_or_else(|| Error::parse(concat!("column is not a ", stringify!($arrow_ty))))?;
        Ok(CellValue::$variant(typed.value($row)))
    }};
}

fn cell_from_array(array: &dyn Array, row: usize) -> Result<CellValue> {
    if array.is_null(row) {
        return Ok(CellValue::Null);
    }
    match array.data_type() {
        DataType::Boolean => primitive_cell!(array, row, BooleanArray, Bool),
        DataType::Int8 => primitive_cell!(array, row, Int8Array, Int8),
        DataType::Int16 => primitive_cell!(array, row, Int16Array, Int16),
        DataType::Int32 => primitive_cell!(array, row, Int32Array, Int32),
        DataType::Int64 => primitive_cell!(array, row, Int64Array, Int64),
        DataType::Float32 => primitive_cell!(array, row, Float32Array, Float32),
        DataType::Float64 => primitive_cell!(array, row, Float64Array, Float64),
        DataType::Date32 => primitive_cell!(array, row, Date32Array, Date32),
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            primitive_cell!(array, row, TimestampMicrosecondArray, TimestampMicros)
        }
        DataType::Utf8 => {
            let typed = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::parse("column is not a StringArray"))?;
            Ok(CellValue::Utf8(typed.value(row).to_string()))
        }
        DataType::Binary => {
            let typed = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| Error::parse("column is not a BinaryArray"))?;
            Ok(CellValue::Binary(typed.value(row).to_vec()))
        }
        other => Err(Error::parse(format!("unsupported cell type {other}"))),
    }
}

/// Cursor over the rows of one decoded chunk.
///
/// The cursor starts before the first row; call [`advance`] to position it.
/// Iteration skips zero-row batches and never yields more rows than the
/// chunk's declared row count.
///
/// [`advance`]: ChunkRowIterator::advance
#[derive(Debug)]
pub struct ChunkRowIterator {
    batches: Vec<RecordBatch>,
    metas: Vec<ColumnMeta>,
    declared_rows: i64,
    batch_cursor: usize,
    row_in_batch: i64,
    rows_read: i64,
}

impl ChunkRowIterator {
    pub(crate) fn for_chunk(chunk: &Chunk) -> Result<Self> {
        let status = chunk.status();
        if status != ChunkStatus::ProcessingSucceeded {
            return Err(Error::internal(format!(
                "chunk {} is not readable in status {status}",
                chunk.chunk_index()
            )));
        }
        Ok(Self {
            batches: chunk.batches(),
            metas: chunk.column_metas(),
            declared_rows: chunk.row_count(),
            batch_cursor: 0,
            row_in_batch: -1,
            rows_read: 0,
        })
    }

    /// Position of the next readable row, if any. Skips exhausted and
    /// zero-row batches starting from the current cursor.
    fn next_position(&self) -> Option<(usize, usize)> {
        if self.rows_read >= self.declared_rows {
            return None;
        }
        let mut cursor = self.batch_cursor;
        let mut row = (self.row_in_batch + 1) as usize;
        loop {
            match self.batches.get(cursor) {
                None => return None,
                Some(batch) if row >= batch.num_rows() => {
                    cursor += 1;
                    row = 0;
                }
                Some(_) => return Some((cursor, row)),
            }
        }
    }

    pub fn has_next(&self) -> bool {
        self.next_position().is_some()
    }

    /// Move to the next row. Returns `false` once the chunk is exhausted.
    pub fn advance(&mut self) -> bool {
        match self.next_position() {
            Some((cursor, row)) => {
                self.batch_cursor = cursor;
                self.row_in_batch = row as i64;
                self.rows_read += 1;
                true
            }
            None => false,
        }
    }

    /// Value of `column` in the current row.
    pub fn cell(&self, column: usize) -> Result<CellValue> {
        if self.row_in_batch < 0 {
            return Err(Error::internal("cursor is not positioned on a row"));
        }
        let batch = &self.batches[self.batch_cursor];
        if column >= batch.num_columns() {
            return Err(Error::internal(format!(
                "column {column} out of range ({} columns)",
                batch.num_columns()
            )));
        }
        cell_from_array(batch.column(column).as_ref(), self.row_in_batch as usize)
    }

    pub fn column_count(&self) -> usize {
        self.metas.len()
    }

    pub fn column_metas(&self) -> &[ColumnMeta] {
        &self.metas
    }

    /// Rows yielded so far.
    pub fn rows_read(&self) -> i64 {
        self.rows_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompressionCodec, StatementContext};
    use arrow_ipc::writer::StreamWriter;
    use arrow_schema::{Field, Schema};
    use std::sync::Arc;

    fn test_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn batch_of(ids: Vec<i32>, names: Vec<Option<&str>>) -> RecordBatch {
        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn ipc_payload(batches: &[RecordBatch]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buffer, &test_schema()).unwrap();
            for batch in batches {
                writer.write(batch).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer
    }

    fn decoded_chunk(batches: &[RecordBatch], declared_rows: i64) -> Chunk {
        let chunk = Chunk::downloaded(0, 0, declared_rows, StatementContext::new("stmt"));
        chunk
            .decode(&ipc_payload(batches), CompressionCodec::None)
            .unwrap();
        chunk
    }

    #[test]
    fn test_iterates_all_rows_across_batches() {
        let chunk = decoded_chunk(
            &[
                batch_of(vec![1, 2], vec![Some("a"), Some("b")]),
                batch_of(vec![3], vec![None]),
            ],
            3,
        );
        let mut rows = chunk.rows().unwrap();

        let mut ids = Vec::new();
        while rows.advance() {
            ids.push(rows.cell(0).unwrap());
        }
        assert_eq!(
            ids,
            vec![CellValue::Int32(1), CellValue::Int32(2), CellValue::Int32(3)]
        );
        assert_eq!(rows.rows_read(), 3);
        assert!(!rows.has_next());
    }

    #[test]
    fn test_skips_zero_row_batches() {
        let chunk = decoded_chunk(
            &[
                batch_of(vec![1], vec![Some("a")]),
                batch_of(vec![], vec![]),
                batch_of(vec![2], vec![Some("b")]),
            ],
            2,
        );
        let mut rows = chunk.rows().unwrap();

        assert!(rows.advance());
        assert_eq!(rows.cell(0).unwrap(), CellValue::Int32(1));
        assert!(rows.advance());
        assert_eq!(rows.cell(0).unwrap(), CellValue::Int32(2));
        assert!(!rows.advance());
    }

    #[test]
    fn test_declared_row_count_bounds_iteration() {
        // Payload holds 4 rows but the chunk declares 2.
        let chunk = decoded_chunk(
            &[batch_of(
                vec![1, 2, 3, 4],
                vec![Some("a"), Some("b"), Some("c"), Some("d")],
            )],
            2,
        );
        let mut rows = chunk.rows().unwrap();

        assert!(rows.advance());
        assert!(rows.advance());
        assert!(!rows.has_next());
        assert!(!rows.advance());
        assert_eq!(rows.rows_read(), 2);
    }

    #[test]
    fn test_null_cells() {
        let chunk = decoded_chunk(&[batch_of(vec![1], vec![None])], 1);
        let mut rows = chunk.rows().unwrap();
        rows.advance();
        assert_eq!(rows.cell(1).unwrap(), CellValue::Null);
    }

    #[test]
    fn test_cell_before_advance_is_rejected() {
        let chunk = decoded_chunk(&[batch_of(vec![1], vec![Some("a")])], 1);
        let rows = chunk.rows().unwrap();
        assert!(rows.cell(0).is_err());
    }

    #[test]
    fn test_cell_out_of_range_column() {
        let chunk = decoded_chunk(&[batch_of(vec![1], vec![Some("a")])], 1);
        let mut rows = chunk.rows().unwrap();
        rows.advance();
        assert!(rows.cell(2).is_err());
    }

    #[test]
    fn test_rows_on_undecoded_chunk_is_rejected() {
        let chunk = Chunk::pending(0, 0, 10, StatementContext::new("stmt"), false);
        assert!(chunk.rows().is_err());
    }

    #[test]
    fn test_string_cells() {
        let chunk = decoded_chunk(&[batch_of(vec![7], vec![Some("hello")])], 1);
        let mut rows = chunk.rows().unwrap();
        rows.advance();
        assert_eq!(rows.cell(1).unwrap(), CellValue::Utf8("hello".to_string()));
        assert_eq!(rows.cell(1).unwrap().to_string(), "hello");
    }
}
