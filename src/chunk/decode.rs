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

//! Decoding of downloaded chunk payloads into Arrow record batches.

use crate::error::Result;
use crate::types::CompressionCodec;
use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use arrow_schema::{DataType, Schema};
use std::io::{Cursor, Read};
use tracing::debug;

/// Field metadata key under which the warehouse records the SQL type name
/// of a column (e.g. `DECIMAL(10,2)` for a column shipped as `Utf8`).
pub const SQL_TYPE_TAG_KEY: &str = "Spark:DataType:SqlName";

/// Column description extracted from the decoded schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
    /// Original SQL type name, when the schema carries one.
    pub type_tag: Option<String>,
}

/// Extract per-column metadata from a decoded schema.
pub fn column_metas(schema: &Schema) -> Vec<ColumnMeta> {
    schema
        .fields()
        .iter()
        .map(|field| ColumnMeta {
            name: field.name().clone(),
            data_type: field.data_type().clone(),
            type_tag: field.metadata().get(SQL_TYPE_TAG_KEY).cloned(),
        })
        .collect()
}

/// Decode a downloaded chunk payload into record batches.
///
/// Decompresses according to `codec`, then reads the Arrow IPC stream to
/// completion. Any decompression or IPC error surfaces as a parse error;
/// the caller rolls the chunk into its failed state.
pub fn decode_chunk_data(data: &[u8], codec: CompressionCodec) -> Result<Vec<RecordBatch>> {
    debug!(
        "Decoding chunk payload: {} bytes, codec={}",
        data.len(),
        codec.as_str()
    );

    let decompressed: Vec<u8> = match codec {
        CompressionCodec::None => data.to_vec(),
        CompressionCodec::Lz4Frame => {
            let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| crate::error::Error::parse(format!("LZ4 decompression failed: {e}")))?;
            out
        }
    };

    let cursor = Cursor::new(decompressed);
    let reader = StreamReader::try_new(cursor, None)?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }

    debug!("Decoded {} record batches", batches.len());
    Ok(batches)
}
