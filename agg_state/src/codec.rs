//! The exchange and spill wire format: state batches as an Arrow IPC stream.
//!
//! The stream schema records the total number of rows written, so a stream cut
//! short at a message boundary is caught even though IPC itself cannot tell.
/*
* Copyright 2022-2025 Crown Copyright
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*     http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*/
use crate::error::{Result, StateError, corrupt_err};
use arrow::{
    datatypes::{Schema, SchemaRef},
    ipc::{reader::StreamReader, writer::StreamWriter},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use std::{
    io::{Read, Write},
    sync::Arc,
};

/// Schema metadata key holding the number of rows in a state stream.
pub const ROWS_METADATA_KEY: &str = "agg_state.rows";

/// Write `batch` to `writer` as an IPC stream of batches of at most `batch_size` rows.
/// Returns the writer once the stream is finished.
///
/// # Errors
/// If `batch_size` is zero or the writer fails.
pub fn write_state_stream<W: Write>(
    writer: W,
    batch: &RecordBatch,
    batch_size: usize,
) -> Result<W> {
    if batch_size == 0 {
        return Err(StateError::InvalidConfig(
            "state stream batch size must be positive".to_owned(),
        ));
    }
    let mut metadata = batch.schema().metadata().clone();
    metadata.insert(ROWS_METADATA_KEY.to_owned(), batch.num_rows().to_string());
    let schema = Arc::new(Schema::new_with_metadata(
        batch.schema().fields().clone(),
        metadata,
    ));
    let mut stream = StreamWriter::try_new(writer, &schema)?;
    let mut offset = 0;
    while offset < batch.num_rows() {
        let length = batch_size.min(batch.num_rows() - offset);
        stream.write(&batch.slice(offset, length).with_schema(schema.clone())?)?;
        offset += length;
    }
    stream.finish()?;
    Ok(stream.into_inner()?)
}

/// Encode one state batch as an exchange payload.
///
/// # Errors
/// If the batch cannot be written as IPC.
pub fn encode_state_batch(batch: &RecordBatch) -> Result<Bytes> {
    let buffer = write_state_stream(Vec::new(), batch, batch.num_rows().max(1))?;
    Ok(Bytes::from(buffer))
}

/// Decode an exchange payload written by [`encode_state_batch`] or [`write_state_stream`].
///
/// # Errors
/// [`StateError::DataCorruption`] if the payload is malformed or truncated.
pub fn decode_state_batches(payload: &[u8]) -> Result<Vec<RecordBatch>> {
    StateStreamReader::try_new(payload)?.collect()
}

/// Reads the batches of a state stream, checking the declared row count once the
/// stream ends.
#[derive(Debug)]
pub struct StateStreamReader<R: Read> {
    reader: StreamReader<R>,
    expected_rows: usize,
    rows_read: usize,
    done: bool,
}

impl<R: Read> StateStreamReader<R> {
    /// Open a state stream, reading its schema.
    ///
    /// # Errors
    /// [`StateError::DataCorruption`] if the schema cannot be read or has no row count.
    pub fn try_new(input: R) -> Result<Self> {
        let reader = StreamReader::try_new(input, None)
            .map_err(|e| StateError::DataCorruption(format!("unreadable state stream: {e}")))?;
        let expected_rows = reader
            .schema()
            .metadata()
            .get(ROWS_METADATA_KEY)
            .and_then(|rows| rows.parse::<usize>().ok())
            .ok_or_else(|| {
                StateError::DataCorruption("state stream carries no row count".to_owned())
            })?;
        Ok(Self {
            reader,
            expected_rows,
            rows_read: 0,
            done: false,
        })
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    /// Rows the writer declared for the whole stream.
    #[must_use]
    pub fn expected_rows(&self) -> usize {
        self.expected_rows
    }

    fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        match self.reader.next() {
            Some(Ok(batch)) => {
                self.rows_read += batch.num_rows();
                if self.rows_read > self.expected_rows {
                    return Some(corrupt_err!(
                        "state stream holds more than its declared {} rows",
                        self.expected_rows
                    ));
                }
                Some(Ok(batch))
            }
            Some(Err(e)) => Some(corrupt_err!("unreadable state batch: {e}")),
            None if self.rows_read != self.expected_rows => Some(corrupt_err!(
                "state stream truncated after {} of {} rows",
                self.rows_read,
                self.expected_rows
            )),
            None => None,
        }
    }
}

impl<R: Read> Iterator for StateStreamReader<R> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_batch();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Float64Array, Int64Array},
        datatypes::{DataType, Field},
    };
    use std::collections::HashMap;

    fn state_batch(rows: i64) -> RecordBatch {
        let keys: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        #[allow(clippy::cast_precision_loss)]
        let sums: ArrayRef = Arc::new(Float64Array::from_iter(
            (0..rows).map(|i| (i % 3 != 0).then_some(i as f64 * 0.5)),
        ));
        let schema = Schema::new(vec![
            Field::new("key", DataType::Int64, true),
            Field::new("sum(x)", DataType::Float64, true).with_metadata(HashMap::from([(
                "agg_state.shape".to_owned(),
                "nullable_float64".to_owned(),
            )])),
        ]);
        RecordBatch::try_new(Arc::new(schema), vec![keys, sums]).unwrap()
    }

    #[test]
    fn should_round_trip_batch_with_field_metadata() -> Result<()> {
        // Given
        let batch = state_batch(10);

        // When
        let payload = encode_state_batch(&batch)?;
        let decoded = decode_state_batches(&payload)?;

        // Then
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].columns(), batch.columns());
        assert_eq!(
            decoded[0].schema().field(1).metadata(),
            batch.schema().field(1).metadata()
        );
        Ok(())
    }

    #[test]
    fn should_split_into_batches() -> Result<()> {
        // Given
        let batch = state_batch(10);

        // When
        let buffer = write_state_stream(Vec::new(), &batch, 4)?;
        let reader = StateStreamReader::try_new(buffer.as_slice())?;

        // Then
        assert_eq!(reader.expected_rows(), 10);
        let sizes = reader
            .map(|b| b.map(|b| b.num_rows()))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(sizes, vec![4, 4, 2]);
        Ok(())
    }

    #[test]
    fn should_round_trip_empty_batch() -> Result<()> {
        let payload = encode_state_batch(&state_batch(0))?;
        assert!(decode_state_batches(&payload)?.is_empty());
        Ok(())
    }

    #[test]
    fn should_detect_truncation_inside_message() -> Result<()> {
        // Given
        let payload = encode_state_batch(&state_batch(100))?;

        // When
        let result = decode_state_batches(&payload[..payload.len() - 40]);

        // Then
        assert!(matches!(result, Err(StateError::DataCorruption(_))));
        Ok(())
    }

    #[test]
    fn should_detect_missing_trailing_batches() -> Result<()> {
        // Given
        let batch = state_batch(10);
        let schema = Arc::new(batch.schema().as_ref().clone().with_metadata(HashMap::from([(
            ROWS_METADATA_KEY.to_owned(),
            "10".to_owned(),
        )])));
        let mut stream = StreamWriter::try_new(Vec::new(), &schema)?;
        stream.write(&batch.slice(0, 5).with_schema(schema.clone())?)?;
        stream.finish()?;
        let payload = stream.into_inner()?;

        // When
        let result = decode_state_batches(&payload);

        // Then
        assert!(matches!(result, Err(StateError::DataCorruption(_))));
        Ok(())
    }

    #[test]
    fn should_reject_garbage() {
        assert!(matches!(
            decode_state_batches(b"not an arrow stream"),
            Err(StateError::DataCorruption(_))
        ));
    }

    #[test]
    fn should_reject_zero_batch_size() {
        assert!(matches!(
            write_state_stream(Vec::new(), &state_batch(1), 0),
            Err(StateError::InvalidConfig(_))
        ));
    }
}
