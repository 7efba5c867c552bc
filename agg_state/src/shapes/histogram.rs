//! A growable value histogram: the variable-length state family.
//!
//! Each present state is written as one binary frame:
//!
//! ```text
//! +-------+---------+-----------+----------------------------------+
//! | magic | version | count u32 | count x (value i64, freq u64)    |
//! | 'H'   | 1       | LE        | LE, ascending by value           |
//! +-------+---------+-----------+----------------------------------+
//! ```
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
use crate::{
    column::{ShapeId, downcast_array, downcast_builder},
    error::{Result, StateError, corrupt_err, shape_err},
    factory::StateFactory,
    serializer::StateSerializer,
    state::{AccumulatorState, GroupedState, grow_to},
};
use arrow::{
    array::{Array, ArrayBuilder, BinaryArray, BinaryBuilder},
    datatypes::DataType,
};
use bytes::{Buf, BufMut};
use std::collections::BTreeMap;

const FRAME_MAGIC: u8 = b'H';
const FRAME_VERSION: u8 = 1;
/// magic + version + entry count
const HEADER_LEN: usize = 1 + 1 + size_of::<u32>();
const ENTRY_LEN: usize = size_of::<i64>() + size_of::<u64>();
/// In-memory bytes per bucket; BTreeMap node overhead is roughly one pointer per entry
const BUCKET_SIZE: usize = ENTRY_LEN + size_of::<usize>();

/// Frequency of each distinct value seen by a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramState {
    is_null: bool,
    buckets: BTreeMap<i64, u64>,
}

impl HistogramState {
    #[must_use]
    pub fn from_buckets(buckets: BTreeMap<i64, u64>) -> Self {
        Self {
            is_null: false,
            buckets,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    #[must_use]
    pub fn buckets(&self) -> Option<&BTreeMap<i64, u64>> {
        (!self.is_null).then_some(&self.buckets)
    }

    /// Number of distinct values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn add(&mut self, value: i64) {
        self.add_count(value, 1);
    }

    /// Frequencies wrap on overflow, like integer sums.
    pub fn add_count(&mut self, value: i64, count: u64) {
        self.is_null = false;
        let entry = self.buckets.entry(value).or_insert(0);
        *entry = entry.wrapping_add(count);
    }

    /// Fold another partial histogram into this one.
    pub fn merge_with(&mut self, incoming: &Self) {
        if incoming.is_null {
            return;
        }
        if self.is_null {
            self.clone_from(incoming);
            return;
        }
        for (&value, &count) in &incoming.buckets {
            self.add_count(value, count);
        }
    }
}

impl Default for HistogramState {
    fn default() -> Self {
        Self {
            is_null: true,
            buckets: BTreeMap::new(),
        }
    }
}

impl AccumulatorState for HistogramState {
    fn is_absent(&self) -> bool {
        self.is_null
    }

    fn reset(&mut self) {
        self.is_null = true;
        self.buckets.clear();
    }

    fn size(&self) -> usize {
        size_of::<Self>() + self.buckets.len() * BUCKET_SIZE
    }
}

/// Histograms are variable length so each group owns its own map; the total
/// number of entries is tracked for memory accounting.
#[derive(Debug, Default)]
pub struct GroupedHistogramState {
    states: Vec<HistogramState>,
    entries: usize,
}

impl GroupedState for GroupedHistogramState {
    type State = HistogramState;

    fn num_groups(&self) -> usize {
        self.states.len()
    }

    fn ensure_groups(&mut self, total_num_groups: usize) {
        grow_to(&mut self.states, total_num_groups, HistogramState::default());
    }

    fn read<R>(&self, group_index: usize, f: impl FnOnce(&Self::State) -> R) -> R {
        f(&self.states[group_index])
    }

    fn modify<R>(&mut self, group_index: usize, f: impl FnOnce(&mut Self::State) -> R) -> R {
        let state = &mut self.states[group_index];
        let before = state.len();
        let result = f(state);
        self.entries = self.entries - before + state.len();
        result
    }

    fn remove_front(&mut self, n: usize) {
        let removed: usize = self.states.drain(..n).map(|s| s.len()).sum();
        self.entries -= removed;
    }

    fn clear(&mut self) {
        self.states = Vec::new();
        self.entries = 0;
    }

    fn size(&self) -> usize {
        self.states.capacity() * size_of::<HistogramState>() + self.entries * BUCKET_SIZE
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramStateFactory;

impl StateFactory for HistogramStateFactory {
    type State = HistogramState;
    type Grouped = GroupedHistogramState;

    fn create_grouped_state(&self) -> Self::Grouped {
        GroupedHistogramState::default()
    }
}

/// Writes a [`HistogramState`] as one binary frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramStateSerializer;

/// Encode a histogram's buckets as a frame.
///
/// # Errors
/// [`StateError::ResourceExhausted`] if there are more than `u32::MAX` distinct values.
pub fn encode_frame(buckets: &BTreeMap<i64, u64>) -> Result<Vec<u8>> {
    let count = u32::try_from(buckets.len()).map_err(|_| {
        StateError::ResourceExhausted(format!(
            "histogram of {} distinct values does not fit in one frame",
            buckets.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + buckets.len() * ENTRY_LEN);
    frame.put_u8(FRAME_MAGIC);
    frame.put_u8(FRAME_VERSION);
    frame.put_u32_le(count);
    for (&value, &count) in buckets {
        frame.put_i64_le(value);
        frame.put_u64_le(count);
    }
    Ok(frame)
}

/// Decode a frame written by [`encode_frame`].
///
/// # Errors
/// [`StateError::ShapeMismatch`] for an unknown magic byte or version and
/// [`StateError::DataCorruption`] if the frame is truncated, has trailing bytes or
/// repeats a value.
pub fn decode_frame(mut frame: &[u8]) -> Result<BTreeMap<i64, u64>> {
    if frame.remaining() < HEADER_LEN {
        return corrupt_err!(
            "histogram frame of {} bytes is shorter than its header",
            frame.len()
        );
    }
    let magic = frame.get_u8();
    if magic != FRAME_MAGIC {
        return shape_err!("histogram frame has unknown magic byte {magic:#04x}");
    }
    let version = frame.get_u8();
    if version != FRAME_VERSION {
        return shape_err!(
            "histogram frame version {version} but this node reads version {FRAME_VERSION}"
        );
    }
    let count = frame.get_u32_le() as usize;
    if Some(frame.remaining()) != count.checked_mul(ENTRY_LEN) {
        return corrupt_err!(
            "histogram frame declares {count} entries but holds {} payload bytes",
            frame.remaining()
        );
    }
    let mut buckets = BTreeMap::new();
    for _ in 0..count {
        let value = frame.get_i64_le();
        if buckets.insert(value, frame.get_u64_le()).is_some() {
            return corrupt_err!("histogram frame repeats value {value}");
        }
    }
    Ok(buckets)
}

impl StateSerializer for HistogramStateSerializer {
    type State = HistogramState;

    fn shape(&self) -> ShapeId {
        ShapeId::new("histogram", u32::from(FRAME_VERSION))
    }

    fn carrier_type(&self) -> DataType {
        DataType::Binary
    }

    fn serialize(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        let out = downcast_builder::<BinaryBuilder>(out, &DataType::Binary)?;
        match state.buckets() {
            Some(buckets) => out.append_value(encode_frame(buckets)?),
            None => out.append_null(),
        }
        Ok(())
    }

    fn deserialize(
        &self,
        input: &dyn Array,
        position: usize,
        state: &mut Self::State,
    ) -> Result<()> {
        let input = downcast_array::<BinaryArray>(input, position, &DataType::Binary)?;
        if input.is_null(position) {
            state.reset();
        } else {
            *state = HistogramState::from_buckets(decode_frame(input.value(position))?);
        }
        Ok(())
    }
}
