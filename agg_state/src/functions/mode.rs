//! `mode` over Int64, carried as a value histogram.
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
use super::{AggregateFunction, InputOf};
use crate::{
    column::downcast_builder,
    error::Result,
    shapes::{HistogramState, HistogramStateFactory, HistogramStateSerializer},
};
use arrow::{
    array::{ArrayBuilder, Int64Builder},
    datatypes::{DataType, Int64Type},
};
use std::collections::BTreeMap;

/// Most frequent non-null value. Ties go to the smallest value.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mode {
    factory: HistogramStateFactory,
    serializer: HistogramStateSerializer,
}

impl Mode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Buckets iterate in ascending value order, so only a strictly greater count
/// replaces the current best.
fn most_frequent(buckets: &BTreeMap<i64, u64>) -> Option<i64> {
    let mut best: Option<(i64, u64)> = None;
    for (&value, &count) in buckets {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

impl AggregateFunction for Mode {
    type Input = Int64Type;
    type State = HistogramState;
    type Factory = HistogramStateFactory;
    type Serializer = HistogramStateSerializer;

    fn name(&self) -> &'static str {
        "mode"
    }

    fn factory(&self) -> &Self::Factory {
        &self.factory
    }

    fn serializer(&self) -> &Self::Serializer {
        &self.serializer
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn accumulate(&self, state: &mut Self::State, value: InputOf<Self>) {
        state.add(value);
    }

    fn combine(&self, existing: &mut Self::State, incoming: &Self::State) {
        existing.merge_with(incoming);
    }

    fn evaluate_final(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        downcast_builder::<Int64Builder>(out, &DataType::Int64)?
            .append_option(state.buckets().and_then(most_frequent));
        Ok(())
    }
}
