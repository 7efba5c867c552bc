//! `avg` over Float64, carried as a (sum, count) pair.
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
    shapes::{SumAndCountState, SumAndCountStateFactory, SumAndCountStateSerializer},
};
use arrow::{
    array::{ArrayBuilder, Float64Builder},
    datatypes::{DataType, Float64Type},
};
use num_traits::ToPrimitive;

#[derive(Debug, Default, Clone, Copy)]
pub struct Avg {
    factory: SumAndCountStateFactory,
    serializer: SumAndCountStateSerializer,
}

impl Avg {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean of a present pair. A pair with no rows has no mean.
    fn mean(state: &SumAndCountState) -> Option<f64> {
        let (sum, count) = state.value()?;
        if count == 0 {
            return None;
        }
        Some(sum / count.to_f64()?)
    }
}

impl AggregateFunction for Avg {
    type Input = Float64Type;
    type State = SumAndCountState;
    type Factory = SumAndCountStateFactory;
    type Serializer = SumAndCountStateSerializer;

    fn name(&self) -> &'static str {
        "avg"
    }

    fn factory(&self) -> &Self::Factory {
        &self.factory
    }

    fn serializer(&self) -> &Self::Serializer {
        &self.serializer
    }

    fn output_type(&self) -> DataType {
        DataType::Float64
    }

    fn accumulate(&self, state: &mut Self::State, value: InputOf<Self>) {
        state.add(value);
    }

    fn combine(&self, existing: &mut Self::State, incoming: &Self::State) {
        existing.merge_with(incoming);
    }

    fn evaluate_final(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        downcast_builder::<Float64Builder>(out, &DataType::Float64)?
            .append_option(Self::mean(state));
        Ok(())
    }
}
