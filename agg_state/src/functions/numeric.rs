//! `sum` and `max` over primitive columns, both carried as a single nullable scalar.
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
    shapes::{NullableState, NullableStateFactory, NullableStateSerializer},
};
use arrow::{
    array::{ArrayBuilder, ArrowNativeTypeOp, ArrowPrimitiveType, PrimitiveBuilder},
    datatypes::DataType,
};
use std::fmt::Debug;

/// Append a nullable scalar state as its own final value.
fn evaluate_scalar<T: ArrowPrimitiveType>(
    state: &NullableState<T>,
    out: &mut dyn ArrayBuilder,
) -> Result<()> {
    downcast_builder::<PrimitiveBuilder<T>>(out, &T::DATA_TYPE)?.append_option(state.value());
    Ok(())
}

/// Sum of the non-null input values. Integer sums wrap on overflow.
pub struct Sum<T: ArrowPrimitiveType> {
    factory: NullableStateFactory<T>,
    serializer: NullableStateSerializer<T>,
}

impl<T: ArrowPrimitiveType> Sum<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factory: NullableStateFactory::new(),
            serializer: NullableStateSerializer::new(),
        }
    }
}

impl<T: ArrowPrimitiveType> Default for Sum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrowPrimitiveType> Debug for Sum<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sum<{}>", T::DATA_TYPE)
    }
}

impl<T: ArrowPrimitiveType> AggregateFunction for Sum<T> {
    type Input = T;
    type State = NullableState<T>;
    type Factory = NullableStateFactory<T>;
    type Serializer = NullableStateSerializer<T>;

    fn name(&self) -> &'static str {
        "sum"
    }

    fn factory(&self) -> &Self::Factory {
        &self.factory
    }

    fn serializer(&self) -> &Self::Serializer {
        &self.serializer
    }

    fn output_type(&self) -> DataType {
        T::DATA_TYPE
    }

    fn accumulate(&self, state: &mut Self::State, value: InputOf<Self>) {
        state.update_with(value, ArrowNativeTypeOp::add_wrapping);
    }

    fn combine(&self, existing: &mut Self::State, incoming: &Self::State) {
        existing.merge_with(incoming, ArrowNativeTypeOp::add_wrapping);
    }

    fn evaluate_final(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        evaluate_scalar(state, out)
    }
}

/// Largest non-null input value. Floats use the IEEE 754 total order, so NaN is
/// greater than every other value.
pub struct Max<T: ArrowPrimitiveType> {
    factory: NullableStateFactory<T>,
    serializer: NullableStateSerializer<T>,
}

impl<T: ArrowPrimitiveType> Max<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factory: NullableStateFactory::new(),
            serializer: NullableStateSerializer::new(),
        }
    }

    fn larger(current: T::Native, value: T::Native) -> T::Native {
        if value.is_gt(current) { value } else { current }
    }
}

impl<T: ArrowPrimitiveType> Default for Max<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrowPrimitiveType> Debug for Max<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Max<{}>", T::DATA_TYPE)
    }
}

impl<T: ArrowPrimitiveType> AggregateFunction for Max<T> {
    type Input = T;
    type State = NullableState<T>;
    type Factory = NullableStateFactory<T>;
    type Serializer = NullableStateSerializer<T>;

    fn name(&self) -> &'static str {
        "max"
    }

    fn factory(&self) -> &Self::Factory {
        &self.factory
    }

    fn serializer(&self) -> &Self::Serializer {
        &self.serializer
    }

    fn output_type(&self) -> DataType {
        T::DATA_TYPE
    }

    fn accumulate(&self, state: &mut Self::State, value: InputOf<Self>) {
        state.update_with(value, Self::larger);
    }

    fn combine(&self, existing: &mut Self::State, incoming: &Self::State) {
        existing.merge_with(incoming, Self::larger);
    }

    fn evaluate_final(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        evaluate_scalar(state, out)
    }
}
