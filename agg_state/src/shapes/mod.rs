//! The concrete accumulator state shapes. Each shape brings a state type, its grouped
//! storage, a factory and a serializer.
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
pub mod histogram;
pub mod nullable;
pub mod sum_count;

pub use histogram::{
    GroupedHistogramState, HistogramState, HistogramStateFactory, HistogramStateSerializer,
};
pub use nullable::{
    GroupedNullableState, NullableDoubleState, NullableLongState, NullableState,
    NullableStateFactory, NullableStateSerializer,
};
pub use sum_count::{
    GroupedSumAndCountState, SumAndCountState, SumAndCountStateFactory,
    SumAndCountStateSerializer,
};
