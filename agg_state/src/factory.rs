//! Creation of single and grouped accumulator states.
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
use crate::state::{AccumulatorState, GroupedState};
use std::fmt::Debug;

/// The single place that knows how to allocate one state shape.
pub trait StateFactory: Debug + Send + Sync {
    type State: AccumulatorState;
    type Grouped: GroupedState<State = Self::State>;

    /// A fresh absent state for global (ungrouped) aggregation.
    fn create_single_state(&self) -> Self::State {
        Self::State::default()
    }

    /// Empty grouped storage for per-group aggregation.
    fn create_grouped_state(&self) -> Self::Grouped;
}
