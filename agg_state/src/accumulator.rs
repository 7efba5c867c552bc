//! DataFusion [`Accumulator`] and [`GroupsAccumulator`] implementations backed by
//! accumulator states, so any [`AggregateFunction`] can run inside a DataFusion plan.
//! The intermediate state DataFusion ships between aggregation phases is the
//! function's carrier column.
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
    factory::StateFactory,
    functions::{AggregateFunction, StateOf},
    manager::{GroupedAggregate, StateManager},
    serializer::StateSerializer,
    state::AccumulatorState,
};
use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, make_builder},
    datatypes::ArrowPrimitiveType,
};
use datafusion::{
    common::{ScalarValue, exec_err},
    error::Result,
    logical_expr::{Accumulator, EmitTo, GroupsAccumulator},
};

/// Single column input expected by every adapter.
fn single_column<'a>(name: &str, values: &'a [ArrayRef]) -> Result<&'a ArrayRef> {
    match values {
        [column] => Ok(column),
        _ => exec_err!("{name} accepts a single column but was given {}", values.len()),
    }
}

/// An [`Accumulator`] holding one state for ungrouped aggregation.
#[derive(Debug)]
pub struct StateAccumulator<F: AggregateFunction> {
    function: F,
    state: StateOf<F>,
    /// Reused target for every deserialized state row
    scratch: StateOf<F>,
}

impl<F: AggregateFunction> StateAccumulator<F> {
    pub fn new(function: F) -> Self {
        let state = function.factory().create_single_state();
        let scratch = function.factory().create_single_state();
        Self {
            function,
            state,
            scratch,
        }
    }

    /// The accumulated state so far.
    pub fn current_state(&self) -> &StateOf<F> {
        &self.state
    }
}

impl<F: AggregateFunction> Accumulator for StateAccumulator<F> {
    fn update_batch(&mut self, values: &[ArrayRef]) -> Result<()> {
        let column = single_column(self.function.name(), values)?;
        let Some(values) = column.as_primitive_opt::<F::Input>() else {
            return exec_err!(
                "{} expects {} input but was given {}",
                self.function.name(),
                <F::Input as ArrowPrimitiveType>::DATA_TYPE,
                column.data_type()
            );
        };
        for value in values.iter().flatten() {
            self.function.accumulate(&mut self.state, value);
        }
        Ok(())
    }

    fn evaluate(&mut self) -> Result<ScalarValue> {
        let mut builder = make_builder(&self.function.output_type(), 1);
        self.function
            .evaluate_final(&self.state, builder.as_mut())?;
        ScalarValue::try_from_array(&builder.finish(), 0)
    }

    fn size(&self) -> usize {
        size_of_val(&self.function) + self.state.size() + self.scratch.size()
    }

    fn state(&mut self) -> Result<Vec<ScalarValue>> {
        let serializer = self.function.serializer();
        let mut builder = serializer.new_builder(1);
        serializer.serialize(&self.state, builder.as_mut())?;
        Ok(vec![ScalarValue::try_from_array(&builder.finish(), 0)?])
    }

    fn merge_batch(&mut self, states: &[ArrayRef]) -> Result<()> {
        let carrier = single_column(self.function.name(), states)?;
        let Self {
            function,
            state,
            scratch,
        } = self;
        for row in 0..carrier.len() {
            function
                .serializer()
                .deserialize(carrier.as_ref(), row, scratch)?;
            if scratch.is_absent() {
                continue;
            }
            if state.is_absent() {
                state.clone_from(scratch);
            } else {
                function.combine(state, scratch);
            }
        }
        Ok(())
    }
}

/// A [`GroupsAccumulator`] over the grouped state of a [`StateManager`].
#[derive(Debug)]
pub struct StateGroupsAccumulator<F: AggregateFunction> {
    manager: StateManager<F>,
}

impl<F: AggregateFunction> StateGroupsAccumulator<F> {
    pub fn new(function: F) -> Self {
        Self {
            manager: StateManager::new(function),
        }
    }

    pub fn manager(&self) -> &StateManager<F> {
        &self.manager
    }
}

impl<F: AggregateFunction> GroupsAccumulator for StateGroupsAccumulator<F> {
    fn update_batch(
        &mut self,
        values: &[ArrayRef],
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        let values = single_column(self.manager.name(), values)?;
        Ok(self.manager.update_batch(
            values.as_ref(),
            group_indices,
            opt_filter,
            total_num_groups,
        )?)
    }

    fn evaluate(&mut self, emit_to: EmitTo) -> Result<ArrayRef> {
        Ok(self.manager.evaluate(emit_to)?)
    }

    fn state(&mut self, emit_to: EmitTo) -> Result<Vec<ArrayRef>> {
        Ok(vec![self.manager.take_state(emit_to)?])
    }

    fn merge_batch(
        &mut self,
        values: &[ArrayRef],
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        let carrier = single_column(self.manager.name(), values)?;
        Ok(self.manager.merge_batch(
            carrier.as_ref(),
            group_indices,
            opt_filter,
            total_num_groups,
        )?)
    }

    fn size(&self) -> usize {
        self.manager.size() + std::mem::size_of::<Self>()
    }
}
