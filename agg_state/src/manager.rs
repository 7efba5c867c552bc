//! The state manager: owns one aggregate function's grouped state for the lifetime of an
//! operator and moves it to and from carrier columns.
//!
//! Exchange and spill share one path: [`GroupedAggregate::take_state`] writes every
//! group in ascending group id order, and [`GroupedAggregate::merge_batch`] reads
//! carrier rows back through deserialize and combine.
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
    error::{Result, StateError, corrupt_err},
    factory::StateFactory,
    functions::AggregateFunction,
    null_state::{accumulate, for_each_selected_row},
    serializer::StateSerializer,
    state::{AccumulatorState, GroupedState},
};
use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, make_builder},
    datatypes::{ArrowPrimitiveType, DataType, Field},
};
use datafusion::logical_expr::EmitTo;
use log::debug;
use std::fmt::Debug;

/// Shape-agnostic view of a [`StateManager`], so an operator can hold aggregates of
/// different state shapes side by side.
pub trait GroupedAggregate: Debug + Send {
    /// Name of the aggregate function.
    fn name(&self) -> &'static str;

    /// Arrow type of final values.
    fn output_type(&self) -> DataType;

    /// Carrier field for this aggregate's state, tagged with its shape.
    fn carrier_field(&self, name: &str) -> Field;

    /// Validate a carrier field received from an exchange or spill.
    ///
    /// # Errors
    /// [`StateError::ShapeMismatch`] if it was written by a different shape or version.
    fn check_received_field(&self, field: &Field) -> Result<()>;

    /// Fold raw input rows into their groups. Null values and rows removed by
    /// `opt_filter` are skipped.
    ///
    /// # Errors
    /// If `values` is not of the function's input type, lengths disagree or a group
    /// index is not below `total_num_groups`.
    fn update_batch(
        &mut self,
        values: &dyn Array,
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()>;

    /// Combine partial states from a carrier column into their groups.
    ///
    /// # Errors
    /// [`StateError::CarrierTypeMismatch`] if `carrier` is not of the carrier type and
    /// [`StateError::DataCorruption`] if a row cannot be decoded or a group index is not
    /// below `total_num_groups`. Groups combined before
    /// the failing row keep their new state; the caller must abandon the operator.
    fn merge_batch(
        &mut self,
        carrier: &dyn Array,
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()>;

    /// Serialize every group without releasing anything. Serializing an unchanged
    /// state twice gives identical columns.
    ///
    /// # Errors
    /// If a state cannot be written.
    fn serialize(&self) -> Result<ArrayRef>;

    /// Serialize the groups selected by `emit_to` and release them. Remaining
    /// groups are renumbered from zero.
    ///
    /// # Errors
    /// If a state cannot be written.
    fn take_state(&mut self, emit_to: EmitTo) -> Result<ArrayRef>;

    /// Evaluate final values for the groups selected by `emit_to` and release them.
    ///
    /// # Errors
    /// If a final value cannot be written.
    fn evaluate(&mut self, emit_to: EmitTo) -> Result<ArrayRef>;

    fn num_groups(&self) -> usize;

    /// Bytes of state held.
    fn size(&self) -> usize;

    /// Release every group.
    fn clear(&mut self);
}

/// Grouped state of one aggregate function, with dispatch to its shape resolved at
/// construction.
pub struct StateManager<F: AggregateFunction> {
    function: F,
    grouped: <F::Factory as StateFactory>::Grouped,
    /// Reused target for every deserialized carrier row
    scratch: F::State,
}

impl<F: AggregateFunction> StateManager<F> {
    pub fn new(function: F) -> Self {
        let grouped = function.factory().create_grouped_state();
        let scratch = function.create_state();
        Self {
            function,
            grouped,
            scratch,
        }
    }

    /// Create a manager whose carrier will be written to `field`.
    ///
    /// # Errors
    /// [`StateError::CarrierTypeMismatch`] if `field` is not of the serializer's carrier type.
    pub fn try_new_bound(function: F, field: &Field) -> Result<Self> {
        function.serializer().check_bound_field(field)?;
        Ok(Self::new(function))
    }

    pub fn function(&self) -> &F {
        &self.function
    }

    /// A copy of the state of `group_index`.
    ///
    /// # Panics
    /// If `group_index` is not a known group.
    pub fn group_state(&self, group_index: usize) -> F::State {
        self.grouped.read(group_index, Clone::clone)
    }

    fn emit_count(&self, emit_to: EmitTo) -> usize {
        match emit_to {
            EmitTo::All => self.grouped.num_groups(),
            EmitTo::First(n) => n.min(self.grouped.num_groups()),
        }
    }

    fn release(&mut self, emit_to: EmitTo, n: usize) {
        match emit_to {
            EmitTo::All => self.grouped.clear(),
            EmitTo::First(_) => self.grouped.remove_front(n),
        }
    }

    fn serialize_first(&self, n: usize) -> Result<ArrayRef> {
        let serializer = self.function.serializer();
        let mut builder = serializer.new_builder(n);
        for group_index in 0..n {
            self.grouped.read(group_index, |state| {
                serializer.serialize(state, builder.as_mut())
            })?;
        }
        Ok(builder.finish())
    }

    fn check_batch(
        rows: usize,
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        if let Some(&group_index) = group_indices.iter().find(|&&g| g >= total_num_groups) {
            return corrupt_err!(
                "group index {group_index} is outside the {total_num_groups} known groups"
            );
        }
        if rows != group_indices.len() {
            return corrupt_err!(
                "column of {rows} rows arrived with {} group indices",
                group_indices.len()
            );
        }
        if let Some(filter) = opt_filter {
            if filter.len() != rows {
                return corrupt_err!(
                    "column of {rows} rows arrived with a filter of {} rows",
                    filter.len()
                );
            }
        }
        Ok(())
    }
}

impl<F: AggregateFunction> Debug for StateManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("function", &self.function)
            .field("num_groups", &self.grouped.num_groups())
            .finish_non_exhaustive()
    }
}

impl<F: AggregateFunction> GroupedAggregate for StateManager<F> {
    fn name(&self) -> &'static str {
        self.function.name()
    }

    fn output_type(&self) -> DataType {
        self.function.output_type()
    }

    fn carrier_field(&self, name: &str) -> Field {
        self.function.serializer().carrier_field(name)
    }

    fn check_received_field(&self, field: &Field) -> Result<()> {
        self.function.serializer().check_received_field(field)
    }

    fn update_batch(
        &mut self,
        values: &dyn Array,
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        let values = values.as_primitive_opt::<F::Input>().ok_or_else(|| {
            StateError::InvalidConfig(format!(
                "{} expects {} input but was given {}",
                self.function.name(),
                <F::Input as ArrowPrimitiveType>::DATA_TYPE,
                values.data_type()
            ))
        })?;
        Self::check_batch(values.len(), group_indices, opt_filter, total_num_groups)?;
        let Self {
            function, grouped, ..
        } = self;
        grouped.ensure_groups(total_num_groups);
        accumulate(group_indices, values, opt_filter, |group_index, value| {
            grouped.modify(group_index, |state| function.accumulate(state, value));
        });
        Ok(())
    }

    fn merge_batch(
        &mut self,
        carrier: &dyn Array,
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        let Self {
            function,
            grouped,
            scratch,
        } = self;
        let serializer = function.serializer();
        let carrier_type = serializer.carrier_type();
        if carrier.data_type() != &carrier_type {
            return Err(StateError::CarrierTypeMismatch {
                expected: carrier_type,
                actual: carrier.data_type().to_string(),
            });
        }
        Self::check_batch(carrier.len(), group_indices, opt_filter, total_num_groups)?;
        debug!(
            "{} merging {} partial states into {total_num_groups} groups",
            function.name(),
            carrier.len()
        );
        grouped.ensure_groups(total_num_groups);
        for_each_selected_row(group_indices, opt_filter, |row, group_index| {
            serializer.deserialize(carrier, row, scratch)?;
            if !scratch.is_absent() {
                grouped.modify(group_index, |existing| {
                    if existing.is_absent() {
                        existing.clone_from(scratch);
                    } else {
                        function.combine(existing, scratch);
                    }
                });
            }
            Ok(())
        })
    }

    fn serialize(&self) -> Result<ArrayRef> {
        self.serialize_first(self.grouped.num_groups())
    }

    fn take_state(&mut self, emit_to: EmitTo) -> Result<ArrayRef> {
        let n = self.emit_count(emit_to);
        let carrier = self.serialize_first(n)?;
        self.release(emit_to, n);
        Ok(carrier)
    }

    fn evaluate(&mut self, emit_to: EmitTo) -> Result<ArrayRef> {
        let n = self.emit_count(emit_to);
        let mut builder = make_builder(&self.function.output_type(), n);
        for group_index in 0..n {
            self.grouped.read(group_index, |state| {
                self.function.evaluate_final(state, builder.as_mut())
            })?;
        }
        self.release(emit_to, n);
        Ok(builder.finish())
    }

    fn num_groups(&self) -> usize {
        self.grouped.num_groups()
    }

    fn size(&self) -> usize {
        self.grouped.size()
    }

    fn clear(&mut self) {
        self.grouped.clear();
        self.scratch.reset();
    }
}
