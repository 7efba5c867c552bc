//! Accumulator state and its grouped, group-id indexed storage.
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
use std::fmt::Debug;

/// One aggregate function's partial result for one group.
///
/// [`Default`] must produce the absent state: the state of a group that has seen
/// no input (or only NULL input). Absence is distinct from any present payload.
pub trait AccumulatorState: Debug + Clone + Default + PartialEq + Send + Sync + 'static {
    /// Has this state seen no input?
    fn is_absent(&self) -> bool;

    /// Return this state to absent, clearing any payload.
    fn reset(&mut self);

    /// Bytes held by this state, including any heap payload.
    fn size(&self) -> usize {
        size_of_val(self)
    }
}

/// Dense storage of many states of one shape, indexed by group id.
///
/// Fixed-width shapes keep one array per field plus one shared bitmap of which groups
/// have a present value, so no per-group object exists. States are only reached
/// through the owning storage by group index.
pub trait GroupedState: Debug + Send {
    type State: AccumulatorState;

    /// Number of group slots currently allocated.
    fn num_groups(&self) -> usize;

    /// Grow to at least `total_num_groups` slots. New slots are absent.
    fn ensure_groups(&mut self, total_num_groups: usize);

    /// Call `f` with the state of `group_index`.
    ///
    /// # Panics
    /// If `group_index` is not an allocated slot.
    fn read<R>(&self, group_index: usize, f: impl FnOnce(&Self::State) -> R) -> R;

    /// Call `f` with mutable access to the state of `group_index`.
    ///
    /// # Panics
    /// If `group_index` is not an allocated slot.
    fn modify<R>(&mut self, group_index: usize, f: impl FnOnce(&mut Self::State) -> R) -> R;

    /// Drop the first `n` groups, renumbering the rest from zero.
    fn remove_front(&mut self, n: usize);

    /// Drop all groups and release their memory.
    fn clear(&mut self);

    /// Bytes allocated by this storage, not including `self`.
    fn size(&self) -> usize;
}

/// Growth policy shared by the grouped storages: amortised doubling.
pub(crate) fn grow_to<T: Clone>(values: &mut Vec<T>, total_num_groups: usize, absent: T) {
    if values.len() < total_num_groups {
        if values.capacity() < total_num_groups {
            let target = total_num_groups.max(values.capacity() * 2);
            values.reserve_exact(target - values.len());
        }
        values.resize(total_num_groups, absent);
    }
}
