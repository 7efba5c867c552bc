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
use agg_state::{
    AccumulatorState, AggregateFunction, StateSerializer,
    functions::{Avg, InputOf, Max, Mode, StateOf, Sum},
};
use arrow::{
    array::Array,
    datatypes::{Float64Type, Int64Type},
};
use color_eyre::eyre::Error;
use rand::{Rng, SeedableRng, rngs::StdRng};
use test_log::test;

const STATES: usize = 12;

/// Random partial states, roughly one in four absent.
fn random_states<F: AggregateFunction>(
    function: &F,
    rng: &mut StdRng,
    mut value: impl FnMut(&mut StdRng) -> InputOf<F>,
) -> Vec<StateOf<F>> {
    (0..STATES)
        .map(|_| {
            let mut state = function.create_state();
            if !rng.random_bool(0.25) {
                for _ in 0..rng.random_range(1..20) {
                    let v = value(rng);
                    function.accumulate(&mut state, v);
                }
            }
            state
        })
        .collect()
}

fn combined<F: AggregateFunction>(function: &F, a: &StateOf<F>, b: &StateOf<F>) -> StateOf<F> {
    let mut result = a.clone();
    function.combine(&mut result, b);
    result
}

fn assert_combine_laws<F: AggregateFunction>(function: &F, states: &[StateOf<F>]) {
    let absent = function.create_state();
    for a in states {
        assert_eq!(&combined(function, a, &absent), a, "{} absent right", function.name());
        assert_eq!(&combined(function, &absent, a), a, "{} absent left", function.name());
        for b in states {
            assert_eq!(
                combined(function, a, b),
                combined(function, b, a),
                "{} not commutative for {a:?} and {b:?}",
                function.name()
            );
            for c in states {
                assert_eq!(
                    combined(function, &combined(function, a, b), c),
                    combined(function, a, &combined(function, b, c)),
                    "{} not associative for {a:?}, {b:?} and {c:?}",
                    function.name()
                );
            }
        }
    }
}

fn assert_round_trip<F: AggregateFunction>(
    function: &F,
    states: &[StateOf<F>],
) -> Result<(), Error> {
    let serializer = function.serializer();
    let mut builder = serializer.new_builder(states.len());
    for state in states {
        serializer.serialize(state, builder.as_mut())?;
    }
    let carrier = builder.finish();
    assert_eq!(carrier.data_type(), &serializer.carrier_type());

    // Start from a present state so stale payload would show
    let mut target = states
        .iter()
        .find(|s| !s.is_absent())
        .cloned()
        .unwrap_or_default();
    for (position, state) in states.iter().enumerate() {
        serializer.deserialize(carrier.as_ref(), position, &mut target)?;
        assert_eq!(&target, state, "{} round trip at {position}", function.name());
    }
    Ok(())
}

#[test]
fn should_obey_combine_laws_for_integer_sum() -> Result<(), Error> {
    // Given
    let mut rng = StdRng::seed_from_u64(0x5eed_0001);
    let sum = Sum::<Int64Type>::new();

    // When
    let states = random_states(&sum, &mut rng, |rng| {
        if rng.random_bool(0.1) {
            i64::MAX - rng.random_range(0..10)
        } else {
            rng.random_range(-1_000..1_000)
        }
    });

    // Then
    assert_combine_laws(&sum, &states);
    assert_round_trip(&sum, &states)
}

#[test]
fn should_obey_combine_laws_for_float_max() -> Result<(), Error> {
    // Given
    let mut rng = StdRng::seed_from_u64(0x5eed_0002);
    let max = Max::<Float64Type>::new();

    // When
    let states = random_states(&max, &mut rng, |rng| match rng.random_range(0..20) {
        0 => f64::NAN,
        1 => -0.0,
        2 => f64::NEG_INFINITY,
        _ => rng.random_range(-1e6..1e6),
    });

    // Then
    assert_combine_laws(&max, &states);
    assert_round_trip(&max, &states)
}

#[test]
fn should_obey_combine_laws_for_average() -> Result<(), Error> {
    // Given
    let mut rng = StdRng::seed_from_u64(0x5eed_0003);
    let avg = Avg::new();

    // When
    #[allow(clippy::cast_precision_loss)]
    let states = random_states(&avg, &mut rng, |rng| {
        rng.random_range(-10_000_i64..10_000) as f64
    });

    // Then
    assert_combine_laws(&avg, &states);
    assert_round_trip(&avg, &states)
}

#[test]
fn should_obey_combine_laws_for_mode() -> Result<(), Error> {
    // Given
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);
    let mode = Mode::new();

    // When
    let states = random_states(&mode, &mut rng, |rng| rng.random_range(-5..5));

    // Then
    assert_combine_laws(&mode, &states);
    assert_round_trip(&mode, &states)
}
