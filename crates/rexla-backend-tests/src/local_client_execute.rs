//! End-to-end checks of compile, transfer and run through a [`LocalClient`].
//!
//! Every function takes the client under test; the cross-platform checks also
//! take a client for a second, distinct platform.

use std::sync::Arc;

use rexla::{
    Computation, ComputationBuilder, DType, ExecutableBuildOptions, ExecutableRunOptions,
    ExecutionProfile, Layout, Literal, LocalClient, ScopedShapedBuffer, Shape, ShapedBuffer,
    Stream, StreamState, XlaResult,
};

use crate::helpers::{
    expect_error_matches, expect_r0_near, expect_r1_equal, expect_r1_near, expect_r2_equal,
    expect_r2_near, ErrorSpec,
};

fn default_device(client: &LocalClient) -> usize {
    client
        .default_device_ordinal()
        .expect("client has a supported device")
}

fn supported_devices(client: &LocalClient) -> Vec<usize> {
    (0..client.device_count())
        .filter(|&ordinal| client.device_ordinal_supported(ordinal))
        .collect()
}

fn to_buffer(client: &LocalClient, literal: &Literal) -> ScopedShapedBuffer {
    to_buffer_on(client, literal, default_device(client))
}

fn to_buffer_on(client: &LocalClient, literal: &Literal, ordinal: usize) -> ScopedShapedBuffer {
    client
        .literal_to_shaped_buffer(literal, ordinal, None)
        .expect("literal transfers to device")
}

fn to_literal(client: &LocalClient, buffer: &ShapedBuffer) -> Literal {
    client
        .shaped_buffer_to_literal(buffer)
        .expect("buffer transfers back to host")
}

fn execute(
    client: &LocalClient,
    computation: &Computation,
    arguments: &[&ShapedBuffer],
) -> XlaResult<ScopedShapedBuffer> {
    client.execute_locally(
        computation,
        arguments,
        &ExecutableBuildOptions::new(),
        &ExecutableRunOptions::new(),
    )
}

fn f32_matrix() -> Shape {
    Shape::array(DType::F32, [2, 2])
}

/// `x + y` over two f32[2,2] parameters.
fn add_matrices() -> Computation {
    let mut b = ComputationBuilder::new("add_matrices");
    let x = b.parameter(0, f32_matrix(), "x");
    let y = b.parameter(1, f32_matrix(), "y");
    b.add(x, y);
    b.build().expect("add_matrices builds")
}

/// `[1, 2, 3]` with no parameters.
fn constant_vector() -> Computation {
    let mut b = ComputationBuilder::new("constant_vector");
    b.constant_r1(&[1.0f32, 2.0, 3.0]);
    b.build().expect("constant_vector builds")
}

/// Integer division whose divisor holds a zero; fails while running.
fn divide_by_zero() -> Computation {
    let mut b = ComputationBuilder::new("divide_by_zero");
    let lhs = b.constant_r1(&[4i32, 2]);
    let rhs = b.constant_r1(&[0i32, 1]);
    b.div(lhs, rhs);
    b.build().expect("divide_by_zero builds")
}

pub fn constant(client: &LocalClient) {
    let mut b = ComputationBuilder::new("constant");
    b.constant_r0(123.0f32);
    let computation = b.build().expect("build");

    let result = execute(client, &computation, &[]).expect("execute");
    expect_r0_near(123.0f32, &to_literal(client, &result), ErrorSpec::default());
}

pub fn add_scalars(client: &LocalClient) {
    let mut b = ComputationBuilder::new("add_scalars");
    let x = b.parameter(0, Shape::scalar(DType::F32), "x");
    let y = b.constant_r0(123.0f32);
    b.add(x, y);
    let computation = b.build().expect("build");

    let x = to_buffer(client, &Literal::r0(42.0f32));
    let result = execute(client, &computation, &[&x]).expect("execute");
    expect_r0_near(165.0f32, &to_literal(client, &result), ErrorSpec::default());
}

pub fn add_zero_element_vectors(client: &LocalClient) {
    let mut b = ComputationBuilder::new("add_zero_element_vectors");
    let x = b.parameter(0, Shape::array(DType::F32, [0]), "x");
    let y = b.constant_r1::<f32>(&[]);
    b.add(x, y);
    let computation = b.build().expect("build");

    let x = to_buffer(client, &Literal::r1::<f32>(&[]));
    let result = execute(client, &computation, &[&x]).expect("execute");
    expect_r1_near::<f32>(&[], &to_literal(client, &result), ErrorSpec::default());
}

fn add_vectors_computation() -> Computation {
    let mut b = ComputationBuilder::new("add_vectors");
    let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
    let y = b.constant_r1(&[2.0f32, 3.0, 4.0]);
    b.add(x, y);
    b.build().expect("add_vectors builds")
}

pub fn add_vectors(client: &LocalClient) {
    let computation = add_vectors_computation();
    let x = to_buffer(client, &Literal::r1(&[0.0f32, 1.0, 2.0]));
    let result = execute(client, &computation, &[&x]).expect("execute");
    expect_r1_near(&[2.0f32, 4.0, 6.0], &to_literal(client, &result), ErrorSpec::default());
}

pub fn add_vectors_with_profile(client: &LocalClient) {
    let computation = add_vectors_computation();
    let x = to_buffer(client, &Literal::r1(&[0.0f32, 1.0, 2.0]));
    let profile = Arc::new(ExecutionProfile::new());
    let result = client
        .execute_locally(
            &computation,
            &[&x],
            &ExecutableBuildOptions::new(),
            &ExecutableRunOptions::new().with_execution_profile(profile.clone()),
        )
        .expect("execute");

    expect_r1_near(&[2.0f32, 4.0, 6.0], &to_literal(client, &result), ErrorSpec::default());
    assert!(profile.compute_and_transfer_time_ns() > 0);
    assert!(profile.compute_and_transfer_time_ns() >= profile.compute_time_ns());
    assert_eq!(profile.execution_count(), 1);
}

pub fn add_arrays_with_different_input_layouts(client: &LocalClient) {
    let computation = add_matrices();
    let col_major = Literal::r2_with_layout(&[[1.0f32, 2.0], [3.0, 4.0]], &[0, 1]).expect("layout");
    let row_major = Literal::r2(&[[10.0f32, 20.0], [30.0, 40.0]]);
    let x = to_buffer(client, &col_major);
    let y = to_buffer(client, &row_major);
    assert_eq!(x.on_device_shape().layout(), Some(&Layout::col_major(2)));

    let expected = [[11.0f32, 22.0], [33.0, 44.0]];
    let result = execute(client, &computation, &[&x, &y]).expect("execute");
    expect_r2_near(&expected, &to_literal(client, &result), ErrorSpec::default());

    let result = execute(client, &computation, &[&y, &x]).expect("execute swapped");
    expect_r2_near(&expected, &to_literal(client, &result), ErrorSpec::default());
}

pub fn add_arrays_with_different_output_layouts(client: &LocalClient) {
    let computation = add_matrices();
    let x = to_buffer(client, &Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    let y = to_buffer(client, &Literal::r2(&[[10.0f32, 20.0], [30.0, 40.0]]));

    for minor_to_major in [[0usize, 1], [1, 0]] {
        let options = ExecutableBuildOptions::new()
            .with_result_layout(Shape::with_layout(DType::F32, [2, 2], minor_to_major));
        let result = client
            .execute_locally(&computation, &[&x, &y], &options, &ExecutableRunOptions::new())
            .expect("execute");
        assert_eq!(
            result.on_device_shape().layout(),
            Some(&Layout::new(minor_to_major))
        );
        let literal = to_literal(client, &result);
        assert_eq!(literal.layout(), Some(&Layout::new(minor_to_major)));
        expect_r2_near(&[[11.0f32, 22.0], [33.0, 44.0]], &literal, ErrorSpec::default());
    }
}

pub fn tuple_result(client: &LocalClient) {
    let mut b = ComputationBuilder::new("tuple_result");
    let x = b.parameter(0, f32_matrix(), "x");
    let y = b.parameter(1, f32_matrix(), "y");
    b.tuple(&[x, y, x]);
    let computation = b.build().expect("build");

    let x_values = [[1.0f32, 2.0], [3.0, 4.0]];
    let y_values = [[10.0f32, 20.0], [30.0, 40.0]];
    let x = to_buffer(client, &Literal::r2(&x_values));
    let y = to_buffer(client, &Literal::r2(&y_values));
    let result = execute(client, &computation, &[&x, &y]).expect("execute");

    let literal = to_literal(client, &result);
    assert!(literal.is_tuple());
    let elements = literal.tuple_elements().expect("tuple");
    assert_eq!(elements.len(), 3);
    expect_r2_equal(&x_values, &elements[0]);
    expect_r2_equal(&y_values, &elements[1]);
    expect_r2_equal(&x_values, &elements[2]);
}

pub fn nested_tuple_result(client: &LocalClient) {
    let mut b = ComputationBuilder::new("nested_tuple_result");
    let x = b.parameter(0, f32_matrix(), "x");
    let y = b.parameter(1, f32_matrix(), "y");
    let inner = b.tuple(&[x, y, x]);
    b.tuple(&[inner, x]);
    let computation = b.build().expect("build");

    let x_values = [[1.0f32, 2.0], [3.0, 4.0]];
    let y_values = [[10.0f32, 20.0], [30.0, 40.0]];
    let x = to_buffer(client, &Literal::r2(&x_values));
    let y = to_buffer(client, &Literal::r2(&y_values));
    let result = execute(client, &computation, &[&x, &y]).expect("execute");

    let literal = to_literal(client, &result);
    let outer = literal.tuple_elements().expect("outer tuple");
    assert_eq!(outer.len(), 2);
    let inner = outer[0].tuple_elements().expect("inner tuple");
    assert_eq!(inner.len(), 3);
    expect_r2_equal(&x_values, &inner[0]);
    expect_r2_equal(&y_values, &inner[1]);
    expect_r2_equal(&x_values, &inner[2]);
    expect_r2_equal(&x_values, &outer[1]);
}

pub fn tuple_result_with_layout(client: &LocalClient) {
    let mut b = ComputationBuilder::new("tuple_result_with_layout");
    let x = b.parameter(0, f32_matrix(), "x");
    let y = b.parameter(1, f32_matrix(), "y");
    b.tuple(&[x, y]);
    let computation = b.build().expect("build");

    let options = ExecutableBuildOptions::new().with_result_layout(Shape::tuple([
        Shape::with_layout(DType::F32, [2, 2], [0, 1]),
        Shape::with_layout(DType::F32, [2, 2], [1, 0]),
    ]));
    let values = [[1.0f32, 2.0], [3.0, 4.0]];
    let array = to_buffer(client, &Literal::r2(&values));
    let result = client
        .execute_locally(&computation, &[&array, &array], &options, &ExecutableRunOptions::new())
        .expect("execute");

    let device_shape = result.on_device_shape();
    assert_eq!(
        device_shape.tuple_element(0).and_then(Shape::layout),
        Some(&Layout::col_major(2))
    );
    assert_eq!(
        device_shape.tuple_element(1).and_then(Shape::layout),
        Some(&Layout::row_major(2))
    );
    let literal = to_literal(client, &result);
    let elements = literal.tuple_elements().expect("tuple");
    expect_r2_equal(&values, &elements[0]);
    expect_r2_equal(&values, &elements[1]);
}

pub fn invalid_number_of_arguments(client: &LocalClient) {
    let computation = add_matrices();
    let x = to_buffer(client, &Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    expect_error_matches(
        execute(client, &computation, &[&x]),
        "invalid number of arguments.*expected 2, got 1",
    );
}

pub fn incorrect_argument_shape(client: &LocalClient) {
    let mut b = ComputationBuilder::new("incorrect_argument_shape");
    let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
    b.neg(x);
    let computation = b.build().expect("build");

    let x = to_buffer(client, &Literal::r2(&[[0.0f32, 1.0], [2.0, 3.0]]));
    expect_error_matches(
        execute(client, &computation, &[&x]),
        "invalid argument shape for parameter 0",
    );
}

pub fn invalid_result_layout(client: &LocalClient) {
    let mut b = ComputationBuilder::new("invalid_result_layout");
    let x = b.parameter(0, f32_matrix(), "x");
    b.neg(x);
    let computation = b.build().expect("build");

    let x = to_buffer(client, &Literal::r2(&[[0.0f32, 1.0], [2.0, 3.0]]));
    let options = ExecutableBuildOptions::new()
        .with_result_layout(Shape::with_layout(DType::F32, [1, 2, 3, 4], [0, 1, 2, 3]));
    expect_error_matches(
        client.execute_locally(&computation, &[&x], &options, &ExecutableRunOptions::new()),
        "not compatible with result shape",
    );
}

pub fn run_on_all_device_ordinals(client: &LocalClient) {
    let computation = constant_vector();
    for ordinal in 0..client.device_count() {
        let options = ExecutableBuildOptions::new().with_device_ordinal(ordinal);
        let result = client.execute_locally(&computation, &[], &options, &ExecutableRunOptions::new());
        if client.device_ordinal_supported(ordinal) {
            let result = result.expect("execute on supported device");
            assert_eq!(result.device_ordinal(), ordinal);
            expect_r1_equal(&[1.0f32, 2.0, 3.0], &to_literal(client, &result));
        } else {
            expect_error_matches(result, "device .* not supported");
        }
    }
}

pub fn invalid_device_ordinal_values(client: &LocalClient) {
    let computation = constant_vector();
    let count = client.device_count();

    let options = ExecutableBuildOptions::new().with_device_ordinal(count);
    expect_error_matches(
        client.execute_locally(&computation, &[], &options, &ExecutableRunOptions::new()),
        "Invalid device ordinal value",
    );

    let run = ExecutableRunOptions::new().with_device_ordinal(count);
    expect_error_matches(
        client.execute_locally(&computation, &[], &ExecutableBuildOptions::new(), &run),
        "Invalid device ordinal value",
    );
}

pub fn run_on_stream(client: &LocalClient) {
    let computation = constant_vector();
    for ordinal in supported_devices(client) {
        let stream = client.new_stream(ordinal).expect("stream");
        let run = ExecutableRunOptions::new().with_stream(stream.clone());
        let result = client
            .execute_locally(&computation, &[], &ExecutableBuildOptions::new(), &run)
            .expect("execute on stream");
        assert_eq!(result.device_ordinal(), ordinal);
        assert_eq!(stream.launch_count(), 1);
        stream.block_host_until_done().expect("stream drains");
        expect_r1_equal(&[1.0f32, 2.0, 3.0], &to_literal(client, &result));
    }
}

pub fn run_on_stream_for_wrong_platform(client: &LocalClient, foreign: &LocalClient) {
    let stream = foreign
        .new_stream(default_device(foreign))
        .expect("foreign stream");
    let run = ExecutableRunOptions::new().with_stream(stream);
    expect_error_matches(
        client.execute_locally(&constant_vector(), &[], &ExecutableBuildOptions::new(), &run),
        "stream is for platform .*, but service targets",
    );
}

pub fn allocator_does_not_match_platform(client: &LocalClient, foreign: &LocalClient) {
    let run = ExecutableRunOptions::new().with_allocator(foreign.default_allocator());
    expect_error_matches(
        client.execute_locally(&constant_vector(), &[], &ExecutableBuildOptions::new(), &run),
        "allocator platform .* does not match service",
    );
}

pub fn argument_from_other_platform(client: &LocalClient, foreign: &LocalClient) {
    let computation = add_vectors_computation();
    let x = to_buffer(foreign, &Literal::r1(&[0.0f32, 1.0, 2.0]));
    expect_error_matches(
        execute(client, &computation, &[&x]),
        "argument 0 resides on",
    );
}

pub fn run_on_uninitialized_stream(client: &LocalClient) {
    let executor = client.executor(default_device(client)).expect("executor");
    let stream = Arc::new(Stream::new(executor));
    assert_eq!(stream.state(), StreamState::Uninitialized);

    let run = ExecutableRunOptions::new().with_stream(stream);
    expect_error_matches(
        client.execute_locally(&constant_vector(), &[], &ExecutableBuildOptions::new(), &run),
        "stream is uninitialized",
    );
}

pub fn failed_run_poisons_stream(client: &LocalClient) {
    let stream = client.new_stream(default_device(client)).expect("stream");
    let run = ExecutableRunOptions::new().with_stream(stream.clone());

    expect_error_matches(
        client.execute_locally(&divide_by_zero(), &[], &ExecutableBuildOptions::new(), &run),
        "integer divide by zero",
    );
    assert_eq!(stream.state(), StreamState::Error);
    assert_eq!(stream.launch_count(), 0);

    expect_error_matches(
        client.execute_locally(&constant_vector(), &[], &ExecutableBuildOptions::new(), &run),
        "stream is uninitialized or in an error state",
    );
    assert!(stream.init().is_err());
}

pub fn device_ordinal_conflicting_with_stream(client: &LocalClient) {
    let ordinal = default_device(client);
    let stream = client.new_stream(ordinal).expect("stream");
    let run = ExecutableRunOptions::new()
        .with_stream(stream)
        .with_device_ordinal(ordinal + 1);
    expect_error_matches(
        client.execute_locally(&constant_vector(), &[], &ExecutableBuildOptions::new(), &run),
        "device ordinal mismatch",
    );
}

/// Needs two supported devices; returns early otherwise.
pub fn run_targets_device_other_than_build(client: &LocalClient) {
    let devices = supported_devices(client);
    let (first, second) = match devices.as_slice() {
        [first, second, ..] => (*first, *second),
        _ => return,
    };
    let computation = constant_vector();
    let executable = client
        .compile(
            &computation,
            &[],
            &ExecutableBuildOptions::new().with_device_ordinal(first),
        )
        .expect("compile");

    let stream = client.new_stream(second).expect("stream");
    expect_error_matches(
        executable.run(&[], &ExecutableRunOptions::new().with_stream(stream)),
        "device ordinal mismatch",
    );
    expect_error_matches(
        executable.run(&[], &ExecutableRunOptions::new().with_device_ordinal(second)),
        "device ordinal mismatch",
    );

    let result = executable
        .run(&[], &ExecutableRunOptions::new())
        .expect("run on build device");
    assert_eq!(result.device_ordinal(), first);
}

/// Needs two supported devices; returns early otherwise.
pub fn argument_on_other_device(client: &LocalClient) {
    let devices = supported_devices(client);
    let (first, second) = match devices.as_slice() {
        [first, second, ..] => (*first, *second),
        _ => return,
    };
    let computation = add_vectors_computation();
    let x = to_buffer_on(client, &Literal::r1(&[0.0f32, 1.0, 2.0]), second);

    let options = ExecutableBuildOptions::new().with_device_ordinal(first);
    expect_error_matches(
        client.execute_locally(&computation, &[&x], &options, &ExecutableRunOptions::new()),
        "argument 0 resides on",
    );

    let run = ExecutableRunOptions::new().with_device_ordinal(second);
    let result = client
        .execute_locally(&computation, &[&x], &ExecutableBuildOptions::new(), &run)
        .expect("execute on the argument's device");
    assert_eq!(result.device_ordinal(), second);
    expect_r1_near(&[2.0f32, 4.0, 6.0], &to_literal(client, &result), ErrorSpec::default());
}

pub fn select_between_tuples(client: &LocalClient) {
    let mut b = ComputationBuilder::new("select_between_tuples");
    let vec1 = [1.0f32, 2.0, 3.0];
    let vec2 = [2.0f32, 4.0, 6.0];
    let first = b.constant_r1(&vec1);
    let second = b.constant_r1(&vec2);
    let tuple12 = b.tuple(&[first, second]);
    let tuple21 = b.tuple(&[second, first]);
    let pred = b.constant_r0(false);
    b.select(pred, tuple12, tuple21);
    let computation = b.build().expect("build");

    let result = execute(client, &computation, &[]).expect("execute");
    let literal = to_literal(client, &result);
    let elements = literal.tuple_elements().expect("tuple");
    expect_r1_equal(&vec2, &elements[0]);
    expect_r1_equal(&vec1, &elements[1]);
}

pub fn compile_executable(client: &LocalClient) {
    let computation = add_vectors_computation();
    let layout = Shape::with_layout(DType::F32, [3], [0]);
    let executable = client
        .compile(&computation, &[layout], &ExecutableBuildOptions::new())
        .expect("compile");
    assert_eq!(
        executable.argument_layouts()[0].layout(),
        Some(&Layout::new([0]))
    );
    assert_eq!(executable.build_device_ordinal(), default_device(client));

    let x = to_buffer(client, &Literal::r1(&[0.0f32, 1.0, 2.0]));
    let result = executable
        .run(&[&x], &ExecutableRunOptions::new())
        .expect("run");
    expect_r1_near(&[2.0f32, 4.0, 6.0], &to_literal(client, &result), ErrorSpec::default());
}

pub fn run_with_wrong_argument_count(client: &LocalClient) {
    let executable = client
        .compile(
            &add_matrices(),
            &[f32_matrix(), f32_matrix()],
            &ExecutableBuildOptions::new(),
        )
        .expect("compile");
    let x = to_buffer(client, &Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    let run = ExecutableRunOptions::new();
    expect_error_matches(
        executable.run(&[&x], &run),
        "invalid number of arguments.*expected 2, got 1",
    );
    expect_error_matches(
        executable.run(&[&x, &x, &x], &run),
        "invalid number of arguments.*expected 2, got 3",
    );
}

pub fn run_with_incorrect_argument_shape(client: &LocalClient) {
    let mut b = ComputationBuilder::new("run_with_incorrect_argument_shape");
    let x = b.parameter(0, Shape::array(DType::F32, [3]), "x");
    b.neg(x);
    let computation = b.build().expect("build");
    let executable = client
        .compile(
            &computation,
            &[Shape::array(DType::F32, [3])],
            &ExecutableBuildOptions::new(),
        )
        .expect("compile");

    let matrix = to_buffer(client, &Literal::r2(&[[0.0f32, 1.0], [2.0, 3.0]]));
    expect_error_matches(
        executable.run(&[&matrix], &ExecutableRunOptions::new()),
        "invalid argument shape for parameter 0",
    );
    let integers = to_buffer(client, &Literal::r1(&[0i32, 1, 2]));
    expect_error_matches(
        executable.run(&[&integers], &ExecutableRunOptions::new()),
        "invalid argument shape for parameter 0",
    );
}

pub fn run_checks_compiled_argument_layouts(client: &LocalClient) {
    let col_major = Shape::with_layout(DType::F32, [2, 2], [0, 1]);
    let executable = client
        .compile(
            &add_matrices(),
            &[col_major.clone(), col_major],
            &ExecutableBuildOptions::new(),
        )
        .expect("compile");

    let row = to_buffer(client, &Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    let col = to_buffer(
        client,
        &Literal::r2_with_layout(&[[10.0f32, 20.0], [30.0, 40.0]], &[0, 1]).expect("layout"),
    );
    expect_error_matches(
        executable.run(&[&col, &row], &ExecutableRunOptions::new()),
        "invalid argument shape for parameter 1",
    );
    let result = executable
        .run(&[&col, &col], &ExecutableRunOptions::new())
        .expect("run with compiled layouts");
    expect_r2_equal(&[[20.0f32, 40.0], [60.0, 80.0]], &to_literal(client, &result));

    let any_layout = client
        .compile(
            &add_matrices(),
            &[f32_matrix(), f32_matrix()],
            &ExecutableBuildOptions::new(),
        )
        .expect("compile without layouts");
    let result = any_layout
        .run(&[&col, &row], &ExecutableRunOptions::new())
        .expect("run with mixed layouts");
    expect_r2_equal(&[[11.0f32, 22.0], [33.0, 44.0]], &to_literal(client, &result));
}

pub fn repeated_runs_reuse_executable(client: &LocalClient) {
    let computation = add_vectors_computation();
    let executable = client
        .compile(
            &computation,
            &[Shape::array(DType::F32, [3])],
            &ExecutableBuildOptions::new(),
        )
        .expect("compile");
    let profile = Arc::new(ExecutionProfile::new());
    let run = ExecutableRunOptions::new().with_execution_profile(profile.clone());

    for step in 0..3 {
        let base = step as f32;
        let x = to_buffer(client, &Literal::r1(&[base, base, base]));
        let result = executable.run(&[&x], &run).expect("run");
        expect_r1_near(
            &[base + 2.0, base + 3.0, base + 4.0],
            &to_literal(client, &result),
            ErrorSpec::default(),
        );
    }
    assert_eq!(profile.execution_count(), 3);
}

pub fn broadcast_compare_and_convert(client: &LocalClient) {
    let mut b = ComputationBuilder::new("relu_convert");
    let x = b.parameter(0, Shape::array(DType::F32, [4]), "x");
    let zero = b.constant_r0(0.0f32);
    let relu = b.max(x, zero);
    let positive = b.gt(x, zero);
    let rounded = b.convert(relu, DType::Si32);
    b.tuple(&[rounded, positive]);
    let computation = b.build().expect("build");

    let x = to_buffer(client, &Literal::r1(&[-1.5f32, 0.0, 1.25, 2.75]));
    let result = execute(client, &computation, &[&x]).expect("execute");
    let literal = to_literal(client, &result);
    let elements = literal.tuple_elements().expect("tuple");
    expect_r1_equal(&[0i32, 0, 1, 2], &elements[0]);
    expect_r1_equal(&[false, false, true, true], &elements[1]);
}

pub fn shaped_buffer_to_literal_conversion(client: &LocalClient) {
    let literals = [
        Literal::r0(42.0f32),
        Literal::r0(true),
        Literal::r1(&[1.0f32, 42.0, 744.4]),
        Literal::r2(&[[1.0f64, 2.0, 3.0], [44.0, 0.1, -3.0]]),
        Literal::r2(&[[2i32, 1], [4444, 56]]),
        Literal::tuple(Vec::new()),
        Literal::tuple(vec![Literal::r0(12223.0f32)]),
        Literal::tuple(vec![Literal::r1(&[1.0f32, -42.0]), Literal::r0(123456.0f32)]),
        Literal::tuple(vec![
            Literal::tuple(vec![Literal::r1(&[1.0f32, -42.0]), Literal::r0(123456.0f32)]),
            Literal::r0(false),
        ]),
    ];
    for literal in &literals {
        let buffer = to_buffer(client, literal);
        assert_eq!(buffer.on_host_shape(), &literal.shape());
        assert_eq!(&to_literal(client, &buffer), literal, "round trip of {literal}");
    }
}

pub fn failed_runs_release_device_memory(client: &LocalClient) {
    let allocator = client.memory_allocator();
    let x = to_buffer(client, &Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]));
    let baseline = allocator.live_allocations();
    let baseline_bytes = allocator.live_bytes();

    assert!(execute(client, &add_matrices(), &[&x]).is_err());
    assert!(execute(client, &add_vectors_computation(), &[&x]).is_err());
    assert!(execute(client, &divide_by_zero(), &[]).is_err());
    assert_eq!(allocator.live_allocations(), baseline);
    assert_eq!(allocator.live_bytes(), baseline_bytes);

    let result = execute(client, &add_matrices(), &[&x, &x]).expect("execute");
    assert_eq!(allocator.live_allocations(), baseline + 1);
    drop(result);
    assert_eq!(allocator.live_allocations(), baseline);

    drop(x);
    assert_eq!(allocator.live_allocations(), baseline - 1);
}
