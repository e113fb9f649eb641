pub mod helpers;
pub mod local_client_execute;

/// Instantiates the local client conformance suite for a platform.
///
/// `$client_ctor` builds a fresh client for every test. `$foreign_ctor` builds
/// a client for a different platform, used to check that streams, allocators
/// and buffers from another platform are rejected.
#[macro_export]
macro_rules! define_platform_tests {
    ($module:ident, $client_ctor:expr, $foreign_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;

            use $crate::local_client_execute;

            macro_rules! local_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let client = ($client_ctor)();
                        local_client_execute::$name(&client);
                    }
                };
            }

            macro_rules! cross_platform_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let client = ($client_ctor)();
                        let foreign = ($foreign_ctor)();
                        local_client_execute::$name(&client, &foreign);
                    }
                };
            }

            local_test!(constant);
            local_test!(add_scalars);
            local_test!(add_zero_element_vectors);
            local_test!(add_vectors);
            local_test!(add_vectors_with_profile);
            local_test!(add_arrays_with_different_input_layouts);
            local_test!(add_arrays_with_different_output_layouts);
            local_test!(tuple_result);
            local_test!(nested_tuple_result);
            local_test!(tuple_result_with_layout);
            local_test!(invalid_number_of_arguments);
            local_test!(incorrect_argument_shape);
            local_test!(invalid_result_layout);
            local_test!(run_on_all_device_ordinals);
            local_test!(invalid_device_ordinal_values);
            local_test!(run_on_stream);
            local_test!(run_on_uninitialized_stream);
            local_test!(failed_run_poisons_stream);
            local_test!(device_ordinal_conflicting_with_stream);
            local_test!(run_targets_device_other_than_build);
            local_test!(argument_on_other_device);
            local_test!(select_between_tuples);
            local_test!(compile_executable);
            local_test!(run_with_wrong_argument_count);
            local_test!(run_with_incorrect_argument_shape);
            local_test!(run_checks_compiled_argument_layouts);
            local_test!(repeated_runs_reuse_executable);
            local_test!(broadcast_compare_and_convert);
            local_test!(shaped_buffer_to_literal_conversion);
            local_test!(failed_runs_release_device_memory);

            cross_platform_test!(run_on_stream_for_wrong_platform);
            cross_platform_test!(allocator_does_not_match_platform);
            cross_platform_test!(argument_from_other_platform);
        }
    };
}
