use std::sync::Arc;

use rexla::registry::{create_platform, has_platform, list_platforms, register_platform};
use rexla::{
    ClientLibrary, ComputationBuilder, DType, ExecutableBuildOptions, ExecutableRunOptions,
    Literal, LocalClient, Platform, Shape, XlaError,
};
use rexla_backend_host::{HostPlatform, HostPlatformConfig};
use serial_test::serial;

/// Three devices, the middle one unsupported.
fn host_client() -> LocalClient {
    let config = HostPlatformConfig::default()
        .with_device_count(3)
        .with_unsupported_devices([1]);
    LocalClient::new(Arc::new(HostPlatform::new("host", config))).expect("host client")
}

fn interpreter_client() -> LocalClient {
    LocalClient::new(Arc::new(HostPlatform::new(
        "interpreter",
        HostPlatformConfig::default(),
    )))
    .expect("interpreter client")
}

rexla_backend_tests::define_platform_tests!(host_platform, host_client, interpreter_client);
rexla_backend_tests::define_platform_tests!(
    single_device_platform,
    interpreter_client,
    host_client
);

#[test]
#[serial]
fn host_platforms_are_registered_automatically() {
    let names = list_platforms();
    assert!(names.iter().any(|name| name == "host"), "{names:?}");
    assert!(names.iter().any(|name| name == "interpreter"), "{names:?}");
    let platform = create_platform("host").expect("host platform");
    assert_eq!(platform.name(), "host");
}

#[test]
#[serial]
fn unknown_platform_is_reported() {
    match create_platform("no-such-platform") {
        Err(XlaError::PlatformNotFound(name)) => assert_eq!(name, "no-such-platform"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("unknown platform was created"),
    }
}

#[test]
#[serial]
fn registering_a_platform_makes_it_available() {
    register_platform("host-two-devices", || {
        let config = HostPlatformConfig::default().with_device_count(2);
        Ok(Arc::new(HostPlatform::new("host-two-devices", config)) as Arc<dyn Platform>)
    });
    assert!(has_platform("host-two-devices"));
    let client = LocalClient::for_platform_name("host-two-devices").expect("client");
    assert_eq!(client.device_count(), 2);
    assert_eq!(client.platform_id().as_str(), "host-two-devices");
}

#[test]
#[serial]
fn client_library_caches_clients() {
    let first = ClientLibrary::get_or_create_local_client("host").expect("client");
    let second = ClientLibrary::get_or_create_local_client("host").expect("client");
    assert!(Arc::ptr_eq(first.platform(), second.platform()));

    let other = ClientLibrary::get_or_create_local_client("interpreter").expect("client");
    assert_ne!(first.platform_id(), other.platform_id());
}

#[test]
fn output_allocation_failure_releases_partial_buffers() {
    let config = HostPlatformConfig::default().with_memory_limit(48);
    let client = LocalClient::new(Arc::new(HostPlatform::new("host", config))).expect("client");

    let mut b = ComputationBuilder::new("triple");
    let x = b.parameter(0, Shape::array(DType::F32, [2, 2]), "x");
    b.tuple(&[x, x, x]);
    let computation = b.build().expect("build");

    let x = client
        .literal_to_shaped_buffer(&Literal::r2(&[[1.0f32, 2.0], [3.0, 4.0]]), 0, None)
        .expect("argument fits");
    assert_eq!(client.memory_allocator().live_bytes(), 16);

    let result = client.execute_locally(
        &computation,
        &[&x],
        &ExecutableBuildOptions::new(),
        &ExecutableRunOptions::new(),
    );
    assert!(matches!(result, Err(XlaError::Allocation { .. })), "{result:?}");
    assert_eq!(client.memory_allocator().live_allocations(), 1);
    assert_eq!(client.memory_allocator().live_bytes(), 16);
}
