pub mod config;
pub mod interpreter;
pub mod platform;

use std::sync::Arc;

use rexla::Platform;

pub use config::HostPlatformConfig;
pub use interpreter::{evaluate, HostProgram};
pub use platform::HostPlatform;

/// Register the host platform with the global platform registry.
///
/// Runs automatically the first time the registry is queried, but can also
/// be called manually. The platform is registered as both "host" and
/// "interpreter"; the two names are distinct platforms, so buffers and
/// streams of one are rejected by clients of the other.
pub fn register_host_platform() {
    rexla::registry::register_platform("host", || {
        Ok(Arc::new(HostPlatform::from_env("host")) as Arc<dyn Platform>)
    });
    rexla::registry::register_platform("interpreter", || {
        Ok(Arc::new(HostPlatform::from_env("interpreter")) as Arc<dyn Platform>)
    });
}

#[rexla::linkme::distributed_slice(rexla::registry::PLATFORM_REGISTRARS)]
static REGISTER_HOST_PLATFORM: fn() = register_host_platform;
