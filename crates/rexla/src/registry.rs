//! Runtime platform registry.
//!
//! Platforms are registered by name with a constructor. Platform crates add a
//! registrar to [`PLATFORM_REGISTRARS`] so that linking the crate is enough
//! for its platforms to show up; the registrars run the first time the
//! registry is queried. Explicit [`register_platform`] calls work as well and
//! replace any earlier registration with the same name.

use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, PoisonError, RwLock};

use crate::env;
use crate::error::{XlaError, XlaResult};
use crate::platform::Platform;

/// Factory that creates a new platform instance.
pub type PlatformConstructor = Arc<dyn Fn() -> XlaResult<Arc<dyn Platform>> + Send + Sync>;

#[linkme::distributed_slice]
pub static PLATFORM_REGISTRARS: [fn()] = [..];

struct PlatformRegistry {
    platforms: RwLock<HashMap<String, PlatformConstructor>>,
}

impl PlatformRegistry {
    fn new() -> Self {
        Self {
            platforms: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: PlatformConstructor) {
        self.platforms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, constructor);
    }

    /// Runs the constructor with the lock released so it may register platforms itself.
    fn create(&self, name: &str) -> Option<XlaResult<Arc<dyn Platform>>> {
        let constructor = self
            .platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names = self
            .platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn contains(&self, name: &str) -> bool {
        self.platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<PlatformRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn global_registry() -> &'static PlatformRegistry {
    GLOBAL_REGISTRY.get_or_init(PlatformRegistry::new)
}

fn populated_registry() -> &'static PlatformRegistry {
    RUN_REGISTRARS.call_once(|| {
        for registrar in PLATFORM_REGISTRARS.iter() {
            registrar();
        }
    });
    global_registry()
}

/// Registers a platform constructor under `name`.
pub fn register_platform<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> XlaResult<Arc<dyn Platform>> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(platform = %name, "registering platform");
    global_registry().register(name, Arc::new(constructor));
}

/// Creates a new instance of the platform registered under `name`.
pub fn create_platform(name: &str) -> XlaResult<Arc<dyn Platform>> {
    populated_registry()
        .create(name)
        .unwrap_or_else(|| Err(XlaError::PlatformNotFound(name.to_string())))
}

/// Registered platform names, sorted.
pub fn list_platforms() -> Vec<String> {
    populated_registry().list()
}

pub fn has_platform(name: &str) -> bool {
    populated_registry().contains(name)
}

/// The platform named by `REXLA_PLATFORM`, else `host`.
pub fn default_platform() -> XlaResult<Arc<dyn Platform>> {
    create_platform(env::default_platform_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_is_reported() {
        let err = create_platform("no-such-platform").err().unwrap();
        assert!(matches!(err, XlaError::PlatformNotFound(name) if name == "no-such-platform"));
        assert!(!has_platform("no-such-platform"));
    }

    #[test]
    fn constructor_may_register_platforms() {
        register_platform("registers-a-sibling", || {
            register_platform("registered-by-constructor", || {
                Err(XlaError::execution("sibling is never constructed"))
            });
            Err(XlaError::execution("constructor declined"))
        });
        let err = create_platform("registers-a-sibling").err().unwrap();
        assert!(err.to_string().contains("constructor declined"), "{err}");
        assert!(has_platform("registered-by-constructor"));
    }
}
