use std::sync::Arc;

use rexla::ir::Computation;
use rexla::{
    Platform, PlatformId, PlatformProgram, Shape, StreamExecutor, XlaError, XlaResult,
};

use crate::config::HostPlatformConfig;
use crate::interpreter::HostProgram;

/// Platform whose devices are slices of host memory and whose programs are
/// interpreted on the calling thread.
pub struct HostPlatform {
    id: PlatformId,
    config: HostPlatformConfig,
    executors: Vec<Arc<StreamExecutor>>,
}

impl HostPlatform {
    pub fn new(name: &str, config: HostPlatformConfig) -> Self {
        let id = PlatformId::new(name);
        let executors = (0..config.device_count)
            .map(|ordinal| {
                Arc::new(
                    StreamExecutor::new(id.clone(), ordinal)
                        .with_memory_limit(config.memory_limit_bytes),
                )
            })
            .collect();
        Self {
            id,
            config,
            executors,
        }
    }

    /// Platform configured from the environment.
    pub fn from_env(name: &str) -> Self {
        Self::new(name, HostPlatformConfig::from_env())
    }

    pub fn config(&self) -> &HostPlatformConfig {
        &self.config
    }
}

impl Platform for HostPlatform {
    fn id(&self) -> &PlatformId {
        &self.id
    }

    fn device_count(&self) -> usize {
        self.executors.len()
    }

    fn device_ordinal_supported(&self, ordinal: usize) -> bool {
        self.config.is_supported(ordinal)
    }

    fn executor(&self, ordinal: usize) -> XlaResult<Arc<StreamExecutor>> {
        self.executors
            .get(ordinal)
            .cloned()
            .ok_or(XlaError::InvalidDeviceOrdinal {
                ordinal,
                count: self.executors.len(),
            })
    }

    fn compile(
        &self,
        computation: &Computation,
        result_shape: &Shape,
    ) -> XlaResult<Arc<dyn PlatformProgram>> {
        if !result_shape.compatible(computation.result_shape()) {
            return Err(XlaError::IncompatibleResultLayout {
                layout: result_shape.to_string(),
                shape: computation.result_shape().to_string(),
            });
        }
        Ok(Arc::new(HostProgram::new(
            Arc::new(computation.clone()),
            result_shape.clone(),
        )))
    }
}
