//! Ordered launch queue bound to one device.
//!
//! Launches complete synchronously, so a stream only tracks its health and
//! how many launches it has seen.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{XlaError, XlaResult};
use crate::executor::StreamExecutor;
use crate::platform::PlatformId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Ready,
    Error,
}

pub struct Stream {
    executor: Arc<StreamExecutor>,
    state: Mutex<StreamState>,
    launches: AtomicU64,
}

impl Stream {
    /// Creates an uninitialised stream; call [`Stream::init`] before use.
    pub fn new(executor: Arc<StreamExecutor>) -> Self {
        Self {
            executor,
            state: Mutex::new(StreamState::Uninitialized),
            launches: AtomicU64::new(0),
        }
    }

    pub fn init(&self) -> XlaResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            StreamState::Error => Err(XlaError::StreamNotReady),
            _ => {
                *state = StreamState::Ready;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialised and not in an error state.
    pub fn is_ok(&self) -> bool {
        self.state() == StreamState::Ready
    }

    pub fn set_error(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StreamState::Error;
    }

    pub fn executor(&self) -> &Arc<StreamExecutor> {
        &self.executor
    }

    pub fn platform(&self) -> &PlatformId {
        self.executor.platform()
    }

    pub fn device_ordinal(&self) -> usize {
        self.executor.device_ordinal()
    }

    pub fn record_launch(&self) {
        self.launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    pub fn block_host_until_done(&self) -> XlaResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(XlaError::StreamNotReady)
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("platform", self.platform())
            .field("device_ordinal", &self.device_ordinal())
            .field("state", &self.state())
            .field("launches", &self.launch_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let exec = Arc::new(StreamExecutor::new(PlatformId::new("test"), 2));
        let stream = Stream::new(exec);
        assert_eq!(stream.state(), StreamState::Uninitialized);
        assert!(stream.block_host_until_done().is_err());
        stream.init().unwrap();
        assert!(stream.is_ok());
        assert_eq!(stream.device_ordinal(), 2);
        stream.set_error();
        assert!(!stream.is_ok());
        assert!(stream.init().is_err());
    }
}
