//! Test doubles shared by the unit tests across modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::CacheError;
use crate::loader::{Loader, Volatile};

/// A trivial [`Volatile`] value: invalid until loaded, then carries the key
/// it was loaded for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestValue {
    valid: bool,
    loaded_for: Option<&'static str>,
}

impl TestValue {
    fn invalid() -> Self {
        Self {
            valid: false,
            loaded_for: None,
        }
    }

    fn valid(key: &'static str) -> Self {
        Self {
            valid: true,
            loaded_for: Some(key),
        }
    }
}

impl Volatile for TestValue {
    fn is_valid(&self) -> bool {
        self.valid
    }
}

/// A [`Loader`] that counts calls to `load`, optionally sleeping first (to
/// widen a race window in concurrency tests) or always failing.
pub struct CountingLoader {
    count: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            delay: None,
            fail: false,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            count: AtomicUsize::new(0),
            delay: Some(delay),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            count: AtomicUsize::new(0),
            delay: None,
            fail: true,
        }
    }

    pub fn load_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for CountingLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader<&'static str, TestValue> for CountingLoader {
    fn create_empty_value(&self, _key: &&'static str) -> TestValue {
        TestValue::invalid()
    }

    fn load(&self, key: &&'static str) -> Result<TestValue, CacheError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(CacheError::LoaderFailure(format!(
                "CountingLoader configured to fail for {key}"
            )));
        }
        Ok(TestValue::valid(key))
    }
}
