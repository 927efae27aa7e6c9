// crates/trellis-core/src/test_env.rs
// ============================================================================
// Module: Test Environment Helpers
// Description: Serialized process environment mutation for unit tests.
// Purpose: Let tests set and restore env vars without racing each other.
// ============================================================================

#![allow(clippy::expect_used, reason = "Test-only helpers.")]

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;

pub mod env_mut {
    #![allow(unsafe_code, reason = "Tests mutate process env vars in a controlled scope.")]

    /// Sets an environment variable for the current process.
    pub fn set_var(key: &str, value: &str) {
        // SAFETY: Tests serialize environment mutation via a global lock.
        unsafe {
            std::env::set_var(key, value);
        }
    }

    /// Removes an environment variable from the current process.
    pub fn remove_var(key: &str) {
        // SAFETY: Tests serialize environment mutation via a global lock.
        unsafe {
            std::env::remove_var(key);
        }
    }
}

/// Serializes tests that touch the process environment.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().expect("env lock poisoned")
}

/// Restores the named variables on drop.
pub struct EnvGuard {
    /// Saved values.
    entries: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    /// Snapshots `names`.
    pub fn new(names: &[&'static str]) -> Self {
        let entries = names.iter().map(|name| (*name, std::env::var(*name).ok())).collect();
        Self {
            entries,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, value) in self.entries.drain(..) {
            match value {
                Some(value) => env_mut::set_var(name, &value),
                None => env_mut::remove_var(name),
            }
        }
    }
}
