//! Generation-in-progress guard.
//!
//! At most one control loop runs per session. The guard is a shared flag;
//! acquiring it yields a token that clears the flag when dropped, so the
//! flag is released on success, error and early return alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// Shared flag marking that a generation loop is running.
#[derive(Debug, Clone, Default)]
pub struct GenerationGuard {
    active: Arc<AtomicBool>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard, failing if a loop is already running.
    pub fn acquire(&self) -> CoreResult<GuardToken> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CoreError::GenerationInProgress)?;
        Ok(GuardToken {
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of holding the guard. Releases it on drop.
#[derive(Debug)]
pub struct GuardToken {
    active: Arc<AtomicBool>,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let guard = GenerationGuard::new();
        let token = guard.acquire().unwrap();

        assert!(guard.is_active());
        assert!(matches!(guard.acquire(), Err(CoreError::GenerationInProgress)));

        drop(token);
        assert!(!guard.is_active());
        assert!(guard.acquire().is_ok());
    }

    #[test]
    fn test_released_on_error_path() {
        fn failing(guard: &GenerationGuard) -> CoreResult<()> {
            let _token = guard.acquire()?;
            Err(CoreError::InvalidState("boom".to_string()))
        }

        let guard = GenerationGuard::new();
        assert!(failing(&guard).is_err());
        assert!(!guard.is_active());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let guard = GenerationGuard::new();
        let other = guard.clone();
        let _token = guard.acquire().unwrap();
        assert!(other.is_active());
        assert!(other.acquire().is_err());
    }
}
