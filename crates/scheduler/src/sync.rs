use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// any call that can panic, so the poisoned state is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("recovering poisoned lock");
        poisoned.into_inner()
    })
}

/// Non-blocking variant of [`lock`]. `None` means another thread holds it.
pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => {
            warn!("recovering poisoned lock");
            Some(poisoned.into_inner())
        }
        Err(TryLockError::WouldBlock) => None,
    }
}
