//! Lock helpers shared by the session caches and the fidelity manager.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the guard if a panicking holder poisoned it.
///
/// Guarded tables are only ever mutated through complete insert/replace
/// operations, so a poisoned table is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
