// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! The task store keeps its state behind a `std::sync::RwLock`. A panic in
//! one caller must not take the whole store down with it, so every access
//! goes through these helpers, which log the poisoning and hand back the
//! guard anyway. The store only ever swaps whole values under the lock, so
//! the recovered data is the last complete state.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "applesword::locks",
                "store lock poisoned during read; continuing with last written state"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "applesword::locks",
                "store lock poisoned during write; continuing with last written state"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_normal_read_write() {
        let lock = RwLock::new(1);
        *resilient_write(&lock) = 2;
        assert_eq!(*resilient_read(&lock), 2);
    }

    #[test]
    fn test_recovers_after_panic() {
        let lock = Arc::new(RwLock::new(vec![1, 2, 3]));

        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(resilient_read(&lock).len(), 3);
        resilient_write(&lock).push(4);
        assert_eq!(resilient_read(&lock).len(), 4);
    }
}
