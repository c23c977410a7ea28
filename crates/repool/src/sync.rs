//! Lock selection for pool-internal state.
//!
//! Shard and registry state is guarded by `parking_lot` locks by default.
//! Builds that cannot take the dependency disable the `parking-lot`
//! feature and get `std::sync::Mutex` behind the same minimal surface.

#[cfg(feature = "parking-lot")]
pub(crate) use parking_lot::Mutex as PoolMutex;

#[cfg(not(feature = "parking-lot"))]
pub(crate) use fallback::PoolMutex;

#[cfg(not(feature = "parking-lot"))]
mod fallback {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// `std` mutex with the `parking_lot` calling convention.
    pub(crate) struct PoolMutex<T>(Mutex<T>);

    impl<T> PoolMutex<T> {
        pub(crate) const fn new(value: T) -> Self {
            Self(Mutex::new(value))
        }

        pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
            // Poison carries no extra meaning for shard state; recover the guard.
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub(crate) fn get_mut(&mut self) -> &mut T {
            self.0.get_mut().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PoolMutex;

    #[test]
    fn test_lock_roundtrip() {
        let mutex = PoolMutex::new(7usize);
        {
            let mut guard = mutex.lock();
            *guard += 1;
        }
        assert_eq!(*mutex.lock(), 8);
    }
}
