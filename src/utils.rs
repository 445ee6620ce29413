use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned mutex is still entered: the guarded data is plain state
    /// that stays meaningful after a panic in another holder.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::MutexUtils;

    #[test]
    fn poisoned_mutex_is_still_usable() {
        let counter = Arc::new(Mutex::new(1));

        let poisoner = counter.clone();
        let _ = std::thread::spawn(move || {
            poisoner.with_lock(|mut n| {
                *n += 1;
                panic!("poison the lock");
            })
        })
        .join();

        assert!(counter.is_poisoned());
        assert_eq!(counter.with_lock(|n| *n), 2);
    }
}
