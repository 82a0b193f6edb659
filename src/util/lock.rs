//! Poison-tolerant access to std locks.
//!
//! A panic while holding one of these locks leaves plain counters or handler slots behind,
//! never half-written invariants, so the guard is recovered and the event logged.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, owner: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, "rwlock.read"))
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, owner: &'static str) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, "rwlock.write"))
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, owner: &'static str) -> MutexGuard<'a, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| recover(poisoned, owner, "mutex.lock"))
}

fn recover<G>(poisoned: PoisonError<G>, owner: &'static str, lock_kind: &'static str) -> G {
    warn!(
        target_module = owner,
        lock_kind,
        result = "poisoned_recovered",
        "recovered from poisoned lock"
    );
    poisoned.into_inner()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex, RwLock},
        thread,
    };

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let shared = Arc::new(Mutex::new(1));
        let clone = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = clone.lock().expect("first lock");
            panic!("poison the lock");
        })
        .join();

        assert!(shared.is_poisoned());
        *lock(&shared, "test") += 1;
        assert_eq!(*lock(&shared, "test"), 2);
    }

    #[test]
    fn poisoned_rwlock_is_recovered() {
        let shared = Arc::new(RwLock::new(vec![1]));
        let clone = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = clone.write().expect("first write");
            panic!("poison the lock");
        })
        .join();

        write(&shared, "test").push(2);
        assert_eq!(read(&shared, "test").len(), 2);
    }
}
