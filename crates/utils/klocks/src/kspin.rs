//! 自旋锁，封装了一下 `spin::mutex::spin`
//!
//! 模拟机器只有一个逻辑 CPU，锁只用来让共享的表满足 `Sync`，正常情况下不会真的自旋。
//! 一旦自旋过久，基本可以确定是同一个执行流重复上锁，debug 模式下直接 panic

use core::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
#[cfg(debug_assertions)]
use std::{
    panic::Location,
    time::{Duration, Instant},
};

#[cfg(debug_assertions)]
const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SpinMutex<T: ?Sized> {
    base: spin::mutex::SpinMutex<T>,
}

pub struct SpinMutexGuard<'a, T: ?Sized> {
    inner: spin::mutex::SpinMutexGuard<'a, T>,
    // 不允许 Guard 越过 .await
    _not_send: PhantomData<*const ()>,
}

// Same unsafe impls as `std::sync::Mutex`
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}

unsafe impl<T: ?Sized + Sync> Sync for SpinMutexGuard<'_, T> {}

impl<T> SpinMutex<T> {
    /// Creates a new [`SpinMutex`] wrapping the supplied data.
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        Self {
            base: spin::mutex::SpinMutex::new(data),
        }
    }

    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.base.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Locks the [`SpinMutex`] and returns a guard that permits access to the
    /// inner data.
    ///
    /// The returned value may be dereferenced for data access
    /// and the lock will be dropped when the guard falls out of scope.
    #[inline]
    #[track_caller]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        #[cfg(debug_assertions)]
        let (caller, begin) = (Location::caller(), Instant::now());
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            while self.is_locked() {
                core::hint::spin_loop();
                #[cfg(debug_assertions)]
                if begin.elapsed() >= DEADLOCK_TIMEOUT {
                    panic!("deadlock detected at {caller}");
                }
            }
        }
    }

    /// 上锁后在闭包中操作，这是一个便捷方法。
    ///
    /// 闭包返回后锁立即释放，在 async 函数中用它可以避免 Guard 被意外地带过 `.await`
    #[inline]
    #[track_caller]
    pub fn lock_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function provides no synchronization guarantees and so its result
    /// should be considered 'out of date' the instant it is called. Do not
    /// use it for synchronization purposes. However, it may be useful as a
    /// heuristic.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.base.is_locked()
    }

    /// Try to lock this [`SpinMutex`], returning a lock guard if successful.
    #[inline(always)]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.base.try_lock().map(|inner| SpinMutexGuard {
            inner,
            _not_send: PhantomData,
        })
    }

    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.base.get_mut()
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinMutex").field("data", &&*guard).finish(),
            None => f.write_str("SpinMutex { <locked> }"),
        }
    }
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // We know statically that only we are referencing data
        &self.inner
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
