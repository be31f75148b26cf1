//! A reentrant lock with an explicit owner thread and depth counter.
//!
//! The store lock must be re-enterable: notification handlers and sync
//! replay call back into the backend while a mutation holds it. The guard
//! only hands out `&T`; callers pair it with a `RefCell` for mutation.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

pub struct ReentrantLock<T> {
    owner: Mutex<Owner>,
    released: Condvar,
    data: UnsafeCell<T>,
}

// Only the owning thread can reach `data`, and the guard is !Send.
unsafe impl<T: Send> Send for ReentrantLock<T> {}
unsafe impl<T: Send> Sync for ReentrantLock<T> {}

impl<T> ReentrantLock<T> {
    pub fn new(data: T) -> Self {
        ReentrantLock {
            owner: Mutex::new(Owner {
                thread: None,
                depth: 0,
            }),
            released: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    break;
                }
                Some(id) if id == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Current nesting depth held by the calling thread; 0 if not held.
    pub fn depth(&self) -> usize {
        let owner = self.owner();
        match owner.thread {
            Some(id) if id == thread::current().id() => owner.depth,
            _ => 0,
        }
    }

    fn unlock(&self) {
        let mut owner = self.owner();
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

pub struct ReentrantGuard<'a, T> {
    lock: &'a ReentrantLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the calling thread owns the lock while the guard lives.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;

    #[test]
    fn same_thread_can_reenter() {
        let lock = ReentrantLock::new(RefCell::new(0));
        let outer = lock.lock();
        {
            let inner = lock.lock();
            *inner.borrow_mut() += 1;
            assert_eq!(lock.depth(), 2);
        }
        assert_eq!(lock.depth(), 1);
        assert_eq!(*outer.borrow(), 1);
        drop(outer);
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn other_threads_wait_for_release() {
        let lock = Arc::new(ReentrantLock::new(RefCell::new(Vec::new())));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let guard = lock.lock();
                        let nested = lock.lock();
                        nested.borrow_mut().push(i);
                        drop(nested);
                        drop(guard);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lock.lock().borrow().len(), 400);
    }
}
