//! Scoped object pooling: `acquire`/`release` re-expressed as RAII so a
//! pooled value can't be used after it's returned to the pool.
//!
//! This backs the hot-path allocations in the query path (decode scratch
//! buffers, block cursor heaps) where pooling is a genuine performance
//! necessity, without the manual `generate`/`release` discipline the
//! design notes flag as a latent bug class.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    factory: fn() -> T,
}

impl<T> Pool<T> {
    pub fn new(factory: fn() -> T) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            factory,
        }
    }

    /// Takes an item from the pool, creating one via the factory if the
    /// pool is empty. The returned guard is the only way to reach the
    /// item; dropping it returns the item to the pool.
    pub fn acquire(&self) -> PoolGuard<'_, T> {
        let item = self.items.lock().pop().unwrap_or_else(self.factory);
        PoolGuard {
            pool: self,
            item: Some(item),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct PoolGuard<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("guard holds its item until dropped")
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("guard holds its item until dropped")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.items.lock().push(item);
        }
    }
}
