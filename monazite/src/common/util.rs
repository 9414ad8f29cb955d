use std::sync::Arc;

use parking_lot::RwLock;

/// Shared mutable state behind a reader-writer lock.
///
/// The crate keeps its cross-thread cells in this shape: the in-memory
/// driver's collection map and the lazily rendered error backtrace.
/// Access goes through [ReadExecutor::read_with] and
/// [WriteExecutor::write_with], so lock guards never escape a call.
pub type Atomic<T> = Arc<RwLock<T>>;

#[inline]
pub fn atomic<T>(value: T) -> Atomic<T> {
    Arc::new(RwLock::new(value))
}

/// Closure-scoped shared read access to an [Atomic] cell.
pub trait ReadExecutor<T> {
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R;
}

impl<T> ReadExecutor<T> for Atomic<T> {
    #[inline]
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read())
    }
}

/// Closure-scoped exclusive write access to an [Atomic] cell.
pub trait WriteExecutor<T> {
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

impl<T> WriteExecutor<T> for Atomic<T> {
    #[inline]
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_write_scoped_to_closures() {
        let cell = atomic(vec!["a"]);
        cell.write_with(|items| items.push("b"));
        let len = cell.read_with(|items| items.len());
        assert_eq!(len, 2);

        // the closure result can borrow nothing from the guard
        let joined = cell.read_with(|items| items.join(","));
        assert_eq!(joined, "a,b");
    }
}
