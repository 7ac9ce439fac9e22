//! Shared backing storage.
//!
//! Every [`DenseArray`](crate::DenseArray) holds a handle to a reference-counted,
//! fixed-size buffer. Views clone the handle; the buffer is freed when the last
//! handle drops. A single call locks each buffer it touches once, for the whole
//! call: sources for reading, the destination for writing. Buffers are always
//! locked in address order so two calls touching the same pair of buffers in
//! opposite roles cannot deadlock.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reference-counted flat storage shared by an array and all of its views.
pub(crate) struct SharedBuffer<T> {
    cells: Arc<RwLock<Vec<T>>>,
    len: usize,
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
            len: self.len,
        }
    }
}

impl<T> SharedBuffer<T> {
    pub(crate) fn new(data: Vec<T>) -> Self {
        let len = data.len();
        Self {
            cells: Arc::new(RwLock::new(data)),
            len,
        }
    }

    /// Buffer identity (reference equality of the shared storage).
    #[inline]
    pub(crate) fn ptr_eq(&self, other: &SharedBuffer<T>) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    #[inline]
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.cells) as *const () as usize
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Shared read access.
    ///
    /// Uses a recursive read so a thread that already reads this buffer
    /// through another operand never waits on a queued writer.
    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.cells.read_recursive()
    }

    /// Exclusive write access for the duration of one call.
    #[inline]
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.cells.write()
    }
}

/// A raw pointer wrapper that is `Send` + `Sync`.
///
/// # Safety
/// The caller must guarantee that the pointed-to data is valid for the
/// lifetime of any parallel operation and that no data races occur
/// (e.g., different threads write to disjoint regions).
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    #[inline]
    pub(crate) fn as_ptr(self) -> *mut T {
        self.0
    }

    #[inline]
    pub(crate) fn as_const(self) -> *const T {
        self.0 as *const T
    }
}

/// Read guards over a set of buffers, one guard per distinct buffer.
pub(crate) struct ReadSet<'a, T> {
    _guards: Vec<RwLockReadGuard<'a, Vec<T>>>,
    ptrs: Vec<SendPtr<T>>,
}

impl<'a, T> ReadSet<'a, T> {
    /// Lock every distinct buffer in `buffers` for reading, in address order.
    pub(crate) fn acquire(buffers: &[&'a SharedBuffer<T>]) -> Self {
        let mut order: Vec<usize> = (0..buffers.len()).collect();
        order.sort_by_key(|&k| buffers[k].addr());

        let mut guards = Vec::new();
        let mut ptrs = vec![SendPtr(std::ptr::null_mut()); buffers.len()];
        let mut last: Option<(usize, SendPtr<T>)> = None;
        for k in order {
            let addr = buffers[k].addr();
            let ptr = match last {
                Some((prev, ptr)) if prev == addr => ptr,
                _ => {
                    let guard = buffers[k].read();
                    let ptr = SendPtr(guard.as_ptr() as *mut T);
                    guards.push(guard);
                    ptr
                }
            };
            last = Some((addr, ptr));
            ptrs[k] = ptr;
        }
        Self {
            _guards: guards,
            ptrs,
        }
    }

    /// Pointer to the start of the `k`-th buffer passed to [`acquire`](Self::acquire).
    #[inline]
    pub(crate) fn ptr(&self, k: usize) -> SendPtr<T> {
        self.ptrs[k]
    }
}

/// Write guard on a destination plus read guards on its sources.
pub(crate) struct UpdateSet<'a, T> {
    _lower: ReadSet<'a, T>,
    write: RwLockWriteGuard<'a, Vec<T>>,
    _upper: ReadSet<'a, T>,
    sources: Vec<SendPtr<T>>,
}

impl<'a, T> UpdateSet<'a, T> {
    /// Lock `dst` for writing and every source for reading, in address order.
    ///
    /// No source may share a buffer with `dst`; callers snapshot aliased
    /// sources first.
    pub(crate) fn acquire(dst: &'a SharedBuffer<T>, sources: &[&'a SharedBuffer<T>]) -> Self {
        debug_assert!(sources.iter().all(|s| !s.ptr_eq(dst)));
        let dst_addr = dst.addr();
        let mut lower_bufs = Vec::new();
        let mut upper_bufs = Vec::new();
        let mut slots = Vec::with_capacity(sources.len());
        for &source in sources {
            if source.addr() < dst_addr {
                slots.push((true, lower_bufs.len()));
                lower_bufs.push(source);
            } else {
                slots.push((false, upper_bufs.len()));
                upper_bufs.push(source);
            }
        }

        let lower = ReadSet::acquire(&lower_bufs);
        let write = dst.write();
        let upper = ReadSet::acquire(&upper_bufs);

        let sources = slots
            .into_iter()
            .map(|(is_lower, k)| if is_lower { lower.ptr(k) } else { upper.ptr(k) })
            .collect();

        Self {
            _lower: lower,
            write,
            _upper: upper,
            sources,
        }
    }

    /// Pointer to the start of the destination buffer.
    #[inline]
    pub(crate) fn dst(&mut self) -> SendPtr<T> {
        SendPtr(self.write.as_mut_ptr())
    }

    /// Pointer to the start of the `k`-th source passed to [`acquire`](Self::acquire).
    #[inline]
    pub(crate) fn src(&self, k: usize) -> SendPtr<T> {
        self.sources[k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_identity() {
        let a = SharedBuffer::new(vec![1, 2, 3]);
        let b = a.clone();
        let c = SharedBuffer::new(vec![1, 2, 3]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_read_set_dedups_aliases() {
        let a = SharedBuffer::new(vec![1.0f64, 2.0]);
        let alias = a.clone();
        let b = SharedBuffer::new(vec![3.0f64]);
        let set = ReadSet::acquire(&[&a, &alias, &b]);
        assert_eq!(set.ptr(0).as_const(), set.ptr(1).as_const());
        assert_ne!(set.ptr(0).as_const(), set.ptr(2).as_const());
        let pa = set.ptr(1);
        let pb = set.ptr(2);
        unsafe {
            assert_eq!(*pa.as_const().add(1), 2.0);
            assert_eq!(*pb.as_const(), 3.0);
        }
    }

    #[test]
    fn test_update_set_writes_destination() {
        let dst = SharedBuffer::new(vec![0i32; 3]);
        let src = SharedBuffer::new(vec![4i32, 5, 6]);
        {
            let mut set = UpdateSet::acquire(&dst, &[&src, &src]);
            let d = set.dst();
            let s = set.src(1);
            for i in 0..3 {
                unsafe {
                    *d.as_ptr().add(i) = *s.as_const().add(i) * 2;
                }
            }
        }
        assert_eq!(*dst.read(), vec![8, 10, 12]);
    }

    #[test]
    fn test_opposite_roles_do_not_deadlock() {
        let a = SharedBuffer::new(vec![1u64; 1024]);
        let b = SharedBuffer::new(vec![2u64; 1024]);
        std::thread::scope(|s| {
            for round in 0..8 {
                let (dst, src) = if round % 2 == 0 { (&a, &b) } else { (&b, &a) };
                s.spawn(move || {
                    for _ in 0..100 {
                        let mut set = UpdateSet::acquire(dst, &[src]);
                        let d = set.dst();
                        unsafe {
                            *d.as_ptr() += *set.src(0).as_const();
                        }
                    }
                });
            }
        });
        assert!(a.read()[0] > 1);
        assert!(b.read()[0] > 2);
    }
}
