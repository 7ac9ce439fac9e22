//! Reductions: aggregation, extremum with location and coordinate scans.
//!
//! Each partition folds its range in row-major order; the per-partition
//! partials are then combined on the calling thread in partition order. For a
//! given thread count the result is therefore deterministic even for
//! non-commutative combiners.

use crate::array::DenseArray;
use crate::buffer::{ReadSet, SendPtr};
use crate::context::ExecutionContext;
use crate::element::{Element, Scalar};
use crate::kernel::{for_each_offset, for_each_offset_pair};
use crate::threading::{combine_in_order, run_partitioned};
use crate::{Result, StridedError};

/// Fold `next` into an optional accumulator.
#[inline]
fn fold_into<U, C: Fn(U, U) -> U>(acc: &mut Option<U>, next: U, combiner: &C) {
    *acc = Some(match acc.take() {
        Some(prev) => combiner(prev, next),
        None => next,
    });
}

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Fold `mapper(x)` over every element with `combiner`.
    ///
    /// # Errors
    /// [`StridedError::EmptyOperand`] if the array has no elements.
    pub fn aggregate<U, C, M>(&self, ctx: &ExecutionContext, combiner: C, mapper: M) -> Result<U>
    where
        U: Send,
        C: Fn(U, U) -> U + Sync,
        M: Fn(T) -> U + Sync,
    {
        self.aggregate_where(ctx, combiner, mapper, |_| true)
    }

    /// Fold `mapper(x)` over the elements for which `predicate` holds.
    ///
    /// # Errors
    /// [`StridedError::EmptyOperand`] if no element passes the predicate.
    pub fn aggregate_where<U, C, M, P>(
        &self,
        ctx: &ExecutionContext,
        combiner: C,
        mapper: M,
        predicate: P,
    ) -> Result<U>
    where
        U: Send,
        C: Fn(U, U) -> U + Sync,
        M: Fn(T) -> U + Sync,
        P: Fn(T) -> bool + Sync,
    {
        if self.is_empty() {
            return Err(StridedError::EmptyOperand);
        }
        let cells = self.buffer.read();
        let src = SendPtr(cells.as_ptr() as *mut T);
        let model = &self.model;
        let partials = run_partitioned(ctx, self.size(), |range| {
            let mut acc = None;
            for_each_offset(model, range, |_, _, off| {
                let x = unsafe { *src.as_const().offset(off) };
                if predicate(x) {
                    fold_into(&mut acc, mapper(x), &combiner);
                }
            });
            Ok(acc)
        })?;
        combine_in_order(partials, &combiner).ok_or(StridedError::EmptyOperand)
    }

    /// Fold `mapper(x)` over the elements at `coords`, in list order.
    ///
    /// # Errors
    /// - [`StridedError::OutOfRange`] if any coordinate is invalid.
    /// - [`StridedError::EmptyOperand`] if `coords` is empty.
    pub fn aggregate_at<U, C, M>(
        &self,
        ctx: &ExecutionContext,
        coords: &[[usize; N]],
        combiner: C,
        mapper: M,
    ) -> Result<U>
    where
        U: Send,
        C: Fn(U, U) -> U + Sync,
        M: Fn(T) -> U + Sync,
    {
        let offsets = self.resolve(coords)?;
        if offsets.is_empty() {
            return Err(StridedError::EmptyOperand);
        }
        let cells = self.buffer.read();
        let src = SendPtr(cells.as_ptr() as *mut T);
        let partials = run_partitioned(ctx, offsets.len(), |range| {
            let mut acc = None;
            for &off in &offsets[range] {
                let x = unsafe { *src.as_const().offset(off) };
                fold_into(&mut acc, mapper(x), &combiner);
            }
            Ok(acc)
        })?;
        combine_in_order(partials, &combiner).ok_or(StridedError::EmptyOperand)
    }

    /// Fold `f(x, y)` over element pairs of `self` and `other`.
    ///
    /// # Errors
    /// - [`StridedError::InvalidShape`] if the extents differ.
    /// - [`StridedError::EmptyOperand`] if the arrays have no elements.
    pub fn aggregate_with<U, C, F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        combiner: C,
        f: F,
    ) -> Result<U>
    where
        U: Send,
        C: Fn(U, U) -> U + Sync,
        F: Fn(T, T) -> U + Sync,
    {
        self.check_same_extents(other)?;
        if self.is_empty() {
            return Err(StridedError::EmptyOperand);
        }
        let set = ReadSet::acquire(&[&self.buffer, &other.buffer]);
        let (pa, pb) = (set.ptr(0), set.ptr(1));
        let (a, b) = (&self.model, &other.model);
        let partials = run_partitioned(ctx, self.size(), |range| {
            let mut acc = None;
            for_each_offset_pair(a, b, range, |_, _, oa, ob| {
                let (x, y) = unsafe { (*pa.as_const().offset(oa), *pb.as_const().offset(ob)) };
                fold_into(&mut acc, f(x, y), &combiner);
            });
            Ok(acc)
        })?;
        combine_in_order(partials, &combiner).ok_or(StridedError::EmptyOperand)
    }

    /// The best element under `is_better` and its coordinate.
    ///
    /// An element replaces the current best only if `is_better(candidate,
    /// best)` holds, so among equally good elements the earliest in row-major
    /// order wins, on the sequential and the parallel path alike.
    ///
    /// # Errors
    /// [`StridedError::EmptyOperand`] if the array has no elements.
    pub fn extremum_with_location<B>(
        &self,
        ctx: &ExecutionContext,
        is_better: B,
    ) -> Result<(T, [usize; N])>
    where
        B: Fn(T, T) -> bool + Sync,
    {
        if self.is_empty() {
            return Err(StridedError::EmptyOperand);
        }
        let cells = self.buffer.read();
        let src = SendPtr(cells.as_ptr() as *mut T);
        let model = &self.model;
        let pick = |best: (T, [usize; N]), next: (T, [usize; N])| {
            if is_better(next.0, best.0) {
                next
            } else {
                best
            }
        };
        let partials = run_partitioned(ctx, self.size(), |range| {
            let mut best = None;
            for_each_offset(model, range, |_, coord, off| {
                let x = unsafe { *src.as_const().offset(off) };
                fold_into(&mut best, (x, *coord), &pick);
            });
            Ok(best)
        })?;
        combine_in_order(partials, pick).ok_or(StridedError::EmptyOperand)
    }

    /// Coordinates and values of the elements for which `predicate` holds,
    /// in row-major order.
    pub fn coordinates_where<P>(&self, mut predicate: P) -> (Vec<[usize; N]>, Vec<T>)
    where
        P: FnMut(T) -> bool,
    {
        let cells = self.buffer.read();
        let mut coords = Vec::new();
        let mut values = Vec::new();
        for_each_offset(&self.model, 0..self.size(), |_, coord, off| {
            let x = cells[off as usize];
            if predicate(x) {
                coords.push(*coord);
                values.push(x);
            }
        });
        (coords, values)
    }
}

impl<T: Element + PartialOrd, const N: usize> DenseArray<T, N> {
    /// Largest element and the first coordinate holding it.
    pub fn max_location(&self, ctx: &ExecutionContext) -> Result<(T, [usize; N])> {
        self.extremum_with_location(ctx, |a, b| a > b)
    }

    /// Smallest element and the first coordinate holding it.
    pub fn min_location(&self, ctx: &ExecutionContext) -> Result<(T, [usize; N])> {
        self.extremum_with_location(ctx, |a, b| a < b)
    }
}

impl<T: Scalar, const N: usize> DenseArray<T, N> {
    /// Sum of all elements; zero for an empty array.
    pub fn sum(&self, ctx: &ExecutionContext) -> Result<T> {
        if self.is_empty() {
            return Ok(T::zero());
        }
        self.aggregate(ctx, |a, b| a + b, |x| x)
    }

    /// Number of elements not equal to zero.
    pub fn cardinality(&self, ctx: &ExecutionContext) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        self.aggregate(ctx, |a, b| a + b, |x| usize::from(x != T::zero()))
    }

    /// Coordinates and values of the non-zero elements.
    pub fn non_zeros(&self) -> (Vec<[usize; N]>, Vec<T>) {
        self.coordinates_where(|x| x != T::zero())
    }
}

impl<T: Scalar + PartialOrd, const N: usize> DenseArray<T, N> {
    /// Coordinates and values of the elements greater than zero.
    pub fn positive_values(&self) -> (Vec<[usize; N]>, Vec<T>) {
        self.coordinates_where(|x| x > T::zero())
    }

    /// Coordinates and values of the elements less than zero.
    pub fn negative_values(&self) -> (Vec<[usize; N]>, Vec<T>) {
        self.coordinates_where(|x| x < T::zero())
    }
}
