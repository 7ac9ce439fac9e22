//! Elementwise operations: fill, transform, copy and combine.
//!
//! All operations write in place through the destination's address model.
//! Work is partitioned over row-major positions (or over the coordinate list
//! for the `_at` variants). Parallel writes require a destination whose
//! coordinates map to distinct cells; otherwise the call runs sequentially.

use std::ops::Range;

use crate::address::AddressModel;
use crate::alias::may_share_cells;
use crate::array::DenseArray;
use crate::buffer::{SendPtr, UpdateSet};
use crate::context::ExecutionContext;
use crate::element::{Element, Scalar};
use crate::kernel::{for_each_offset, for_each_offset_pair};
use crate::threading::{run_partitioned, use_parallel};
use crate::{Result, StridedError};

// ============================================================================
// Recognized operation kinds
// ============================================================================

/// Unary elementwise operation with a recognized fast-path kind.
#[derive(Debug, Clone, Copy)]
pub enum UnaryOp<T, F = fn(T) -> T> {
    /// `x * k`. `k == 1` is a no-op and `k == 0` becomes a fill.
    Mult(T),
    /// Arbitrary function.
    Func(F),
}

impl<T> UnaryOp<T> {
    pub fn mult(k: T) -> Self {
        UnaryOp::Mult(k)
    }
}

impl<T, F: Fn(T) -> T> UnaryOp<T, F> {
    pub fn func(f: F) -> Self {
        UnaryOp::Func(f)
    }
}

/// Binary elementwise operation `x = op(x, y)` with recognized fast-path kinds.
#[derive(Debug, Clone, Copy)]
pub enum BinaryOp<T, F = fn(T, T) -> T> {
    /// `x * y`
    Mult,
    /// `x / y`
    Div,
    /// `x + y`
    Plus,
    /// `x - y`
    Minus,
    /// `x + k * y`. `k == 0` is a no-op.
    PlusMult(T),
    /// Arbitrary function of `(x, y)`.
    Func(F),
}

impl<T> BinaryOp<T> {
    pub fn mult() -> Self {
        BinaryOp::Mult
    }

    pub fn div() -> Self {
        BinaryOp::Div
    }

    pub fn plus() -> Self {
        BinaryOp::Plus
    }

    pub fn minus() -> Self {
        BinaryOp::Minus
    }

    pub fn plus_mult(k: T) -> Self {
        BinaryOp::PlusMult(k)
    }
}

impl<T, F: Fn(T, T) -> T> BinaryOp<T, F> {
    pub fn func(f: F) -> Self {
        BinaryOp::Func(f)
    }
}

// ============================================================================
// Dispatch helpers
// ============================================================================

/// Run a write kernel over all positions of `dst`.
fn run_writes<const N: usize, F>(ctx: &ExecutionContext, dst: &AddressModel<N>, f: F) -> Result<()>
where
    F: Fn(Range<usize>) -> Result<()> + Sync,
{
    let n = dst.size();
    if use_parallel(ctx, n) && !dst.is_injective() {
        tracing::debug!(work = n, "destination revisits cells, writing sequentially");
        return f(0..n);
    }
    run_partitioned(ctx, n, f).map(drop)
}

/// Run a write kernel over a resolved coordinate list.
fn run_list_writes<F>(ctx: &ExecutionContext, offsets: &[isize], f: F) -> Result<()>
where
    F: Fn(&[isize]) -> Result<()> + Sync,
{
    let n = offsets.len();
    if use_parallel(ctx, n) && !all_distinct(offsets) {
        tracing::debug!(work = n, "coordinate list repeats cells, writing sequentially");
        return f(offsets);
    }
    run_partitioned(ctx, n, |range| f(&offsets[range])).map(drop)
}

fn all_distinct(offsets: &[isize]) -> bool {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).all(|w| w[0] != w[1])
}

// ============================================================================
// Single-array operations
// ============================================================================

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Set every element to `value`.
    pub fn fill(&self, ctx: &ExecutionContext, value: T) -> Result<()> {
        let mut cells = self.buffer.write();
        if self.owns_contiguous {
            cells[..self.size()].fill(value);
            return Ok(());
        }
        let dst = SendPtr(cells.as_mut_ptr());
        let model = &self.model;
        run_writes(ctx, model, |range| {
            for_each_offset(model, range, |_, _, off| unsafe {
                *dst.as_ptr().offset(off) = value;
            });
            Ok(())
        })
    }

    /// Set the elements at `coords` to `value`.
    ///
    /// # Errors
    /// [`StridedError::OutOfRange`] if any coordinate is invalid; nothing is
    /// written in that case.
    pub fn fill_at(&self, ctx: &ExecutionContext, coords: &[[usize; N]], value: T) -> Result<()> {
        self.transform_at(ctx, coords, |_| value)
    }

    /// Set the elements for which `predicate` holds to `value`.
    pub fn fill_where<P>(&self, ctx: &ExecutionContext, predicate: P, value: T) -> Result<()>
    where
        P: Fn(T) -> bool + Sync,
    {
        self.transform_where(ctx, predicate, |_| value)
    }

    /// Replace every element `x` with `f(x)`.
    pub fn transform<F>(&self, ctx: &ExecutionContext, f: F) -> Result<()>
    where
        F: Fn(T) -> T + Sync,
    {
        let mut cells = self.buffer.write();
        let dst = SendPtr(cells.as_mut_ptr());
        let model = &self.model;
        run_writes(ctx, model, |range| {
            for_each_offset(model, range, |_, _, off| unsafe {
                let p = dst.as_ptr().offset(off);
                *p = f(*p);
            });
            Ok(())
        })
    }

    /// Replace `x` with `f(x)` where `predicate(x)` holds; other elements are
    /// left untouched.
    pub fn transform_where<P, F>(&self, ctx: &ExecutionContext, predicate: P, f: F) -> Result<()>
    where
        P: Fn(T) -> bool + Sync,
        F: Fn(T) -> T + Sync,
    {
        let mut cells = self.buffer.write();
        let dst = SendPtr(cells.as_mut_ptr());
        let model = &self.model;
        run_writes(ctx, model, |range| {
            for_each_offset(model, range, |_, _, off| unsafe {
                let p = dst.as_ptr().offset(off);
                if predicate(*p) {
                    *p = f(*p);
                }
            });
            Ok(())
        })
    }

    /// Replace the elements at `coords` with `f(x)`.
    ///
    /// A coordinate listed twice is transformed twice.
    pub fn transform_at<F>(&self, ctx: &ExecutionContext, coords: &[[usize; N]], f: F) -> Result<()>
    where
        F: Fn(T) -> T + Sync,
    {
        let offsets = self.resolve(coords)?;
        let mut cells = self.buffer.write();
        let dst = SendPtr(cells.as_mut_ptr());
        run_list_writes(ctx, &offsets, |chunk| {
            for &off in chunk {
                unsafe {
                    let p = dst.as_ptr().offset(off);
                    *p = f(*p);
                }
            }
            Ok(())
        })
    }

    /// Overwrite the elements, in row-major order, with `values`.
    ///
    /// # Errors
    /// [`StridedError::InvalidShape`] if `values.len() != self.size()`.
    pub fn assign_values(&self, ctx: &ExecutionContext, values: &[T]) -> Result<()> {
        if values.len() != self.size() {
            return Err(StridedError::InvalidShape(vec![values.len()], vec![self.size()]));
        }
        let mut cells = self.buffer.write();
        if self.owns_contiguous {
            cells[..values.len()].copy_from_slice(values);
            return Ok(());
        }
        let dst = SendPtr(cells.as_mut_ptr());
        let model = &self.model;
        run_writes(ctx, model, |range| {
            for_each_offset(model, range, |pos, _, off| unsafe {
                *dst.as_ptr().offset(off) = values[pos];
            });
            Ok(())
        })
    }
}

impl<T: Scalar, const N: usize> DenseArray<T, N> {
    /// Apply a recognized unary operation in place.
    pub fn apply<F>(&self, ctx: &ExecutionContext, op: UnaryOp<T, F>) -> Result<()>
    where
        F: Fn(T) -> T + Sync,
    {
        match op {
            UnaryOp::Mult(k) if k == T::one() => Ok(()),
            UnaryOp::Mult(k) if k == T::zero() => self.fill(ctx, T::zero()),
            UnaryOp::Mult(k) => self.transform(ctx, |x| x * k),
            UnaryOp::Func(f) => self.transform(ctx, f),
        }
    }

    /// Replace every non-zero element `x` at `coord` with `f(coord, x)`.
    pub fn for_each_non_zero<F>(&self, ctx: &ExecutionContext, f: F) -> Result<()>
    where
        F: Fn(&[usize; N], T) -> T + Sync,
    {
        let mut cells = self.buffer.write();
        let dst = SendPtr(cells.as_mut_ptr());
        let model = &self.model;
        run_writes(ctx, model, |range| {
            for_each_offset(model, range, |_, coord, off| unsafe {
                let p = dst.as_ptr().offset(off);
                if *p != T::zero() {
                    *p = f(coord, *p);
                }
            });
            Ok(())
        })
    }
}

// ============================================================================
// Two-array operations
// ============================================================================

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Copy every element of `other` into `self`.
    ///
    /// # Errors
    /// [`StridedError::InvalidShape`] if the extents differ.
    pub fn copy_from(&self, ctx: &ExecutionContext, other: &DenseArray<T, N>) -> Result<()> {
        self.check_same_extents(other)?;
        if may_share_cells(self, other) {
            if self.model == other.model {
                return Ok(());
            }
            tracing::debug!("copy source shares a buffer with the destination, snapshotting");
            return self.copy_from_distinct(ctx, &other.copy());
        }
        self.copy_from_distinct(ctx, other)
    }

    fn copy_from_distinct(&self, ctx: &ExecutionContext, other: &DenseArray<T, N>) -> Result<()> {
        let mut set = UpdateSet::acquire(&self.buffer, &[&other.buffer]);
        let dst = set.dst();
        let src = set.src(0);
        if self.owns_contiguous && other.owns_contiguous {
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_const(), dst.as_ptr(), self.size());
            }
            return Ok(());
        }
        let (a, b) = (&self.model, &other.model);
        run_writes(ctx, a, |range| {
            for_each_offset_pair(a, b, range, |_, _, oa, ob| unsafe {
                *dst.as_ptr().offset(oa) = *src.as_const().offset(ob);
            });
            Ok(())
        })
    }

    /// `x = f(x, y)` for every element pair of `self` and `other`.
    ///
    /// If `other` may share cells with `self` it is snapshotted first, so
    /// every `y` is the value before the call. The one exception is `other`
    /// addressing exactly the cells of `self` under a layout that visits each
    /// cell once, which reads each `x` as `y` without a copy.
    pub(crate) fn zip_with<F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(T, T) -> T + Sync,
    {
        self.check_same_extents(other)?;
        if may_share_cells(self, other) {
            if self.model == other.model && self.model.is_injective() {
                return self.transform(ctx, |x| f(x, x));
            }
            tracing::debug!("operands share a buffer, combining against a snapshot");
            return self.zip_with_distinct(ctx, &other.copy(), f);
        }
        self.zip_with_distinct(ctx, other, f)
    }

    fn zip_with_distinct<F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(T, T) -> T + Sync,
    {
        let mut set = UpdateSet::acquire(&self.buffer, &[&other.buffer]);
        let dst = set.dst();
        let src = set.src(0);
        let (a, b) = (&self.model, &other.model);
        run_writes(ctx, a, |range| {
            for_each_offset_pair(a, b, range, |_, _, oa, ob| unsafe {
                let p = dst.as_ptr().offset(oa);
                *p = f(*p, *src.as_const().offset(ob));
            });
            Ok(())
        })
    }

    /// `x = f(x, y)` at each of `coords`, reading `y` from the same
    /// coordinate of `other`.
    pub(crate) fn zip_with_at<F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        coords: &[[usize; N]],
        f: F,
    ) -> Result<()>
    where
        F: Fn(T, T) -> T + Sync,
    {
        self.check_same_extents(other)?;
        let dst_offsets = self.resolve(coords)?;
        if may_share_cells(self, other) {
            if self.model == other.model && all_distinct(&dst_offsets) {
                return self.transform_at(ctx, coords, |x| f(x, x));
            }
            tracing::debug!("operands share a buffer, combining against a snapshot");
            return self.zip_with_at(ctx, &other.copy(), coords, f);
        }
        let src_offsets = other.resolve(coords)?;
        let mut set = UpdateSet::acquire(&self.buffer, &[&other.buffer]);
        let dst = set.dst();
        let src = set.src(0);
        let n = dst_offsets.len();
        let kernel = |range: Range<usize>| {
            for k in range {
                unsafe {
                    let p = dst.as_ptr().offset(dst_offsets[k]);
                    *p = f(*p, *src.as_const().offset(src_offsets[k]));
                }
            }
            Ok(())
        };
        if use_parallel(ctx, n) && !all_distinct(&dst_offsets) {
            return kernel(0..n);
        }
        run_partitioned(ctx, n, kernel).map(drop)
    }
}

impl<T: Scalar, const N: usize> DenseArray<T, N> {
    /// `x = op(x, y)` for every element pair of `self` and `other`.
    ///
    /// # Errors
    /// [`StridedError::InvalidShape`] if the extents differ.
    pub fn combine_with<F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        op: BinaryOp<T, F>,
    ) -> Result<()>
    where
        F: Fn(T, T) -> T + Sync,
    {
        match op {
            BinaryOp::PlusMult(k) if k == T::zero() => self.check_same_extents(other),
            BinaryOp::PlusMult(k) if k == T::one() => self.zip_with(ctx, other, |x, y| x + y),
            BinaryOp::PlusMult(k) => self.zip_with(ctx, other, move |x, y| x + k * y),
            BinaryOp::Mult => self.zip_with(ctx, other, |x, y| x * y),
            BinaryOp::Div => self.zip_with(ctx, other, |x, y| x / y),
            BinaryOp::Plus => self.zip_with(ctx, other, |x, y| x + y),
            BinaryOp::Minus => self.zip_with(ctx, other, |x, y| x - y),
            BinaryOp::Func(f) => self.zip_with(ctx, other, f),
        }
    }

    /// [`combine_with`](Self::combine_with) restricted to `coords`.
    pub fn combine_with_at<F>(
        &self,
        ctx: &ExecutionContext,
        other: &DenseArray<T, N>,
        coords: &[[usize; N]],
        op: BinaryOp<T, F>,
    ) -> Result<()>
    where
        F: Fn(T, T) -> T + Sync,
    {
        match op {
            BinaryOp::PlusMult(k) if k == T::zero() => self
                .check_same_extents(other)
                .and_then(|_| self.resolve(coords).map(drop)),
            BinaryOp::PlusMult(k) => self.zip_with_at(ctx, other, coords, move |x, y| x + k * y),
            BinaryOp::Mult => self.zip_with_at(ctx, other, coords, |x, y| x * y),
            BinaryOp::Div => self.zip_with_at(ctx, other, coords, |x, y| x / y),
            BinaryOp::Plus => self.zip_with_at(ctx, other, coords, |x, y| x + y),
            BinaryOp::Minus => self.zip_with_at(ctx, other, coords, |x, y| x - y),
            BinaryOp::Func(f) => self.zip_with_at(ctx, other, coords, f),
        }
    }
}
