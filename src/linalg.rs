//! Matrix multiplication: cache-blocked GEMM and matrix-vector products.
//!
//! # Blocking
//!
//! The left operand is walked in blocks of `(BLOCK_ELEMENTS - n) / (n + 1)`
//! rows (`n` the inner dimension), so one block of `A` plus one column of `B`
//! stays within the cache budget. Within a block, result columns are the outer
//! loop and block rows the inner loop; each result cell is one dot product,
//! unrolled by four after a scalar remainder of `n % 4` terms.
//!
//! # Parallel decomposition
//!
//! The product costs `2*m*n*p` flops. The task count is
//! `min(flops / MIN_FLOPS_PER_TASK, threads)`. With fewer than two tasks the
//! blocked kernel runs on the calling thread; otherwise the result is split
//! into column ranges (when there are at least as many columns as tasks) or
//! row ranges.
//!
//! # Operand layouts
//!
//! The left operand may be a selection view: its rows are resolved once per
//! row and its shared axis through an offset table. The right operand must be
//! linear; when it is a selection and the left is not, the product is
//! computed as `(Bᵗ·Aᵗ)ᵗ`. Remaining selection operands are copied.

use std::ops::Range;

use crate::address::AddressModel;
use crate::alias::may_share_cells;
use crate::array::DenseArray;
use crate::buffer::{SendPtr, UpdateSet};
use crate::context::ExecutionContext;
use crate::element::{Element, Scalar};
use crate::threading::{on_pool_worker, partition, run_tasks, use_parallel};
use crate::{Result, StridedError, BLOCK_ELEMENTS, MIN_FLOPS_PER_TASK};

/// Scaling and transpose flags for [`multiply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MulOptions<T> {
    pub alpha: T,
    pub beta: T,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl<T: Scalar> MulOptions<T> {
    /// `alpha = 1`, `beta = 0`, no transposes.
    pub fn new() -> Self {
        Self {
            alpha: T::one(),
            beta: T::zero(),
            transpose_a: false,
            transpose_b: false,
        }
    }

    pub fn alpha(mut self, alpha: T) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn beta(mut self, beta: T) -> Self {
        self.beta = beta;
        self
    }

    pub fn transpose_a(mut self, transpose: bool) -> Self {
        self.transpose_a = transpose;
        self
    }

    pub fn transpose_b(mut self, transpose: bool) -> Self {
        self.transpose_b = transpose;
        self
    }
}

impl<T: Scalar> Default for MulOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Operand geometry
// ============================================================================

/// Addressing of the shared (inner) axis of the left operand.
#[derive(Clone, Copy)]
enum Shared<'a> {
    Stride(isize),
    Table(&'a [isize]),
}

/// Offsets of the left operand's shared axis, for selection views.
fn shared_axis_table(model: &AddressModel<2>) -> Vec<isize> {
    if model.is_linear() {
        return Vec::new();
    }
    (0..model.extents()[1]).map(|k| model.axis_offset(1, k)).collect()
}

fn shared_axis<'a>(model: &AddressModel<2>, table: &'a [isize]) -> Shared<'a> {
    match model.strides() {
        Some(strides) => Shared::Stride(strides[1]),
        None => Shared::Table(table),
    }
}

/// Zero offset and strides of a linear model.
fn linear_parts<const N: usize>(model: &AddressModel<N>) -> Result<(isize, [isize; N])> {
    match model.strides() {
        Some(strides) => Ok((model.zero(), *strides)),
        None => Err(StridedError::Unsupported("kernel operand must be linear")),
    }
}

/// `x` itself when linear, otherwise a contiguous copy.
fn linear_operand<T: Element, const N: usize>(x: &DenseArray<T, N>) -> DenseArray<T, N> {
    if x.model.is_linear() {
        x.view()
    } else {
        tracing::debug!(extents = ?x.extents(), "copying selection operand");
        x.copy()
    }
}

/// Whether `x` can be written in place by disjoint tasks.
fn writable_in_place<T, const N: usize>(x: &DenseArray<T, N>) -> bool {
    x.model.is_linear() && x.model.is_injective()
}

/// Dot product of `n` terms, remainder first, then unrolled by four.
#[inline(always)]
fn dot_by<T: Scalar>(n: usize, term: impl Fn(usize) -> T) -> T {
    let rem = n % 4;
    let mut s = T::zero();
    for k in 0..rem {
        s = s + term(k);
    }
    let mut k = rem;
    while k < n {
        s = s + term(k) + term(k + 1) + term(k + 2) + term(k + 3);
        k += 4;
    }
    s
}

/// `Σ_k A[row, k] * B[k]` with `B[k]` at `b_base + sb * k`.
///
/// # Safety
/// Every offset addressed must lie within the buffers behind `a` and `b`.
#[inline(always)]
unsafe fn dot<T: Scalar>(
    a: SendPtr<T>,
    a_base: isize,
    a_k: Shared<'_>,
    b: SendPtr<T>,
    b_base: isize,
    sb: isize,
    n: usize,
) -> T {
    let (a, b) = (a.as_const(), b.as_const());
    match a_k {
        Shared::Stride(sa) => dot_by(n, |k| unsafe {
            *a.offset(a_base + sa * k as isize) * *b.offset(b_base + sb * k as isize)
        }),
        Shared::Table(table) => dot_by(n, |k| unsafe {
            *a.offset(a_base + table[k]) * *b.offset(b_base + sb * k as isize)
        }),
    }
}

/// Resolved operands of one GEMM call.
struct Gemm<'a, T> {
    a: SendPtr<T>,
    a_model: &'a AddressModel<2>,
    a_k: Shared<'a>,
    b: SendPtr<T>,
    b_zero: isize,
    b_strides: [isize; 2],
    c: SendPtr<T>,
    c_zero: isize,
    c_strides: [isize; 2],
    n: usize,
    alpha: T,
    beta: T,
}

impl<T: Scalar> Gemm<'_, T> {
    /// Blocked kernel over result cells `rows × cols`.
    fn run(&self, rows: Range<usize>, cols: Range<usize>) {
        let block = (BLOCK_ELEMENTS.saturating_sub(self.n) / (self.n + 1)).max(1);
        let overwrite = self.beta == T::zero();
        let mut r0 = rows.start;
        while r0 < rows.end {
            let r1 = (r0 + block).min(rows.end);
            for j in cols.clone() {
                let b_col = self.b_zero + self.b_strides[1] * j as isize;
                let c_col = self.c_zero + self.c_strides[1] * j as isize;
                for i in r0..r1 {
                    let a_row = self.a_model.zero() + self.a_model.axis_offset(0, i);
                    unsafe {
                        let sb = self.b_strides[0];
                        let s = dot(self.a, a_row, self.a_k, self.b, b_col, sb, self.n);
                        let cell = self.c.as_ptr().offset(c_col + self.c_strides[0] * i as isize);
                        *cell = if overwrite {
                            self.alpha * s
                        } else {
                            self.alpha * s + self.beta * *cell
                        };
                    }
                }
            }
            r0 = r1;
        }
    }
}

// ============================================================================
// Matrix-matrix
// ============================================================================

/// `C = alpha * op(A) * op(B) + beta * C`.
///
/// Without `c` a zero-initialized result is allocated (so `beta` has no
/// effect). With `c`, the result is written into it and a handle onto it is
/// returned.
///
/// # Errors
/// - [`StridedError::InvalidShape`] if the inner dimensions disagree or `c`
///   has the wrong extents.
/// - [`StridedError::IdentityAliasing`] if `c` may share cells with `a` or `b`.
pub fn multiply<T: Scalar>(
    ctx: &ExecutionContext,
    a: &DenseArray<T, 2>,
    b: &DenseArray<T, 2>,
    c: Option<&DenseArray<T, 2>>,
    opts: MulOptions<T>,
) -> Result<DenseArray<T, 2>> {
    let a = if opts.transpose_a { a.transpose() } else { a.view() };
    let b = if opts.transpose_b { b.transpose() } else { b.view() };
    let [m, n] = *a.extents();
    let [n_b, p] = *b.extents();
    if n != n_b {
        return Err(StridedError::InvalidShape(b.extents().to_vec(), vec![n, p]));
    }
    let c = match c {
        Some(c) => {
            if c.extents() != &[m, p] {
                return Err(StridedError::InvalidShape(c.extents().to_vec(), vec![m, p]));
            }
            if may_share_cells(c, &a) || may_share_cells(c, &b) {
                return Err(StridedError::IdentityAliasing);
            }
            c.view()
        }
        None => DenseArray::zeros([m, p])?,
    };
    if m == 0 || p == 0 {
        return Ok(c);
    }

    if !b.model.is_linear() && a.model.is_linear() {
        tracing::debug!("right operand is a selection, multiplying through the transpose");
        gemm(ctx, &b.transpose(), &a.transpose(), &c.transpose(), opts.alpha, opts.beta)?;
    } else {
        gemm(ctx, &a, &b, &c, opts.alpha, opts.beta)?;
    }
    Ok(c)
}

fn gemm<T: Scalar>(
    ctx: &ExecutionContext,
    a: &DenseArray<T, 2>,
    b: &DenseArray<T, 2>,
    c: &DenseArray<T, 2>,
    alpha: T,
    beta: T,
) -> Result<()> {
    let b = linear_operand(b);
    if !writable_in_place(c) {
        tracing::debug!("result layout is not writable in place, multiplying into a copy");
        let scratch = c.copy();
        gemm_in_place(ctx, a, &b, &scratch, alpha, beta)?;
        return c.copy_from(ctx, &scratch);
    }
    gemm_in_place(ctx, a, &b, c, alpha, beta)
}

fn gemm_in_place<T: Scalar>(
    ctx: &ExecutionContext,
    a: &DenseArray<T, 2>,
    b: &DenseArray<T, 2>,
    c: &DenseArray<T, 2>,
    alpha: T,
    beta: T,
) -> Result<()> {
    let [m, n] = *a.extents();
    let p = c.extents()[1];
    let (b_zero, b_strides) = linear_parts(&b.model)?;
    let (c_zero, c_strides) = linear_parts(&c.model)?;
    let table = shared_axis_table(&a.model);

    let mut set = UpdateSet::acquire(&c.buffer, &[&a.buffer, &b.buffer]);
    let kernel = Gemm {
        a: set.src(0),
        a_model: &a.model,
        a_k: shared_axis(&a.model, &table),
        b: set.src(1),
        b_zero,
        b_strides,
        c: set.dst(),
        c_zero,
        c_strides,
        n,
        alpha,
        beta,
    };

    let flops = 2usize.saturating_mul(m).saturating_mul(n).saturating_mul(p);
    let tasks = (flops / MIN_FLOPS_PER_TASK).min(ctx.threads());
    if tasks < 2 || on_pool_worker() {
        tracing::debug!(flops, tasks = 1, "sequential multiply");
        kernel.run(0..m, 0..p);
        return Ok(());
    }
    if p >= tasks {
        tracing::debug!(flops, tasks, split = "columns", "parallel multiply");
        run_tasks(ctx, partition(p, tasks), |cols| {
            kernel.run(0..m, cols);
            Ok(())
        })?;
    } else {
        tracing::debug!(flops, tasks, split = "rows", "parallel multiply");
        run_tasks(ctx, partition(m, tasks), |rows| {
            kernel.run(rows, 0..p);
            Ok(())
        })?;
    }
    Ok(())
}

// ============================================================================
// Matrix-vector
// ============================================================================

/// `z = alpha * op(A) * y + beta * z`.
///
/// Without `z` a zero-initialized result is allocated. Rows of the result
/// are partitioned across threads once `m * n` reaches the context threshold.
///
/// # Errors
/// - [`StridedError::InvalidShape`] if `y` or `z` has the wrong length.
/// - [`StridedError::IdentityAliasing`] if `z` may share cells with `a` or `y`.
pub fn mat_vec<T: Scalar>(
    ctx: &ExecutionContext,
    a: &DenseArray<T, 2>,
    y: &DenseArray<T, 1>,
    z: Option<&DenseArray<T, 1>>,
    alpha: T,
    beta: T,
    transpose_a: bool,
) -> Result<DenseArray<T, 1>> {
    let a = if transpose_a { a.transpose() } else { a.view() };
    let [m, n] = *a.extents();
    if y.size() != n {
        return Err(StridedError::InvalidShape(y.extents().to_vec(), vec![n]));
    }
    let z = match z {
        Some(z) => {
            if z.size() != m {
                return Err(StridedError::InvalidShape(z.extents().to_vec(), vec![m]));
            }
            if may_share_cells(z, &a) || may_share_cells(z, y) {
                return Err(StridedError::IdentityAliasing);
            }
            z.view()
        }
        None => DenseArray::zeros([m])?,
    };
    if m == 0 {
        return Ok(z);
    }

    let y = linear_operand(y);
    if writable_in_place(&z) {
        gemv_in_place(ctx, &a, &y, &z, alpha, beta)?;
    } else {
        tracing::debug!("result layout is not writable in place, multiplying into a copy");
        let scratch = z.copy();
        gemv_in_place(ctx, &a, &y, &scratch, alpha, beta)?;
        z.copy_from(ctx, &scratch)?;
    }
    Ok(z)
}

fn gemv_in_place<T: Scalar>(
    ctx: &ExecutionContext,
    a: &DenseArray<T, 2>,
    y: &DenseArray<T, 1>,
    z: &DenseArray<T, 1>,
    alpha: T,
    beta: T,
) -> Result<()> {
    let [m, n] = *a.extents();
    let (y_zero, [sy]) = linear_parts(&y.model)?;
    let (z_zero, [sz]) = linear_parts(&z.model)?;
    let table = shared_axis_table(&a.model);
    let a_k = shared_axis(&a.model, &table);
    let overwrite = beta == T::zero();

    let mut set = UpdateSet::acquire(&z.buffer, &[&a.buffer, &y.buffer]);
    let (pz, pa, py) = (set.dst(), set.src(0), set.src(1));
    let a_model = &a.model;
    let rows = |range: Range<usize>| {
        for i in range {
            let a_row = a_model.zero() + a_model.axis_offset(0, i);
            unsafe {
                let s = dot(pa, a_row, a_k, py, y_zero, sy, n);
                let cell = pz.as_ptr().offset(z_zero + sz * i as isize);
                *cell = if overwrite {
                    alpha * s
                } else {
                    alpha * s + beta * *cell
                };
            }
        }
        Ok(())
    };

    let work = m.saturating_mul(n);
    if !use_parallel(ctx, work) {
        tracing::debug!(work, "sequential matrix-vector product");
        return rows(0..m);
    }
    tracing::debug!(work, threads = ctx.threads(), "parallel matrix-vector product");
    run_tasks(ctx, partition(m, ctx.threads()), rows).map(drop)
}
