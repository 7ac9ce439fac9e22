//! Dense strided arrays with zero-copy views and threaded kernels.
//!
//! A [`DenseArray`] is a 1-, 2- or 3-dimensional window onto a flat, shared
//! backing buffer. The window is described by an [`AddressModel`]: per-axis
//! extents, a zero offset, and either linear strides or per-axis offset tables
//! (selection views). Every view operation produces a new `DenseArray` that
//! shares the same buffer; nothing is copied.
//!
//! # Core Types
//!
//! - [`DenseArray`]: the array entity (allocation, checked/quick access)
//! - [`AddressModel`] / [`Addressing`]: the strided addressing model
//! - [`ExecutionContext`]: thread count, parallel threshold and worker pool
//!
//! # Operations
//!
//! ## Views
//!
//! [`DenseArray::permute`], [`DenseArray::transpose`], [`DenseArray::flip`],
//! [`DenseArray::part`], [`DenseArray::subsample`], [`DenseArray::select`]
//! and the predicate selections.
//!
//! ## Elementwise
//!
//! [`DenseArray::fill`], [`DenseArray::transform`], [`DenseArray::apply`],
//! [`DenseArray::transform_where`], [`DenseArray::copy_from`],
//! [`DenseArray::combine_with`] and their coordinate-list variants.
//!
//! ## Reductions
//!
//! [`DenseArray::aggregate`], [`DenseArray::extremum_with_location`],
//! [`DenseArray::cardinality`], [`DenseArray::coordinates_where`].
//!
//! ## Linear algebra
//!
//! [`multiply`] (cache-blocked, task-parallel GEMM) and [`mat_vec`].
//!
//! # Example
//!
//! ```rust
//! use strided_dense::{DenseArray, ExecutionContext};
//!
//! let ctx = ExecutionContext::default();
//! let a = DenseArray::from_vec([3, 3], (1..=9).collect::<Vec<i64>>()).unwrap();
//!
//! assert_eq!(a.aggregate(&ctx, |x, y| x + y, |x| x).unwrap(), 45);
//! assert_eq!(a.max_location(&ctx).unwrap(), (9, [2, 2]));
//!
//! // Transpose is a view: it shares the buffer with `a`.
//! let t = a.transpose();
//! assert_eq!(t.get([0, 2]).unwrap(), 7);
//! ```
//!
//! # Threading
//!
//! Kernels consult the [`ExecutionContext`]: when more than one thread is
//! configured and the work size reaches the threshold, the row-major iteration
//! space is split into one contiguous range per thread and the calling thread
//! blocks until all ranges complete. Partial reduction results are combined in
//! partition order, so results are deterministic for a given thread count.

mod address;
mod alias;
mod array;
mod buffer;
mod context;
mod element;
mod kernel;
mod linalg;
mod ops;
mod reduce;
mod threading;
mod view;

pub use address::{row_major_strides, AddressModel, Addressing};
pub use alias::may_share_cells;
pub use array::DenseArray;
pub use context::{ExecutionContext, DEFAULT_PARALLEL_THRESHOLD};
pub use element::{Element, Scalar};
pub use linalg::{mat_vec, multiply, MulOptions};
pub use ops::{BinaryOp, UnaryOp};
pub use threading::{combine_in_order, partition, run_partitioned};

// ============================================================================
// Constants
// ============================================================================

/// Number of elements one row block of the multiply kernel should occupy.
///
/// The left operand is split into blocks of `(BLOCK_ELEMENTS - n) / (n + 1)`
/// rows, where `n` is the inner dimension.
pub const BLOCK_ELEMENTS: usize = 30_000;

/// Minimum number of multiply-adds a single multiply task should perform.
pub const MIN_FLOPS_PER_TASK: usize = 30_000;

// ============================================================================
// Error types
// ============================================================================

/// Errors that can occur during strided array operations.
#[derive(Debug, thiserror::Error)]
pub enum StridedError {
    /// Operand extents are incompatible for the requested operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    InvalidShape(Vec<usize>, Vec<usize>),

    /// A reduction was requested over zero elements.
    #[error("reduction over an empty operand")]
    EmptyOperand,

    /// The multiply output shares its buffer with one of the inputs.
    #[error("result matrix must not share cells with an operand")]
    IdentityAliasing,

    /// The operation is meaningless for the array's addressing strategy.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A coordinate lies outside the extent of its axis.
    #[error("index {index} out of range for axis {axis} with extent {extent}")]
    OutOfRange {
        axis: usize,
        index: usize,
        extent: usize,
    },

    /// Invalid axis index for the given array rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// The axis permutation is not a permutation of `0..N`.
    #[error("invalid permutation: {0:?}")]
    InvalidPermutation(Vec<usize>),

    /// A zero subsampling factor was requested.
    #[error("invalid stride 0 for axis {axis}")]
    InvalidStride { axis: usize },

    /// Explicit strides/offset would address memory outside the buffer.
    #[error("offset out of bounds while computing address")]
    OffsetOutOfBounds,

    /// A configuration value could not be parsed.
    #[error("invalid configuration value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },

    /// The worker pool could not be created.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for strided array operations.
pub type Result<T> = std::result::Result<T, StridedError>;
