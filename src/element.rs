//! Element type bounds for strided operations.

use std::ops::{Add, Div, Mul, Sub};

/// Anything that can live in a shared buffer and cross worker threads.
///
/// Elementwise kernels that only move or transform values (fill, copy,
/// transform) need nothing more than this.
pub trait Element: Copy + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Send + Sync + 'static {}

/// Numeric element: the bounds needed by the arithmetic fast paths,
/// `cardinality`, `sum` and matrix multiplication.
pub trait Scalar:
    Element
    + PartialEq
    + num_traits::Zero
    + num_traits::One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
}

impl<T> Scalar for T where
    T: Element
        + PartialEq
        + num_traits::Zero
        + num_traits::One
        + Add<Output = T>
        + Sub<Output = T>
        + Mul<Output = T>
        + Div<Output = T>
{
}
