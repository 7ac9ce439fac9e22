//! Conservative detection of arrays that may address the same cells.

use crate::array::DenseArray;

/// Whether `a` and `b` may address overlapping cells.
///
/// True iff both arrays resolve to the same backing buffer. Strides and
/// offsets are not inspected, so two disjoint views of one buffer still
/// report `true`; a false negative is never produced.
#[inline]
pub fn may_share_cells<T, const N: usize, const M: usize>(
    a: &DenseArray<T, N>,
    b: &DenseArray<T, M>,
) -> bool {
    a.buffer.ptr_eq(&b.buffer)
}
