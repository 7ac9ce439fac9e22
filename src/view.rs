//! View operations on [`DenseArray`].
//!
//! Every operation here returns a new array sharing the source buffer; the
//! derived [`AddressModel`](crate::AddressModel) is composed from the source's,
//! so a view of a view addresses elements as cheaply as the original.
//! Selection views (explicit index lists or predicates) switch to table
//! addressing; reshape refuses them.

use crate::address::check_rank;
use crate::array::DenseArray;
use crate::element::Element;
use crate::{Result, StridedError};

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Reorder axes: axis `i` of the view is axis `perm[i]` of `self`.
    ///
    /// # Errors
    /// [`StridedError::InvalidPermutation`] if `perm` is not a permutation of `0..N`.
    pub fn permute(&self, perm: [usize; N]) -> Result<Self> {
        Ok(self.with_model(self.model.permute(perm)?))
    }

    /// Reverse the order of `axis`.
    pub fn flip(&self, axis: usize) -> Result<Self> {
        Ok(self.with_model(self.model.flip(axis)?))
    }

    /// The box `[origin, origin + lengths)`.
    ///
    /// # Errors
    /// [`StridedError::OutOfRange`] if the box leaves the array.
    pub fn part(&self, origin: [usize; N], lengths: [usize; N]) -> Result<Self> {
        Ok(self.with_model(self.model.part(origin, lengths)?))
    }

    /// Every `factors[d]`-th element along each axis, starting at 0.
    ///
    /// Extents become `ceil(extent / factor)`.
    pub fn subsample(&self, factors: [usize; N]) -> Result<Self> {
        Ok(self.with_model(self.model.subsample(factors)?))
    }

    /// Selection view over explicit per-axis coordinates; `None` keeps the
    /// whole axis. Coordinates may repeat and appear in any order.
    pub fn select(&self, indices: [Option<&[usize]>; N]) -> Result<Self> {
        Ok(self.with_model(self.model.select(indices)?))
    }

    /// Reinterpret the elements, in row-major order, with new extents.
    ///
    /// Row-major contiguous arrays are reshaped as views; other linear
    /// layouts are copied first.
    ///
    /// # Errors
    /// - [`StridedError::Unsupported`] on a selection view or an unsupported rank.
    /// - [`StridedError::InvalidShape`] if the element counts differ.
    pub fn reshape<const M: usize>(&self, extents: [usize; M]) -> Result<DenseArray<T, M>> {
        check_rank::<M>()?;
        if !self.model.is_linear() {
            return Err(StridedError::Unsupported("reshape of a selection view"));
        }
        let size: usize = extents.iter().product();
        if size != self.size() {
            return Err(StridedError::InvalidShape(
                extents.to_vec(),
                self.extents().to_vec(),
            ));
        }
        if self.model.is_row_major_contiguous() {
            return Ok(self.with_model(self.model.relinearize(extents)));
        }
        Ok(DenseArray::contiguous(extents, self.to_vec()))
    }
}

// ============================================================================
// Rank-specific views
// ============================================================================

impl<T: Element> DenseArray<T, 1> {
    /// Selection of the elements for which `predicate` holds, in scan order.
    pub fn select_where<P>(&self, mut predicate: P) -> Result<Self>
    where
        P: FnMut(T) -> bool,
    {
        let keep: Vec<usize> = self
            .to_vec()
            .into_iter()
            .enumerate()
            .filter_map(|(i, x)| predicate(x).then_some(i))
            .collect();
        self.select([Some(&keep[..])])
    }
}

impl<T: Element> DenseArray<T, 2> {
    /// Swap rows and columns.
    pub fn transpose(&self) -> Self {
        self.with_model(self.model.permuted([1, 0]))
    }

    /// Row `row` as a 1-D view.
    pub fn view_row(&self, row: usize) -> Result<DenseArray<T, 1>> {
        Ok(self.with_model(self.model.fix_axis(0, row)?))
    }

    /// Column `column` as a 1-D view.
    pub fn view_column(&self, column: usize) -> Result<DenseArray<T, 1>> {
        Ok(self.with_model(self.model.fix_axis(1, column)?))
    }

    /// Selection of the rows for which `predicate` holds, in scan order.
    pub fn select_rows_where<P>(&self, mut predicate: P) -> Result<Self>
    where
        P: FnMut(&DenseArray<T, 1>) -> bool,
    {
        let mut keep = Vec::new();
        for row in 0..self.extents()[0] {
            if predicate(&self.view_row(row)?) {
                keep.push(row);
            }
        }
        self.select([Some(&keep[..]), None])
    }

    /// Column-major stacking into a fresh 1-D array.
    pub fn vectorize(&self) -> DenseArray<T, 1> {
        DenseArray::contiguous([self.size()], self.transpose().to_vec())
    }
}

impl<T: Element> DenseArray<T, 3> {
    /// Slice `slice` (axis 0 fixed) as a 2-D view.
    pub fn view_slice(&self, slice: usize) -> Result<DenseArray<T, 2>> {
        Ok(self.with_model(self.model.fix_axis(0, slice)?))
    }

    /// Row `row` (axis 1 fixed) as a 2-D `slices × columns` view.
    pub fn view_row(&self, row: usize) -> Result<DenseArray<T, 2>> {
        Ok(self.with_model(self.model.fix_axis(1, row)?))
    }

    /// Column `column` (axis 2 fixed) as a 2-D `slices × rows` view.
    pub fn view_column(&self, column: usize) -> Result<DenseArray<T, 2>> {
        Ok(self.with_model(self.model.fix_axis(2, column)?))
    }

    /// Selection of the slices for which `predicate` holds, in scan order.
    pub fn select_slices_where<P>(&self, mut predicate: P) -> Result<Self>
    where
        P: FnMut(&DenseArray<T, 2>) -> bool,
    {
        let mut keep = Vec::new();
        for slice in 0..self.extents()[0] {
            if predicate(&self.view_slice(slice)?) {
                keep.push(slice);
            }
        }
        self.select([Some(&keep[..]), None, None])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> DenseArray<i32, 2> {
        DenseArray::from_vec([3, 4], (0..12).collect()).unwrap()
    }

    #[test]
    fn test_transpose_shares_buffer() {
        let a = grid();
        let t = a.transpose();
        assert_eq!(t.extents(), &[4, 3]);
        assert_eq!(t.get([3, 1]).unwrap(), 7);
        t.set([0, 2], -1).unwrap();
        assert_eq!(a.get([2, 0]).unwrap(), -1);
    }

    #[test]
    fn test_flip_and_part() {
        let a = grid();
        let f = a.flip(1).unwrap();
        assert_eq!(f.view_row(0).unwrap().to_vec(), vec![3, 2, 1, 0]);

        let p = a.part([1, 1], [2, 2]).unwrap();
        assert_eq!(p.to_vec(), vec![5, 6, 9, 10]);
        assert!(a.part([2, 0], [2, 1]).is_err());
    }

    #[test]
    fn test_subsample() {
        let a = grid();
        let s = a.subsample([2, 3]).unwrap();
        assert_eq!(s.extents(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![0, 3, 8, 11]);
    }

    #[test]
    fn test_select_with_repeats() {
        let a = grid();
        let rows = [2usize, 2, 0];
        let s = a.select([Some(&rows[..]), Some(&[1usize, 3][..])]).unwrap();
        assert_eq!(s.extents(), &[3, 2]);
        assert_eq!(s.to_vec(), vec![9, 11, 9, 11, 1, 3]);
        assert!(matches!(
            a.select([Some(&[3usize][..]), None]),
            Err(StridedError::OutOfRange { axis: 0, .. })
        ));
    }

    #[test]
    fn test_select_where_preserves_order() {
        let v = DenseArray::from_vec([6], vec![5, -1, 3, -4, 0, 8]).unwrap();
        let pos = v.select_where(|x| x > 0).unwrap();
        assert_eq!(pos.to_vec(), vec![5, 3, 8]);
        pos.set([1], 30).unwrap();
        assert_eq!(v.get([2]).unwrap(), 30);
    }

    #[test]
    fn test_select_rows_where() {
        let a = grid();
        let picked = a
            .select_rows_where(|row| row.get([0]).map_or(false, |x| x % 8 == 0))
            .unwrap();
        assert_eq!(picked.extents(), &[2, 4]);
        assert_eq!(picked.view_column(0).unwrap().to_vec(), vec![0, 8]);
    }

    #[test]
    fn test_three_dimensional_views() {
        let a = DenseArray::from_fn([2, 3, 4], |[i, j, k]| (i * 100 + j * 10 + k) as i32).unwrap();
        assert_eq!(a.view_slice(1).unwrap().get([2, 3]).unwrap(), 123);
        assert_eq!(a.view_row(2).unwrap().get([1, 3]).unwrap(), 123);
        assert_eq!(a.view_column(3).unwrap().get([1, 2]).unwrap(), 123);

        let hot = a
            .select_slices_where(|s| s.get([0, 0]).map_or(false, |x| x >= 100))
            .unwrap();
        assert_eq!(hot.extents(), &[1, 3, 4]);
        assert_eq!(hot.get([0, 0, 1]).unwrap(), 101);
    }

    #[test]
    fn test_reshape_contiguous_is_view() {
        let a = grid();
        let r: DenseArray<i32, 3> = a.reshape([2, 3, 2]).unwrap();
        assert!(a.may_share_cells(&r));
        assert_eq!(r.get([1, 0, 1]).unwrap(), 7);

        let row = a.view_row(1).unwrap();
        let r2: DenseArray<i32, 2> = row.reshape([2, 2]).unwrap();
        assert!(a.may_share_cells(&r2));
        assert_eq!(r2.to_vec(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_reshape_strided_copies() {
        let a = grid();
        let t = a.transpose();
        let r: DenseArray<i32, 1> = t.reshape([12]).unwrap();
        assert!(!a.may_share_cells(&r));
        assert_eq!(&r.to_vec()[..4], &[0, 4, 8, 1]);
    }

    #[test]
    fn test_reshape_errors() {
        let a = grid();
        assert!(matches!(
            a.reshape([5, 2]),
            Err(StridedError::InvalidShape(_, _))
        ));
        let sel = a.select([Some(&[0usize, 1][..]), None]).unwrap();
        assert!(matches!(sel.reshape([8]), Err(StridedError::Unsupported(_))));
    }

    #[test]
    fn test_vectorize_column_major() {
        let a = DenseArray::from_rows(&[[1, 2], [3, 4], [5, 6]]).unwrap();
        assert_eq!(a.vectorize().to_vec(), vec![1, 3, 5, 2, 4, 6]);
    }
}
