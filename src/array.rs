//! The dense array entity: allocation and element access.

use crate::address::{check_rank, AddressModel};
use crate::buffer::SharedBuffer;
use crate::element::Element;
use crate::kernel::for_each_offset;
use crate::{Result, StridedError};

/// A 1-, 2- or 3-dimensional strided window onto a shared buffer.
///
/// Arrays created by allocation own a fresh row-major buffer; arrays created
/// by view operations share the buffer of their source. There is no `Clone`:
/// [`view`](Self::view) makes another handle onto the same cells and
/// [`copy`](Self::copy) makes an independent deep copy.
///
/// Mutating operations take `&self`. Each call locks the buffer for the
/// duration of the call, so concurrent calls on views of the same buffer are
/// serialized rather than racing. Calls made from inside a rayon worker run
/// on that worker without splitting further. Closures passed to a mutating
/// call must not access the array being written.
///
/// A parallel call from outside the pool waits on pool workers while it holds
/// its locks. Pool jobs that lock the same buffer at that moment should run on
/// a different pool than the context's.
pub struct DenseArray<T, const N: usize> {
    pub(crate) buffer: SharedBuffer<T>,
    pub(crate) model: AddressModel<N>,
    pub(crate) owns_contiguous: bool,
}

impl<T, const N: usize> std::fmt::Debug for DenseArray<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseArray")
            .field("extents", self.model.extents())
            .field("zero", &self.model.zero())
            .field("linear", &self.model.is_linear())
            .field("owns_contiguous", &self.owns_contiguous)
            .finish()
    }
}

// ============================================================================
// Construction
// ============================================================================

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Fresh row-major allocation; `data.len()` must equal the model size.
    pub(crate) fn contiguous(extents: [usize; N], data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), extents.iter().product::<usize>());
        Self {
            buffer: SharedBuffer::new(data),
            model: AddressModel::contiguous(extents),
            owns_contiguous: true,
        }
    }

    /// A new handle with `model` over this array's buffer.
    pub(crate) fn with_model<const M: usize>(&self, model: AddressModel<M>) -> DenseArray<T, M> {
        DenseArray {
            buffer: self.buffer.clone(),
            model,
            owns_contiguous: false,
        }
    }

    /// Allocate an array with every element set to `value`.
    pub fn filled(extents: [usize; N], value: T) -> Result<Self> {
        check_rank::<N>()?;
        let size = extents.iter().product();
        Ok(Self::contiguous(extents, vec![value; size]))
    }

    /// Allocate a zero-initialized array.
    pub fn zeros(extents: [usize; N]) -> Result<Self>
    where
        T: num_traits::Zero,
    {
        Self::filled(extents, T::zero())
    }

    /// Wrap row-major `data`.
    ///
    /// # Errors
    /// [`StridedError::InvalidShape`] if `data.len()` is not the product of
    /// `extents`.
    pub fn from_vec(extents: [usize; N], data: Vec<T>) -> Result<Self> {
        check_rank::<N>()?;
        let size: usize = extents.iter().product();
        if data.len() != size {
            return Err(StridedError::InvalidShape(vec![data.len()], vec![size]));
        }
        Ok(Self::contiguous(extents, data))
    }

    /// Allocate an array whose element at each coordinate is `f(coord)`.
    pub fn from_fn<F>(extents: [usize; N], mut f: F) -> Result<Self>
    where
        F: FnMut([usize; N]) -> T,
    {
        check_rank::<N>()?;
        let model = AddressModel::contiguous(extents);
        let mut data = Vec::with_capacity(model.size());
        for_each_offset(&model, 0..model.size(), |_, coord, _| data.push(f(*coord)));
        Ok(Self::contiguous(extents, data))
    }

    /// Interpret `data` through explicit strides and zero offset.
    ///
    /// The result counts as owning a contiguous buffer only when the layout
    /// is the canonical row-major one over exactly `data`.
    ///
    /// # Errors
    /// [`StridedError::OffsetOutOfBounds`] if any coordinate would address
    /// outside `data`.
    pub fn from_parts(
        data: Vec<T>,
        extents: [usize; N],
        strides: [isize; N],
        zero: isize,
    ) -> Result<Self> {
        let model = AddressModel::linear(extents, strides, zero, data.len())?;
        let owns_contiguous = zero == 0
            && data.len() == model.size()
            && strides == crate::row_major_strides(&extents);
        Ok(Self {
            buffer: SharedBuffer::new(data),
            model,
            owns_contiguous,
        })
    }
}

impl<T: Element> DenseArray<T, 2> {
    /// Build a matrix from equally long rows.
    ///
    /// # Errors
    /// [`StridedError::InvalidShape`] if the rows are ragged.
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self> {
        let columns = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * columns);
        for row in rows {
            let row = row.as_ref();
            if row.len() != columns {
                return Err(StridedError::InvalidShape(vec![row.len()], vec![columns]));
            }
            data.extend_from_slice(row);
        }
        Ok(Self::contiguous([rows.len(), columns], data))
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl<T, const N: usize> DenseArray<T, N> {
    #[inline]
    pub fn extents(&self) -> &[usize; N] {
        self.model.extents()
    }

    /// Number of elements, `product(extents)`.
    #[inline]
    pub fn size(&self) -> usize {
        self.model.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }

    #[inline]
    pub fn model(&self) -> &AddressModel<N> {
        &self.model
    }

    /// Whether this array was allocated with a canonical row-major layout
    /// over its whole buffer. Views always report `false`.
    #[inline]
    pub fn owns_contiguous_buffer(&self) -> bool {
        self.owns_contiguous
    }

    /// Length of the backing buffer (may exceed `size()` for views).
    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether this array may address cells of `other`.
    #[inline]
    pub fn may_share_cells<const M: usize>(&self, other: &DenseArray<T, M>) -> bool {
        crate::alias::may_share_cells(self, other)
    }

    pub(crate) fn check_same_extents<U, const M: usize>(
        &self,
        other: &DenseArray<U, M>,
    ) -> Result<()> {
        if self.extents()[..] != other.extents()[..] {
            return Err(StridedError::InvalidShape(
                other.extents().to_vec(),
                self.extents().to_vec(),
            ));
        }
        Ok(())
    }

    /// Validate `coords` and resolve them to buffer offsets.
    pub(crate) fn resolve(&self, coords: &[[usize; N]]) -> Result<Vec<isize>> {
        coords
            .iter()
            .map(|c| {
                self.model.check_index(c)?;
                Ok(self.model.offset_quick(c))
            })
            .collect()
    }
}

impl<T: Element, const N: usize> DenseArray<T, N> {
    /// Element at `index`.
    ///
    /// # Errors
    /// [`StridedError::OutOfRange`] if any coordinate exceeds its extent.
    pub fn get(&self, index: [usize; N]) -> Result<T> {
        let offset = self.model.offset(&index)?;
        Ok(self.buffer.read()[offset])
    }

    /// Element at `index` without coordinate validation.
    ///
    /// The caller guarantees `index[d] < extents[d]`. An invalid coordinate
    /// yields an unspecified element of the buffer or panics; it never reads
    /// outside the buffer.
    #[inline]
    pub fn get_quick(&self, index: [usize; N]) -> T {
        self.buffer.read()[self.model.offset_quick(&index) as usize]
    }

    /// Overwrite the element at `index`.
    ///
    /// # Errors
    /// [`StridedError::OutOfRange`] if any coordinate exceeds its extent.
    pub fn set(&self, index: [usize; N], value: T) -> Result<()> {
        let offset = self.model.offset(&index)?;
        self.buffer.write()[offset] = value;
        Ok(())
    }

    /// Overwrite the element at `index` without coordinate validation.
    #[inline]
    pub fn set_quick(&self, index: [usize; N], value: T) {
        self.buffer.write()[self.model.offset_quick(&index) as usize] = value;
    }

    /// Elements in row-major scan order.
    pub fn to_vec(&self) -> Vec<T> {
        let cells = self.buffer.read();
        if self.owns_contiguous {
            return cells[..self.size()].to_vec();
        }
        let mut out = Vec::with_capacity(self.size());
        for_each_offset(&self.model, 0..self.size(), |_, _, off| out.push(cells[off as usize]));
        out
    }

    /// Deep copy into a fresh contiguous allocation.
    pub fn copy(&self) -> Self {
        Self::contiguous(*self.extents(), self.to_vec())
    }

    /// Another handle onto the same cells.
    pub fn view(&self) -> Self {
        self.with_model(self.model.clone())
    }

    /// A zero-initialized array with the same extents.
    pub fn like(&self) -> Self
    where
        T: num_traits::Zero,
    {
        let size = self.size();
        Self::contiguous(*self.extents(), vec![T::zero(); size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_and_get() {
        let a = DenseArray::from_vec([2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(a.extents(), &[2, 3]);
        assert_eq!(a.size(), 6);
        assert!(a.owns_contiguous_buffer());
        assert_eq!(a.get([1, 0]).unwrap(), 4);
        assert_eq!(a.get_quick([0, 2]), 3);
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let err = DenseArray::from_vec([2, 3], vec![0.0f64; 5]).unwrap_err();
        assert!(matches!(err, StridedError::InvalidShape(_, _)));
    }

    #[test]
    fn test_unsupported_rank() {
        let err = DenseArray::<f64, 4>::zeros([1, 1, 1, 1]).unwrap_err();
        assert!(matches!(err, StridedError::Unsupported(_)));
    }

    #[test]
    fn test_set_checked_and_quick() {
        let a = DenseArray::<i32, 2>::zeros([2, 2]).unwrap();
        a.set([0, 1], 7).unwrap();
        a.set_quick([1, 0], 9);
        assert_eq!(a.to_vec(), vec![0, 7, 9, 0]);
        assert!(matches!(
            a.set([2, 0], 1),
            Err(StridedError::OutOfRange {
                axis: 0,
                index: 2,
                extent: 2
            })
        ));
    }

    #[test]
    fn test_from_fn_row_major() {
        let a = DenseArray::from_fn([2, 2, 2], |[i, j, k]| i * 100 + j * 10 + k).unwrap();
        assert_eq!(a.to_vec(), vec![0, 1, 10, 11, 100, 101, 110, 111]);
    }

    #[test]
    fn test_from_parts_negative_stride() {
        let a = DenseArray::from_parts(vec![1, 2, 3, 4], [4], [-1], 3).unwrap();
        assert_eq!(a.to_vec(), vec![4, 3, 2, 1]);
        assert!(!a.owns_contiguous_buffer());

        let b = DenseArray::from_parts(vec![1, 2, 3, 4], [2, 2], [2, 1], 0).unwrap();
        assert!(b.owns_contiguous_buffer());

        assert!(matches!(
            DenseArray::from_parts(vec![1, 2, 3], [4], [1], 0),
            Err(StridedError::OffsetOutOfBounds)
        ));
    }

    #[test]
    fn test_from_rows() {
        let a = DenseArray::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(a.extents(), &[2, 2]);
        assert_eq!(a.get([1, 1]).unwrap(), 4.0);

        let ragged = DenseArray::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(ragged, Err(StridedError::InvalidShape(_, _))));
    }

    #[test]
    fn test_view_shares_and_copy_detaches() {
        let a = DenseArray::<i64, 1>::zeros([3]).unwrap();
        let v = a.view();
        let c = a.copy();
        assert!(!v.owns_contiguous_buffer());
        assert!(c.owns_contiguous_buffer());

        v.set([1], 5).unwrap();
        assert_eq!(a.get([1]).unwrap(), 5);
        assert_eq!(c.get([1]).unwrap(), 0);
    }

    #[test]
    fn test_like() {
        let a = DenseArray::from_vec([2, 1], vec![3u8, 4]).unwrap();
        let z = a.like();
        assert_eq!(z.extents(), &[2, 1]);
        assert_eq!(z.to_vec(), vec![0, 0]);
        assert!(!a.may_share_cells(&z));
    }
}
