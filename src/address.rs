//! The strided addressing model.
//!
//! An [`AddressModel`] maps a logical coordinate `(i0, .., iN-1)` to a physical
//! offset in a flat buffer:
//!
//! ```text
//! Linear:  zero + Σ strides[d] * i[d]
//! Indexed: zero + Σ tables[d][starts[d] + i[d] * steps[d]]
//! ```
//!
//! View operations never chain lookups through a parent model: they compose
//! the requested transform into fresh strides/starts/steps so that every
//! address costs the same regardless of how many views were stacked.

use std::sync::Arc;

use crate::{Result, StridedError};

/// Compute row-major strides (C default: last index varies fastest).
pub fn row_major_strides<const N: usize>(extents: &[usize; N]) -> [isize; N] {
    let mut strides = [1isize; N];
    for i in (0..N.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * extents[i + 1] as isize;
    }
    strides
}

/// Only 1-, 2- and 3-dimensional arrays are supported.
pub(crate) fn check_rank<const N: usize>() -> Result<()> {
    if N == 0 || N > 3 {
        return Err(StridedError::Unsupported("rank must be 1, 2 or 3"));
    }
    Ok(())
}

/// Validate that all accessed offsets stay within `[0, len)`.
fn validate_bounds(len: usize, extents: &[usize], strides: &[isize], zero: isize) -> Result<()> {
    // Empty array - no access needed
    if extents.iter().any(|&d| d == 0) {
        return Ok(());
    }
    let mut min_offset = zero;
    let mut max_offset = zero;
    for (&dim, &stride) in extents.iter().zip(strides.iter()) {
        if dim > 1 {
            let end = stride
                .checked_mul(dim as isize - 1)
                .ok_or(StridedError::OffsetOutOfBounds)?;
            if end >= 0 {
                max_offset = max_offset
                    .checked_add(end)
                    .ok_or(StridedError::OffsetOutOfBounds)?;
            } else {
                min_offset = min_offset
                    .checked_add(end)
                    .ok_or(StridedError::OffsetOutOfBounds)?;
            }
        }
    }
    if min_offset < 0 || max_offset < 0 || max_offset as usize >= len {
        return Err(StridedError::OffsetOutOfBounds);
    }
    Ok(())
}

/// How coordinates along each axis turn into buffer offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing<const N: usize> {
    /// Uniform stride per axis. Strides may be negative or zero.
    Linear { strides: [isize; N] },
    /// Per-axis offset tables (selection views). The offset contributed by
    /// axis `d` at coordinate `i` is `tables[d][starts[d] + i * steps[d]]`.
    Indexed {
        tables: [Arc<[isize]>; N],
        starts: [isize; N],
        steps: [isize; N],
    },
}

/// Extents, zero offset and addressing strategy of one array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressModel<const N: usize> {
    extents: [usize; N],
    zero: isize,
    addressing: Addressing<N>,
}

impl<const N: usize> AddressModel<N> {
    /// Canonical row-major model with zero offset.
    pub fn row_major(extents: [usize; N]) -> Result<Self> {
        check_rank::<N>()?;
        Ok(Self::contiguous(extents))
    }

    /// Row-major model for a rank already known to be supported.
    pub(crate) fn contiguous(extents: [usize; N]) -> Self {
        Self {
            extents,
            zero: 0,
            addressing: Addressing::Linear {
                strides: row_major_strides(&extents),
            },
        }
    }

    /// Linear model with explicit strides, validated against a buffer length.
    ///
    /// # Errors
    /// Returns [`StridedError::OffsetOutOfBounds`] if any valid coordinate
    /// would map outside `[0, buffer_len)`.
    pub fn linear(
        extents: [usize; N],
        strides: [isize; N],
        zero: isize,
        buffer_len: usize,
    ) -> Result<Self> {
        check_rank::<N>()?;
        validate_bounds(buffer_len, &extents, &strides, zero)?;
        Ok(Self {
            extents,
            zero,
            addressing: Addressing::Linear { strides },
        })
    }

    #[inline]
    pub fn extents(&self) -> &[usize; N] {
        &self.extents
    }

    #[inline]
    pub fn zero(&self) -> isize {
        self.zero
    }

    #[inline]
    pub fn addressing(&self) -> &Addressing<N> {
        &self.addressing
    }

    /// Total number of addressable elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.extents.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extents.contains(&0)
    }

    /// Strides, if this model uses linear addressing.
    #[inline]
    pub fn strides(&self) -> Option<&[isize; N]> {
        match &self.addressing {
            Addressing::Linear { strides } => Some(strides),
            Addressing::Indexed { .. } => None,
        }
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        matches!(self.addressing, Addressing::Linear { .. })
    }

    /// Check if the model walks the buffer contiguously in row-major order.
    pub fn is_row_major_contiguous(&self) -> bool {
        let Some(strides) = self.strides() else {
            return false;
        };
        let mut expected = 1isize;
        for i in (0..N).rev() {
            if self.extents[i] <= 1 {
                continue;
            }
            if strides[i] != expected {
                return false;
            }
            expected *= self.extents[i] as isize;
        }
        true
    }

    /// Offset contributed by `axis` at coordinate `index`.
    ///
    /// This is the single addressing formula; the quick and checked paths,
    /// the kernels and the view operations all go through it.
    #[inline(always)]
    pub(crate) fn axis_offset(&self, axis: usize, index: usize) -> isize {
        match &self.addressing {
            Addressing::Linear { strides } => strides[axis] * index as isize,
            Addressing::Indexed {
                tables,
                starts,
                steps,
            } => tables[axis][(starts[axis] + steps[axis] * index as isize) as usize],
        }
    }

    /// Physical offset of `index` without validating the coordinates.
    ///
    /// The caller must guarantee `index[d] < extents[d]` for every axis.
    #[inline]
    pub fn offset_quick(&self, index: &[usize; N]) -> isize {
        let mut offset = self.zero;
        for (axis, &i) in index.iter().enumerate() {
            offset += self.axis_offset(axis, i);
        }
        offset
    }

    /// Physical offset of `index`, validating every coordinate first.
    pub fn offset(&self, index: &[usize; N]) -> Result<usize> {
        self.check_index(index)?;
        Ok(self.offset_quick(index) as usize)
    }

    pub(crate) fn check_index(&self, index: &[usize; N]) -> Result<()> {
        for (axis, (&i, &extent)) in index.iter().zip(self.extents.iter()).enumerate() {
            if i >= extent {
                return Err(StridedError::OutOfRange {
                    axis,
                    index: i,
                    extent,
                });
            }
        }
        Ok(())
    }

    /// Coordinate of the `pos`-th element in row-major scan order.
    pub(crate) fn unravel(&self, pos: usize) -> [usize; N] {
        let mut coord = [0usize; N];
        let mut rem = pos;
        for d in (0..N).rev() {
            let extent = self.extents[d];
            if extent > 0 {
                coord[d] = rem % extent;
                rem /= extent;
            }
        }
        coord
    }

    /// Offset of the line through `coord` at innermost index 0.
    #[inline]
    pub(crate) fn line_base(&self, coord: &[usize; N]) -> isize {
        let mut offset = self.zero;
        for (axis, &i) in coord.iter().enumerate().take(N.saturating_sub(1)) {
            offset += self.axis_offset(axis, i);
        }
        offset
    }

    /// Whether distinct coordinates are guaranteed to map to distinct offsets.
    ///
    /// Sufficient test: with axes ordered by the smallest gap between the
    /// offsets they contribute, each axis's gap must exceed the combined span
    /// of all axes ordered before it. Zero strides and repeated selection
    /// entries fail the test.
    pub(crate) fn is_injective(&self) -> bool {
        let mut axes: Vec<(isize, isize)> = Vec::with_capacity(N);
        for axis in 0..N {
            let extent = self.extents[axis];
            if extent <= 1 {
                continue;
            }
            let (gap, span) = match &self.addressing {
                Addressing::Linear { strides } => {
                    let s = strides[axis].abs();
                    (s, s * (extent as isize - 1))
                }
                Addressing::Indexed { .. } => {
                    let mut offsets: Vec<isize> =
                        (0..extent).map(|i| self.axis_offset(axis, i)).collect();
                    offsets.sort_unstable();
                    let gap = offsets.windows(2).map(|w| w[1] - w[0]).min().unwrap_or(0);
                    (gap, offsets[extent - 1] - offsets[0])
                }
            };
            if gap == 0 {
                return false;
            }
            axes.push((gap, span));
        }
        axes.sort_unstable();
        let mut covered = 0isize;
        for (gap, span) in axes {
            if gap <= covered {
                return false;
            }
            covered += span;
        }
        true
    }

    fn check_axis(axis: usize) -> Result<()> {
        if axis >= N {
            return Err(StridedError::InvalidAxis { axis, rank: N });
        }
        Ok(())
    }

    // ========================================================================
    // View transforms
    // ========================================================================

    /// Reorder axes: new axis `i` is old axis `perm[i]`.
    pub fn permute(&self, perm: [usize; N]) -> Result<Self> {
        let mut seen = [false; N];
        for &p in perm.iter() {
            if p >= N || seen[p] {
                return Err(StridedError::InvalidPermutation(perm.to_vec()));
            }
            seen[p] = true;
        }
        Ok(self.permuted(perm))
    }

    /// `permute` for a permutation already known to be valid.
    pub(crate) fn permuted(&self, perm: [usize; N]) -> Self {
        let extents = std::array::from_fn(|i| self.extents[perm[i]]);
        let addressing = match &self.addressing {
            Addressing::Linear { strides } => Addressing::Linear {
                strides: std::array::from_fn(|i| strides[perm[i]]),
            },
            Addressing::Indexed {
                tables,
                starts,
                steps,
            } => Addressing::Indexed {
                tables: std::array::from_fn(|i| tables[perm[i]].clone()),
                starts: std::array::from_fn(|i| starts[perm[i]]),
                steps: std::array::from_fn(|i| steps[perm[i]]),
            },
        };
        Self {
            extents,
            zero: self.zero,
            addressing,
        }
    }

    /// Reverse `axis`: index 0 maps to the former last element.
    pub fn flip(&self, axis: usize) -> Result<Self> {
        Self::check_axis(axis)?;
        let last = self.extents[axis].saturating_sub(1) as isize;
        let mut out = self.clone();
        match &mut out.addressing {
            Addressing::Linear { strides } => {
                out.zero += strides[axis] * last;
                strides[axis] = -strides[axis];
            }
            Addressing::Indexed { starts, steps, .. } => {
                starts[axis] += steps[axis] * last;
                steps[axis] = -steps[axis];
            }
        }
        Ok(out)
    }

    /// Box `[origin, origin + lengths)` of this model.
    pub fn part(&self, origin: [usize; N], lengths: [usize; N]) -> Result<Self> {
        for axis in 0..N {
            let end = origin[axis].saturating_add(lengths[axis]);
            if end > self.extents[axis] {
                return Err(StridedError::OutOfRange {
                    axis,
                    index: end,
                    extent: self.extents[axis],
                });
            }
        }
        let mut out = self.clone();
        out.extents = lengths;
        match &mut out.addressing {
            Addressing::Linear { strides } => {
                for axis in 0..N {
                    out.zero += strides[axis] * origin[axis] as isize;
                }
            }
            Addressing::Indexed { starts, steps, .. } => {
                for axis in 0..N {
                    starts[axis] += steps[axis] * origin[axis] as isize;
                }
            }
        }
        Ok(out)
    }

    /// Keep every `factors[d]`-th coordinate along each axis.
    ///
    /// The new extent is `ceil(extent / factor)`.
    pub fn subsample(&self, factors: [usize; N]) -> Result<Self> {
        if let Some(axis) = factors.iter().position(|&f| f == 0) {
            return Err(StridedError::InvalidStride { axis });
        }
        let mut out = self.clone();
        for axis in 0..N {
            let extent = self.extents[axis];
            out.extents[axis] = if extent == 0 {
                0
            } else {
                (extent - 1) / factors[axis] + 1
            };
        }
        match &mut out.addressing {
            Addressing::Linear { strides } => {
                for axis in 0..N {
                    strides[axis] *= factors[axis] as isize;
                }
            }
            Addressing::Indexed { steps, .. } => {
                for axis in 0..N {
                    steps[axis] *= factors[axis] as isize;
                }
            }
        }
        Ok(out)
    }

    /// Selection model over explicit per-axis coordinates.
    ///
    /// `None` keeps the whole axis. The offset tables are resolved against
    /// this model once, so selecting from a selection stays a single lookup.
    pub fn select(&self, indices: [Option<&[usize]>; N]) -> Result<Self> {
        let mut extents = [0usize; N];
        let mut tables: Vec<Arc<[isize]>> = Vec::with_capacity(N);
        for (axis, selection) in indices.iter().enumerate() {
            let extent = self.extents[axis];
            let table: Arc<[isize]> = match selection {
                Some(list) => {
                    let mut table = Vec::with_capacity(list.len());
                    for &i in list.iter() {
                        if i >= extent {
                            return Err(StridedError::OutOfRange {
                                axis,
                                index: i,
                                extent,
                            });
                        }
                        table.push(self.axis_offset(axis, i));
                    }
                    table.into()
                }
                None => (0..extent).map(|i| self.axis_offset(axis, i)).collect(),
            };
            extents[axis] = table.len();
            tables.push(table);
        }
        Ok(Self {
            extents,
            zero: self.zero,
            addressing: Addressing::Indexed {
                tables: std::array::from_fn(|axis| tables[axis].clone()),
                starts: [0; N],
                steps: [1; N],
            },
        })
    }

    /// Fix `axis` at `index`, dropping it from the model.
    pub(crate) fn fix_axis<const M: usize>(
        &self,
        axis: usize,
        index: usize,
    ) -> Result<AddressModel<M>> {
        if M + 1 != N {
            return Err(StridedError::Unsupported("fixed-axis view must drop exactly one axis"));
        }
        Self::check_axis(axis)?;
        let extent = self.extents[axis];
        if index >= extent {
            return Err(StridedError::OutOfRange {
                axis,
                index,
                extent,
            });
        }
        let keep = |k: usize| if k < axis { k } else { k + 1 };
        let addressing = match &self.addressing {
            Addressing::Linear { strides } => Addressing::Linear {
                strides: std::array::from_fn(|k| strides[keep(k)]),
            },
            Addressing::Indexed {
                tables,
                starts,
                steps,
            } => Addressing::Indexed {
                tables: std::array::from_fn(|k| tables[keep(k)].clone()),
                starts: std::array::from_fn(|k| starts[keep(k)]),
                steps: std::array::from_fn(|k| steps[keep(k)]),
            },
        };
        Ok(AddressModel {
            extents: std::array::from_fn(|k| self.extents[keep(k)]),
            zero: self.zero + self.axis_offset(axis, index),
            addressing,
        })
    }

    /// Linear model with the given extents and strides over the same origin.
    pub(crate) fn relinearize<const M: usize>(&self, extents: [usize; M]) -> AddressModel<M> {
        AddressModel {
            extents,
            zero: self.zero,
            addressing: Addressing::Linear {
                strides: row_major_strides(&extents),
            },
        }
    }
}
