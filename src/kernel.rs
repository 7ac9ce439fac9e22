//! Row-major offset walkers shared by the elementwise and reduction engines.
//!
//! A walker visits the elements of a contiguous range of row-major positions
//! and hands each one's coordinate and physical offset to a closure. The
//! addressing strategy of the innermost axis is resolved once per call, so
//! the inner loop is either a stride multiply or a single table lookup.

use std::ops::Range;

use crate::address::{AddressModel, Addressing};

/// Innermost-axis addressing, resolved outside the loop.
#[derive(Clone, Copy)]
enum InnerAxis<'a> {
    Stride(isize),
    Table {
        table: &'a [isize],
        start: isize,
        step: isize,
    },
}

impl<'a> InnerAxis<'a> {
    fn of<const N: usize>(model: &'a AddressModel<N>) -> Self {
        let last = N - 1;
        match model.addressing() {
            Addressing::Linear { strides } => InnerAxis::Stride(strides[last]),
            Addressing::Indexed {
                tables,
                starts,
                steps,
            } => InnerAxis::Table {
                table: &tables[last],
                start: starts[last],
                step: steps[last],
            },
        }
    }
}

/// Advance the outer axes of `coord` by one line (carry from `N-2` down to 0).
#[inline]
fn next_line<const N: usize>(coord: &mut [usize; N], extents: &[usize; N]) {
    coord[N - 1] = 0;
    for d in (0..N - 1).rev() {
        coord[d] += 1;
        if coord[d] < extents[d] {
            return;
        }
        coord[d] = 0;
    }
}

/// Visit positions `range` of `model` in row-major order.
///
/// `f` receives `(position, coordinate, offset)`.
pub(crate) fn for_each_offset<const N: usize, F>(
    model: &AddressModel<N>,
    range: Range<usize>,
    mut f: F,
) where
    F: FnMut(usize, &[usize; N], isize),
{
    if range.is_empty() {
        return;
    }
    let extents = model.extents();
    let last = N - 1;
    let inner = InnerAxis::of(model);
    let mut coord = model.unravel(range.start);
    let mut pos = range.start;

    while pos < range.end {
        let base = model.line_base(&coord);
        let j0 = coord[last];
        let j1 = extents[last].min(j0 + (range.end - pos));
        match inner {
            InnerAxis::Stride(s) => {
                for j in j0..j1 {
                    coord[last] = j;
                    f(pos, &coord, base + s * j as isize);
                    pos += 1;
                }
            }
            InnerAxis::Table { table, start, step } => {
                for j in j0..j1 {
                    coord[last] = j;
                    f(pos, &coord, base + table[(start + step * j as isize) as usize]);
                    pos += 1;
                }
            }
        }
        next_line(&mut coord, extents);
    }
}

/// Visit positions `range` of two same-extent models in lockstep.
///
/// `f` receives `(position, coordinate, offset_a, offset_b)`.
pub(crate) fn for_each_offset_pair<const N: usize, F>(
    a: &AddressModel<N>,
    b: &AddressModel<N>,
    range: Range<usize>,
    mut f: F,
) where
    F: FnMut(usize, &[usize; N], isize, isize),
{
    debug_assert_eq!(a.extents(), b.extents());
    if range.is_empty() {
        return;
    }
    let extents = a.extents();
    let last = N - 1;
    let inner_a = InnerAxis::of(a);
    let inner_b = InnerAxis::of(b);
    let mut coord = a.unravel(range.start);
    let mut pos = range.start;

    while pos < range.end {
        let base_a = a.line_base(&coord);
        let base_b = b.line_base(&coord);
        let j0 = coord[last];
        let j1 = extents[last].min(j0 + (range.end - pos));
        match (inner_a, inner_b) {
            (InnerAxis::Stride(sa), InnerAxis::Stride(sb)) => {
                for j in j0..j1 {
                    coord[last] = j;
                    let j = j as isize;
                    f(pos, &coord, base_a + sa * j, base_b + sb * j);
                    pos += 1;
                }
            }
            _ => {
                for j in j0..j1 {
                    coord[last] = j;
                    f(
                        pos,
                        &coord,
                        base_a + a.axis_offset(last, j),
                        base_b + b.axis_offset(last, j),
                    );
                    pos += 1;
                }
            }
        }
        next_line(&mut coord, extents);
    }
}
