use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use strided_dense::{multiply, BinaryOp, DenseArray, ExecutionContext, MulOptions, StridedError};

fn parallel() -> ExecutionContext {
    ExecutionContext::new(4).unwrap().with_threshold(0)
}

fn sequential() -> ExecutionContext {
    ExecutionContext::new(4).unwrap().with_threshold(usize::MAX)
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> DenseArray<f64, 2> {
    DenseArray::from_fn([rows, cols], |_| rng.gen_range(-1.0..1.0)).unwrap()
}

fn coords_2d(extents: [usize; 2]) -> Vec<[usize; 2]> {
    let mut out = Vec::new();
    for i in 0..extents[0] {
        for j in 0..extents[1] {
            out.push([i, j]);
        }
    }
    out
}

// ============================================================================
// Addressing and views
// ============================================================================

#[test]
fn test_offsets_stay_in_buffer_for_views() {
    let a = DenseArray::<f64, 3>::zeros([4, 5, 6]).unwrap();
    let views = [
        a.view(),
        a.permute([2, 0, 1]).unwrap(),
        a.flip(1).unwrap(),
        a.part([1, 1, 2], [2, 3, 3]).unwrap(),
        a.subsample([3, 2, 4]).unwrap(),
        a.select([Some(&[3usize, 0][..]), None, Some(&[5usize, 5, 1][..])]).unwrap(),
        a.flip(2).unwrap().subsample([1, 2, 2]).unwrap().part([0, 1, 1], [4, 2, 2]).unwrap(),
    ];
    for v in views.iter() {
        assert_eq!(v.size(), v.extents().iter().product::<usize>());
        let [e0, e1, e2] = *v.extents();
        for i in 0..e0 {
            for j in 0..e1 {
                for k in 0..e2 {
                    let off = v.model().offset(&[i, j, k]).unwrap();
                    assert!(off < v.buffer_len());
                }
            }
        }
    }
}

#[test]
fn test_view_involutions() {
    let a = DenseArray::from_fn([3, 4, 5], |[i, j, k]| (i * 20 + j * 5 + k) as i32).unwrap();
    let round_trip = a.permute([1, 2, 0]).unwrap().permute([2, 0, 1]).unwrap();
    assert_eq!(round_trip.to_vec(), a.to_vec());

    for axis in 0..3 {
        let twice = a.flip(axis).unwrap().flip(axis).unwrap();
        assert_eq!(twice.to_vec(), a.to_vec());
    }

    let m = a.view_slice(2).unwrap();
    assert_eq!(m.transpose().transpose().to_vec(), m.to_vec());
}

#[test]
fn test_nested_views_write_through() {
    let a = DenseArray::<i32, 2>::zeros([6, 6]).unwrap();
    let ctx = ExecutionContext::sequential();
    let inner = a
        .part([1, 1], [4, 4])
        .unwrap()
        .subsample([2, 2])
        .unwrap()
        .flip(0)
        .unwrap();
    inner.fill(&ctx, 1).unwrap();
    let (coords, _) = a.non_zeros();
    assert_eq!(coords, vec![[1, 1], [1, 3], [3, 1], [3, 3]]);
}

// ============================================================================
// Elementwise
// ============================================================================

#[test]
fn test_copy_fidelity_across_layouts() {
    for ctx in [sequential(), parallel()] {
        let src = DenseArray::from_fn([7, 9], |[i, j]| (i * 9 + j) as f64).unwrap();
        let targets = [
            DenseArray::<f64, 2>::zeros([7, 9]).unwrap(),
            DenseArray::<f64, 2>::zeros([9, 7]).unwrap().transpose(),
            DenseArray::<f64, 2>::zeros([14, 9]).unwrap().subsample([2, 1]).unwrap(),
            DenseArray::<f64, 2>::zeros([7, 9]).unwrap().flip(1).unwrap(),
        ];
        for dst in targets.iter() {
            dst.copy_from(&ctx, &src).unwrap();
            for c in coords_2d([7, 9]) {
                assert_eq!(dst.get(c).unwrap(), src.get(c).unwrap());
            }
        }
    }
}

#[test]
fn test_alias_safety_transpose_subtract() {
    for ctx in [sequential(), parallel()] {
        let n = 16;
        let a = DenseArray::from_fn([n, n], |[i, j]| (i * n + j) as i64 * 3 - 7).unwrap();
        let original = a.copy();
        a.combine_with(&ctx, &a.transpose(), BinaryOp::minus()).unwrap();
        for [i, j] in coords_2d([n, n]) {
            let expected = original.get([i, j]).unwrap() - original.get([j, i]).unwrap();
            assert_eq!(a.get([i, j]).unwrap(), expected);
        }
    }
}

#[test]
fn test_alias_safety_shifted_rows() {
    let ctx = parallel();
    let a = DenseArray::from_fn([5, 4], |[i, j]| (i * 4 + j) as i32).unwrap();
    let upper = a.part([0, 0], [4, 4]).unwrap();
    let lower = a.part([1, 0], [4, 4]).unwrap();
    lower.combine_with(&ctx, &upper, BinaryOp::plus()).unwrap();
    for [i, j] in coords_2d([4, 4]) {
        let before_lower = ((i + 1) * 4 + j) as i32;
        let before_upper = (i * 4 + j) as i32;
        assert_eq!(a.get([i + 1, j]).unwrap(), before_lower + before_upper);
    }
}

#[test]
fn test_kernels_called_from_pool_workers() {
    let ctx = ExecutionContext::default().with_threshold(0);
    let a = DenseArray::<i64, 1>::zeros([65_536]).unwrap();
    (0..400).into_par_iter().for_each(|i| {
        if i % 2 == 0 {
            a.transform(&ctx, |x| x + 1).unwrap();
        } else {
            a.sum(&ctx).unwrap();
        }
    });
    assert_eq!(a.sum(&ctx).unwrap(), 200 * 65_536);

    let m = DenseArray::from_fn([64, 64], |[i, j]| (i + j) as f64).unwrap();
    let products: Vec<f64> = (0..16)
        .into_par_iter()
        .map(|_| {
            let c = multiply(&ctx, &m, &m, None, MulOptions::new()).unwrap();
            c.get([3, 5]).unwrap()
        })
        .collect();
    let expected: f64 = (0..64).map(|k| ((3 + k) * (k + 5)) as f64).sum();
    for got in products {
        assert_relative_eq!(got, expected, epsilon = 1e-9);
    }
}

// ============================================================================
// Reductions
// ============================================================================

#[test]
fn test_reduction_consistency() {
    let mut rng = StdRng::seed_from_u64(7);
    let a = random_matrix(&mut rng, 123, 77);
    let views = [a.view(), a.transpose(), a.flip(0).unwrap().subsample([2, 3]).unwrap()];
    for v in views.iter() {
        let seq = v.aggregate(&sequential(), |x, y| x + y, |x| x).unwrap();
        let par = v.aggregate(&parallel(), |x, y| x + y, |x| x).unwrap();
        assert_relative_eq!(seq, par, epsilon = 1e-9);
    }
}

#[test]
fn test_extremum_tie_break_parallel() {
    let a = DenseArray::<i32, 2>::zeros([40, 50]).unwrap();
    let ctx = ExecutionContext::sequential();
    a.fill_at(&ctx, &[[3, 7], [21, 0], [39, 49]], 5).unwrap();
    for ctx in [sequential(), parallel()] {
        assert_eq!(a.max_location(&ctx).unwrap(), (5, [3, 7]));
        assert_eq!(a.transpose().max_location(&ctx).unwrap(), (5, [0, 21]));
        assert_eq!(a.min_location(&ctx).unwrap(), (0, [0, 0]));
    }
}

#[test]
fn test_three_by_three_scenario() {
    for ctx in [
        ExecutionContext::sequential(),
        sequential(),
        parallel(),
        ExecutionContext::new(2).unwrap().with_threshold(0),
    ] {
        let a = DenseArray::from_vec([3, 3], (1..=9).collect::<Vec<i64>>()).unwrap();
        assert_eq!(a.aggregate(&ctx, |x, y| x + y, |x| x).unwrap(), 45);
        assert_eq!(
            a.extremum_with_location(&ctx, |x, y| x > y).unwrap(),
            (9, [2, 2])
        );
        assert_eq!(a.cardinality(&ctx).unwrap(), 9);
        a.fill(&ctx, 0).unwrap();
        assert_eq!(a.cardinality(&ctx).unwrap(), 0);
    }
}

#[test]
fn test_empty_reductions() {
    let ctx = parallel();
    let a = DenseArray::<f64, 1>::zeros([0]).unwrap();
    assert!(matches!(
        a.extremum_with_location(&ctx, |x, y| x > y),
        Err(StridedError::EmptyOperand)
    ));
    assert!(matches!(
        a.aggregate(&ctx, |x, y| x + y, |x| x),
        Err(StridedError::EmptyOperand)
    ));
}

// ============================================================================
// Multiply
// ============================================================================

fn reference_product(
    a: &DenseArray<f64, 2>,
    b: &DenseArray<f64, 2>,
    c: &DenseArray<f64, 2>,
    alpha: f64,
    beta: f64,
) -> Vec<f64> {
    let [m, n] = *a.extents();
    let p = b.extents()[1];
    let mut out = Vec::with_capacity(m * p);
    for i in 0..m {
        for j in 0..p {
            let mut s = 0.0;
            for k in 0..n {
                s += a.get([i, k]).unwrap() * b.get([k, j]).unwrap();
            }
            out.push(alpha * s + beta * c.get([i, j]).unwrap());
        }
    }
    out
}

#[test]
fn test_multiply_transpose_combinations() {
    let mut rng = StdRng::seed_from_u64(42);
    let (m, n, p) = (13, 9, 11);
    for ctx in [ExecutionContext::sequential(), ExecutionContext::new(4).unwrap()] {
        for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
            let a = if ta { random_matrix(&mut rng, n, m) } else { random_matrix(&mut rng, m, n) };
            let b = if tb { random_matrix(&mut rng, p, n) } else { random_matrix(&mut rng, n, p) };
            let c = random_matrix(&mut rng, m, p);
            let op_a = if ta { a.transpose() } else { a.view() };
            let op_b = if tb { b.transpose() } else { b.view() };
            let expected = reference_product(&op_a, &op_b, &c, 1.5, -0.5);

            let opts = MulOptions::new()
                .alpha(1.5)
                .beta(-0.5)
                .transpose_a(ta)
                .transpose_b(tb);
            multiply(&ctx, &a, &b, Some(&c), opts).unwrap();
            for (got, want) in c.to_vec().into_iter().zip(expected) {
                assert_relative_eq!(got, want, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_multiply_large_parallel_matches_reference() {
    let mut rng = StdRng::seed_from_u64(3);
    let a = random_matrix(&mut rng, 70, 65);
    let b = random_matrix(&mut rng, 65, 90);
    let zeros = DenseArray::<f64, 2>::zeros([70, 90]).unwrap();
    let expected = reference_product(&a, &b, &zeros, 1.0, 0.0);
    let c = multiply(&ExecutionContext::new(4).unwrap(), &a, &b, None, MulOptions::new()).unwrap();
    for (got, want) in c.to_vec().into_iter().zip(expected) {
        assert_relative_eq!(got, want, epsilon = 1e-10);
    }
}

#[test]
fn test_multiply_into_strided_result() {
    let mut rng = StdRng::seed_from_u64(11);
    let a = random_matrix(&mut rng, 6, 4);
    let b = random_matrix(&mut rng, 4, 5);
    let big = DenseArray::<f64, 2>::zeros([12, 15]).unwrap();
    let c = big.subsample([2, 3]).unwrap().flip(0).unwrap();
    let zeros = DenseArray::<f64, 2>::zeros([6, 5]).unwrap();
    let expected = reference_product(&a, &b, &zeros, 1.0, 0.0);

    multiply(&ExecutionContext::sequential(), &a, &b, Some(&c), MulOptions::new()).unwrap();
    for (got, want) in c.to_vec().into_iter().zip(expected) {
        assert_relative_eq!(got, want, epsilon = 1e-12);
    }
    assert_eq!(big.cardinality(&ExecutionContext::sequential()).unwrap(), 30);
}
