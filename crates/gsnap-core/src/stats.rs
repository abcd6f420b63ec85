use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{GsnapError, Result};

/// Per-pixel median across a stack of same-shaped arrays.
///
/// Uses `select_nth_unstable` for O(n) selection without a full sort.
/// Parallelizes at the row level for large images.
pub fn stack_median(stack: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = stack.first().ok_or(GsnapError::EmptySequence)?;
    let (h, w) = first.dim();
    check_shapes(stack, (h, w))?;
    let n = stack.len();

    let mut median = Array2::<f32>::zeros((h, w));

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut values = vec![0.0f32; n];
                let mut med_row = vec![0.0f32; w];
                for col in 0..w {
                    for (i, frame) in stack.iter().enumerate() {
                        values[i] = frame[[row, col]];
                    }
                    med_row[col] = median_of(&mut values);
                }
                med_row
            })
            .collect();

        for (row, med_row) in rows.into_iter().enumerate() {
            for (col, m) in med_row.into_iter().enumerate() {
                median[[row, col]] = m;
            }
        }
    } else {
        let mut values = vec![0.0f32; n];
        for row in 0..h {
            for col in 0..w {
                for (i, frame) in stack.iter().enumerate() {
                    values[i] = frame[[row, col]];
                }
                median[[row, col]] = median_of(&mut values);
            }
        }
    }

    Ok(median)
}

/// Per-pixel median and median absolute deviation about that median,
/// computed across the stack dimension.
///
/// A single-element stack gives MAD = 0. Results do not depend on the
/// order of the input arrays.
pub fn stack_median_mad(stack: &[Array2<f32>]) -> Result<(Array2<f32>, Array2<f32>)> {
    let first = stack.first().ok_or(GsnapError::EmptySequence)?;
    let (h, w) = first.dim();
    check_shapes(stack, (h, w))?;
    let n = stack.len();

    let mut median = Array2::<f32>::zeros((h, w));
    let mut mad = Array2::<f32>::zeros((h, w));

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        // Row-parallel: each row allocates its own pixel buffer.
        let rows: Vec<(Vec<f32>, Vec<f32>)> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut values = vec![0.0f32; n];
                let mut med_row = vec![0.0f32; w];
                let mut mad_row = vec![0.0f32; w];
                for col in 0..w {
                    for (i, frame) in stack.iter().enumerate() {
                        values[i] = frame[[row, col]];
                    }
                    let (m, d) = median_mad_of(&mut values);
                    med_row[col] = m;
                    mad_row[col] = d;
                }
                (med_row, mad_row)
            })
            .collect();

        for (row, (med_row, mad_row)) in rows.into_iter().enumerate() {
            for (col, (m, d)) in med_row.into_iter().zip(mad_row).enumerate() {
                median[[row, col]] = m;
                mad[[row, col]] = d;
            }
        }
    } else {
        let mut values = vec![0.0f32; n];
        for row in 0..h {
            for col in 0..w {
                for (i, frame) in stack.iter().enumerate() {
                    values[i] = frame[[row, col]];
                }
                let (m, d) = median_mad_of(&mut values);
                median[[row, col]] = m;
                mad[[row, col]] = d;
            }
        }
    }

    Ok((median, mad))
}

/// Per-pixel mean across a stack, accumulated in f64 to avoid drift.
pub fn stack_mean(stack: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = stack.first().ok_or(GsnapError::EmptySequence)?;
    let (h, w) = first.dim();
    check_shapes(stack, (h, w))?;

    let mut sum = Array2::<f64>::zeros((h, w));
    for frame in stack {
        for (acc, &v) in sum.iter_mut().zip(frame.iter()) {
            *acc += v as f64;
        }
    }
    let n = stack.len() as f64;
    Ok(sum.mapv(|v| (v / n) as f32))
}

/// Median of a scalar sample, optionally restricted by a keep-mask.
///
/// Returns `None` when no values survive the mask.
pub fn masked_median(data: &Array2<f32>, good: Option<&Array2<bool>>) -> Option<f32> {
    let mut values: Vec<f32> = match good {
        Some(mask) => data
            .iter()
            .zip(mask.iter())
            .filter(|(_, &keep)| keep)
            .map(|(&v, _)| v)
            .collect(),
        None => data.iter().copied().collect(),
    };
    if values.is_empty() {
        return None;
    }
    Some(median_of(&mut values))
}

/// Median of a mutable sample (the slice is reordered in place).
pub fn median_of(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 1 {
        values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        let mid = n / 2;
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (values[mid - 1] + values[mid]) / 2.0
    }
}

fn median_mad_of(values: &mut [f32]) -> (f32, f32) {
    let med = median_of(values);
    // Reuse the buffer for the absolute deviations.
    for v in values.iter_mut() {
        *v = (*v - med).abs();
    }
    let mad = median_of(values);
    (med, mad)
}

fn check_shapes(stack: &[Array2<f32>], expected: (usize, usize)) -> Result<()> {
    for frame in stack {
        if frame.dim() != expected {
            return Err(GsnapError::shape_mismatch(expected, frame.dim()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn median_of_odd_and_even() {
        let mut odd = [3.0f32, 1.0, 2.0];
        assert_eq!(median_of(&mut odd), 2.0);
        let mut even = [4.0f32, 1.0, 3.0, 2.0];
        assert_eq!(median_of(&mut even), 2.5);
        let mut single = [7.0f32];
        assert_eq!(median_of(&mut single), 7.0);
    }

    #[test]
    fn median_mad_basic() {
        let mut values = [1.0f32, 1.0, 1.0, 1.0, 100.0];
        let (med, mad) = median_mad_of(&mut values);
        assert_eq!(med, 1.0);
        assert_eq!(mad, 0.0);

        let mut spread = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let (med, mad) = median_mad_of(&mut spread);
        assert_eq!(med, 3.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn stack_median_mad_single_frame_is_zero_mad() {
        let stack = vec![arr2(&[[1.0f32, 2.0], [3.0, 4.0]])];
        let (med, mad) = stack_median_mad(&stack).unwrap();
        assert_eq!(med, stack[0]);
        assert!(mad.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn stack_median_order_independent() {
        let a = arr2(&[[1.0f32]]);
        let b = arr2(&[[5.0f32]]);
        let c = arr2(&[[3.0f32]]);
        let m1 = stack_median(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let m2 = stack_median(&[c, a, b]).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(m1[[0, 0]], 3.0);
    }

    #[test]
    fn stack_empty_errors() {
        assert!(matches!(
            stack_median(&[]),
            Err(GsnapError::EmptySequence)
        ));
        assert!(matches!(stack_mean(&[]), Err(GsnapError::EmptySequence)));
    }

    #[test]
    fn masked_median_skips_flagged() {
        let data = arr2(&[[1.0f32, 100.0], [2.0, 3.0]]);
        let good = arr2(&[[true, false], [true, true]]);
        assert_eq!(masked_median(&data, Some(&good)), Some(2.0));
        let none = arr2(&[[false, false], [false, false]]);
        assert_eq!(masked_median(&data, Some(&none)), None);
    }
}
