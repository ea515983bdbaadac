//src/mantel.rs

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::dissimilarity::DissimilarityMatrix;
use crate::error::{RarefactionError, Result};

/// Outcome of a Mantel test between two dissimilarity matrices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MantelResult {
    /// Spearman rank correlation of the upper-triangle entries, in [-1, 1]
    pub coefficient: f64,
    /// Two-sided permutation p-value; None without permutations or when
    /// the coefficient is degenerate.
    pub p_value: Option<f64>,
    /// Number of samples (rows) compared
    pub n: usize,
}

/// Upper-triangle entries, row by row.
fn condensed(m: &DissimilarityMatrix) -> Vec<f64> {
    let n = m.len();
    let mut out = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            out.push(m.get(i, j));
        }
    }
    out
}

/// Ranks starting at 1, ties get the mean of the ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1 ..= end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation; None when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa == 0.0 || sbb == 0.0 {
        return None;
    }
    Some((sab / (saa * sbb).sqrt()).clamp(-1.0, 1.0))
}

/// Spearman Mantel test between `x` and `y`.
///
/// `y` is aligned to the sample order of `x`; the label sets must match and
/// hold at least three samples. The p-value counts permutations of `x`'s
/// samples whose |coefficient| reaches the observed one:
/// `(extreme + 1) / (permutations + 1)`.
///
/// When either matrix has constant off-diagonal entries the rank correlation
/// is undefined; identical entries then score 1.0 and anything else 0.0.
pub fn mantel_spearman<R: Rng + ?Sized>(
    x: &DissimilarityMatrix,
    y: &DissimilarityMatrix,
    permutations: usize,
    rng: &mut R,
) -> Result<MantelResult> {
    let n = x.len();
    if n < 3 {
        return Err(RarefactionError::statistics(format!(
            "Mantel test needs at least 3 samples, got {}",
            n
        )));
    }
    let y = y.reordered(x.labels()).ok_or_else(|| {
        RarefactionError::statistics(format!(
            "sample labels differ: {:?} vs {:?}",
            x.labels(),
            y.labels()
        ))
    })?;

    let cx = condensed(x);
    let cy = condensed(&y);
    let rx = average_ranks(&cx);
    let ry = average_ranks(&cy);

    let coefficient = match pearson(&rx, &ry) {
        Some(r) => r,
        None => {
            let same = cx == cy;
            log::debug!("Degenerate Mantel input (constant entries), identical = {}", same);
            return Ok(MantelResult {
                coefficient: if same { 1.0 } else { 0.0 },
                p_value: None,
                n,
            });
        }
    };

    if permutations == 0 {
        return Ok(MantelResult {
            coefficient,
            p_value: None,
            n,
        });
    }

    // full square of x ranks so a permutation only re-indexes
    let mut rank_square = vec![0.0; n * n];
    let mut k = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            rank_square[i * n + j] = rx[k];
            rank_square[j * n + i] = rx[k];
            k += 1;
        }
    }

    let observed = coefficient.abs();
    let mut order: Vec<usize> = (0..n).collect();
    let mut permuted = vec![0.0; rx.len()];
    let mut extreme = 0usize;
    for _ in 0..permutations {
        order.shuffle(rng);
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                permuted[k] = rank_square[order[i] * n + order[j]];
                k += 1;
            }
        }
        let r = pearson(&permuted, &ry).unwrap_or(0.0);
        if r.abs() >= observed - 1e-12 {
            extreme += 1;
        }
    }

    Ok(MantelResult {
        coefficient,
        p_value: Some((extreme + 1) as f64 / (permutations + 1) as f64),
        n,
    })
}
