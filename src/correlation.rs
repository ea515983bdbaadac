//src/correlation.rs

use rayon::prelude::*;
use serde::Serialize;

use crate::dissimilarity::DissimilarityMatrix;
use crate::error::{RarefactionError, Result};
use crate::mantel::mantel_spearman;
use crate::sample::draw_rng;
use crate::types::CoefficientRecord;

/// Which replicate matrices of the two stages are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Pairing {
    /// Replicate i of the first stage against replicate i of the second:
    /// agreement between the tools on the same reads.
    SameReplicate,
    /// Every replicate of the first stage against every replicate of the second.
    AllPairs,
}

impl Pairing {
    /// Index pairs (first stage, second stage) to correlate.
    pub fn pairs(&self, first: usize, second: usize) -> Result<Vec<(usize, usize)>> {
        match self {
            Pairing::SameReplicate => {
                if first != second {
                    return Err(RarefactionError::statistics(format!(
                        "stages produced {} and {} matrices",
                        first, second
                    )));
                }
                Ok((0..first).map(|i| (i, i)).collect())
            }
            Pairing::AllPairs => Ok((0..first)
                .flat_map(|i| (0..second).map(move |j| (i, j)))
                .collect()),
        }
    }
}

/// Mantel coefficients between the two stages' matrices for one depth level,
/// in pair order. Pairs are tested in parallel, each with its own RNG.
pub fn correlate_stages(
    depth: usize,
    first: &[DissimilarityMatrix],
    second: &[DissimilarityMatrix],
    pairing: Pairing,
    permutations: usize,
    seed: Option<u64>,
) -> Result<Vec<CoefficientRecord>> {
    log::info!("Start mantel analysis");
    let records = pairing
        .pairs(first.len(), second.len())?
        .into_par_iter()
        .map(|(i, j)| -> Result<CoefficientRecord> {
            let mut rng = draw_rng(seed, &[u64::MAX, depth as u64, i as u64, j as u64]);
            let res = mantel_spearman(&first[i], &second[j], permutations, &mut rng)?;
            Ok(CoefficientRecord {
                depth,
                replicate_a: i,
                replicate_b: j,
                coefficient: res.coefficient,
                p_value: res.p_value,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!("Finish mantel analysis");
    Ok(records)
}
