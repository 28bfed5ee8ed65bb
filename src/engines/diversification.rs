use bigdecimal::ToPrimitive;

use crate::engines::{snapshot, EngineError, EngineInput};
use crate::models::{CorrelationMatrixRow, DiversificationRow, PortfolioSnapshotRow};

/// Concentration and correlation blended into a 0-100 score.
///
/// `score = 100 × (0.6 × (1 − HHI) + 0.4 × (1 − avg_corr))`, where HHI is the
/// Herfindahl index over absolute position weights. Without a correlation
/// matrix (single-name books) the correlation term is dropped and the
/// concentration term rescaled to the full range.
pub fn compute(
    input: &EngineInput,
    correlation: Option<&CorrelationMatrixRow>,
    snapshot_row: &PortfolioSnapshotRow,
) -> Result<DiversificationRow, EngineError> {
    let gross = snapshot_row.gross_exposure.to_f64().unwrap_or(0.0);
    if gross.abs() < f64::EPSILON {
        return Err(EngineError::DegenerateInput(
            "portfolio has no market exposure".to_string(),
        ));
    }

    let mut hhi = 0.0f64;
    for position in &input.positions {
        let value = snapshot::position_value(input, position)?;
        let weight = value.abs() / gross;
        hhi += weight * weight;
    }
    let hhi = hhi.clamp(0.0, 1.0);
    let effective_positions = if hhi > f64::EPSILON { 1.0 / hhi } else { 0.0 };

    let avg_correlation = correlation.and_then(average_off_diagonal);

    let score = match avg_correlation {
        Some(avg) => {
            let corr_term = 1.0 - avg.clamp(0.0, 1.0);
            100.0 * (0.6 * (1.0 - hhi) + 0.4 * corr_term)
        }
        None => 100.0 * (1.0 - hhi),
    };

    Ok(DiversificationRow {
        portfolio_id: input.portfolio_id,
        as_of_date: input.as_of_date,
        score: score.clamp(0.0, 100.0),
        effective_positions,
        avg_correlation,
    })
}

fn average_off_diagonal(matrix: &CorrelationMatrixRow) -> Option<f64> {
    let values = matrix.matrix_values();
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += values[i][j];
            count += 1;
        }
    }
    (count > 0).then(|| (sum / count as f64).clamp(-1.0, 1.0))
}
