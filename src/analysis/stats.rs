use serde::Serialize;

use crate::error::{DppError, Result};

/// Paired binary outcomes: `[[both, x only], [y only, neither]]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContingencyTable(pub [[u32; 2]; 2]);

pub fn binary_to_table(x: &[u8], y: &[u8]) -> Result<ContingencyTable> {
    if x.len() != y.len() {
        return Err(DppError::InvalidArgument(format!(
            "paired observations differ in length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    if x.iter().chain(y).any(|&v| v > 1) {
        return Err(DppError::InvalidArgument(
            "observations must be 0 or 1".to_string(),
        ));
    }

    let mut table = [[0u32; 2]; 2];
    for (&a, &b) in x.iter().zip(y) {
        table[usize::from(1 - a)][usize::from(1 - b)] += 1;
    }
    Ok(ContingencyTable(table))
}

/// McNemar's chi-squared test with one degree of freedom; returns the
/// p-value.
pub fn mcnemar(table: &ContingencyTable) -> Result<f64> {
    let b = f64::from(table.0[0][1]);
    let c = f64::from(table.0[1][0]);
    if b + c == 0.0 {
        return Err(DppError::Domain(
            "no discordant pairs, McNemar statistic is undefined".to_string(),
        ));
    }

    let chi2 = (b - c).powi(2) / (b + c);
    Ok(erfc((chi2 / 2.0).sqrt()))
}

/// Complementary error function, Chebyshev fit with relative error below
/// 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let ans = t * poly.exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}
