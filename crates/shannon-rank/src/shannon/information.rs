//! Mutual information and joint entropy of a binned slice.
//!
//! Both quantities use the natural logarithm. Empty bins contribute nothing.
//! A histogram with no mass yields NaN, which callers read as "undecidable".

use super::binning::{BinOptimizer, Histogram2D};
use crate::slice::Slice2D;

/// `I(X;Y) = Σ p(x,y) ln(p(x,y) / (p(x) p(y)))`
pub fn mutual_information(hist: &Histogram2D) -> f64 {
    let total = hist.total();
    if total <= 0.0 {
        return f64::NAN;
    }
    let px = hist.marginal_x();
    let py = hist.marginal_y();
    let mut mi = 0.0;
    for (i, &mx) in px.iter().enumerate() {
        for (j, &my) in py.iter().enumerate() {
            let joint = hist.get(i, j);
            if joint > 0.0 {
                mi += joint / total * (joint * total / (mx * my)).ln();
            }
        }
    }
    mi
}

/// `H(X,Y) = -Σ p(x,y) ln p(x,y)`
pub fn joint_entropy(hist: &Histogram2D) -> f64 {
    let total = hist.total();
    if total <= 0.0 {
        return f64::NAN;
    }
    hist.counts()
        .iter()
        .filter(|&&c| c > 0.0)
        .map(|&c| {
            let p = c / total;
            -p * p.ln()
        })
        .sum()
}

/// Histogram a slice and return its mutual information.
pub fn slice_mutual_information(
    optimizer: &BinOptimizer,
    slice: &Slice2D,
    bins: (usize, usize),
) -> f64 {
    mutual_information(&optimizer.hist_2d(&slice.values, bins.0, bins.1))
}
