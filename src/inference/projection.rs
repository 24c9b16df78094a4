// src/inference/projection.rs

//! Projection of a parameter vector onto a model's feasible region, shrunk
//! inward by a per-dimension margin.
//!
//! Before gradient sensing the margin is the scaled `ck`, so both `theta + ck*delta`
//! and `theta - ck*delta` stay inside the true region. After the update the
//! margin is zero.

use ndarray::Array1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectionRule {
    /// Every component is bounded below by its margin. The two probabilities in
    /// `pair` must also sum to at most `1 - m_i - m_j`, and `capped` is a lone
    /// probability bounded above by `1 - m`.
    ProbabilitySimplex { pair: (usize, usize), capped: usize },
    /// Every component except `offset` is bounded below. A clamped component
    /// lands at `margin + epsilon` rather than on the margin itself.
    PositiveWithFreeOffset { offset: usize, epsilon: f64 },
}

pub fn project(theta: &Array1<f64>, margin: &Array1<f64>, rule: &ProjectionRule) -> Array1<f64> {
    assert_eq!(theta.len(), margin.len(), "margin must match parameter dimension");
    let mut projected = theta.clone();

    match *rule {
        ProjectionRule::ProbabilitySimplex { pair, capped } => {
            clamp_below(&mut projected, margin, None, 0.0);

            let cap = 1.0 - margin[capped];
            assert!(
                cap >= margin[capped],
                "infeasible projection: margin {} leaves no room below 1",
                margin[capped]
            );
            if projected[capped] > cap {
                projected[capped] = cap;
            }

            let (pi, pj) = project_pair(
                projected[pair.0],
                projected[pair.1],
                margin[pair.0],
                margin[pair.1],
            );
            projected[pair.0] = pi;
            projected[pair.1] = pj;
        }
        ProjectionRule::PositiveWithFreeOffset { offset, epsilon } => {
            clamp_below(&mut projected, margin, Some(offset), epsilon);
        }
    }

    projected
}

fn clamp_below(theta: &mut Array1<f64>, margin: &Array1<f64>, skip: Option<usize>, epsilon: f64) {
    for (i, (value, &m)) in theta.iter_mut().zip(margin.iter()).enumerate() {
        if Some(i) == skip {
            continue;
        }
        if *value < m {
            *value = m + epsilon;
        }
    }
}

/// Projects `(pi, pj)` onto the segment `pi + pj = 1 - mi - mj`, `pi >= mi`,
/// `pj >= mj` when their sum exceeds that budget. Points already under the
/// budget are returned unchanged.
fn project_pair(pi: f64, pj: f64, mi: f64, mj: f64) -> (f64, f64) {
    let budget = 1.0 - mi - mj;
    assert!(
        budget >= mi + mj,
        "infeasible projection: margins ({mi}, {mj}) leave an empty simplex"
    );

    if pi + pj <= budget {
        return (pi, pj);
    }

    // Coordinate along the line direction (1, -1)/sqrt(2), measured from (0, budget).
    let along = (pi - (pj - budget)) / 2.0;
    let (mut qi, mut qj) = (along, budget - along);

    if qi < mi {
        qi = mi;
        qj = budget - mi;
    } else if qj < mj {
        qj = mj;
        qi = budget - mj;
    }
    (qi, qj)
}
