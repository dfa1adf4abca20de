//! Bounded least-squares projection.
//!
//! Solves
//!
//! ```text
//! minimize   ‖x − x₀‖²
//! subject to A·x = b,  G·x ≤ h,  l ≤ x ≤ u
//! ```
//!
//! as a least-distance program in `z = x − x₀`. Every row becomes an
//! inequality `g·z ≥ c` (equalities as a mirrored pair, infinite bounds
//! dropped) and the program is solved through its dual non-negative least
//! squares problem with the Lawson–Hanson active-set method:
//!
//! ```text
//! minimize ‖E·w − f‖  subject to w ≥ 0,   E = [Gᵀ; cᵀ],  f = (0, …, 0, 1)
//! ```
//!
//! With residual `r = E·w − f`, the projection is `z = −r[..n] / r[n]`, and
//! `r = 0` certifies that the constraints are infeasible. The dual never
//! needs a feasible starting point, so the method cannot stall on a
//! rank-deficient set of pinned bounds.

use crate::core::error::SolverError;

const FEASIBILITY_TOLERANCE: f64 = 1e-7;
const GRADIENT_TOLERANCE: f64 = 1e-11;
const PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub target: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Dense equality rows `row·x = rhs`, each `target.len()` wide.
    pub rows: Vec<Vec<f64>>,
    pub rhs: Vec<f64>,
    /// Dense inequality rows `row·x ≤ limit`.
    pub inequalities: Vec<Vec<f64>>,
    pub limits: Vec<f64>,
}

impl Problem {
    /// Box-and-equality problem with no inequality rows.
    pub fn new(
        target: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
        rows: Vec<Vec<f64>>,
        rhs: Vec<f64>,
    ) -> Self {
        Self {
            target,
            lower,
            upper,
            rows,
            rhs,
            inequalities: Vec::new(),
            limits: Vec::new(),
        }
    }

    pub fn with_inequality(mut self, row: Vec<f64>, limit: f64) -> Self {
        self.inequalities.push(row);
        self.limits.push(limit);
        self
    }

    /// Largest violation of any row or bound at `x`.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let equalities = self
            .rows
            .iter()
            .zip(&self.rhs)
            .map(|(row, b)| (dot(row, x) - b).abs());
        let inequalities = self
            .inequalities
            .iter()
            .zip(&self.limits)
            .map(|(row, h)| (dot(row, x) - h).max(0.0));
        let bounds = x
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(v, (l, u))| (l - v).max(v - u).max(0.0));

        equalities
            .chain(inequalities)
            .chain(bounds)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub values: Vec<f64>,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct BoundedLeastSquares {
    max_iterations: usize,
}

impl BoundedLeastSquares {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub fn solve(&self, problem: &Problem) -> Result<Solution, SolverError> {
        let n = problem.target.len();
        let columns = distance_columns(problem);

        let (residual, iterations) = self.nnls(&columns, n)?;

        // r[n] = c·w − 1 stays strictly negative for feasible programs.
        let scale = residual[n];
        if scale > -PIVOT_TOLERANCE {
            return Err(SolverError::Infeasible);
        }

        let values: Vec<f64> = problem
            .target
            .iter()
            .zip(&residual[..n])
            .map(|(x0, r)| x0 - r / scale)
            .collect();

        let magnitude = problem
            .target
            .iter()
            .fold(1.0_f64, |acc, v| acc.max(v.abs()));
        if problem.max_violation(&values) > FEASIBILITY_TOLERANCE * magnitude {
            return Err(SolverError::Infeasible);
        }

        Ok(Solution { values, iterations })
    }

    /// Lawson–Hanson NNLS on `columns` against `f = e_n`. Returns the
    /// residual `E·w − f` and the number of outer iterations.
    fn nnls(&self, columns: &[Vec<f64>], n: usize) -> Result<(Vec<f64>, usize), SolverError> {
        let mut target = vec![0.0; n + 1];
        target[n] = 1.0;

        let mut weights = vec![0.0; columns.len()];
        let mut passive = vec![false; columns.len()];
        // Columns that produced a degenerate subproblem since the last step.
        let mut skipped = vec![false; columns.len()];

        for iteration in 1..=self.max_iterations {
            let residual = combine(columns, &weights, &target);
            let entering = (0..columns.len())
                .filter(|j| !passive[*j] && !skipped[*j])
                .map(|j| (j, -dot(&columns[j], &residual)))
                .filter(|(_, gradient)| *gradient > GRADIENT_TOLERANCE)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let Some((entering, _)) = entering else {
                return Ok((residual, iteration));
            };
            passive[entering] = true;

            loop {
                let active: Vec<usize> = (0..columns.len()).filter(|j| passive[*j]).collect();
                let trial = match least_squares(columns, &active, &target) {
                    Ok(trial) => trial,
                    Err(_) => {
                        passive[entering] = false;
                        skipped[entering] = true;
                        break;
                    }
                };

                if trial.iter().all(|s| *s > 0.0) {
                    for (j, s) in active.iter().zip(&trial) {
                        weights[*j] = *s;
                    }
                    skipped.iter_mut().for_each(|s| *s = false);
                    break;
                }

                // A column entering with a non-positive coefficient adds
                // nothing; numerical noise, not a descent direction.
                let entering_slot = active.iter().position(|j| *j == entering);
                if entering_slot.is_some_and(|slot| trial[slot] <= 0.0) && weights[entering] == 0.0
                {
                    passive[entering] = false;
                    skipped[entering] = true;
                    break;
                }

                // Step toward the trial point until the first coefficient hits zero.
                let step = active
                    .iter()
                    .zip(&trial)
                    .filter(|(_, s)| **s <= 0.0)
                    .map(|(j, s)| weights[*j] / (weights[*j] - s))
                    .fold(f64::INFINITY, f64::min);

                for (j, s) in active.iter().zip(&trial) {
                    weights[*j] += step * (s - weights[*j]);
                    if weights[*j] <= PIVOT_TOLERANCE {
                        weights[*j] = 0.0;
                        passive[*j] = false;
                    }
                }
                skipped.iter_mut().for_each(|s| *s = false);
            }
        }

        Err(SolverError::NonConvergence {
            iterations: self.max_iterations,
        })
    }
}

/// Columns `(g, c)` of the dual system for every constraint `g·z ≥ c`.
fn distance_columns(problem: &Problem) -> Vec<Vec<f64>> {
    let n = problem.target.len();
    let x0 = &problem.target;
    let mut columns = Vec::new();

    let mut push = |g: Vec<f64>, c: f64| {
        let mut column = g;
        column.push(c);
        columns.push(column);
    };

    for (row, b) in problem.rows.iter().zip(&problem.rhs) {
        let gap = b - dot(row, x0);
        push(row.clone(), gap);
        push(row.iter().map(|a| -a).collect(), -gap);
    }

    for (row, h) in problem.inequalities.iter().zip(&problem.limits) {
        let slack = h - dot(row, x0);
        push(row.iter().map(|a| -a).collect(), -slack);
    }

    for i in 0..n {
        let unit = |sign: f64| {
            let mut g = vec![0.0; n];
            g[i] = sign;
            g
        };
        if problem.lower[i].is_finite() {
            push(unit(1.0), problem.lower[i] - x0[i]);
        }
        if problem.upper[i].is_finite() {
            push(unit(-1.0), x0[i] - problem.upper[i]);
        }
    }

    columns
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `Σ w_j · column_j − target`.
fn combine(columns: &[Vec<f64>], weights: &[f64], target: &[f64]) -> Vec<f64> {
    let mut residual: Vec<f64> = target.iter().map(|t| -t).collect();
    for (column, w) in columns.iter().zip(weights) {
        if *w == 0.0 {
            continue;
        }
        for (r, c) in residual.iter_mut().zip(column) {
            *r += w * c;
        }
    }
    residual
}

/// Unconstrained least squares over the selected columns, by modified
/// Gram–Schmidt on the augmented system.
fn least_squares(
    columns: &[Vec<f64>],
    selected: &[usize],
    target: &[f64],
) -> Result<Vec<f64>, SolverError> {
    let k = selected.len();
    let mut basis: Vec<Vec<f64>> = selected.iter().map(|j| columns[*j].clone()).collect();
    let mut r = vec![vec![0.0; k]; k];
    let mut rhs = target.to_vec();
    let mut projected = vec![0.0; k];

    for j in 0..k {
        let original = dot(&columns[selected[j]], &columns[selected[j]]).sqrt();
        let norm = dot(&basis[j], &basis[j]).sqrt();
        if norm <= PIVOT_TOLERANCE * original.max(1.0) * 1e3 {
            return Err(SolverError::Singular);
        }

        r[j][j] = norm;
        basis[j].iter_mut().for_each(|v| *v /= norm);

        for l in (j + 1)..k {
            let coefficient = dot(&basis[j], &basis[l]);
            r[j][l] = coefficient;
            let (head, tail) = basis.split_at_mut(l);
            for (v, q) in tail[0].iter_mut().zip(&head[j]) {
                *v -= coefficient * q;
            }
        }

        projected[j] = dot(&basis[j], &rhs);
        for (v, q) in rhs.iter_mut().zip(&basis[j]) {
            *v -= projected[j] * q;
        }
    }

    let mut solution = vec![0.0; k];
    for j in (0..k).rev() {
        let tail: f64 = ((j + 1)..k).map(|l| r[j][l] * solution[l]).sum();
        solution[j] = (projected[j] - tail) / r[j][j];
    }
    Ok(solution)
}
