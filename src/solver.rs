use crate::{sparse::ScatteredVec, Status};

use log::{debug, trace};
use sprs::CompressedStorage;

type CsMat = sprs::CsMatI<f64, usize>;
type CsVec = sprs::CsVecI<f64, usize>;

const SENTINEL: usize = 0usize.wrapping_sub(1);

/// Tolerance for comparisons with zero.
const EPS: f64 = 1e-8;

/// Consecutive non-improving pivots tolerated before the entering rule falls
/// back to lowest-index selection.
const STALL_THRESHOLD: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    One,
    Two,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PhaseOutcome {
    Converged,
    Unbounded,
    IterationLimit,
}

/// Two-phase revised simplex over the standard-form problem
///
/// ```text
/// minimize    c·v
/// subject to  [A  -A  I  D] v = |b|,  v >= 0
/// ```
///
/// where each free variable of the caller's problem is split into a
/// positive/negative pair, every row gets a slack variable and rows with a
/// negative right-hand side get an artificial variable (`D` holds the `-1`
/// artificial coefficients). Variables are numbered split pairs first
/// (`x_j^+ = j`, `x_j^- = m + j`), then slacks, then artificials.
pub(crate) struct Solver {
    num_vars: usize,
    num_rows: usize,
    num_artificial_vars: usize,
    artificial_vars_start: usize,

    /// Phase-2 costs for all standard-form variables (negated objective on the
    /// positive split, the objective itself on the negative split).
    obj: Vec<f64>,

    /// Standard-form constraints, row-major.
    constraints: CsMat,
    /// The same matrix, column-major.
    constraints_csc: CsMat,

    binv: BasisInverse,

    // Recomputed on each pivot
    col_coeffs: Vec<f64>,
    row_coeffs: ScatteredVec,

    // Updated on each pivot
    /// For each constraint the corresponding basic var.
    basic_vars: Vec<usize>,
    /// (var -> constraint idx if basic or sentinel) for all vars.
    basic_vars_inv: Vec<usize>,
    cur_bounds: Vec<f64>,

    /// Remaining variables (idx -> var).
    non_basic_vars: Vec<usize>,
    /// (var -> idx if non-basic or sentinel) for all vars.
    non_basic_vars_inv: Vec<usize>,
    /// Reduced costs, one per non-basic variable.
    cur_obj: Vec<f64>,
    cur_obj_val: f64,

    max_iterations: usize,
    iterations: usize,
    /// Pivots since the objective last improved; switches the entering rule.
    stalled_iters: usize,
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("num_vars", &self.num_vars)
            .field("num_rows", &self.num_rows)
            .field("num_artificial_vars", &self.num_artificial_vars)
            .field("basic_vars", &self.basic_vars)
            .field("cur_bounds", &self.cur_bounds)
            .field("cur_obj", &self.cur_obj)
            .field("cur_obj_val", &self.cur_obj_val)
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl Solver {
    /// `constraints` is the caller's `n × m` matrix in row-major form with the
    /// row index already built; `new` augments it with split, slack and
    /// artificial columns and sets up the initial (diagonal) basis.
    pub(crate) fn new(
        objective: &[f64],
        constraints: &CsMat,
        bounds: &[f64],
        max_iterations: usize,
    ) -> Solver {
        let num_vars = objective.len();
        let num_rows = bounds.len();
        let split_vars = 2 * num_vars;
        let artificial_vars_start = split_vars + num_rows;
        let num_artificial_vars = bounds.iter().filter(|&&b| b < 0.0).count();
        let num_total_vars = artificial_vars_start + num_artificial_vars;

        let mut obj = vec![0.0; num_total_vars];
        for (j, &c) in objective.iter().enumerate() {
            obj[j] = -c;
            obj[num_vars + j] = c;
        }

        let orig_csc = constraints.to_csc();
        let mut cols = CsMat::empty(CompressedStorage::CSC, num_rows);
        for j in 0..num_vars {
            cols = cols.append_outer_csvec(orig_csc.outer_view(j).unwrap());
        }
        for j in 0..num_vars {
            let col = orig_csc.outer_view(j).unwrap();
            let negated = CsVec::new(
                num_rows,
                col.indices().to_vec(),
                col.data().iter().map(|&v| -v).collect(),
            );
            cols = cols.append_outer_csvec(negated.view());
        }
        for i in 0..num_rows {
            let slack = CsVec::new(num_rows, vec![i], vec![1.0]);
            cols = cols.append_outer_csvec(slack.view());
        }
        for i in 0..num_rows {
            if bounds[i] < 0.0 {
                let artificial = CsVec::new(num_rows, vec![i], vec![-1.0]);
                cols = cols.append_outer_csvec(artificial.view());
            }
        }
        let constraints_csc = cols;
        let constraints = constraints_csc.to_csr();

        // Initial basis: the slack variable for rows with a nonnegative
        // right-hand side, the artificial one otherwise. The basis matrix is
        // diagonal with entries ±1, so its inverse is available directly.
        let mut basic_vars = Vec::with_capacity(num_rows);
        let mut basic_vars_inv = vec![SENTINEL; num_total_vars];
        let mut cur_bounds = Vec::with_capacity(num_rows);
        let mut diag = Vec::with_capacity(num_rows);
        let mut next_artificial_var = artificial_vars_start;
        for (i, &b) in bounds.iter().enumerate() {
            let var = if b < 0.0 {
                let var = next_artificial_var;
                next_artificial_var += 1;
                diag.push(-1.0);
                var
            } else {
                diag.push(1.0);
                split_vars + i
            };
            basic_vars_inv[var] = i;
            basic_vars.push(var);
            cur_bounds.push(b.abs());
        }

        let mut non_basic_vars = vec![];
        let mut non_basic_vars_inv = vec![SENTINEL; num_total_vars];
        for var in 0..num_total_vars {
            if basic_vars_inv[var] == SENTINEL {
                non_basic_vars_inv[var] = non_basic_vars.len();
                non_basic_vars.push(var);
            }
        }
        let num_non_basic = non_basic_vars.len();

        let mut res = Solver {
            num_vars,
            num_rows,
            num_artificial_vars,
            artificial_vars_start,
            obj,
            constraints,
            constraints_csc,
            binv: BasisInverse::from_diag(diag),
            col_coeffs: vec![0.0; num_rows],
            row_coeffs: ScatteredVec::empty(num_non_basic),
            basic_vars,
            basic_vars_inv,
            cur_bounds,
            non_basic_vars,
            non_basic_vars_inv,
            cur_obj: vec![],
            cur_obj_val: 0.0,
            max_iterations,
            iterations: 0,
            stalled_iters: 0,
        };

        let phase = if res.num_artificial_vars > 0 {
            Phase::One
        } else {
            Phase::Two
        };
        res.recalc_cur_obj(phase);

        debug!(
            "initialized solver: num_vars={} num_rows={} num_artificial_vars={} nnz={}",
            res.num_vars,
            res.num_rows,
            res.num_artificial_vars,
            res.constraints.nnz(),
        );

        res
    }

    /// Runs both phases to completion and extracts the caller's variable
    /// values from the final basis.
    pub(crate) fn solve(mut self) -> (Status, Vec<f64>, usize) {
        if self.num_artificial_vars > 0 {
            match self.run_phase(Phase::One) {
                PhaseOutcome::Converged => {}
                PhaseOutcome::IterationLimit => {
                    return (Status::Error, self.extract_values(), self.iterations);
                }
                PhaseOutcome::Unbounded => {
                    // The artificial objective is bounded below by zero, so
                    // an empty ratio test here means numerical breakdown.
                    debug!("phase 1 ratio test failed, reporting best iterate");
                    return (Status::Error, self.extract_values(), self.iterations);
                }
            }

            if self.cur_obj_val > EPS {
                debug!(
                    "infeasible: artificial objective {} after {} iterations",
                    self.cur_obj_val, self.iterations,
                );
                return (Status::Infeasible, vec![0.0; self.num_vars], self.iterations);
            }

            self.pivot_out_artificials();
            self.prepare_phase_two();
        }

        match self.run_phase(Phase::Two) {
            PhaseOutcome::Converged => {
                debug!(
                    "found optimum in {} iterations, objective {}",
                    self.iterations, -self.cur_obj_val,
                );
                (Status::Optimal, self.extract_values(), self.iterations)
            }
            PhaseOutcome::Unbounded => {
                debug!("objective is unbounded");
                (Status::Unbounded, self.extract_values(), self.iterations)
            }
            PhaseOutcome::IterationLimit => {
                debug!("iteration limit {} reached", self.max_iterations);
                (Status::Error, self.extract_values(), self.iterations)
            }
        }
    }

    fn run_phase(&mut self, phase: Phase) -> PhaseOutcome {
        loop {
            if self.iterations % 100 == 0 {
                debug!(
                    "{:?} iter {}: objective {}",
                    phase, self.iterations, self.cur_obj_val,
                );
            }

            let c_entering = match self.choose_entering_col() {
                Some(c) => c,
                None => return PhaseOutcome::Converged,
            };
            if self.iterations >= self.max_iterations {
                return PhaseOutcome::IterationLimit;
            }

            self.calc_col_coeffs(c_entering);
            let (r_leaving, pivot_coeff) = match self.choose_pivot_row() {
                Some(row) => row,
                None => return PhaseOutcome::Unbounded,
            };
            self.calc_row_coeffs(r_leaving);
            self.pivot(c_entering, r_leaving, pivot_coeff);
            self.iterations += 1;
        }
    }

    /// Most negative reduced cost; ties go to the lowest variable index so
    /// that repeated solves take identical pivot sequences. A deterministic
    /// rule can still cycle through degenerate bases, so after enough pivots
    /// without objective improvement selection falls back to Bland's rule,
    /// which cannot revisit a basis.
    fn choose_entering_col(&self) -> Option<usize> {
        if self.stalled_iters >= STALL_THRESHOLD {
            return self.choose_entering_col_lowest_index();
        }

        let mut entering: Option<(usize, f64)> = None;
        for (c, &d) in self.cur_obj.iter().enumerate() {
            if d >= -EPS {
                continue;
            }
            let better = match entering {
                None => true,
                Some((best_c, best_d)) => {
                    d < best_d - EPS
                        || (d < best_d + EPS
                            && self.non_basic_vars[c] < self.non_basic_vars[best_c])
                }
            };
            if better {
                entering = Some((c, d));
            }
        }
        entering.map(|(c, _)| c)
    }

    /// Lowest variable index with a negative reduced cost. Slower to converge
    /// than the most-negative rule but free of cycling when the ratio test
    /// breaks its ties by lowest basic variable index (which ours does).
    fn choose_entering_col_lowest_index(&self) -> Option<usize> {
        let mut entering: Option<(usize, usize)> = None;
        for (c, &d) in self.cur_obj.iter().enumerate() {
            if d >= -EPS {
                continue;
            }
            let var = self.non_basic_vars[c];
            if entering.map_or(true, |(_, best_var)| var < best_var) {
                entering = Some((c, var));
            }
        }
        entering.map(|(c, _)| c)
    }

    /// Minimum-ratio test over the current entering column; ties go to the row
    /// whose basic variable has the lowest index. `None` means no entry of the
    /// column is positive and the objective is unbounded along it.
    fn choose_pivot_row(&self) -> Option<(usize, f64)> {
        let mut leaving: Option<(usize, f64, f64)> = None;
        for (r, &coeff) in self.col_coeffs.iter().enumerate() {
            if coeff <= EPS {
                continue;
            }
            let ratio = self.cur_bounds[r] / coeff;
            let better = match leaving {
                None => true,
                Some((best_r, best_ratio, _)) => {
                    ratio < best_ratio - EPS
                        || (ratio < best_ratio + EPS
                            && self.basic_vars[r] < self.basic_vars[best_r])
                }
            };
            if better {
                leaving = Some((r, ratio, coeff));
            }
        }
        leaving.map(|(r, _, coeff)| (r, coeff))
    }

    /// Current tableau column for a single non-basic variable:
    /// `B^-1 * A[:, var]`.
    fn calc_col_coeffs(&mut self, c_var: usize) {
        let var = self.non_basic_vars[c_var];
        let col = self.constraints_csc.outer_view(var).unwrap();
        for r in 0..self.num_rows {
            let inv_row = self.binv.row(r);
            let mut sum = 0.0;
            for (i, &val) in col.iter() {
                sum += inv_row[i] * val;
            }
            self.col_coeffs[r] = if sum.abs() < EPS { 0.0 } else { sum };
        }
    }

    /// Current tableau row for a single constraint, gathered over the
    /// non-basic variables (indexed by their position in `non_basic_vars`).
    fn calc_row_coeffs(&mut self, r_constr: usize) {
        let num_non_basic = self.non_basic_vars.len();
        self.row_coeffs.clear_and_resize(num_non_basic);
        for i in 0..self.num_rows {
            let mult = self.binv.get(r_constr, i);
            if mult == 0.0 {
                continue;
            }
            for (var, &val) in self.constraints.outer_view(i).unwrap().iter() {
                let idx = self.non_basic_vars_inv[var];
                if idx != SENTINEL {
                    *self.row_coeffs.get_mut(idx) += val * mult;
                }
            }
        }
    }

    fn pivot(&mut self, c_entering: usize, r_leaving: usize, pivot_coeff: f64) {
        let pivot_bound = self.cur_bounds[r_leaving] / pivot_coeff;
        for (r, &coeff) in self.col_coeffs.iter().enumerate() {
            if r == r_leaving {
                self.cur_bounds[r] = pivot_bound;
            } else if coeff != 0.0 {
                self.cur_bounds[r] -= pivot_bound * coeff;
            }
        }

        let obj_delta = self.cur_obj[c_entering] * pivot_bound;
        self.cur_obj_val += obj_delta;
        if obj_delta < -EPS {
            self.stalled_iters = 0;
        } else {
            self.stalled_iters += 1;
        }

        let pivot_obj = self.cur_obj[c_entering] / pivot_coeff;
        for (c, &coeff) in self.row_coeffs.iter() {
            if c == c_entering {
                self.cur_obj[c] = -pivot_obj;
            } else {
                self.cur_obj[c] -= pivot_obj * coeff;
            }
        }

        self.binv.pivot(r_leaving, &self.col_coeffs);

        let entering_var = self.non_basic_vars[c_entering];
        let leaving_var = std::mem::replace(&mut self.basic_vars[r_leaving], entering_var);
        self.non_basic_vars[c_entering] = leaving_var;
        self.basic_vars_inv[entering_var] = r_leaving;
        self.basic_vars_inv[leaving_var] = SENTINEL;
        self.non_basic_vars_inv[entering_var] = SENTINEL;
        self.non_basic_vars_inv[leaving_var] = c_entering;

        trace!(
            "PIVOT entering {} (col #{}) leaving {} (row #{})",
            entering_var,
            c_entering,
            leaving_var,
            r_leaving,
        );
    }

    /// After a feasible phase 1, artificial variables can remain basic at
    /// zero. Degenerate pivots move them out wherever the tableau row has a
    /// usable non-artificial coefficient; a row without one is redundant and
    /// its zero-valued artificial stays (such a row has zero coefficients for
    /// every entering candidate, so it cannot affect later pivots).
    fn pivot_out_artificials(&mut self) {
        for r in 0..self.num_rows {
            if self.basic_vars[r] < self.artificial_vars_start {
                continue;
            }

            self.calc_row_coeffs(r);
            let mut entering: Option<(usize, usize)> = None;
            for (c, &coeff) in self.row_coeffs.iter() {
                let var = self.non_basic_vars[c];
                if var >= self.artificial_vars_start || coeff.abs() <= EPS {
                    continue;
                }
                if entering.map_or(true, |(_, best_var)| var < best_var) {
                    entering = Some((c, var));
                }
            }

            if let Some((c_entering, _)) = entering {
                self.calc_col_coeffs(c_entering);
                let pivot_coeff = self.col_coeffs[r];
                self.pivot(c_entering, r, pivot_coeff);
            } else {
                debug!("constraint row {} is redundant", r);
            }
        }
    }

    /// Drops artificial columns from the non-basic set and switches the
    /// reduced costs over to the real objective.
    fn prepare_phase_two(&mut self) {
        let mut new_non_basic_vars = Vec::with_capacity(self.non_basic_vars.len());
        for &var in &self.non_basic_vars {
            if var < self.artificial_vars_start {
                self.non_basic_vars_inv[var] = new_non_basic_vars.len();
                new_non_basic_vars.push(var);
            } else {
                self.non_basic_vars_inv[var] = SENTINEL;
            }
        }
        self.non_basic_vars = new_non_basic_vars;
        self.row_coeffs.clear_and_resize(self.non_basic_vars.len());
        self.stalled_iters = 0;
        self.recalc_cur_obj(Phase::Two);
    }

    fn cost(&self, phase: Phase, var: usize) -> f64 {
        match phase {
            Phase::One => {
                if var >= self.artificial_vars_start {
                    1.0
                } else {
                    0.0
                }
            }
            Phase::Two => self.obj[var],
        }
    }

    /// Recomputes reduced costs and the objective value from scratch via the
    /// simplex multipliers `y = (B^-1)^T c_B`.
    fn recalc_cur_obj(&mut self, phase: Phase) {
        let mut multipliers = vec![0.0; self.num_rows];
        for (i, &var) in self.basic_vars.iter().enumerate() {
            let c = self.cost(phase, var);
            if c == 0.0 {
                continue;
            }
            for (j, &val) in self.binv.row(i).iter().enumerate() {
                multipliers[j] += c * val;
            }
        }

        self.cur_obj.clear();
        for &var in &self.non_basic_vars {
            let col = self.constraints_csc.outer_view(var).unwrap();
            let mut val = self.cost(phase, var);
            for (r, &coeff) in col.iter() {
                val -= multipliers[r] * coeff;
            }
            if val.abs() < EPS {
                val = 0.0;
            }
            self.cur_obj.push(val);
        }

        self.cur_obj_val = 0.0;
        for (i, &var) in self.basic_vars.iter().enumerate() {
            self.cur_obj_val += self.cost(phase, var) * self.cur_bounds[i];
        }
    }

    fn var_value(&self, var: usize) -> f64 {
        let r = self.basic_vars_inv[var];
        if r == SENTINEL {
            0.0
        } else {
            self.cur_bounds[r]
        }
    }

    /// Original-variable values: `x_j = x_j^+ - x_j^-`. Slack and artificial
    /// values are discarded.
    fn extract_values(&self) -> Vec<f64> {
        (0..self.num_vars)
            .map(|j| self.var_value(j) - self.var_value(self.num_vars + j))
            .collect()
    }
}

/// Explicit row-major representation of the basis inverse, updated on each
/// pivot by normalizing the pivot row and row-reducing the others against it.
///
/// The inverse of a sparse basis is not sparse in general, so each pivot costs
/// O(rows²); fine for the moderate problem sizes this solver targets. An
/// LU-based scheme belongs behind the crate's backend seam, not here.
#[derive(Clone, Debug)]
struct BasisInverse {
    n: usize,
    rows: Vec<f64>,
}

impl BasisInverse {
    fn from_diag(diag: Vec<f64>) -> BasisInverse {
        let n = diag.len();
        let mut rows = vec![0.0; n * n];
        for (i, &d) in diag.iter().enumerate() {
            rows[i * n + i] = d;
        }
        BasisInverse { n, rows }
    }

    #[inline]
    fn row(&self, i: usize) -> &[f64] {
        &self.rows[i * self.n..(i + 1) * self.n]
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> f64 {
        self.rows[i * self.n + j]
    }

    /// `col` is the current tableau column of the entering variable
    /// (`B^-1 * A[:, entering]`); its entry at `pivot_row` must be nonzero.
    fn pivot(&mut self, pivot_row: usize, col: &[f64]) {
        let n = self.n;
        let pivot_coeff = col[pivot_row];
        for j in 0..n {
            self.rows[pivot_row * n + j] /= pivot_coeff;
        }
        for (i, &mult) in col.iter().enumerate() {
            if i == pivot_row || mult == 0.0 {
                continue;
            }
            for j in 0..n {
                let val = self.rows[pivot_row * n + j];
                self.rows[i * n + j] -= mult * val;
            }
        }
    }
}
