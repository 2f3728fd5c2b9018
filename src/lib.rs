/*!
A sparse linear programming solver library.

[Linear programming](https://en.wikipedia.org/wiki/Linear_programming) is a
technique for finding the maximum of a linear function of a set of continuous
variables subject to linear inequality constraints. This crate solves problems
of the form

```text
maximize    f·x
subject to  A·x <= b
```

where `A` is a sparse matrix given in coordinate form and the variables are
unbounded in sign (encode `x >= 0` as a row `-x <= 0` when you need it).

# Entry points

Build a [`CooMatrix`] from `(row, col, value)` triples, then call
[`SparseLp::solve`] with the objective coefficients and the row bounds. The
returned [`Solution`] carries the variable values together with a [`Status`]
that distinguishes an optimum from infeasible, unbounded and non-converged
outcomes. Malformed inputs are rejected up front with a [`MalformedInput`]
error before any solving work happens.

# Example

```
use sparselp::{CooMatrix, SparseLp, Status};

// maximize 50x + 40y
// subject to 2x + 3y <= 1500, 2x + y <= 1000, x >= 0, y >= 0
let mut constraints = CooMatrix::new(4, 2);
constraints.push(0, 0, 2.0);
constraints.push(0, 1, 3.0);
constraints.push(1, 0, 2.0);
constraints.push(1, 1, 1.0);
constraints.push(2, 0, -1.0);
constraints.push(3, 1, -1.0);

let solution = SparseLp::new()
    .solve(&[50.0, 40.0], &constraints, &[1500.0, 1000.0, 0.0, 0.0])
    .unwrap();

// Optimal value is 28750, achieved at x = 375 and y = 250.
assert_eq!(solution.status(), Status::Optimal);
assert!((solution[0] - 375.0).abs() < 1e-6);
assert!((solution[1] - 250.0).abs() < 1e-6);
assert!((solution.objective() - 28750.0).abs() < 1e-6);
```
*/

#![deny(missing_debug_implementations, missing_docs)]

mod solver;
mod sparse;

use solver::Solver;

/// How a solve attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The returned point maximizes the objective over the feasible region.
    Optimal,
    /// The constraints cannot all be satisfied; the returned point is zeros.
    Infeasible,
    /// The objective grows without bound over the feasible region.
    Unbounded,
    /// The solver ran out of its iteration budget; the returned point is the
    /// best iterate found and must not be treated as optimal.
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Status::Optimal => "optimal",
            Status::Infeasible => "infeasible",
            Status::Unbounded => "unbounded",
            Status::Error => "not converged",
        };
        msg.fmt(f)
    }
}

/// An input problem rejected before any solving work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedInput {
    /// The objective length doesn't match the constraint matrix column count.
    ObjectiveLength {
        /// Column count of the constraint matrix.
        expected: usize,
        /// Length of the objective slice.
        found: usize,
    },
    /// The bounds length doesn't match the constraint matrix row count.
    BoundsLength {
        /// Row count of the constraint matrix.
        expected: usize,
        /// Length of the bounds slice.
        found: usize,
    },
    /// A coordinate triple points outside the matrix dimensions.
    EntryOutOfRange {
        /// Row index of the offending triple.
        row: usize,
        /// Column index of the offending triple.
        col: usize,
    },
    /// An objective, bound or matrix value is NaN or infinite.
    NotFinite,
}

impl std::fmt::Display for MalformedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MalformedInput::ObjectiveLength { expected, found } => write!(
                f,
                "objective has {} coefficients but the matrix has {} columns",
                found, expected,
            ),
            MalformedInput::BoundsLength { expected, found } => write!(
                f,
                "bounds have {} entries but the matrix has {} rows",
                found, expected,
            ),
            MalformedInput::EntryOutOfRange { row, col } => {
                write!(f, "matrix entry ({}, {}) is out of range", row, col)
            }
            MalformedInput::NotFinite => "input contains a NaN or infinite value".fmt(f),
        }
    }
}

impl std::error::Error for MalformedInput {}

/// A sparse constraint matrix in coordinate form.
///
/// Triples may be pushed in any order; rows need not be contiguous. Several
/// triples for the same `(row, col)` location are allowed and are **summed**
/// when the matrix is indexed for solving, so coefficients can be accumulated
/// incrementally. Out-of-range triples are representable but rejected by
/// [`SparseLp::solve`].
#[derive(Clone, Debug)]
pub struct CooMatrix {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl CooMatrix {
    /// Create an empty `rows × cols` matrix.
    pub fn new(rows: usize, cols: usize) -> CooMatrix {
        CooMatrix {
            rows,
            cols,
            entries: vec![],
        }
    }

    /// Create a matrix from dense row data, skipping zero entries.
    ///
    /// # Panics
    ///
    /// Panics if the rows do not all have the same length.
    pub fn from_dense(data: &[Vec<f64>]) -> CooMatrix {
        let cols = data.first().map_or(0, |row| row.len());
        let mut mat = CooMatrix::new(data.len(), cols);
        for (r, row) in data.iter().enumerate() {
            assert_eq!(row.len(), cols, "ragged row {}", r);
            for (c, &val) in row.iter().enumerate() {
                if val != 0.0 {
                    mat.push(r, c, val);
                }
            }
        }
        mat
    }

    /// Record a coefficient at `(row, col)`.
    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }

    /// Number of rows (constraints).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (variables).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of recorded triples, duplicates included.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over the recorded `(row, col, value)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Row-indexed form for the solver; duplicate locations are summed by the
    /// triplet conversion. Only valid after the triples passed validation.
    fn to_csr(&self) -> sprs::CsMatI<f64, usize> {
        let mut tri = sprs::TriMatI::<f64, usize>::new((self.rows, self.cols));
        for &(row, col, value) in &self.entries {
            tri.add_triplet(row, col, value);
        }
        tri.to_csr()
    }
}

/// Knobs for a solve call.
#[derive(Clone, Copy, Debug)]
pub struct SolveOptions {
    /// Cap on simplex pivots across both phases. When exhausted the solve
    /// returns [`Status::Error`] with the best iterate instead of looping
    /// indefinitely.
    pub max_iterations: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            max_iterations: 100_000,
        }
    }
}

/// Phase notifications for an optional progress callback.
///
/// Purely informational; observing them never changes solver behavior or
/// results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Problem variables are validated and counted.
    VariablesSetUp {
        /// Number of decision variables.
        count: usize,
    },
    /// The objective has been accepted.
    ObjectiveSetUp,
    /// The constraint rows are validated and indexed.
    ConstraintsSetUp {
        /// Number of constraint rows.
        count: usize,
    },
    /// Pivoting is about to start.
    SolveStarted,
    /// The solve finished with the given status.
    SolveFinished {
        /// Final status of the solve.
        status: Status,
    },
}

/// Values of a solved (or best-effort) problem.
#[derive(Clone)]
pub struct Solution {
    status: Status,
    values: Vec<f64>,
    objective: f64,
    iterations: usize,
}

impl std::fmt::Debug for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only printing the length here because actual data is probably huge.
        f.debug_struct("Solution")
            .field("status", &self.status)
            .field("num_vars", &self.values.len())
            .field("objective", &self.objective)
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl Solution {
    /// Assemble a solution; meant for [`Backend`] implementations.
    pub fn new(status: Status, values: Vec<f64>, objective: f64, iterations: usize) -> Solution {
        Solution {
            status,
            values,
            objective,
            iterations,
        }
    }

    /// How the solve ended. Callers must branch on this before trusting the
    /// values: [`Status::Error`] values are a best effort, not an optimum.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Variable values, one per objective coefficient.
    ///
    /// Note that you can use indexing operations to get individual values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Objective value `f·x` of the returned point.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Simplex pivots performed across both phases.
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

impl std::ops::Index<usize> for Solution {
    type Output = f64;

    fn index(&self, var: usize) -> &Self::Output {
        &self.values[var]
    }
}

/// A solving engine behind [`SparseLp`].
///
/// The default is the built-in two-phase revised simplex; implementing this
/// trait substitutes a different engine (say, an LU-factorizing one) without
/// changing the public contract. `solve` is only ever called with inputs that
/// passed validation.
pub trait Backend {
    /// Maximize `objective·x` subject to `constraints·x <= bounds`.
    fn solve(
        &mut self,
        objective: &[f64],
        constraints: &CooMatrix,
        bounds: &[f64],
        options: &SolveOptions,
    ) -> Solution;
}

/// The built-in two-phase revised simplex engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimplexBackend;

impl Backend for SimplexBackend {
    fn solve(
        &mut self,
        objective: &[f64],
        constraints: &CooMatrix,
        bounds: &[f64],
        options: &SolveOptions,
    ) -> Solution {
        log::debug!(
            "solving {}x{} problem with {} coordinate triples",
            constraints.rows(),
            constraints.cols(),
            constraints.nnz(),
        );

        // Build the row index once; every per-pivot row access goes through it.
        let csr = constraints.to_csr();
        let (status, values, iterations) =
            Solver::new(objective, &csr, bounds, options.max_iterations).solve();
        let objective_val = values
            .iter()
            .zip(objective)
            .map(|(&x, &f)| x * f)
            .sum();
        Solution::new(status, values, objective_val, iterations)
    }
}

/// A sparse linear-program solver.
///
/// Holds solve configuration and an optional progress callback; the problem
/// data itself is borrowed per [`solve`](SparseLp::solve) call and not
/// retained.
pub struct SparseLp<B: Backend = SimplexBackend> {
    backend: B,
    options: SolveOptions,
    progress: Option<Box<dyn FnMut(ProgressEvent)>>,
}

impl<B: Backend> std::fmt::Debug for SparseLp<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseLp")
            .field("options", &self.options)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SparseLp<SimplexBackend> {
    /// A solver with the built-in simplex backend and default options.
    pub fn new() -> SparseLp<SimplexBackend> {
        SparseLp::with_backend(SimplexBackend)
    }
}

impl Default for SparseLp<SimplexBackend> {
    fn default() -> Self {
        SparseLp::new()
    }
}

impl<B: Backend> SparseLp<B> {
    /// A solver driving the given backend.
    pub fn with_backend(backend: B) -> SparseLp<B> {
        SparseLp {
            backend,
            options: SolveOptions::default(),
            progress: None,
        }
    }

    /// Replace the solve options.
    pub fn with_options(mut self, options: SolveOptions) -> SparseLp<B> {
        self.options = options;
        self
    }

    /// Attach a progress callback receiving [`ProgressEvent`]s.
    pub fn on_progress<F>(mut self, callback: F) -> SparseLp<B>
    where
        F: FnMut(ProgressEvent) + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    fn emit(&mut self, event: ProgressEvent) {
        if let Some(callback) = &mut self.progress {
            callback(event);
        }
    }

    /// Maximize `objective·x` subject to `constraints·x <= bounds` with all
    /// variables unbounded in sign.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput`] when the dimensions disagree, a triple is
    /// out of range or any value is not finite; nothing is solved in that
    /// case. Infeasibility, unboundedness and non-convergence are not errors:
    /// they are reported through [`Solution::status`].
    pub fn solve(
        &mut self,
        objective: &[f64],
        constraints: &CooMatrix,
        bounds: &[f64],
    ) -> Result<Solution, MalformedInput> {
        validate(objective, constraints, bounds)?;

        self.emit(ProgressEvent::VariablesSetUp {
            count: objective.len(),
        });
        self.emit(ProgressEvent::ObjectiveSetUp);
        self.emit(ProgressEvent::ConstraintsSetUp {
            count: bounds.len(),
        });
        self.emit(ProgressEvent::SolveStarted);

        let solution = self
            .backend
            .solve(objective, constraints, bounds, &self.options);

        self.emit(ProgressEvent::SolveFinished {
            status: solution.status(),
        });
        Ok(solution)
    }
}

fn validate(
    objective: &[f64],
    constraints: &CooMatrix,
    bounds: &[f64],
) -> Result<(), MalformedInput> {
    if objective.len() != constraints.cols() {
        return Err(MalformedInput::ObjectiveLength {
            expected: constraints.cols(),
            found: objective.len(),
        });
    }
    if bounds.len() != constraints.rows() {
        return Err(MalformedInput::BoundsLength {
            expected: constraints.rows(),
            found: bounds.len(),
        });
    }
    if objective.iter().chain(bounds).any(|v| !v.is_finite()) {
        return Err(MalformedInput::NotFinite);
    }
    for (row, col, value) in constraints.iter() {
        if row >= constraints.rows() || col >= constraints.cols() {
            return Err(MalformedInput::EntryOutOfRange { row, col });
        }
        if !value.is_finite() {
            return Err(MalformedInput::NotFinite);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn example_problem() -> (Vec<f64>, CooMatrix, Vec<f64>) {
        // maximize 50x + 40y
        // s.t. 2x + 3y <= 1500, 2x + y <= 1000, x >= 0, y >= 0
        let constraints = CooMatrix::from_dense(&[
            vec![2.0, 3.0],
            vec![2.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ]);
        (
            vec![50.0, 40.0],
            constraints,
            vec![1500.0, 1000.0, 0.0, 0.0],
        )
    }

    #[test]
    fn example_problem_optimum() {
        let (f, a, b) = example_problem();
        let sol = SparseLp::new().solve(&f, &a, &b).unwrap();

        assert_eq!(sol.status(), Status::Optimal);
        assert!((sol[0] - 375.0).abs() < 1e-6);
        assert!((sol[1] - 250.0).abs() < 1e-6);
        assert!((sol.objective() - 28750.0).abs() < 1e-6);
    }

    #[test]
    fn solution_satisfies_constraints() {
        let (f, a, b) = example_problem();
        let sol = SparseLp::new().solve(&f, &a, &b).unwrap();

        let mut lhs = vec![0.0; b.len()];
        for (row, col, value) in a.iter() {
            lhs[row] += value * sol[col];
        }
        for (row, (&got, &bound)) in lhs.iter().zip(&b).enumerate() {
            assert!(got <= bound + 1e-6, "row {}: {} > {}", row, got, bound);
        }
    }

    #[test]
    fn repeated_solves_are_identical() {
        let (f, a, b) = example_problem();
        let first = SparseLp::new().solve(&f, &a, &b).unwrap();
        let second = SparseLp::new().solve(&f, &a, &b).unwrap();

        assert_eq!(first.status(), second.status());
        assert_eq!(first.values(), second.values());
        assert_eq!(first.iterations(), second.iterations());
    }

    #[test]
    fn infeasible_problem() {
        // x <= 0 and x >= 1
        let mut a = CooMatrix::new(2, 1);
        a.push(0, 0, 1.0);
        a.push(1, 0, -1.0);

        let sol = SparseLp::new().solve(&[1.0], &a, &[0.0, -1.0]).unwrap();
        assert_eq!(sol.status(), Status::Infeasible);
        assert_eq!(sol.values(), &[0.0]);
    }

    #[test]
    fn unbounded_problem() {
        // maximize x with no upper-bounding row
        let mut a = CooMatrix::new(1, 1);
        a.push(0, 0, -1.0);

        let sol = SparseLp::new().solve(&[1.0], &a, &[0.0]).unwrap();
        assert_eq!(sol.status(), Status::Unbounded);

        // no constraints at all
        let empty = CooMatrix::new(0, 1);
        let sol = SparseLp::new().solve(&[1.0], &empty, &[]).unwrap();
        assert_eq!(sol.status(), Status::Unbounded);
    }

    #[test]
    fn free_variable_reaches_negative_optimum() {
        // maximize -x subject to x >= -3, optimum at x = -3
        let mut a = CooMatrix::new(1, 1);
        a.push(0, 0, -1.0);

        let sol = SparseLp::new().solve(&[-1.0], &a, &[3.0]).unwrap();
        assert_eq!(sol.status(), Status::Optimal);
        assert!((sol[0] + 3.0).abs() < 1e-6);
        assert!((sol.objective() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_problem_reaches_optimum() {
        // Beale's instance: the most-negative entering rule loops through
        // degenerate bases at the origin until the lowest-index fallback
        // kicks in.
        // maximize 10a - 57b - 9c - 24d
        // s.t. 0.5a - 5.5b - 2.5c + 9d <= 0
        //      0.5a - 1.5b - 0.5c +  d <= 0
        //      a <= 1, all variables >= 0
        let constraints = CooMatrix::from_dense(&[
            vec![0.5, -5.5, -2.5, 9.0],
            vec![0.5, -1.5, -0.5, 1.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![-1.0, 0.0, 0.0, 0.0],
            vec![0.0, -1.0, 0.0, 0.0],
            vec![0.0, 0.0, -1.0, 0.0],
            vec![0.0, 0.0, 0.0, -1.0],
        ]);
        let f = [10.0, -57.0, -9.0, -24.0];
        let b = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];

        let sol = SparseLp::new().solve(&f, &constraints, &b).unwrap();
        assert_eq!(sol.status(), Status::Optimal);
        assert!((sol.objective() - 1.0).abs() < 1e-6);
        assert!((sol[0] - 1.0).abs() < 1e-6);
        assert!((sol[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_triples_are_summed() {
        // two (0, 0) triples accumulate to 2x <= 4, so x stops at 2
        let mut a = CooMatrix::new(2, 1);
        a.push(0, 0, 1.0);
        a.push(0, 0, 1.0);
        a.push(1, 0, -1.0);
        assert_eq!(a.nnz(), 3);

        let sol = SparseLp::new().solve(&[1.0], &a, &[4.0, 0.0]).unwrap();
        assert_eq!(sol.status(), Status::Optimal);
        assert!((sol[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let mut a = CooMatrix::new(1, 2);
        a.push(0, 2, 1.0); // col == cols()

        assert_eq!(
            SparseLp::new().solve(&[1.0, 1.0], &a, &[1.0]).unwrap_err(),
            MalformedInput::EntryOutOfRange { row: 0, col: 2 },
        );

        let a = CooMatrix::new(1, 2);
        assert_eq!(
            SparseLp::new().solve(&[1.0], &a, &[1.0]).unwrap_err(),
            MalformedInput::ObjectiveLength {
                expected: 2,
                found: 1,
            },
        );
        assert_eq!(
            SparseLp::new().solve(&[1.0, 1.0], &a, &[]).unwrap_err(),
            MalformedInput::BoundsLength {
                expected: 1,
                found: 0,
            },
        );
        assert_eq!(
            SparseLp::new().solve(&[f64::NAN, 1.0], &a, &[1.0]).unwrap_err(),
            MalformedInput::NotFinite,
        );
    }

    #[test]
    fn exhausted_iteration_budget_is_an_error() {
        let (f, a, b) = example_problem();
        let options = SolveOptions { max_iterations: 1 };
        let sol = SparseLp::new()
            .with_options(options)
            .solve(&f, &a, &b)
            .unwrap();

        // the optimum needs two pivots, so one is not enough
        assert_eq!(sol.status(), Status::Error);
        assert_eq!(sol.values().len(), 2);
        assert_eq!(sol.iterations(), 1);
    }

    #[test]
    fn progress_events_in_order() {
        let events = Rc::new(RefCell::new(vec![]));
        let sink = Rc::clone(&events);

        let (f, a, b) = example_problem();
        let sol = SparseLp::new()
            .on_progress(move |event| sink.borrow_mut().push(event))
            .solve(&f, &a, &b)
            .unwrap();
        assert_eq!(sol.status(), Status::Optimal);

        assert_eq!(
            *events.borrow(),
            vec![
                ProgressEvent::VariablesSetUp { count: 2 },
                ProgressEvent::ObjectiveSetUp,
                ProgressEvent::ConstraintsSetUp { count: 4 },
                ProgressEvent::SolveStarted,
                ProgressEvent::SolveFinished {
                    status: Status::Optimal,
                },
            ],
        );
    }

    #[test]
    fn empty_problems() {
        // no variables, satisfiable rows
        let a = CooMatrix::new(1, 0);
        let sol = SparseLp::new().solve(&[], &a, &[5.0]).unwrap();
        assert_eq!(sol.status(), Status::Optimal);
        assert!(sol.values().is_empty());
        assert_eq!(sol.objective(), 0.0);

        // no variables, unsatisfiable row (0 <= -1)
        let a = CooMatrix::new(1, 0);
        let sol = SparseLp::new().solve(&[], &a, &[-1.0]).unwrap();
        assert_eq!(sol.status(), Status::Infeasible);

        // zero objective is trivially optimal at the origin
        let a = CooMatrix::new(0, 2);
        let sol = SparseLp::new().solve(&[0.0, 0.0], &a, &[]).unwrap();
        assert_eq!(sol.status(), Status::Optimal);
        assert_eq!(sol.values(), &[0.0, 0.0]);
    }

    #[test]
    fn custom_backend_is_used() {
        struct Fixed;

        impl Backend for Fixed {
            fn solve(
                &mut self,
                objective: &[f64],
                _constraints: &CooMatrix,
                _bounds: &[f64],
                _options: &SolveOptions,
            ) -> Solution {
                Solution::new(Status::Error, vec![0.0; objective.len()], 0.0, 0)
            }
        }

        let (f, a, b) = example_problem();
        let sol = SparseLp::with_backend(Fixed).solve(&f, &a, &b).unwrap();
        assert_eq!(sol.status(), Status::Error);
        assert_eq!(sol.iterations(), 0);
    }
}
