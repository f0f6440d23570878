//! Adapters for rustsat solver backends
//!
//! Wraps any incremental rustsat-compatible solver behind the
//! [`SatSolver`] trait. The batsat backend is the default choice of the
//! finite model builder.

use super::{SatSolver, SolveStatus};
use rustc_hash::FxHashSet;
use rustsat::solvers::{Solve, SolveIncremental, SolverResult};
use rustsat::types::{Clause, Lit, TernaryVal, Var};

/// Adapter implementing [`SatSolver`] on top of rustsat's solver traits
///
/// # Example
///
/// ```ignore
/// use rustsat_batsat::BasicSolver;
/// let solver = RustSatAdapter::new(BasicSolver::default());
/// ```
pub struct RustSatAdapter<S> {
    solver: S,
    num_vars: u32,
    num_clauses: u32,
    failed: Vec<i32>,
}

impl<S> RustSatAdapter<S> {
    /// Creates a new adapter wrapping the given solver
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            num_vars: 0,
            num_clauses: 0,
            failed: Vec::new(),
        }
    }
}

impl<S: Default> Default for RustSatAdapter<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

fn to_rustsat_lit(lit: i32) -> Lit {
    let var_idx = (lit.unsigned_abs()) - 1;
    debug_assert!(var_idx <= Var::MAX_IDX);
    let var = Var::new(var_idx);
    if lit > 0 {
        var.pos_lit()
    } else {
        var.neg_lit()
    }
}

impl<S: Solve + SolveIncremental> SatSolver for RustSatAdapter<S> {
    fn ensure_var_count(&mut self, n: u32) {
        // rustsat backends create variables on demand; track the count
        // for the interface
        self.num_vars = self.num_vars.max(n);
    }

    fn add_clause(&mut self, lits: &[i32]) {
        let lits_vec: Vec<Lit> = lits.iter().map(|&l| to_rustsat_lit(l)).collect();
        let clause = Clause::from(&lits_vec[..]);
        self.num_clauses += 1;
        let _ = self.solver.add_clause(clause);
    }

    fn solve_under_assumptions(&mut self, assumptions: &[i32]) -> SolveStatus {
        let assumps: Vec<Lit> = assumptions.iter().map(|&l| to_rustsat_lit(l)).collect();
        self.failed.clear();
        match self.solver.solve_assumps(&assumps) {
            Ok(SolverResult::Sat) => SolveStatus::Satisfiable,
            _ => {
                // normalise the backend core to the subset of the passed
                // assumptions that were used, independent of the core's
                // sign convention
                if let Ok(core) = self.solver.core() {
                    let core_vars: FxHashSet<u32> =
                        core.iter().map(|l| l.var().idx() as u32).collect();
                    self.failed = assumptions
                        .iter()
                        .copied()
                        .filter(|l| core_vars.contains(&(l.unsigned_abs() - 1)))
                        .collect();
                }
                SolveStatus::Unsatisfiable
            }
        }
    }

    fn failed_assumptions(&self) -> &[i32] {
        &self.failed
    }

    fn true_in_assignment(&self, lit: i32) -> bool {
        let var = Var::new(lit.unsigned_abs() - 1);
        let truth = match self.solver.solution(var) {
            Ok(assignment) => matches!(assignment.var_value(var), TernaryVal::True),
            Err(_) => false,
        };
        if lit > 0 {
            truth
        } else {
            !truth
        }
    }

    fn num_variables(&self) -> u32 {
        self.num_vars
    }

    fn num_clauses(&self) -> u32 {
        self.num_clauses
    }
}
