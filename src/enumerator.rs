//! Domain-size-assignment enumerators
//!
//! After an unsatisfiable SAT call the failed marker assumptions are
//! distilled into a per-sort *no-good*: a constraint vector proving that
//! any size vector matching it is unsatisfiable. An enumerator consumes
//! no-goods and proposes the next candidate size vector, or reports that
//! none is left.

use crate::sig::DistSort;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Per-sort tag of a no-good entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTag {
    /// Unsatisfiable exactly at this size
    Eq,
    /// Unsatisfiable at this size or below
    Leq,
    /// Unsatisfiable at this size or above
    Geq,
    /// Don't-care; remembers the size the no-good was learned at
    Star,
}

/// A no-good: one `(tag, size)` entry per distinct sort
pub type Nogood = Vec<(ConstraintTag, usize)>;

/// True when a size vector matches a no-good and is therefore known
/// unsatisfiable without re-solving
pub fn nogood_matches(nogood: &Nogood, sizes: &[usize]) -> bool {
    for (j, &(tag, v)) in nogood.iter().enumerate() {
        match tag {
            ConstraintTag::Eq if v != sizes[j] => return false,
            ConstraintTag::Geq if v > sizes[j] => return false,
            ConstraintTag::Leq if v < sizes[j] => return false,
            _ => {}
        }
    }
    true
}

/// Capability interface of the domain-size-assignment enumerators
///
/// The driver is agnostic of the strategy behind it.
pub trait DsaEnumerator {
    /// Prepares the enumerator; `false` means the distinct-sort
    /// constraints are already infeasible and the search cannot start
    fn init(
        &mut self,
        start_size: usize,
        sizes: &[usize],
        constraints: &[(DistSort, DistSort)],
        strict_constraints: &[(DistSort, DistSort)],
    ) -> bool;

    /// Records a no-good learned from a failed SAT call
    fn learn_nogood(&mut self, nogood: Nogood, weight: usize);

    /// Writes the next candidate size vector into `sizes`; `false` when no
    /// candidate is left
    fn increase_model_sizes(&mut self, sizes: &mut [usize], maxes: &[usize]) -> bool;

    /// Whether exhaustion refutes the existence of a finite model for a
    /// problem with this many distinct sorts
    fn is_complete(&self, num_sorts: usize) -> bool;
}

struct Generator {
    vals: Nogood,
    weight: usize,
    seq: usize,
}

// the heap pops the generator of minimum weight, oldest first on ties
impl Ord for Generator {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Generator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Generator {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.seq == other.seq
    }
}

impl Eq for Generator {}

/// The constraint-generator heap enumerator
///
/// Learned no-goods double as generators: the cheapest one is probed with
/// every `+1` increment, candidates matching a retained no-good or
/// violating a distinct-sort constraint are rejected (the latter spawn an
/// artificial child so the search can proceed through the excluded
/// region), and exhausted generators are discarded or archived.
pub struct GeneratorHeapEnumerator {
    keep_old: bool,
    heap: BinaryHeap<Generator>,
    old: Vec<Generator>,
    max_weight: usize,
    next_seq: usize,
    constraints: Vec<(DistSort, DistSort)>,
    strict_constraints: Vec<(DistSort, DistSort)>,
    skipped_some_sizes: bool,
}

impl GeneratorHeapEnumerator {
    /// Creates the enumerator; `keep_old` archives exhausted generators
    /// and keeps consulting them as no-goods
    pub fn new(keep_old: bool) -> Self {
        Self {
            keep_old,
            heap: BinaryHeap::new(),
            old: Vec::new(),
            max_weight: 0,
            next_seq: 0,
            constraints: Vec::new(),
            strict_constraints: Vec::new(),
            skipped_some_sizes: false,
        }
    }

    fn push_generator(&mut self, vals: Nogood, weight: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Generator { vals, weight, seq });
    }

    fn push_artificial(&mut self, sizes: &[usize], first: DistSort, second: DistSort) {
        let mut vals: Nogood = sizes
            .iter()
            .map(|&v| (ConstraintTag::Star, v))
            .collect();
        vals[first].0 = ConstraintTag::Eq;
        vals[second].0 = ConstraintTag::Geq;
        self.max_weight += 1;
        let weight = self.max_weight;
        self.push_generator(vals, weight);
    }
}

impl DsaEnumerator for GeneratorHeapEnumerator {
    fn init(
        &mut self,
        start_size: usize,
        _sizes: &[usize],
        constraints: &[(DistSort, DistSort)],
        strict_constraints: &[(DistSort, DistSort)],
    ) -> bool {
        self.skipped_some_sizes = start_size > 1;
        self.constraints = constraints.to_vec();
        self.strict_constraints = strict_constraints.to_vec();
        true
    }

    fn learn_nogood(&mut self, nogood: Nogood, weight: usize) {
        self.max_weight = self.max_weight.max(weight);
        self.push_generator(nogood, weight);
    }

    fn increase_model_sizes(&mut self, sizes: &mut [usize], maxes: &[usize]) -> bool {
        while let Some(generator) = self.heap.pop() {
            let base: Vec<usize> = generator.vals.iter().map(|&(_, v)| v).collect();

            let mut accepted: Option<Vec<usize>> = None;
            for i in 0..base.len() {
                let mut candidate = base.clone();
                candidate[i] += 1;

                if candidate[i] > maxes[i] {
                    continue;
                }

                // the popped generator is itself a retained no-good
                if nogood_matches(&generator.vals, &candidate)
                    || self
                        .heap
                        .iter()
                        .any(|g| nogood_matches(&g.vals, &candidate))
                {
                    continue;
                }

                if self.keep_old
                    && self.old.iter().any(|g| nogood_matches(&g.vals, &candidate))
                {
                    // generate the child anyway so the search stays
                    // complete beyond the archived region
                    let vals = candidate.iter().map(|&v| (ConstraintTag::Eq, v)).collect();
                    self.max_weight += 1;
                    let weight = self.max_weight;
                    self.push_generator(vals, weight);
                    continue;
                }

                let violated = self
                    .constraints
                    .iter()
                    .copied()
                    .find(|&(a, b)| candidate[a] < candidate[b])
                    .or_else(|| {
                        self.strict_constraints
                            .iter()
                            .copied()
                            .find(|&(a, b)| candidate[a] <= candidate[b])
                    });
                if let Some((a, b)) = violated {
                    self.push_artificial(&candidate, a, b);
                    continue;
                }

                accepted = Some(candidate);
                break;
            }

            if let Some(candidate) = accepted {
                sizes.copy_from_slice(&candidate);
                self.heap.push(generator);
                return true;
            }
            if self.keep_old {
                self.old.push(generator);
            }
        }
        false
    }

    fn is_complete(&self, num_sorts: usize) -> bool {
        !self.skipped_some_sizes && num_sorts < 2
    }
}

#[cfg(feature = "smt")]
pub use smt::SmtEnumerator;

#[cfg(feature = "smt")]
mod smt {
    //! SMT-guided enumeration: one integer variable per distinct sort,
    //! each no-good a disjunction of per-sort comparisons, candidates
    //! minimised by size sum.

    use super::{ConstraintTag, DsaEnumerator, Nogood};
    use crate::sig::DistSort;
    use z3::ast::{Ast, Bool, Int};
    use z3::{Config, Context, SatResult, Solver};

    /// Enumerator backed by an integer-SMT solver
    pub struct SmtEnumerator {
        nogoods: Vec<Nogood>,
        constraints: Vec<(DistSort, DistSort)>,
        strict_constraints: Vec<(DistSort, DistSort)>,
        start_size: usize,
        num_sorts: usize,
        last_weight: usize,
        skipped_some_sizes: bool,
    }

    impl SmtEnumerator {
        /// Creates the enumerator
        pub fn new() -> Self {
            Self {
                nogoods: Vec::new(),
                constraints: Vec::new(),
                strict_constraints: Vec::new(),
                start_size: 1,
                num_sorts: 0,
                last_weight: 0,
                skipped_some_sizes: false,
            }
        }

        fn assert_problem<'c>(&self, ctx: &'c Context, solver: &Solver<'c>) -> Vec<Int<'c>> {
            let vars: Vec<Int> = (0..self.num_sorts)
                .map(|i| Int::new_const(ctx, format!("s{i}")))
                .collect();
            let floor = Int::from_i64(ctx, self.start_size as i64 - 1);
            for v in &vars {
                solver.assert(&v.gt(&floor));
            }
            for &(a, b) in &self.constraints {
                solver.assert(&vars[a].ge(&vars[b]));
            }
            for &(a, b) in &self.strict_constraints {
                solver.assert(&vars[a].gt(&vars[b]));
            }
            for nogood in &self.nogoods {
                let mut parts: Vec<Bool> = Vec::new();
                for (i, &(tag, v)) in nogood.iter().enumerate() {
                    let val = Int::from_i64(ctx, v as i64);
                    match tag {
                        ConstraintTag::Eq => parts.push(vars[i]._eq(&val).not()),
                        ConstraintTag::Leq => parts.push(vars[i].gt(&val)),
                        ConstraintTag::Geq => parts.push(vars[i].lt(&val)),
                        ConstraintTag::Star => {}
                    }
                }
                let refs: Vec<&Bool> = parts.iter().collect();
                solver.assert(&Bool::or(ctx, &refs));
            }
            vars
        }

        fn load_sizes<'c>(model: &z3::Model<'c>, vars: &[Int<'c>], sizes: &mut [usize]) -> usize {
            let mut weight = 0;
            for (i, v) in vars.iter().enumerate() {
                let val = model
                    .eval(v, true)
                    .and_then(|x| x.as_i64())
                    .unwrap_or(1) as usize;
                sizes[i] = val;
                weight += val;
            }
            weight
        }
    }

    impl Default for SmtEnumerator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DsaEnumerator for SmtEnumerator {
        fn init(
            &mut self,
            start_size: usize,
            sizes: &[usize],
            constraints: &[(DistSort, DistSort)],
            strict_constraints: &[(DistSort, DistSort)],
        ) -> bool {
            self.skipped_some_sizes = start_size > 1;
            self.start_size = start_size;
            self.num_sorts = sizes.len();
            self.constraints = constraints.to_vec();
            self.strict_constraints = strict_constraints.to_vec();
            self.last_weight = sizes.len() * start_size;

            if !self.strict_constraints.is_empty() {
                let cfg = Config::new();
                let ctx = Context::new(&cfg);
                let solver = Solver::new(&ctx);
                self.assert_problem(&ctx, &solver);
                if solver.check() == SatResult::Unsat {
                    return false;
                }
            }
            true
        }

        fn learn_nogood(&mut self, nogood: Nogood, _weight: usize) {
            self.nogoods.push(nogood);
        }

        fn increase_model_sizes(&mut self, sizes: &mut [usize], _maxes: &[usize]) -> bool {
            let cfg = Config::new();
            let ctx = Context::new(&cfg);
            let solver = Solver::new(&ctx);
            let vars = self.assert_problem(&ctx, &solver);

            if solver.check() != SatResult::Sat {
                return false;
            }
            let Some(model) = solver.get_model() else {
                return false;
            };
            let weight = Self::load_sizes(&model, &vars, sizes);
            if weight == self.last_weight {
                return true;
            }

            // minimise by the sum of the sizes
            loop {
                solver.push();
                let refs: Vec<&Int> = vars.iter().collect();
                let sum = Int::add(&ctx, &refs);
                sum_eq(&solver, &sum, self.last_weight);
                if solver.check() == SatResult::Sat {
                    if let Some(model) = solver.get_model() {
                        Self::load_sizes(&model, &vars, sizes);
                    }
                    solver.pop(1);
                    return true;
                }
                solver.pop(1);
                self.last_weight += 1;
            }
        }

        fn is_complete(&self, _num_sorts: usize) -> bool {
            !self.skipped_some_sizes
        }
    }

    fn sum_eq<'c>(solver: &Solver<'c>, sum: &Int<'c>, weight: usize) {
        let target = Int::from_i64(sum.get_ctx(), weight as i64);
        solver.assert(&sum._eq(&target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(sizes: &[usize]) -> Nogood {
        sizes.iter().map(|&v| (ConstraintTag::Star, v)).collect()
    }

    #[test]
    fn matching_rejects_without_resolving() {
        let nogood: Nogood = vec![(ConstraintTag::Eq, 2), (ConstraintTag::Geq, 3)];
        assert!(nogood_matches(&nogood, &[2, 3]));
        assert!(nogood_matches(&nogood, &[2, 5]));
        assert!(!nogood_matches(&nogood, &[3, 3]));
        assert!(!nogood_matches(&nogood, &[2, 2]));

        let leq: Nogood = vec![(ConstraintTag::Leq, 4)];
        assert!(leq_holds(&leq, 3));
        assert!(leq_holds(&leq, 4));
        assert!(!leq_holds(&leq, 5));
    }

    fn leq_holds(nogood: &Nogood, size: usize) -> bool {
        nogood_matches(nogood, &[size])
    }

    #[test]
    fn star_nogood_exhausts_the_search() {
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[1], &[], &[]));

        // an all-star no-good says: unsatisfiable at every size
        en.learn_nogood(star(&[1]), 10);
        let mut sizes = vec![1];
        assert!(!en.increase_model_sizes(&mut sizes, &[usize::MAX]));
        assert!(en.is_complete(1));
    }

    #[test]
    fn eq_nogood_allows_growth() {
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[1], &[], &[]));

        en.learn_nogood(vec![(ConstraintTag::Eq, 1)], 10);
        let mut sizes = vec![1];
        assert!(en.increase_model_sizes(&mut sizes, &[usize::MAX]));
        assert_eq!(sizes, vec![2]);
    }

    #[test]
    fn growth_stops_at_the_maximum() {
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[3], &[], &[]));

        en.learn_nogood(vec![(ConstraintTag::Eq, 3)], 10);
        let mut sizes = vec![3];
        assert!(!en.increase_model_sizes(&mut sizes, &[3]));
    }

    #[test]
    fn cheapest_generator_is_probed_first() {
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[1, 1], &[], &[]));

        en.learn_nogood(vec![(ConstraintTag::Eq, 4), (ConstraintTag::Star, 4)], 50);
        en.learn_nogood(vec![(ConstraintTag::Eq, 1), (ConstraintTag::Star, 1)], 10);

        let mut sizes = vec![1, 1];
        assert!(en.increase_model_sizes(&mut sizes, &[10, 10]));
        // grown from the cheap generator at [1, 1], not the one at [4, 4]
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn geq_nogood_blocks_the_whole_upward_cone() {
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[2], &[], &[]));

        en.learn_nogood(vec![(ConstraintTag::Geq, 2)], 10);
        let mut sizes = vec![2];
        assert!(!en.increase_model_sizes(&mut sizes, &[usize::MAX]));
    }

    #[test]
    fn distinct_sort_constraints_are_respected() {
        // size[0] >= size[1]
        let mut en = GeneratorHeapEnumerator::new(false);
        assert!(en.init(1, &[1, 1], &[(0, 1)], &[]));

        en.learn_nogood(
            vec![(ConstraintTag::Eq, 1), (ConstraintTag::Eq, 1)],
            10,
        );
        let mut sizes = vec![1, 1];
        assert!(en.increase_model_sizes(&mut sizes, &[10, 10]));
        assert!(sizes[0] >= sizes[1]);
    }

    #[test]
    fn multi_sort_heap_is_not_complete() {
        let en = GeneratorHeapEnumerator::new(false);
        assert!(en.is_complete(1));
        assert!(!en.is_complete(2));
    }
}
