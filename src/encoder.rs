//! Clause and axiom emission
//!
//! Walks the flat clauses and emits one SAT clause per grounding, plus the
//! functional-definition, totality and symmetry-breaking axioms. Emitted
//! clauses are ephemeral: they are buffered in a [`ClauseSet`], handed to
//! the SAT solver once, and destroyed before the next encoding epoch.

use crate::clause::{FlatClause, FlatLiteral, GroundClause};
use crate::layout::{lit, VarLayout};
use crate::sig::{DistSort, Signature, SortedSignature, SrcSort};
use crate::symmetry::SymmetryOrdering;
use rand::seq::SliceRandom;
use rand::Rng;

/// A buffer of SAT clauses for one encoding epoch
///
/// Duplicate literals are removed on insertion and tautological clauses
/// are dropped.
#[derive(Debug, Default)]
pub struct ClauseSet {
    clauses: Vec<Vec<i32>>,
}

impl ClauseSet {
    /// Creates an empty clause set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause, normalising literals; tautologies are dropped
    pub fn push(&mut self, mut lits: Vec<i32>) {
        lits.sort_unstable_by_key(|l| (l.abs(), *l));
        lits.dedup();
        for pair in lits.windows(2) {
            if pair[0] == -pair[1] {
                return;
            }
        }
        self.clauses.push(lits);
    }

    /// Number of buffered clauses
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// True when no clauses are buffered
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The buffered clauses
    pub fn clauses(&self) -> &[Vec<i32>] {
        &self.clauses
    }

    /// Iterates the buffered clauses as literal slices
    pub fn iter(&self) -> impl Iterator<Item = &[i32]> {
        self.clauses.iter().map(|c| c.as_slice())
    }

    /// Permutes the clause order for search diversity
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.clauses.shuffle(rng);
    }

    /// Drops all buffered clauses
    pub fn clear(&mut self) {
        self.clauses.clear();
    }
}

/// An odometer over the product of `1..=max` ranges, right-most digit
/// fastest
///
/// Produces no tuples when any range is empty.
#[derive(Debug)]
pub struct Odometer {
    digits: Vec<usize>,
    maxes: Vec<usize>,
}

impl Odometer {
    /// Creates an odometer positioned just before the first tuple
    pub fn new(maxes: Vec<usize>) -> Self {
        let mut digits = vec![1; maxes.len()];
        if let Some(last) = digits.last_mut() {
            *last = 0;
        }
        Self { digits, maxes }
    }

    /// Advances to the next tuple; `false` when exhausted
    pub fn advance(&mut self) -> bool {
        if self.maxes.iter().any(|&m| m == 0) {
            return false;
        }
        for i in (0..self.digits.len()).rev() {
            if self.digits[i] == self.maxes[i] {
                self.digits[i] = 1;
            } else {
                self.digits[i] += 1;
                return true;
            }
        }
        false
    }

    /// The current tuple
    pub fn values(&self) -> &[usize] {
        &self.digits
    }
}

/// Emits the SAT clauses of one encoding epoch
pub struct Encoder<'a> {
    sig: &'a Signature,
    sorted: &'a SortedSignature,
    layout: &'a VarLayout,
    del_f: &'a [bool],
    contour: bool,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder over the given layout
    pub fn new(
        sig: &'a Signature,
        sorted: &'a SortedSignature,
        layout: &'a VarLayout,
        del_f: &'a [bool],
        contour: bool,
    ) -> Self {
        Self {
            sig,
            sorted,
            layout,
            del_f,
            contour,
        }
    }

    /// Emits the propositional ground clauses with the empty grounding
    pub fn ground_clauses(&self, out: &mut ClauseSet, clauses: &[GroundClause]) {
        for clause in clauses {
            let lits = clause
                .literals
                .iter()
                .map(|l| self.layout.pred_lit(self.sorted, l.pred, &[], l.polarity))
                .collect();
            out.push(lits);
        }
    }

    /// Emits every grounding of every non-ground clause
    ///
    /// Clauses without a variable-sort map are trivially satisfiable and
    /// skipped. Each instance carries the marker literals that tie it to
    /// the sizes of the non-monotonic distinct sorts it touches.
    pub fn instances(
        &self,
        out: &mut ClauseSet,
        clauses: &[FlatClause],
        var_sorts: &[Option<Vec<SrcSort>>],
    ) {
        let src_sizes = self.layout.src_sizes();
        for (clause, vsorts) in clauses.iter().zip(var_sorts.iter()) {
            let Some(vsorts) = vsorts.as_ref() else {
                continue;
            };
            if clause.var_count == 0 {
                continue;
            }

            let max_var_size: Vec<usize> = vsorts
                .iter()
                .map(|&srt| src_sizes[srt].min(self.sorted.sort_bounds[srt]))
                .collect();

            // flag scheme: the touched non-monotonic sorts do not depend
            // on the grounding
            let mut flag_sorts: Vec<DistSort> = Vec::new();
            if !self.contour {
                let mut touched = vec![false; self.sorted.distinct_sorts];
                for &srt in vsorts {
                    let d = self.sorted.parents[srt];
                    if !self.sorted.monotonic_sorts[d] {
                        touched[d] = true;
                    }
                }
                flag_sorts = touched
                    .iter()
                    .enumerate()
                    .filter(|(_, &t)| t)
                    .map(|(d, _)| d)
                    .collect();
            }

            let mut odo = Odometer::new(max_var_size);
            'instances: while odo.advance() {
                let grounding = odo.values();
                let mut lits: Vec<i32> = Vec::new();

                if self.contour {
                    let mut maxes = vec![0usize; self.sorted.distinct_sorts];
                    for (v, &srt) in vsorts.iter().enumerate() {
                        let d = self.sorted.parents[srt];
                        if self.sorted.monotonic_sorts[d] {
                            continue;
                        }
                        maxes[d] = maxes[d].max(grounding[v]);
                    }
                    for (d, &val) in maxes.iter().enumerate() {
                        if val > 1 {
                            lits.push(lit(self.layout.level_marker(d, val - 2), false));
                        }
                    }
                } else {
                    for &d in &flag_sorts {
                        lits.push(lit(self.layout.instances_marker(d), false));
                    }
                }

                for literal in &clause.literals {
                    match literal {
                        FlatLiteral::VarEq { polarity, x, y, .. } => {
                            let equal = grounding[*x] == grounding[*y];
                            if *polarity == equal {
                                // the literal is true under this grounding
                                continue 'instances;
                            }
                            // the literal is false: omit it
                        }
                        FlatLiteral::FunEq {
                            polarity,
                            fun,
                            args,
                            res,
                        } => {
                            let mut tuple: Vec<usize> =
                                args.iter().map(|&v| grounding[v]).collect();
                            tuple.push(grounding[*res]);
                            lits.push(self.layout.fun_lit(self.sorted, *fun, &tuple, *polarity));
                        }
                        FlatLiteral::Pred {
                            polarity,
                            pred,
                            args,
                        } => {
                            let vals: Vec<usize> = args.iter().map(|&v| grounding[v]).collect();
                            lits.push(self.layout.pred_lit(self.sorted, *pred, &vals, *polarity));
                        }
                    }
                }
                out.push(lits);
            }
        }
    }

    /// Emits `~(f(xs) = y) | ~(f(xs) = z)` for every argument tuple and
    /// every pair of result values `y < z`
    pub fn functional_definitions(&self, out: &mut ClauseSet) {
        let src_sizes = self.layout.src_sizes();
        for f in 0..self.sig.functions() {
            if self.del_f[f] {
                continue;
            }
            let arity = self.sig.function(f).arity;
            let fsig = &self.sorted.function_signatures[f];

            let ret_srt = fsig[arity];
            let max_ret = src_sizes[ret_srt].min(self.sorted.sort_bounds[ret_srt]);

            // tuple layout: [y, z, x1, .., xn]
            let mut maxes = vec![max_ret, max_ret];
            for i in 0..arity {
                let srt = fsig[i];
                maxes.push(src_sizes[srt].min(self.sorted.sort_bounds[srt]));
            }

            let mut odo = Odometer::new(maxes);
            while odo.advance() {
                let g = odo.values();
                if g[0] >= g[1] {
                    continue;
                }
                let mut tuple: Vec<usize> = g[2..].to_vec();
                tuple.push(g[0]);
                let first = self.layout.fun_lit(self.sorted, f, &tuple, false);
                tuple[arity] = g[1];
                let second = self.layout.fun_lit(self.sorted, f, &tuple, false);
                out.push(vec![first, second]);
            }
        }
    }

    /// Emits the totality axioms, and in contour mode the per-sort
    /// staircase clauses
    ///
    /// In contour mode every non-monotonic result sort gets one totality
    /// version per candidate cardinality, the top version marked with the
    /// sort's largest staircase marker; the flag scheme emits a single
    /// version guarded by the sort's totality flag.
    pub fn totality_definitions(&self, out: &mut ClauseSet, dist_sizes: &[usize]) {
        let src_sizes = self.layout.src_sizes();

        if self.contour {
            for (d, &size) in dist_sizes.iter().enumerate() {
                for j in 0..size.saturating_sub(1) {
                    out.push(vec![
                        lit(self.layout.level_marker(d, j), true),
                        lit(self.layout.level_marker(d, j + 1), false),
                    ]);
                }
            }
        }

        for f in 0..self.sig.functions() {
            if self.del_f[f] {
                continue;
            }
            let arity = self.sig.function(f).arity;
            let fsig = &self.sorted.function_signatures[f];

            let ret_srt = fsig[arity];
            let d_ret = self.sorted.parents[ret_srt];
            let max_ret = src_sizes[ret_srt].min(self.sorted.sort_bounds[ret_srt]);
            let first_version = if !self.contour || self.sorted.monotonic_sorts[d_ret] {
                max_ret
            } else {
                1
            };

            if arity == 0 {
                for i in first_version..=max_ret {
                    let mut lits: Vec<i32> = (1..=i)
                        .map(|c| self.layout.fun_lit(self.sorted, f, &[c], true))
                        .collect();
                    lits.push(self.version_marker(d_ret, i, max_ret, dist_sizes));
                    out.push(lits);
                }
                continue;
            }

            let maxes: Vec<usize> = (0..arity)
                .map(|i| {
                    let srt = fsig[i];
                    src_sizes[srt].min(self.sorted.sort_bounds[srt])
                })
                .collect();

            let mut odo = Odometer::new(maxes);
            while odo.advance() {
                let args = odo.values();
                for i in first_version..=max_ret {
                    let mut lits: Vec<i32> = Vec::with_capacity(i + 1);
                    let mut tuple: Vec<usize> = args.to_vec();
                    tuple.push(0);
                    for c in 1..=i {
                        tuple[arity] = c;
                        lits.push(self.layout.fun_lit(self.sorted, f, &tuple, true));
                    }
                    lits.push(self.version_marker(d_ret, i, max_ret, dist_sizes));
                    out.push(lits);
                }
            }
        }
    }

    fn version_marker(
        &self,
        d_ret: DistSort,
        version: usize,
        max_ret: usize,
        dist_sizes: &[usize],
    ) -> i32 {
        if self.contour {
            // the top version carries the largest marker even when the
            // result sort is bounded below the sort size
            let idx = if version == max_ret {
                dist_sizes[d_ret] - 1
            } else {
                version - 1
            };
            lit(self.layout.level_marker(d_ret, idx), true)
        } else {
            lit(self.layout.totality_marker(d_ret), false)
        }
    }

    /// Emits restricted-totality and canonicity axioms for every sort and
    /// every size up to the sort's current size
    pub fn symmetry_axioms(
        &self,
        out: &mut ClauseSet,
        ordering: &SymmetryOrdering,
        symmetry_ratio: usize,
    ) {
        for s in 0..self.sorted.sorts {
            let size = self.layout.src_sizes()[s];
            let terms = ordering.terms(s);
            for m in 1..=size {
                self.ordering_axiom(out, m, terms);
                self.canonicity_axioms(out, m, terms, size, symmetry_ratio);
            }
        }
    }

    // element m of the enumeration can only take one of the values 1..=m
    fn ordering_axiom(
        &self,
        out: &mut ClauseSet,
        m: usize,
        terms: &[crate::symmetry::GroundedTerm],
    ) {
        if terms.len() < m {
            return;
        }
        let gt = &terms[m - 1];
        let arity = gt.grounding.len();
        let mut tuple = gt.grounding.clone();
        tuple.push(0);
        let mut lits = Vec::with_capacity(m);
        for i in 1..=m {
            tuple[arity] = i;
            lits.push(self.layout.fun_lit(self.sorted, gt.fun, &tuple, true));
        }
        out.push(lits);
    }

    // a constant may take value m only if an earlier term took value m-1
    fn canonicity_axioms(
        &self,
        out: &mut ClauseSet,
        m: usize,
        terms: &[crate::symmetry::GroundedTerm],
        max_size: usize,
        symmetry_ratio: usize,
    ) {
        if m <= 1 {
            return;
        }
        let w = (symmetry_ratio * max_size).min(terms.len());
        for i in 1..w {
            let gti = &terms[i];
            if !gti.grounding.is_empty() {
                return;
            }
            let mut lits = vec![self.layout.fun_lit(self.sorted, gti.fun, &[m], false)];
            for gtj in &terms[..i] {
                let mut tuple = gtj.grounding.clone();
                tuple.push(m - 1);
                lits.push(self.layout.fun_lit(self.sorted, gtj.fun, &tuple, true));
            }
            out.push(lits);
        }
    }
}

/// Estimates the number of clause instances the current sizes generate
///
/// The estimate drives the contour growth weight: the product of the
/// per-variable domain sizes, summed over all clauses.
pub fn estimate_instance_count(
    var_sorts: &[Option<Vec<SrcSort>>],
    sorted: &SortedSignature,
    dist_sizes: &[usize],
) -> usize {
    let mut res: usize = 0;
    for vsorts in var_sorts.iter() {
        let Some(vsorts) = vsorts.as_ref() else {
            continue;
        };
        let mut instances: usize = 1;
        for &srt in vsorts {
            let bound = dist_sizes[sorted.parents[srt]].min(sorted.sort_bounds[srt]);
            instances = instances.saturating_mul(bound);
        }
        res = res.saturating_add(instances);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::FlatLiteral;
    use crate::layout::VarLayout;
    use crate::symmetry::WidgetOrder;

    fn setup() -> (Signature, SortedSignature) {
        let mut sig = Signature::new();
        let a = sig.add_function("a", 0);
        let f = sig.add_function("f", 1);
        sig.add_predicate("p", 1);

        let mut sorted = SortedSignature::new(1, 1, vec![0]);
        sorted.function_signatures = vec![vec![0], vec![0, 0]];
        sorted.predicate_signatures = vec![vec![], vec![0]];
        sorted.sorted_constants[0] = vec![a];
        sorted.sorted_functions[0] = vec![f];
        (sig, sorted)
    }

    fn layout(sig: &Signature, sorted: &SortedSignature, size: usize, contour: bool) -> VarLayout {
        VarLayout::build(
            sig,
            sorted,
            &vec![false; sig.functions()],
            &vec![false; sig.predicates()],
            &[size],
            contour,
        )
        .unwrap()
    }

    #[test]
    fn odometer_covers_product() {
        let mut odo = Odometer::new(vec![2, 3]);
        let mut seen = Vec::new();
        while odo.advance() {
            seen.push(odo.values().to_vec());
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![1, 1]);
        assert_eq!(seen[1], vec![1, 2]);
        assert_eq!(seen[5], vec![2, 3]);
    }

    #[test]
    fn odometer_empty_range_is_empty() {
        let mut odo = Odometer::new(vec![2, 0]);
        assert!(!odo.advance());
    }

    #[test]
    fn clause_set_normalises() {
        let mut set = ClauseSet::new();
        set.push(vec![3, -2, 3]);
        assert_eq!(set.clauses()[0], vec![-2, 3]);

        // tautologies are dropped
        set.push(vec![1, -1]);
        assert_eq!(set.len(), 1);

        // empty clauses are kept: they encode unsatisfiable instances
        set.push(vec![]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn variable_equality_polarity_table() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 2, false);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], false);

        // p(x) | x = y: the equal groundings are skipped, the rest keep
        // only the predicate literal
        let clause = crate::clause::FlatClause::new(
            vec![
                FlatLiteral::pred(true, 1, vec![0]),
                FlatLiteral::var_eq(true, 0, 1, 0),
            ],
            2,
        );
        let mut out = ClauseSet::new();
        enc.instances(&mut out, &[clause], &[Some(vec![0, 0])]);

        // groundings (1,2) and (2,1) survive; each clause is the predicate
        // literal plus the instance flag
        assert_eq!(out.len(), 2);
        for c in out.clauses() {
            assert_eq!(c.len(), 2);
        }
    }

    #[test]
    fn negative_variable_equality_skips_equal_groundings() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 2, false);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], false);

        // x != y alone: equal groundings keep only the instance flag
        // once the equality literal is omitted
        let clause = crate::clause::FlatClause::new(
            vec![FlatLiteral::var_eq(false, 0, 1, 0)],
            2,
        );
        let mut out = ClauseSet::new();
        enc.instances(&mut out, &[clause], &[Some(vec![0, 0])]);

        // (1,1) and (2,2) emit, (1,2) and (2,1) are skipped as true
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn functional_definitions_use_ordered_pairs() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 2, false);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], false);

        let mut out = ClauseSet::new();
        enc.functional_definitions(&mut out);

        // constant a: one pair (1,2); f: one pair per argument value
        assert_eq!(out.len(), 1 + 2);
        for c in out.clauses() {
            assert_eq!(c.len(), 2);
            assert!(c.iter().all(|&l| l < 0));
        }
    }

    #[test]
    fn totality_flag_scheme_emits_one_version() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 3, false);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], false);

        let mut out = ClauseSet::new();
        enc.totality_definitions(&mut out, &[3]);

        // one clause for a, one per argument value of f
        assert_eq!(out.len(), 1 + 3);
        // each is the full result range plus the negated totality flag
        for c in out.clauses() {
            assert_eq!(c.len(), 4);
            assert_eq!(c.iter().filter(|&&l| l < 0).count(), 1);
        }
    }

    #[test]
    fn totality_contour_emits_staircase_and_versions() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 2, true);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], true);

        let mut out = ClauseSet::new();
        enc.totality_definitions(&mut out, &[2]);

        // 1 staircase clause, 2 versions for a, 2 versions per argument
        // value of f
        assert_eq!(out.len(), 1 + 2 + 4);
    }

    #[test]
    fn symmetry_axioms_restrict_first_element() {
        let (sig, sorted) = setup();
        let lay = layout(&sig, &sorted, 2, false);
        let enc = Encoder::new(&sig, &sorted, &lay, &[false, false], false);
        let ordering =
            SymmetryOrdering::build(&sig, &sorted, lay.src_sizes(), WidgetOrder::FunctionFirst);

        let mut out = ClauseSet::new();
        enc.symmetry_axioms(&mut out, &ordering, 1);

        // m=1 pins a to value 1
        let first = &out.clauses()[0];
        assert_eq!(first, &vec![lay.fun_lit(&sorted, 0, &[1], true)]);
    }

    #[test]
    fn instance_estimate_multiplies_domains() {
        let (_sig, sorted) = setup();
        let n = estimate_instance_count(&[Some(vec![0, 0])], &sorted, &[3]);
        assert_eq!(n, 9);
    }
}
