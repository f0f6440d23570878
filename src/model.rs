//! Extracted finite models
//!
//! On a satisfiable SAT call the assignment is read back as an
//! interpretation over 1-based domains: constants and functions become
//! total maps (up to sort bounds), predicates become truth tables, and
//! symbols eliminated during preprocessing are recovered by evaluating
//! their stored definitions under the interpretation built so far.

use crate::engine::SatSolver;
use crate::layout::VarLayout;
use crate::sig::{
    DefFormula, DeletedSymbols, DistSort, FunId, PredId, Signature, SortedSignature, Term,
};
use crate::encoder::Odometer;
use rustc_hash::FxHashMap;

/// A finite interpretation of the signature
#[derive(Debug, Default)]
pub struct FiniteModel {
    sort_sizes: Vec<usize>,
    constants: FxHashMap<FunId, usize>,
    functions: FxHashMap<FunId, FxHashMap<Vec<usize>, usize>>,
    propositions: FxHashMap<PredId, bool>,
    predicates: FxHashMap<PredId, FxHashMap<Vec<usize>, bool>>,
}

impl FiniteModel {
    /// An empty model with the given distinct-sort sizes
    pub fn empty(sort_sizes: Vec<usize>) -> Self {
        Self {
            sort_sizes,
            ..Self::default()
        }
    }

    /// The domain size of a distinct sort
    pub fn sort_size(&self, d: DistSort) -> usize {
        self.sort_sizes[d]
    }

    /// Number of distinct sorts
    pub fn num_sorts(&self) -> usize {
        self.sort_sizes.len()
    }

    /// The value of a constant, when defined
    pub fn constant(&self, f: FunId) -> Option<usize> {
        self.constants.get(&f).copied()
    }

    /// The value of a function at an argument tuple, when defined
    pub fn function_value(&self, f: FunId, args: &[usize]) -> Option<usize> {
        if args.is_empty() {
            return self.constant(f);
        }
        self.functions.get(&f)?.get(args).copied()
    }

    /// The truth value of a propositional symbol, when defined
    pub fn proposition(&self, p: PredId) -> Option<bool> {
        self.propositions.get(&p).copied()
    }

    /// The truth value of a predicate at an argument tuple, when defined
    pub fn predicate_value(&self, p: PredId, args: &[usize]) -> Option<bool> {
        if args.is_empty() {
            return self.proposition(p);
        }
        self.predicates.get(&p)?.get(args).copied()
    }

    /// Evaluates a ground definition term under the interpretation
    ///
    /// `binding` supplies the values of the definition variables. `None`
    /// when a subterm has no interpretation.
    pub fn evaluate_term(&self, term: &Term, binding: &[usize]) -> Option<usize> {
        match term {
            Term::Var(i) => binding.get(*i).copied(),
            Term::App(f, args) => {
                let vals: Option<Vec<usize>> =
                    args.iter().map(|t| self.evaluate_term(t, binding)).collect();
                let vals = vals?;
                if vals.is_empty() {
                    self.constant(*f)
                } else {
                    self.functions.get(f)?.get(&vals).copied()
                }
            }
        }
    }

    /// Evaluates a ground definition formula under the interpretation
    pub fn evaluate_formula(&self, formula: &DefFormula, binding: &[usize]) -> Option<bool> {
        match formula {
            DefFormula::True => Some(true),
            DefFormula::False => Some(false),
            DefFormula::Lit {
                polarity,
                pred,
                args,
            } => {
                let vals: Option<Vec<usize>> =
                    args.iter().map(|t| self.evaluate_term(t, binding)).collect();
                let vals = vals?;
                let truth = if vals.is_empty() {
                    self.proposition(*pred)?
                } else {
                    *self.predicates.get(pred)?.get(&vals)?
                };
                Some(if *polarity { truth } else { !truth })
            }
            DefFormula::Equal {
                polarity,
                left,
                right,
            } => {
                let l = self.evaluate_term(left, binding)?;
                let r = self.evaluate_term(right, binding)?;
                Some((l == r) == *polarity)
            }
            DefFormula::And(parts) => {
                let mut res = true;
                for p in parts {
                    res &= self.evaluate_formula(p, binding)?;
                }
                Some(res)
            }
            DefFormula::Or(parts) => {
                let mut res = false;
                for p in parts {
                    res |= self.evaluate_formula(p, binding)?;
                }
                Some(res)
            }
            DefFormula::Not(inner) => Some(!self.evaluate_formula(inner, binding)?),
        }
    }
}

/// Reads the SAT assignment back as a finite model
///
/// `dist_sizes` are the (possibly retracted) final domain sizes; the
/// layout still answers variable-id queries with the sizes of the
/// encoding epoch.
#[allow(clippy::too_many_arguments)]
pub(crate) fn extract<S: SatSolver>(
    solver: &S,
    sig: &Signature,
    sorted: &SortedSignature,
    layout: &VarLayout,
    del_f: &[bool],
    del_p: &[bool],
    deleted: &DeletedSymbols,
    dist_sizes: &[usize],
) -> FiniteModel {
    let src_sizes = layout.src_sizes();
    let mut model = FiniteModel::empty(dist_sizes.to_vec());

    // constants
    for f in 0..sig.functions() {
        if sig.function(f).arity > 0 || del_f[f] {
            continue;
        }
        let srt = sorted.function_signatures[f][0];
        for c in 1..=src_sizes[srt] {
            if solver.true_in_assignment(layout.fun_lit(sorted, f, &[c], true)) {
                model.constants.insert(f, c);
                break;
            }
        }
    }

    // functions
    for f in 0..sig.functions() {
        let arity = sig.function(f).arity;
        if arity == 0 || del_f[f] {
            continue;
        }
        let fsig = &sorted.function_signatures[f];
        let maxes: Vec<usize> = (0..arity)
            .map(|i| src_sizes[fsig[i]].min(sorted.sort_bounds[fsig[i]]))
            .collect();
        let ret_srt = fsig[arity];
        let max_ret = src_sizes[ret_srt].min(sorted.sort_bounds[ret_srt]);

        let mut table = FxHashMap::default();
        let mut odo = Odometer::new(maxes);
        while odo.advance() {
            let args = odo.values();
            let mut tuple = args.to_vec();
            tuple.push(0);
            for c in 1..=max_ret {
                tuple[arity] = c;
                if solver.true_in_assignment(layout.fun_lit(sorted, f, &tuple, true)) {
                    table.insert(args.to_vec(), c);
                    break;
                }
                // a tuple may be left without a result under sort bounds
            }
        }
        model.functions.insert(f, table);
    }

    // propositional symbols
    for p in 1..sig.predicates() {
        if sig.predicate(p).arity > 0
            || del_p[p]
            || deleted.partially_deleted_predicates.contains_key(&p)
        {
            continue;
        }
        let truth = solver.true_in_assignment(layout.pred_lit(sorted, p, &[], true));
        model.propositions.insert(p, truth);
    }

    // predicates
    for p in 1..sig.predicates() {
        let arity = sig.predicate(p).arity;
        if arity == 0 || del_p[p] || deleted.partially_deleted_predicates.contains_key(&p) {
            continue;
        }
        let psig = &sorted.predicate_signatures[p];
        let maxes: Vec<usize> = psig
            .iter()
            .map(|&srt| src_sizes[srt].min(sorted.sort_bounds[srt]))
            .collect();

        let mut table = FxHashMap::default();
        let mut odo = Odometer::new(maxes);
        while odo.advance() {
            let args = odo.values();
            let truth = solver.true_in_assignment(layout.pred_lit(sorted, p, args, true));
            table.insert(args.to_vec(), truth);
        }
        model.predicates.insert(p, table);
    }

    // trivial predicates keep their fixed truth value
    for (&p, &truth) in &deleted.trivial_predicates {
        let arity = sig.predicate(p).arity;
        if arity == 0 {
            model.propositions.insert(p, truth);
            continue;
        }
        let table = model.predicates.entry(p).or_default();
        let maxes = definition_domain(sorted, &sorted.predicate_signatures[p], dist_sizes);
        let mut odo = Odometer::new(maxes);
        while odo.advance() {
            table.insert(odo.values().to_vec(), truth);
        }
    }

    // recover eliminated functions, highest id first so later-introduced
    // definitions can reference earlier recovered symbols
    for f in (0..sig.functions()).rev() {
        if !del_f[f] || sig.function(f).usage_cnt == 0 {
            continue;
        }
        let Some(def) = deleted.functions.get(&f) else {
            continue;
        };
        let arity = sig.function(f).arity;
        if arity == 0 {
            if let Some(val) = model.evaluate_term(&def.body, &[]) {
                model.constants.insert(f, val);
            }
            continue;
        }
        let maxes = definition_domain(sorted, &sorted.function_signatures[f][..arity], dist_sizes);
        let mut entries = Vec::new();
        let mut odo = Odometer::new(maxes);
        while odo.advance() {
            let binding = odo.values();
            if let Some(val) = model.evaluate_term(&def.body, binding) {
                entries.push((binding.to_vec(), val));
            }
        }
        model.functions.entry(f).or_default().extend(entries);
    }

    // recover eliminated predicates the same way
    for p in (1..sig.predicates()).rev() {
        let partial = deleted.partially_deleted_predicates.get(&p);
        if (!del_p[p] && partial.is_none()) || deleted.trivial_predicates.contains_key(&p) {
            continue;
        }
        let Some(def) = deleted.predicates.get(&p).or(partial) else {
            continue;
        };
        let arity = sig.predicate(p).arity;
        if arity == 0 {
            let truth = match &def.body {
                DefFormula::True => Some(def.polarity),
                DefFormula::False => Some(!def.polarity),
                body => model
                    .evaluate_formula(body, &[])
                    .map(|v| v == def.polarity),
            };
            if let Some(truth) = truth {
                model.propositions.insert(p, truth);
            }
            continue;
        }
        let maxes = definition_domain(sorted, &sorted.predicate_signatures[p], dist_sizes);
        let mut entries = Vec::new();
        let mut odo = Odometer::new(maxes);
        while odo.advance() {
            let binding = odo.values();
            let truth = match &def.body {
                DefFormula::True => Some(def.polarity),
                DefFormula::False => Some(!def.polarity),
                body => model
                    .evaluate_formula(body, binding)
                    .map(|v| v == def.polarity),
            };
            if let Some(truth) = truth {
                entries.push((binding.to_vec(), truth));
            }
        }
        model.predicates.entry(p).or_default().extend(entries);
    }

    model
}

// eliminated symbols are evaluated over the final distinct-sort domains
fn definition_domain(
    sorted: &SortedSignature,
    arg_sorts: &[usize],
    dist_sizes: &[usize],
) -> Vec<usize> {
    arg_sorts
        .iter()
        .map(|&srt| dist_sizes[sorted.parents[srt]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_successor() -> FiniteModel {
        let mut model = FiniteModel::empty(vec![2]);
        model.constants.insert(0, 1);
        let mut table = FxHashMap::default();
        table.insert(vec![1], 2);
        table.insert(vec![2], 1);
        model.functions.insert(1, table);
        let mut p = FxHashMap::default();
        p.insert(vec![1], true);
        p.insert(vec![2], false);
        model.predicates.insert(1, p);
        model
    }

    #[test]
    fn term_evaluation_follows_the_interpretation() {
        let model = model_with_successor();

        // f(f(a)) = f(2) = 1
        let term = Term::App(1, vec![Term::App(1, vec![Term::App(0, vec![])])]);
        assert_eq!(model.evaluate_term(&term, &[]), Some(1));

        // variables read the binding
        let term = Term::App(1, vec![Term::Var(0)]);
        assert_eq!(model.evaluate_term(&term, &[2]), Some(1));
    }

    #[test]
    fn evaluation_of_unknown_symbols_is_undefined() {
        let model = model_with_successor();
        let term = Term::App(7, vec![]);
        assert_eq!(model.evaluate_term(&term, &[]), None);
    }

    #[test]
    fn formula_evaluation() {
        let model = model_with_successor();

        // p(a) holds
        let lit = DefFormula::Lit {
            polarity: true,
            pred: 1,
            args: vec![Term::App(0, vec![])],
        };
        assert_eq!(model.evaluate_formula(&lit, &[]), Some(true));

        // f(a) = a is false, so its negation holds
        let eq = DefFormula::Equal {
            polarity: false,
            left: Term::App(1, vec![Term::App(0, vec![])]),
            right: Term::App(0, vec![]),
        };
        assert_eq!(model.evaluate_formula(&eq, &[]), Some(true));

        let both = DefFormula::And(vec![lit, eq]);
        assert_eq!(model.evaluate_formula(&both, &[]), Some(true));
        assert_eq!(
            model.evaluate_formula(&DefFormula::Not(Box::new(both)), &[]),
            Some(false)
        );
    }
}
