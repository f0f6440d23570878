//! Grounded-term orderings for symmetry breaking
//!
//! Each source sort gets an ordered list of grounded terms: its constants
//! first, then uniform groundings of the functions returning into it. The
//! position of a grounded term in the list is the element of the domain it
//! is allowed to introduce, which is what the restricted-totality and
//! canonicity axioms quantify over.

use crate::sig::{FunId, Signature, SortedSignature, SrcSort};

/// How function groundings are interleaved in the ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetOrder {
    /// Each function in turn: `f(1) f(2) f(3) g(1) g(2) g(3)`
    FunctionFirst,
    /// Each argument value in turn: `f(1) g(1) f(2) g(2) f(3) g(3)`
    ArgumentFirst,
    /// Staggered diagonal: `f(1) g(2) h(3) f(2) g(3) h(1) ...`
    Diagonal,
}

/// A symbol paired with a concrete argument tuple
#[derive(Debug, Clone)]
pub struct GroundedTerm {
    /// The function symbol
    pub fun: FunId,
    /// Its argument grounding (empty for constants)
    pub grounding: Vec<usize>,
}

/// Per-source-sort grounded-term orderings for one encoding epoch
#[derive(Debug)]
pub struct SymmetryOrdering {
    per_sort: Vec<Vec<GroundedTerm>>,
}

impl SymmetryOrdering {
    /// Builds the orderings for the current sizes
    ///
    /// Functions whose result sort is bounded below the sort's current
    /// size are skipped, as are groundings that exceed an argument sort's
    /// bound. Argument values are clamped to the argument sort's size.
    pub fn build(
        sig: &Signature,
        sorted: &SortedSignature,
        src_sizes: &[usize],
        order: WidgetOrder,
    ) -> Self {
        let mut per_sort = Vec::with_capacity(sorted.sorts);
        for s in 0..sorted.sorts {
            let size = src_sizes[s];
            let mut terms: Vec<GroundedTerm> = sorted.sorted_constants[s]
                .iter()
                .map(|&c| GroundedTerm {
                    fun: c,
                    grounding: Vec::new(),
                })
                .collect();

            match order {
                WidgetOrder::FunctionFirst => {
                    for &f in &sorted.sorted_functions[s] {
                        for m in 1..=size {
                            push_grounding(sig, sorted, src_sizes, &mut terms, f, m, size);
                        }
                    }
                }
                WidgetOrder::ArgumentFirst => {
                    for m in 1..=size {
                        for &f in &sorted.sorted_functions[s] {
                            push_grounding(sig, sorted, src_sizes, &mut terms, f, m, size);
                        }
                    }
                }
                WidgetOrder::Diagonal => {
                    for m in 1..=size {
                        for (fi, &f) in sorted.sorted_functions[s].iter().enumerate() {
                            let ground_with = 1 + ((m + fi) % size);
                            push_grounding(sig, sorted, src_sizes, &mut terms, f, ground_with, size);
                        }
                    }
                }
            }
            per_sort.push(terms);
        }
        Self { per_sort }
    }

    /// The ordering list of a source sort
    pub fn terms(&self, s: SrcSort) -> &[GroundedTerm] {
        &self.per_sort[s]
    }
}

fn push_grounding(
    sig: &Signature,
    sorted: &SortedSignature,
    src_sizes: &[usize],
    terms: &mut Vec<GroundedTerm>,
    f: FunId,
    ground_with: usize,
    size: usize,
) {
    let arity = sig.function(f).arity;
    let fsig = &sorted.function_signatures[f];

    // skip f when its result sort cannot reach this size
    if sorted.sort_bounds[fsig[arity]] < size {
        return;
    }

    let mut grounding = Vec::with_capacity(arity);
    for i in 0..arity {
        let srt = fsig[i];
        let val = ground_with.min(src_sizes[srt]);
        if sorted.sort_bounds[srt] < val {
            return;
        }
        grounding.push(val);
    }
    terms.push(GroundedTerm { fun: f, grounding });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Signature, SortedSignature) {
        let mut sig = Signature::new();
        let a = sig.add_function("a", 0);
        let f = sig.add_function("f", 1);
        let g = sig.add_function("g", 1);

        let mut sorted = SortedSignature::new(1, 1, vec![0]);
        sorted.function_signatures = vec![vec![0], vec![0, 0], vec![0, 0]];
        sorted.sorted_constants[0] = vec![a];
        sorted.sorted_functions[0] = vec![f, g];
        (sig, sorted)
    }

    #[test]
    fn constants_come_first() {
        let (sig, sorted) = setup();
        let ordering = SymmetryOrdering::build(&sig, &sorted, &[2], WidgetOrder::FunctionFirst);
        let terms = ordering.terms(0);

        assert_eq!(terms[0].fun, 0);
        assert!(terms[0].grounding.is_empty());
        // f(1) f(2) g(1) g(2)
        assert_eq!(terms.len(), 5);
        assert_eq!(terms[1].fun, 1);
        assert_eq!(terms[1].grounding, vec![1]);
        assert_eq!(terms[2].grounding, vec![2]);
        assert_eq!(terms[3].fun, 2);
    }

    #[test]
    fn argument_first_interleaves() {
        let (sig, sorted) = setup();
        let ordering = SymmetryOrdering::build(&sig, &sorted, &[2], WidgetOrder::ArgumentFirst);
        let terms = ordering.terms(0);

        // a f(1) g(1) f(2) g(2)
        assert_eq!(terms[1].fun, 1);
        assert_eq!(terms[2].fun, 2);
        assert_eq!(terms[1].grounding, vec![1]);
        assert_eq!(terms[2].grounding, vec![1]);
        assert_eq!(terms[3].grounding, vec![2]);
    }

    #[test]
    fn diagonal_staggers_groundings() {
        let (sig, sorted) = setup();
        let ordering = SymmetryOrdering::build(&sig, &sorted, &[3], WidgetOrder::Diagonal);
        let terms = ordering.terms(0);

        // m=1: f grounds with 1+((1+0)%3)=2, g with 1+((1+1)%3)=3
        assert_eq!(terms[1].fun, 1);
        assert_eq!(terms[1].grounding, vec![2]);
        assert_eq!(terms[2].fun, 2);
        assert_eq!(terms[2].grounding, vec![3]);
    }

    #[test]
    fn bounded_result_sort_is_skipped() {
        let (sig, mut sorted) = setup();
        sorted.sort_bounds[0] = 1;
        let ordering = SymmetryOrdering::build(&sig, &sorted, &[2], WidgetOrder::FunctionFirst);
        // only the constant survives: f and g cannot reach size 2
        let terms = ordering.terms(0);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].fun, 0);
    }
}
