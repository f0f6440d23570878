//! End-to-end searches over small hand-built problems

use fmb_rs::clause::{FlatClause, FlatLiteral, Problem};
use fmb_rs::sig::{DeletedSymbols, Signature, SortedSignature};
use fmb_rs::solver::{EnumerationStrategy, FiniteModelBuilder, MainLoopResult, Options};
use fmb_rs::symmetry::WidgetOrder;

fn options(strategy: EnumerationStrategy) -> Options {
    Options {
        enumeration_strategy: strategy,
        ..Options::default()
    }
}

const STRATEGIES: [EnumerationStrategy; 2] =
    [EnumerationStrategy::Sbmeam, EnumerationStrategy::Contour];

/// a != b over one sort, flattened to ~(a = X) | ~(b = X)
fn distinct_constants(n: usize) -> (Problem, Signature, SortedSignature) {
    let mut sig = Signature::new();
    let consts: Vec<_> = (0..n)
        .map(|i| sig.add_function(&format!("c{i}"), 0))
        .collect();

    let mut sorted = SortedSignature::new(1, 1, vec![0]);
    sorted.function_signatures = vec![vec![0]; n];
    sorted.sorted_constants[0] = consts.clone();

    let mut clauses = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            clauses.push(FlatClause::new(
                vec![
                    FlatLiteral::fun_eq(false, consts[i], vec![], 0),
                    FlatLiteral::fun_eq(false, consts[j], vec![], 0),
                ],
                1,
            ));
        }
    }
    (Problem::new(clauses, vec![]), sig, sorted)
}

#[test]
fn two_distinct_constants_need_two_elements() {
    for strategy in STRATEGIES {
        let (problem, sig, sorted) = distinct_constants(2);
        let mut builder = FiniteModelBuilder::new(
            problem,
            sig,
            sorted,
            DeletedSymbols::default(),
            options(strategy),
        )
        .unwrap();

        let result = builder.run().unwrap();
        let model = result.model().expect("two constants have a model");
        assert_eq!(model.sort_size(0), 2);

        // the symmetry ordering pins the constants to canonical values
        assert_eq!(model.constant(0), Some(1));
        assert_eq!(model.constant(1), Some(2));
    }
}

#[test]
fn three_distinct_constants_get_canonical_values_under_diagonal_order() {
    let (problem, sig, sorted) = distinct_constants(3);
    let mut builder = FiniteModelBuilder::new(
        problem,
        sig,
        sorted,
        DeletedSymbols::default(),
        Options {
            widget_orders: WidgetOrder::Diagonal,
            ..Options::default()
        },
    )
    .unwrap();

    let result = builder.run().unwrap();
    let model = result.model().expect("three constants have a model");
    assert_eq!(model.sort_size(0), 3);
    assert_eq!(model.constant(0), Some(1));
    assert_eq!(model.constant(1), Some(2));
    assert_eq!(model.constant(2), Some(3));
}

/// zero : s, succ : s -> s with succ(X) != zero and injectivity; only
/// infinite models exist, so a bounded sort must exhaust
fn bounded_successor() -> (Problem, Signature, SortedSignature) {
    let mut sig = Signature::new();
    let zero = sig.add_function("zero", 0);
    let succ = sig.add_function("succ", 1);

    let mut sorted = SortedSignature::new(1, 1, vec![0]);
    sorted.function_signatures = vec![vec![0], vec![0, 0]];
    sorted.sorted_constants[0] = vec![zero];
    sorted.sorted_functions[0] = vec![succ];
    sorted.sort_bounds = vec![4];

    // succ(X) != zero  ~>  ~(succ(X) = Y) | ~(zero = Y)
    let no_zero = FlatClause::new(
        vec![
            FlatLiteral::fun_eq(false, succ, vec![0], 1),
            FlatLiteral::fun_eq(false, zero, vec![], 1),
        ],
        2,
    );
    // succ(X) = succ(Y) -> X = Y
    let injective = FlatClause::new(
        vec![
            FlatLiteral::fun_eq(false, succ, vec![0], 2),
            FlatLiteral::fun_eq(false, succ, vec![1], 2),
            FlatLiteral::var_eq(true, 0, 1, 0),
        ],
        3,
    );
    (Problem::new(vec![no_zero, injective], vec![]), sig, sorted)
}

#[test]
fn injective_nonsurjective_successor_exhausts_the_bound() {
    for strategy in STRATEGIES {
        let (problem, sig, sorted) = bounded_successor();
        let mut builder = FiniteModelBuilder::new(
            problem,
            sig,
            sorted,
            DeletedSymbols::default(),
            options(strategy),
        )
        .unwrap();

        assert!(matches!(
            builder.run().unwrap(),
            MainLoopResult::Refutation { .. }
        ));
    }
}

#[test]
fn unconstrained_monotonic_sort_stays_at_one() {
    for strategy in STRATEGIES {
        // sort 0 needs two elements; sort 1 has no symbols at all and is
        // marked monotonic
        let mut sig = Signature::new();
        let a = sig.add_function("a", 0);
        let b = sig.add_function("b", 0);

        let mut sorted = SortedSignature::new(2, 2, vec![0, 1]);
        sorted.function_signatures = vec![vec![0], vec![0]];
        sorted.sorted_constants[0] = vec![a, b];
        sorted.monotonic_sorts = vec![false, true];

        let clause = FlatClause::new(
            vec![
                FlatLiteral::fun_eq(false, a, vec![], 0),
                FlatLiteral::fun_eq(false, b, vec![], 0),
            ],
            1,
        );

        let mut builder = FiniteModelBuilder::new(
            Problem::new(vec![clause], vec![]),
            sig,
            sorted,
            DeletedSymbols::default(),
            options(strategy),
        )
        .unwrap();

        let result = builder.run().unwrap();
        let model = result.model().expect("the constrained sort grows alone");
        assert_eq!(model.sort_size(0), 2);
        assert_eq!(model.sort_size(1), 1);
    }
}

#[test]
fn unconstrained_function_is_total_in_the_model() {
    for strategy in STRATEGIES {
        let mut sig = Signature::new();
        let f = sig.add_function("f", 1);
        let q = sig.add_predicate("q", 1);

        let mut sorted = SortedSignature::new(1, 1, vec![0]);
        sorted.function_signatures = vec![vec![0, 0]];
        sorted.predicate_signatures = vec![vec![], vec![0]];
        sorted.sorted_functions[0] = vec![f];

        // forall X. q(X), just to give the search something to satisfy
        let clause = FlatClause::new(vec![FlatLiteral::pred(true, q, vec![0])], 1);

        let mut builder = FiniteModelBuilder::new(
            Problem::new(vec![clause], vec![]),
            sig,
            sorted,
            DeletedSymbols::default(),
            options(strategy),
        )
        .unwrap();

        let result = builder.run().unwrap();
        let model = result.model().expect("totality axioms admit a model");

        let size = model.sort_size(0);
        for v in 1..=size {
            let image = model.function_value(f, &[v]);
            assert!(image.is_some(), "f must be total");
            assert!(image.unwrap() >= 1 && image.unwrap() <= size);
            assert_eq!(model.predicate_value(q, &[v]), Some(true));
        }
    }
}

#[test]
fn statistics_track_the_search() {
    let (problem, sig, sorted) = distinct_constants(2);
    let mut builder = FiniteModelBuilder::new(
        problem,
        sig,
        sorted,
        DeletedSymbols::default(),
        Options::default(),
    )
    .unwrap();

    match builder.run().unwrap() {
        MainLoopResult::Satisfiable { stats, .. } => {
            // one unsat epoch at size 1, one sat epoch at size 2
            assert_eq!(stats.sat_calls(), 2);
            assert!(stats.clauses_generated() > 0);
        }
        other => panic!("expected a model, got {other:?}"),
    }
}

#[test]
fn shuffled_traversals_reach_the_same_answer() {
    for seed in [0, 7, 42] {
        let (problem, sig, sorted) = distinct_constants(3);
        let mut builder = FiniteModelBuilder::new(
            problem,
            sig,
            sorted,
            DeletedSymbols::default(),
            Options {
                random_traversals: true,
                random_seed: seed,
                ..Options::default()
            },
        )
        .unwrap();

        let result = builder.run().unwrap();
        assert_eq!(result.model().map(|m| m.sort_size(0)), Some(3));
    }
}
