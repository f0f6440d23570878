//! The search driver and its options
//!
//! The driver owns the epoch loop: reset the variable layout for the
//! current size vector, encode, hand the clauses to a fresh SAT solver,
//! solve under the marker assumptions, and either extract a model or turn
//! the failed assumptions into the next candidate sizes.

use crate::clause::{FlatClause, FlatLiteral, Problem};
use crate::encoder::{estimate_instance_count, ClauseSet, Encoder};
use crate::engine::rustsat_adapter::RustSatAdapter;
use crate::engine::{SatSolver, SolveStatus};
use crate::enumerator::{ConstraintTag, DsaEnumerator, GeneratorHeapEnumerator, Nogood};
use crate::layout::{lit, MarkerKind, VarLayout};
use crate::model::{self, FiniteModel};
use crate::sig::{DeletedSymbols, Signature, SortedSignature, SrcSort};
use crate::symmetry::{SymmetryOrdering, WidgetOrder};
use crate::{FmbError, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustsat_batsat::BasicSolver;
use std::time::{Duration, Instant};

/// How the next candidate size vector is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationStrategy {
    /// No-good learning with the constraint-generator heap
    Sbmeam,
    /// No-good learning with an integer-SMT backend (needs the `smt`
    /// feature)
    Smt,
    /// Per-sort staircase markers and core-driven growth
    Contour,
}

/// Which usage count orders symbols in the symmetry ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOrder {
    /// Keep the input occurrence order
    Occurrence,
    /// Sort by usage recounted over the flat clauses
    Usage,
    /// Sort by the usage counts the signature arrived with
    PreprocessedUsage,
}

/// Monotonicity helpers injected before sort inference (consumed by the
/// preprocessing layer, recorded here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustSorts {
    /// No adjustment
    Off,
    /// Guard clauses with sort predicates
    Predicate,
    /// Wrap sorted positions in sort functions
    Function,
}

/// Finite model building options
#[derive(Debug, Clone)]
pub struct Options {
    /// Size-vector enumeration strategy
    pub enumeration_strategy: EnumerationStrategy,
    /// Initial candidate size per sort (raised to each sort's minimum)
    pub start_size: usize,
    /// Multiplier for the canonicity axiom width
    pub symmetry_ratio: usize,
    /// Contour only: ratio of estimated-weight picks to FIFO picks
    pub size_weight_ratio: usize,
    /// Interleaving of function groundings in the symmetry ordering
    pub widget_orders: WidgetOrder,
    /// Symbol order within the symmetry ordering
    pub symbol_order: SymbolOrder,
    /// Whether function-relationship inference ran on the input; the
    /// resulting constraint stacks arrive on the sorted signature
    pub detect_sort_bounds: bool,
    /// Monotonicity helpers requested from preprocessing
    pub adjust_sorts: AdjustSorts,
    /// Keep exhausted constraint generators as archived no-goods
    pub keep_generators: bool,
    /// Shuffle clauses before each SAT call
    pub random_traversals: bool,
    /// Seed for the shuffling RNG
    pub random_seed: u64,
    /// Overall time limit in milliseconds (`None` = none)
    pub timeout_ms: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enumeration_strategy: EnumerationStrategy::Sbmeam,
            start_size: 1,
            symmetry_ratio: 1,
            size_weight_ratio: 1,
            widget_orders: WidgetOrder::FunctionFirst,
            symbol_order: SymbolOrder::Occurrence,
            detect_sort_bounds: false,
            adjust_sorts: AdjustSorts::Off,
            keep_generators: false,
            random_traversals: false,
            random_seed: 0,
            timeout_ms: None,
        }
    }
}

/// Statistics collected over one search
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    sat_calls: usize,
    clauses_generated: usize,
    translation_time: Duration,
    solving_time: Duration,
}

impl Statistics {
    /// Number of SAT calls made
    pub fn sat_calls(&self) -> usize {
        self.sat_calls
    }

    /// Total number of SAT clauses generated over all epochs
    pub fn clauses_generated(&self) -> usize {
        self.clauses_generated
    }

    /// Time spent encoding, in milliseconds
    pub fn translation_time(&self) -> u64 {
        self.translation_time.as_millis() as u64
    }

    /// Time spent in the SAT solver, in milliseconds
    pub fn solving_time(&self) -> u64 {
        self.solving_time.as_millis() as u64
    }
}

/// Final outcome of a finite model search
#[derive(Debug)]
pub enum MainLoopResult {
    /// A finite model was found
    Satisfiable {
        /// The extracted interpretation
        model: FiniteModel,
        /// Search statistics
        stats: Statistics,
    },
    /// No finite model exists within the permitted sizes
    Refutation {
        /// Search statistics
        stats: Statistics,
    },
    /// The problem is out of scope (interpreted operations, known
    /// infinite domain or incomplete preprocessing)
    Inappropriate,
    /// The time limit was reached
    TimeLimit {
        /// Search statistics
        stats: Statistics,
    },
    /// The search gave up without an answer (id overflow or an
    /// incomplete enumeration strategy ran dry)
    RefutationNotFound {
        /// Search statistics
        stats: Statistics,
    },
}

impl MainLoopResult {
    /// True when a model was found
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, MainLoopResult::Satisfiable { .. })
    }

    /// The model, when one was found
    pub fn model(&self) -> Option<&FiniteModel> {
        match self {
            MainLoopResult::Satisfiable { model, .. } => Some(model),
            _ => None,
        }
    }
}

/// The finite model builder
///
/// Owns the problem and its sorted signature for the duration of the
/// search; the signature's per-sort symbol lists are reordered in place
/// according to [`SymbolOrder`].
pub struct FiniteModelBuilder {
    problem: Problem,
    sig: Signature,
    sorted: SortedSignature,
    deleted: DeletedSymbols,
    options: Options,

    del_f: Vec<bool>,
    del_p: Vec<bool>,
    var_sorts: Vec<Option<Vec<SrcSort>>>,
    mins: Vec<usize>,
    maxs: Vec<usize>,
    found_empty_clause: bool,
    initialized: bool,
}

impl FiniteModelBuilder {
    /// Creates a builder, validating the shape of the inputs
    pub fn new(
        problem: Problem,
        sig: Signature,
        sorted: SortedSignature,
        deleted: DeletedSymbols,
        options: Options,
    ) -> Result<Self> {
        if sorted.parents.len() != sorted.sorts
            || sorted.sort_bounds.len() != sorted.sorts
            || sorted.sorted_constants.len() != sorted.sorts
            || sorted.sorted_functions.len() != sorted.sorts
        {
            return Err(FmbError::InvalidInput(
                "source-sort tables disagree with the sort count".into(),
            ));
        }
        if sorted.monotonic_sorts.len() != sorted.distinct_sorts
            || sorted.var_eq_sorts.len() != sorted.distinct_sorts
            || sorted.distinct_sort_mins.len() != sorted.distinct_sorts
        {
            return Err(FmbError::InvalidInput(
                "distinct-sort tables disagree with the distinct-sort count".into(),
            ));
        }
        if sorted.function_signatures.len() != sig.functions() {
            return Err(FmbError::InvalidInput(
                "function signature table disagrees with the signature".into(),
            ));
        }
        for f in 0..sig.functions() {
            if sorted.function_signatures[f].len() != sig.function(f).arity + 1 {
                return Err(FmbError::InvalidInput(format!(
                    "function {} needs arity + 1 sort slots",
                    sig.function(f).name
                )));
            }
        }
        if sorted.predicate_signatures.len() != sig.predicates() {
            return Err(FmbError::InvalidInput(
                "predicate signature table disagrees with the signature".into(),
            ));
        }
        for p in 1..sig.predicates() {
            if sorted.predicate_signatures[p].len() != sig.predicate(p).arity {
                return Err(FmbError::InvalidInput(format!(
                    "predicate {} needs one sort slot per argument",
                    sig.predicate(p).name
                )));
            }
        }

        Ok(Self {
            problem,
            sig,
            sorted,
            deleted,
            options,
            del_f: Vec::new(),
            del_p: Vec::new(),
            var_sorts: Vec::new(),
            mins: Vec::new(),
            maxs: Vec::new(),
            found_empty_clause: false,
            initialized: false,
        })
    }

    /// Runs the search with the default batsat backend
    pub fn run(&mut self) -> Result<MainLoopResult> {
        self.run_with(|| RustSatAdapter::new(BasicSolver::default()))
    }

    /// Runs the search, creating one backend solver per encoding epoch
    pub fn run_with<S, F>(&mut self, mut factory: F) -> Result<MainLoopResult>
    where
        S: SatSolver,
        F: FnMut() -> S,
    {
        if self.problem.has_interpreted_operations
            || self.problem.known_infinite_domain
            || self.problem.had_incomplete_transformation
        {
            return Ok(MainLoopResult::Inappropriate);
        }
        if self.problem.is_empty() {
            return Ok(MainLoopResult::Satisfiable {
                model: FiniteModel::empty(vec![1; self.sorted.distinct_sorts]),
                stats: Statistics::default(),
            });
        }

        self.init()?;

        let mut stats = Statistics::default();
        if self.found_empty_clause {
            return Ok(MainLoopResult::Refutation { stats });
        }

        let deadline = self
            .options
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let contour = self.options.enumeration_strategy == EnumerationStrategy::Contour;
        let mut enumerator = self.make_enumerator()?;

        let n = self.sorted.distinct_sorts;
        let mut dist_sizes: Vec<usize> = (0..n)
            .map(|d| self.options.start_size.max(self.mins[d]))
            .collect();

        info!(
            "searching with minimum sizes {:?} and maximum sizes {:?}",
            self.mins,
            self.maxs
                .iter()
                .map(|&m| if m == usize::MAX { -1 } else { m as i64 })
                .collect::<Vec<_>>()
        );

        if let Some(en) = enumerator.as_mut() {
            if !en.init(
                self.options.start_size,
                &dist_sizes,
                &self.sorted.distinct_sort_constraints,
                &self.sorted.strict_distinct_sort_constraints,
            ) {
                debug!("size constraints are infeasible before the search starts");
                return Ok(MainLoopResult::RefutationNotFound { stats });
            }
        }

        let mut rng = StdRng::seed_from_u64(self.options.random_seed);
        let mut alternator: usize = 0;

        loop {
            if out_of_time(deadline) {
                return Ok(MainLoopResult::TimeLimit { stats });
            }
            info!("trying sizes {:?}", dist_sizes);

            let encode_start = Instant::now();
            let layout = match VarLayout::build(
                &self.sig,
                &self.sorted,
                &self.del_f,
                &self.del_p,
                &dist_sizes,
                contour,
            ) {
                Ok(layout) => layout,
                Err(_) => {
                    debug!("cannot represent all propositional literals internally");
                    return Ok(MainLoopResult::RefutationNotFound { stats });
                }
            };
            let ordering = SymmetryOrdering::build(
                &self.sig,
                &self.sorted,
                layout.src_sizes(),
                self.options.widget_orders,
            );

            let mut clauses = ClauseSet::new();
            let encoder = Encoder::new(&self.sig, &self.sorted, &layout, &self.del_f, contour);
            encoder.ground_clauses(&mut clauses, &self.problem.ground_clauses);
            encoder.instances(&mut clauses, &self.problem.clauses, &self.var_sorts);
            encoder.functional_definitions(&mut clauses);
            encoder.symmetry_axioms(&mut clauses, &ordering, self.options.symmetry_ratio);
            encoder.totality_definitions(&mut clauses, &dist_sizes);
            if self.options.random_traversals {
                clauses.shuffle(&mut rng);
            }
            stats.clauses_generated += clauses.len();
            stats.translation_time += encode_start.elapsed();

            if out_of_time(deadline) {
                return Ok(MainLoopResult::TimeLimit { stats });
            }

            let solve_start = Instant::now();
            let mut solver = factory();
            solver.ensure_var_count(layout.max_var());
            solver.add_clauses_iter(clauses.iter());
            if self.options.random_traversals {
                solver.randomize_for_next_assignment(layout.max_var());
            }
            let status = solver.solve_under_assumptions(&layout.assumptions());
            stats.sat_calls += 1;
            stats.solving_time += solve_start.elapsed();

            if status == SolveStatus::Satisfiable {
                if contour {
                    // the model may be smaller than the assumed contour in
                    // some dimensions; retract before reporting, but keep
                    // the layout's epoch sizes for assignment queries
                    for (d, size) in dist_sizes.iter_mut().enumerate() {
                        let mut j = 0;
                        while j + 1 < *size {
                            if solver.true_in_assignment(lit(layout.level_marker(d, j), false)) {
                                break;
                            }
                            j += 1;
                        }
                        debug!("domain {} retracts to size {}", d, j + 1);
                        *size = j + 1;
                    }
                }
                let model = model::extract(
                    &solver,
                    &self.sig,
                    &self.sorted,
                    &layout,
                    &self.del_f,
                    &self.del_p,
                    &self.deleted,
                    &dist_sizes,
                );
                info!("finite model found at sizes {:?}", dist_sizes);
                return Ok(MainLoopResult::Satisfiable { model, stats });
            }

            let weight = clauses.len();
            clauses.clear();
            let failed = solver.failed_assumptions().to_vec();

            if let Some(en) = enumerator.as_mut() {
                let mut nogood: Nogood = dist_sizes
                    .iter()
                    .map(|&v| (ConstraintTag::Star, v))
                    .collect();
                for l in &failed {
                    match layout.classify_marker(l.unsigned_abs()) {
                        Some(MarkerKind::Totality(d)) => {
                            nogood[d].0 = if self.sorted.monotonic_sorts[d] {
                                ConstraintTag::Leq
                            } else {
                                ConstraintTag::Eq
                            };
                        }
                        Some(MarkerKind::Instances(d)) => {
                            if nogood[d].0 == ConstraintTag::Star {
                                nogood[d].0 = ConstraintTag::Geq;
                            }
                        }
                        _ => {}
                    }
                }
                debug!("learned no-good {:?} of weight {}", nogood, weight);
                en.learn_nogood(nogood, weight);

                if !en.increase_model_sizes(&mut dist_sizes, &self.maxs) {
                    return if en.is_complete(n) {
                        Ok(MainLoopResult::Refutation { stats })
                    } else {
                        debug!("cannot enumerate the next candidate in an incomplete setup");
                        Ok(MainLoopResult::RefutationNotFound { stats })
                    };
                }
            } else {
                alternator += 1;
                let mut dom_to_grow = None;
                let mut doms_weight = usize::MAX;

                for l in &failed {
                    let Some(MarkerKind::Level { sort, .. }) =
                        layout.classify_marker(l.unsigned_abs())
                    else {
                        continue;
                    };
                    if dist_sizes[sort] == self.maxs[sort] {
                        continue;
                    }

                    let w = if alternator % (self.options.size_weight_ratio + 1) != 0 {
                        dist_sizes[sort] += 1;
                        let est =
                            estimate_instance_count(&self.var_sorts, &self.sorted, &dist_sizes);
                        dist_sizes[sort] -= 1;
                        est
                    } else {
                        dist_sizes[sort]
                    };

                    debug!("domain {} of weight {} could grow", sort, w);
                    if w < doms_weight {
                        dom_to_grow = Some(sort);
                        doms_weight = w;
                    }
                }

                let Some(grow) = dom_to_grow else {
                    return Ok(MainLoopResult::Refutation { stats });
                };
                debug!("growing domain {} of weight {}", grow, doms_weight);
                dist_sizes[grow] += 1;
                self.close_under_sort_constraints(&mut dist_sizes);
            }
        }
    }

    fn make_enumerator(&self) -> Result<Option<Box<dyn DsaEnumerator>>> {
        match self.options.enumeration_strategy {
            EnumerationStrategy::Contour => Ok(None),
            EnumerationStrategy::Sbmeam => Ok(Some(Box::new(GeneratorHeapEnumerator::new(
                self.options.keep_generators,
            )))),
            EnumerationStrategy::Smt => {
                #[cfg(feature = "smt")]
                {
                    Ok(Some(Box::new(crate::enumerator::SmtEnumerator::new())))
                }
                #[cfg(not(feature = "smt"))]
                {
                    Err(FmbError::Unsupported(
                        "the SMT enumeration strategy needs the `smt` feature".into(),
                    ))
                }
            }
        }
    }

    // both constraint families are applied independently until neither
    // changes anything
    fn close_under_sort_constraints(&self, sizes: &mut [usize]) {
        loop {
            let mut updated = false;
            for &(a, b) in &self.sorted.distinct_sort_constraints {
                if sizes[a] < sizes[b] {
                    sizes[a] = sizes[b];
                    updated = true;
                }
            }
            for &(a, b) in &self.sorted.strict_distinct_sort_constraints {
                if sizes[a] <= sizes[b] {
                    sizes[a] = sizes[b] + 1;
                    updated = true;
                }
            }
            if !updated {
                break;
            }
        }
    }

    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;

        self.del_f = (0..self.sig.functions())
            .map(|f| {
                self.deleted.functions.contains_key(&f) || self.sig.function(f).usage_cnt == 0
            })
            .collect();
        self.del_p = (0..self.sig.predicates())
            .map(|p| {
                p == 0
                    || self.deleted.predicates.contains_key(&p)
                    || self.deleted.trivial_predicates.contains_key(&p)
            })
            .collect();

        // usage counts for the symmetry ordering; deletion decisions above
        // always use the counts the signature arrived with
        let mut usage: Vec<usize> = (0..self.sig.functions())
            .map(|f| self.sig.function(f).usage_cnt)
            .collect();
        if self.options.symbol_order != SymbolOrder::PreprocessedUsage {
            usage.iter_mut().for_each(|u| *u = 0);
            for clause in &self.problem.clauses {
                for literal in &clause.literals {
                    if let FlatLiteral::FunEq { fun, .. } = literal {
                        usage[*fun] += 1;
                    }
                }
            }
        }
        for s in 0..self.sorted.sorts {
            self.sorted.sorted_constants[s].retain(|&f| !self.del_f[f]);
            self.sorted.sorted_functions[s].retain(|&f| !self.del_f[f]);
            if self.options.symbol_order != SymbolOrder::Occurrence {
                self.sorted.sorted_constants[s].sort_by_key(|&f| std::cmp::Reverse(usage[f]));
                self.sorted.sorted_functions[s].sort_by_key(|&f| std::cmp::Reverse(usage[f]));
            }
        }

        self.var_sorts = self
            .problem
            .clauses
            .iter()
            .map(|c| infer_variable_sorts(c, &self.sorted))
            .collect::<Result<_>>()?;

        self.found_empty_clause = self.problem.clauses.iter().any(|c| c.literals.is_empty())
            || self
                .problem
                .ground_clauses
                .iter()
                .any(|c| c.literals.is_empty());

        // distinct-sort size limits
        let n = self.sorted.distinct_sorts;
        self.mins = self
            .sorted
            .distinct_sort_mins
            .iter()
            .map(|&m| m.max(1))
            .collect();
        self.maxs = vec![usize::MAX; n];

        let mut bound_from_inference = vec![0usize; n];
        let mut d_constants = vec![0usize; n];
        let mut d_functions = vec![0usize; n];
        for s in 0..self.sorted.sorts {
            let parent = self.sorted.parents[s];
            bound_from_inference[parent] =
                bound_from_inference[parent].max(self.sorted.sort_bounds[s]);
            d_constants[parent] += self.sorted.sorted_constants[s].len();
            d_functions[parent] += self.sorted.sorted_functions[s].len();
        }
        for d in 0..n {
            self.maxs[d] = self.maxs[d].min(bound_from_inference[d]);
            // a sort with no functions landing in it cannot need more
            // elements than it has constants
            if d_functions[d] == 0 {
                let c = d_constants[d];
                if c == 0 {
                    self.mins[d] = 1;
                    self.maxs[d] = 1;
                } else if self.maxs[d] == usize::MAX || c > self.maxs[d] {
                    self.maxs[d] = c;
                }
            }
        }

        Ok(())
    }
}

/// Infers the source sort of every clause variable from its positional
/// occurrences
///
/// Two-variable equalities propagate sorts between their sides; a
/// two-variable equality whose variables occur nowhere else receives the
/// special variable-equality sort of its distinct parent. `None` marks a
/// clause without variables, which the encoder skips.
fn infer_variable_sorts(
    clause: &FlatClause,
    sorted: &SortedSignature,
) -> Result<Option<Vec<SrcSort>>> {
    if clause.var_count == 0 {
        return Ok(None);
    }

    let mut sorts = vec![0usize; clause.var_count];
    let mut set = vec![false; clause.var_count];
    let mut var_eqs: Vec<(usize, usize, SrcSort)> = Vec::new();

    let assign = |sorts: &mut Vec<SrcSort>, set: &mut Vec<bool>, var: usize, srt: SrcSort| {
        if var >= sorts.len() {
            return Err(FmbError::InvalidInput(
                "clause variable outside the declared range".into(),
            ));
        }
        if set[var] && sorts[var] != srt {
            return Err(FmbError::InvalidInput(
                "conflicting sorts inferred for a clause variable".into(),
            ));
        }
        sorts[var] = srt;
        set[var] = true;
        Ok(())
    };

    for literal in &clause.literals {
        match literal {
            FlatLiteral::VarEq { x, y, sort, .. } => var_eqs.push((*x, *y, *sort)),
            FlatLiteral::FunEq { fun, args, res, .. } => {
                let fsig = &sorted.function_signatures[*fun];
                assign(&mut sorts, &mut set, *res, fsig[args.len()])?;
                for (j, &arg) in args.iter().enumerate() {
                    assign(&mut sorts, &mut set, arg, fsig[j])?;
                }
            }
            FlatLiteral::Pred { pred, args, .. } => {
                let psig = &sorted.predicate_signatures[*pred];
                for (j, &arg) in args.iter().enumerate() {
                    assign(&mut sorts, &mut set, arg, psig[j])?;
                }
            }
        }
    }

    for (x, y, eq_sort) in var_eqs {
        let special = sorted.var_eq_sorts[sorted.parents[eq_sort]];
        match (set[x], set[y]) {
            (true, true) => {
                if sorts[x] != sorts[y] {
                    // one side got the special sort from an earlier
                    // equality; the concrete sort wins
                    if sorts[x] == special {
                        sorts[x] = sorts[y];
                    } else if sorts[y] == special {
                        sorts[y] = sorts[x];
                    } else {
                        return Err(FmbError::InvalidInput(
                            "two-variable equality between differently sorted variables".into(),
                        ));
                    }
                }
            }
            (true, false) => {
                sorts[y] = sorts[x];
                set[y] = true;
            }
            (false, true) => {
                sorts[x] = sorts[y];
                set[x] = true;
            }
            (false, false) => {
                sorts[x] = special;
                sorts[y] = special;
                set[x] = true;
                set[y] = true;
            }
        }
    }

    if set.iter().any(|&s| !s) {
        return Err(FmbError::InvalidInput(
            "clause variable occurs in no literal".into(),
        ));
    }
    Ok(Some(sorts))
}

fn out_of_time(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
