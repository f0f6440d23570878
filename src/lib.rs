//! # fmb-rs
//!
//! A finite model builder for many-sorted first-order logic with equality.
//!
//! Given a pre-clausified, flattened first-order problem, the builder
//! searches for a finite model by incrementally enlarging candidate domain
//! sizes per sort, encoding "is there a model of this size?" as a
//! propositional SAT problem and delegating the decision to a SAT solver.
//! On satisfiability it reports the interpretation; on exhausting all
//! permitted sizes it reports that no finite model exists within bounds.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fmb_rs::clause::{FlatClause, FlatLiteral, Problem};
//! use fmb_rs::sig::{DeletedSymbols, Signature, SortedSignature};
//! use fmb_rs::solver::{FiniteModelBuilder, MainLoopResult, Options};
//!
//! let mut sig = Signature::new();
//! let a = sig.add_function("a", 0);
//! let b = sig.add_function("b", 0);
//!
//! let mut sorted = SortedSignature::new(1, 1, vec![0]);
//! sorted.function_signatures = vec![vec![0], vec![0]];
//! sorted.sorted_constants[0] = vec![a, b];
//!
//! // a != b, flattened: ~(a = X) | ~(b = X)
//! let clause = FlatClause::new(
//!     vec![
//!         FlatLiteral::fun_eq(false, a, vec![], 0),
//!         FlatLiteral::fun_eq(false, b, vec![], 0),
//!     ],
//!     1,
//! );
//!
//! let problem = Problem::new(vec![clause], vec![]);
//! let mut builder = FiniteModelBuilder::new(
//!     problem, sig, sorted, DeletedSymbols::default(), Options::default())?;
//!
//! match builder.run()? {
//!     MainLoopResult::Satisfiable { model, .. } => {
//!         assert_eq!(model.sort_size(0), 2);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

#![warn(missing_docs)]

/// Signatures, sorted signatures and deleted-symbol definitions
pub mod sig;

/// Flattened clauses and the problem container
pub mod clause;

/// SAT variable layout: offset tables and marker regions
pub mod layout;

/// Grounded-term orderings for symmetry breaking
pub mod symmetry;

/// Clause and axiom emission
pub mod encoder;

/// SAT solver trait and backends
pub mod engine;

/// Domain-size-assignment enumerators
pub mod enumerator;

/// The search driver and its options
pub mod solver;

/// Extracted finite models
pub mod model;

/// Error types
pub mod error {
    //! Error types for fmb-rs

    use thiserror::Error;

    /// Errors surfaced by the public API
    #[derive(Error, Debug)]
    pub enum FmbError {
        /// The supplied problem or signature is malformed
        #[error("invalid input: {0}")]
        InvalidInput(String),

        /// The requested configuration cannot be honoured by this build
        #[error("unsupported configuration: {0}")]
        Unsupported(String),
    }

    /// Result type for fmb-rs operations
    pub type Result<T> = std::result::Result<T, FmbError>;
}

pub use error::{FmbError, Result};
