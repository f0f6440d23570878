//! SAT variable layout: offset tables and marker regions
//!
//! All SAT variables live in one contiguous 1-based id range, rebuilt from
//! scratch whenever any sort size changes. Non-deleted functions come
//! first (one variable per grounding of the `arity + 1` slots, the result
//! slot last), then non-deleted predicates (equality is inlined and never
//! encoded), then the marker region of the active assumption scheme.
//!
//! Within a block, ids follow a mixed-radix numbering:
//! `var(f, g) = offset[f] + sum_i (g[i] - 1) * prod_{j<i} size(slot j)`.

use crate::sig::{DistSort, FunId, PredId, Signature, SortedSignature};
use thiserror::Error;

/// Largest SAT variable id the backend can represent
pub const VAR_MAX: u32 = (i32::MAX as u32) - 1;

/// The current size vector cannot be encoded within [`VAR_MAX`] ids
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("size vector requires more SAT variables than the solver supports")]
pub struct CannotEncode;

/// A marker variable, classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Staircase marker `index` of a sort (active while the sort is larger
    /// than `index + 1`)
    Level {
        /// The distinct sort owning the marker
        sort: DistSort,
        /// Position within the sort's staircase
        index: usize,
    },
    /// Totality flag of a sort
    Totality(DistSort),
    /// Instance flag of a sort
    Instances(DistSort),
}

#[derive(Debug)]
enum Markers {
    Contour { offsets: Vec<u32>, sizes: Vec<usize> },
    Flags { totality: u32, instances: u32, count: usize },
}

/// The variable layout of one encoding epoch
#[derive(Debug)]
pub struct VarLayout {
    f_offsets: Vec<u32>,
    p_offsets: Vec<u32>,
    src_sizes: Vec<usize>,
    markers: Markers,
    max_var: u32,
}

impl VarLayout {
    /// Builds the layout for the given distinct-sort sizes
    ///
    /// `contour` selects the staircase marker region; otherwise one
    /// totality flag and one instance flag are reserved per distinct sort.
    /// Fails with [`CannotEncode`] on id overflow, before any SAT solver
    /// is allocated.
    pub fn build(
        sig: &Signature,
        sorted: &SortedSignature,
        del_f: &[bool],
        del_p: &[bool],
        dist_sizes: &[usize],
        contour: bool,
    ) -> Result<VarLayout, CannotEncode> {
        let src_sizes: Vec<usize> = (0..sorted.sorts)
            .map(|s| dist_sizes[sorted.parents[s]])
            .collect();

        // SAT variables are 1-based
        let mut offsets: u64 = 1;

        let mut f_offsets = vec![0u32; sig.functions()];
        for f in 0..sig.functions() {
            if del_f[f] {
                continue;
            }
            f_offsets[f] = offsets as u32;
            let fsig = &sorted.function_signatures[f];
            debug_assert_eq!(fsig.len(), sig.function(f).arity + 1);
            let mut add: u64 = 1;
            for &srt in fsig {
                add = add
                    .checked_mul(src_sizes[srt] as u64)
                    .ok_or(CannotEncode)?;
                if add > VAR_MAX as u64 {
                    return Err(CannotEncode);
                }
            }
            if (VAR_MAX as u64) - add < offsets {
                return Err(CannotEncode);
            }
            offsets += add;
        }

        // predicate 0 is equality and stays inlined
        let mut p_offsets = vec![0u32; sig.predicates()];
        for p in 1..sig.predicates() {
            if del_p[p] {
                continue;
            }
            p_offsets[p] = offsets as u32;
            let psig = &sorted.predicate_signatures[p];
            debug_assert_eq!(psig.len(), sig.predicate(p).arity);
            let mut add: u64 = 1;
            for &srt in psig {
                add = add
                    .checked_mul(src_sizes[srt] as u64)
                    .ok_or(CannotEncode)?;
                if add > VAR_MAX as u64 {
                    return Err(CannotEncode);
                }
            }
            if (VAR_MAX as u64) - add < offsets {
                return Err(CannotEncode);
            }
            offsets += add;
        }

        let markers = if contour {
            let mut marker_offsets = Vec::with_capacity(dist_sizes.len());
            for &size in dist_sizes {
                marker_offsets.push(offsets as u32);
                if (VAR_MAX as u64) - (size as u64) < offsets {
                    return Err(CannotEncode);
                }
                offsets += size as u64;
            }
            Markers::Contour {
                offsets: marker_offsets,
                sizes: dist_sizes.to_vec(),
            }
        } else {
            let count = dist_sizes.len();
            let totality = offsets as u32;
            if (VAR_MAX as u64) - (count as u64) < offsets {
                return Err(CannotEncode);
            }
            offsets += count as u64;
            let instances = offsets as u32;
            if (VAR_MAX as u64) - (count as u64) < offsets {
                return Err(CannotEncode);
            }
            offsets += count as u64;
            Markers::Flags {
                totality,
                instances,
                count,
            }
        };

        Ok(VarLayout {
            f_offsets,
            p_offsets,
            src_sizes,
            markers,
            max_var: (offsets - 1) as u32,
        })
    }

    /// Per-source-sort sizes of this epoch
    pub fn src_sizes(&self) -> &[usize] {
        &self.src_sizes
    }

    /// The largest allocated variable id
    pub fn max_var(&self) -> u32 {
        self.max_var
    }

    /// The variable of `f(tuple[..arity]) = tuple[arity]`
    ///
    /// `tuple` holds `arity + 1` domain values, 1-based, the result last.
    pub fn fun_var(&self, sorted: &SortedSignature, f: FunId, tuple: &[usize]) -> u32 {
        let fsig = &sorted.function_signatures[f];
        debug_assert_eq!(tuple.len(), fsig.len());
        debug_assert!(self.f_offsets[f] != 0);
        let mut var = self.f_offsets[f] as u64;
        let mut mult: u64 = 1;
        for (i, &val) in tuple.iter().enumerate() {
            debug_assert!(val >= 1 && val <= self.src_sizes[fsig[i]]);
            var += mult * (val as u64 - 1);
            mult *= self.src_sizes[fsig[i]] as u64;
        }
        var as u32
    }

    /// The variable of `p(args)`; `args` are 1-based domain values
    pub fn pred_var(&self, sorted: &SortedSignature, p: PredId, args: &[usize]) -> u32 {
        let psig = &sorted.predicate_signatures[p];
        debug_assert_eq!(args.len(), psig.len());
        debug_assert!(p == 0 || self.p_offsets[p] != 0 || args.is_empty());
        let mut var = self.p_offsets[p] as u64;
        let mut mult: u64 = 1;
        for (i, &val) in args.iter().enumerate() {
            debug_assert!(val >= 1 && val <= self.src_sizes[psig[i]]);
            var += mult * (val as u64 - 1);
            mult *= self.src_sizes[psig[i]] as u64;
        }
        var as u32
    }

    /// The literal of a function grounding with the given polarity
    pub fn fun_lit(
        &self,
        sorted: &SortedSignature,
        f: FunId,
        tuple: &[usize],
        polarity: bool,
    ) -> i32 {
        lit(self.fun_var(sorted, f, tuple), polarity)
    }

    /// The literal of a predicate grounding with the given polarity
    pub fn pred_lit(
        &self,
        sorted: &SortedSignature,
        p: PredId,
        args: &[usize],
        polarity: bool,
    ) -> i32 {
        lit(self.pred_var(sorted, p, args), polarity)
    }

    /// The staircase marker variable `index` of a sort (contour only)
    pub fn level_marker(&self, sort: DistSort, index: usize) -> u32 {
        match &self.markers {
            Markers::Contour { offsets, sizes } => {
                debug_assert!(index < sizes[sort]);
                offsets[sort] + index as u32
            }
            Markers::Flags { .. } => unreachable!("staircase markers need the contour scheme"),
        }
    }

    /// The totality flag variable of a sort (flag scheme only)
    pub fn totality_marker(&self, sort: DistSort) -> u32 {
        match &self.markers {
            Markers::Flags { totality, .. } => totality + sort as u32,
            Markers::Contour { .. } => unreachable!("totality flags need the flag scheme"),
        }
    }

    /// The instance flag variable of a sort (flag scheme only)
    pub fn instances_marker(&self, sort: DistSort) -> u32 {
        match &self.markers {
            Markers::Flags { instances, .. } => instances + sort as u32,
            Markers::Contour { .. } => unreachable!("instance flags need the flag scheme"),
        }
    }

    /// Classifies a marker variable; `None` for ordinary symbol variables
    pub fn classify_marker(&self, var: u32) -> Option<MarkerKind> {
        match &self.markers {
            Markers::Contour { offsets, sizes } => {
                for (sort, (&off, &size)) in offsets.iter().zip(sizes.iter()).enumerate() {
                    if var >= off && var < off + size as u32 {
                        return Some(MarkerKind::Level {
                            sort,
                            index: (var - off) as usize,
                        });
                    }
                }
                None
            }
            Markers::Flags {
                totality,
                instances,
                count,
            } => {
                if var >= *totality && var < totality + *count as u32 {
                    Some(MarkerKind::Totality((var - totality) as usize))
                } else if var >= *instances && var < instances + *count as u32 {
                    Some(MarkerKind::Instances((var - instances) as usize))
                } else {
                    None
                }
            }
        }
    }

    /// The assumption literals activating the current size vector
    pub fn assumptions(&self) -> Vec<i32> {
        match &self.markers {
            Markers::Contour { offsets, sizes } => offsets
                .iter()
                .zip(sizes.iter())
                .map(|(&off, &size)| lit(off + size as u32 - 1, false))
                .collect(),
            Markers::Flags {
                totality,
                instances,
                count,
            } => (0..*count as u32)
                .map(|s| lit(totality + s, true))
                .chain((0..*count as u32).map(|s| lit(instances + s, true)))
                .collect(),
        }
    }
}

/// Encodes a variable and polarity as a signed DIMACS-style literal
pub fn lit(var: u32, polarity: bool) -> i32 {
    debug_assert!(var >= 1 && var <= VAR_MAX);
    if polarity {
        var as i32
    } else {
        -(var as i32)
    }
}
