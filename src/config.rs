//! The configuration module of the guess-number engine.
use serde::{Deserialize, Serialize};

/// The default cap on structure representation length; longer structures are
/// skipped at load time.
pub const DEFAULT_MAX_STRUCTURE_LENGTH: usize = 40;

/// The default window size, in terminals, used when walking the index space
/// of an unseen terminal group.
pub const DEFAULT_UNSEEN_REGION_SIZE: usize = 1 << 30;

/// The configuration of the [`Grammar`](crate::grammar::Grammar) loader and
/// its enumeration machinery. The defaults suffice for most scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Structures whose representation is longer than this are skipped at
    /// load time with a warning. The default is `40`.
    pub max_structure_length: usize,
    /// The window size used when iterating unseen terminal groups. Each
    /// window costs one bit per terminal while it is active. The default is
    /// `2^30`; tests shrink it to force multi-window traversal.
    pub unseen_region_size: usize,
    /// Multiplier for the tolerance applied when checking that a
    /// nonterminal's probability mass sums to one. The check only warns; it
    /// never rejects a grammar. The default is `16.0`.
    pub probability_tolerance_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_structure_length: DEFAULT_MAX_STRUCTURE_LENGTH,
            unseen_region_size: DEFAULT_UNSEEN_REGION_SIZE,
            probability_tolerance_factor: 16.0,
        }
    }
}
