//! Lookup results and the abstraction shared by seen and unseen terminal
//! groups.
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use ahash::AHashSet;
use num::BigInt;

use crate::big_count::BigCount;

/// The outcome bits of a parse or lookup attempt.
///
/// Statuses combine: a candidate that matches an unseen group's mask but is
/// actually a training terminal reports `TERMINAL_NOT_FOUND |
/// TERMINAL_COLLISION`. Non-parsing statuses order numerically, with the more
/// specific diagnosis carrying the higher value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ParseStatus(pub u8);

impl ParseStatus {
    /// No status bits set.
    pub const NONE: ParseStatus = ParseStatus(0);
    /// The input parses; probability and index are valid.
    pub const CAN_PARSE: ParseStatus = ParseStatus(0x01);
    /// The input parses but its probability falls below the active cutoff.
    pub const BEYOND_CUTOFF: ParseStatus = ParseStatus(0x02);
    /// No structure matches the input's character-class decomposition.
    pub const STRUCTURE_NOT_FOUND: ParseStatus = ParseStatus(0x04);
    /// A terminal slice matched no group of its nonterminal.
    pub const TERMINAL_NOT_FOUND: ParseStatus = ParseStatus(0x08);
    /// The candidate is a training terminal probed against an unseen group.
    pub const TERMINAL_COLLISION: ParseStatus = ParseStatus(0x10);
    /// The candidate cannot be produced by the group's generator mask.
    pub const TERMINAL_CANT_BE_GENERATED: ParseStatus = ParseStatus(0x20);
    /// Internal inconsistency; callers treat this as fatal.
    pub const UNEXPECTED_FAILURE: ParseStatus = ParseStatus(0x40);

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: ParseStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the parse succeeded.
    pub fn can_parse(self) -> bool {
        self.contains(ParseStatus::CAN_PARSE)
    }
}

impl BitOr for ParseStatus {
    type Output = ParseStatus;

    fn bitor(self, rhs: ParseStatus) -> ParseStatus {
        ParseStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParseStatus {
    fn bitor_assign(&mut self, rhs: ParseStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ParseStatus, &str); 7] = [
            (ParseStatus::CAN_PARSE, "CanParse"),
            (ParseStatus::BEYOND_CUTOFF, "BeyondCutoff"),
            (ParseStatus::STRUCTURE_NOT_FOUND, "StructureNotFound"),
            (ParseStatus::TERMINAL_NOT_FOUND, "TerminalNotFound"),
            (ParseStatus::TERMINAL_COLLISION, "TerminalCollision"),
            (
                ParseStatus::TERMINAL_CANT_BE_GENERATED,
                "TerminalCantBeGenerated",
            ),
            (ParseStatus::UNEXPECTED_FAILURE, "UnexpectedFailure"),
        ];
        if self.0 == 0 {
            return write!(f, "None");
        }
        let mut first = true;
        for (status, name) in NAMES {
            if self.contains(status) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The result of looking up a string, a terminal, or a pattern.
#[derive(Debug, Clone)]
pub struct LookupData {
    /// Outcome bits; see [`ParseStatus`].
    pub parse_status: ParseStatus,
    /// Probability of the looked-up item, `0.0` when it does not parse.
    pub probability: f64,
    /// Zero-based rank, `-1` when the item does not parse.
    pub index: BigInt,
    /// The first string of the canonicalised pattern the item belongs to.
    pub first_string_of_pattern: Vec<u8>,
    /// Union of the source identifiers that contributed the item.
    pub source_ids: AHashSet<Box<str>>,
}

impl LookupData {
    /// A non-parsing result carrying only a status.
    pub fn failure(parse_status: ParseStatus) -> Self {
        Self {
            parse_status,
            probability: 0.0,
            index: BigInt::from(-1),
            first_string_of_pattern: Vec::new(),
            source_ids: AHashSet::new(),
        }
    }

    /// Whether the lookup succeeded.
    pub fn can_parse(&self) -> bool {
        self.parse_status.can_parse()
    }
}

/// The contract shared by seen and unseen terminal groups.
///
/// A group is a set of terminals with one common probability under a
/// nonterminal. Groups are immutable after grammar load.
pub trait TerminalGroup: Send + Sync {
    /// The number of terminals in the group.
    fn count_strings(&self) -> BigCount;

    /// The probability shared by every terminal of the group.
    fn probability(&self) -> f64;

    /// The first terminal in group order, with the out-representation's
    /// uppercasing applied.
    fn first_string(&self) -> Vec<u8>;

    /// Look a candidate terminal up within the group.
    fn lookup(&self, terminal: &[u8]) -> LookupData;

    /// The candidate's in-group index, or `-1` when absent.
    fn index_in_group(&self, terminal: &[u8]) -> BigInt {
        let lookup = self.lookup(terminal);
        if lookup.can_parse() {
            lookup.index
        } else {
            BigInt::from(-1)
        }
    }

    /// A cursor over the group's terminals in group order.
    fn iter(&self) -> Box<dyn TerminalGroupIter + '_>;

    /// Draw one terminal uniformly from the group.
    fn random_terminal(&self, rng: &mut dyn rand::RngCore) -> Vec<u8>;
}

/// An externally driven cursor over one terminal group.
///
/// After construction or [`restart`](TerminalGroupIter::restart) the cursor
/// sits on the first terminal (groups are never empty). Cursors are
/// single-consumer and must not outlive their group.
pub trait TerminalGroupIter {
    /// Reposition on the first terminal.
    fn restart(&mut self);

    /// Advance to the next terminal. Returns `false` once the cursor moves
    /// past the last one.
    fn increment(&mut self) -> bool;

    /// Whether the cursor has moved past the last terminal.
    fn is_end(&self) -> bool;

    /// The terminal under the cursor.
    ///
    /// # Panics
    ///
    /// May panic when `is_end()` is true.
    fn current(&self) -> &[u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_combine() {
        let status = ParseStatus::TERMINAL_NOT_FOUND | ParseStatus::TERMINAL_COLLISION;
        assert!(status.contains(ParseStatus::TERMINAL_NOT_FOUND));
        assert!(status.contains(ParseStatus::TERMINAL_COLLISION));
        assert!(!status.contains(ParseStatus::CAN_PARSE));
        assert!(!status.can_parse());
        assert_eq!(status.to_string(), "TerminalNotFound|TerminalCollision");
    }

    #[test]
    fn more_specific_statuses_order_higher() {
        let specific = ParseStatus::TERMINAL_NOT_FOUND | ParseStatus::TERMINAL_CANT_BE_GENERATED;
        assert!(specific > ParseStatus::STRUCTURE_NOT_FOUND);
        assert!(ParseStatus::TERMINAL_NOT_FOUND > ParseStatus::STRUCTURE_NOT_FOUND);
    }

    #[test]
    fn failure_carries_sentinel_index() {
        let failure = LookupData::failure(ParseStatus::STRUCTURE_NOT_FOUND);
        assert!(!failure.can_parse());
        assert_eq!(failure.index, BigInt::from(-1));
        assert_eq!(failure.probability, 0.0);
    }
}
