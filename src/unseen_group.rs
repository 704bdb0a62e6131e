//! Synthetic terminal groups that generate strings the training data never
//! contained.
//!
//! An unseen group is defined by a generator mask over the `L`/`D`/`S`
//! classes. The mask spans a terminal space of `T = ∏ class_size` strings,
//! each of which maps bijectively to an index in `[0, T)`; the group covers
//! the complement of the training terminals inside that space and spreads its
//! probability mass uniformly over it. Iteration walks the index space in
//! fixed-size windows, shadowing training terminals with a [`BitArray`].
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use num::bigint::RandBigInt;
use num::{BigInt, BigUint, One, ToPrimitive, Zero};

use crate::big_count::BigCount;
use crate::bit_array::BitArray;
use crate::grammar::LoadGrammarError;
use crate::nonterminal::TerminalData;
use crate::parser;
use crate::terminal_group::{LookupData, ParseStatus, TerminalGroup, TerminalGroupIter};
use crate::utils::TerminalClass;

/// The source id reported for every generated terminal.
pub const UNSEEN_SOURCE_ID: &str = "UNSEEN";

/// A terminal group generating the unseen complement of a generator mask.
pub struct UnseenTerminalGroup {
    data: Arc<TerminalData>,
    seen_range: Range<usize>,
    mask: Vec<TerminalClass>,
    uppercase: bool,
    probability: f64,
    total_space: BigUint,
    unseen_count: BigUint,
    // Weight of each mask position, most significant first.
    place_values: Vec<BigUint>,
    region_size: usize,
    first_string_cache: OnceLock<Vec<u8>>,
}

impl UnseenTerminalGroup {
    /// Build the group over the host nonterminal's seen block.
    ///
    /// Fails when the training terminals fill the whole mask space, which
    /// would leave the group's probability mass with nowhere to go.
    pub(crate) fn new(
        data: Arc<TerminalData>,
        seen_range: Range<usize>,
        mask_text: &str,
        mask: Vec<TerminalClass>,
        uppercase: bool,
        total_mass: f64,
        region_size: usize,
    ) -> Result<Self, LoadGrammarError> {
        debug_assert!(!mask.is_empty());
        debug_assert!(region_size > 0);
        let mut place_values = vec![BigUint::one(); mask.len()];
        for position in (0..mask.len() - 1).rev() {
            place_values[position] = &place_values[position + 1] * mask[position + 1].size();
        }
        let total_space = &place_values[0] * mask[0].size();
        let mut group = Self {
            data,
            seen_range,
            mask,
            uppercase,
            probability: 0.0,
            total_space,
            unseen_count: BigUint::zero(),
            place_values,
            region_size,
            first_string_cache: OnceLock::new(),
        };
        let mut seen_matching = 0u64;
        for (_, line) in parser::lines_with_offsets(group.seen_bytes()) {
            if let Some(parsed) = parser::terminal_line(line) {
                if group.terminal_index(parsed.terminal).is_some() {
                    seen_matching += 1;
                }
            }
        }
        if BigUint::from(seen_matching) >= group.total_space {
            return Err(LoadGrammarError::UnseenSpaceExhausted {
                mask: mask_text.to_string(),
            });
        }
        group.unseen_count = &group.total_space - seen_matching;
        group.probability = total_mass / group.unseen_count.to_f64().unwrap_or(f64::INFINITY);
        Ok(group)
    }

    fn seen_bytes(&self) -> &[u8] {
        &self.data[self.seen_range.clone()]
    }

    /// The size of the full mask space `T`.
    pub fn total_space(&self) -> &BigUint {
        &self.total_space
    }

    /// Map a canonical (lowercased) terminal to its index in `[0, T)`, or
    /// `None` when the mask cannot generate it.
    pub fn terminal_index(&self, terminal: &[u8]) -> Option<BigUint> {
        if terminal.len() != self.mask.len() {
            return None;
        }
        let mut index = BigUint::zero();
        for ((&byte, class), place) in terminal
            .iter()
            .zip(&self.mask)
            .zip(&self.place_values)
            .rev()
        {
            index += place * class.index_of(byte)?;
        }
        Some(index)
    }

    /// The inverse of [`terminal_index`](Self::terminal_index): the terminal
    /// at `index`, with the out-representation's case applied.
    pub fn generate(&self, index: &BigUint) -> Vec<u8> {
        debug_assert!(index < &self.total_space);
        let mut rest = index.clone();
        let mut out = Vec::with_capacity(self.mask.len());
        for (class, place) in self.mask.iter().zip(&self.place_values) {
            let digit = (&rest / place).to_usize().unwrap_or(0);
            rest -= place * digit;
            out.push(class.nth(digit));
        }
        debug_assert!(rest.is_zero());
        if self.uppercase {
            out.make_ascii_uppercase();
        }
        out
    }

    // Shadow every training terminal whose index falls inside the window
    // starting at `region_start` and spanning `bits.len()` slots.
    fn mark_seen_in_window(&self, region_start: &BigUint, bits: &mut BitArray) {
        let region_end = region_start + bits.len();
        for (_, line) in parser::lines_with_offsets(self.seen_bytes()) {
            let Some(parsed) = parser::terminal_line(line) else {
                continue;
            };
            let Some(index) = self.terminal_index(parsed.terminal) else {
                continue;
            };
            if &index >= region_start && index < region_end {
                let offset = (index - region_start).to_usize();
                if let Some(offset) = offset {
                    bits.mark(offset);
                }
            }
        }
    }

    /// Whether the training terminal at `index` exists (used by rejection
    /// sampling).
    pub(crate) fn collides_with_seen(&self, index: &BigUint) -> bool {
        for (_, line) in parser::lines_with_offsets(self.seen_bytes()) {
            if let Some(parsed) = parser::terminal_line(line) {
                if self.terminal_index(parsed.terminal).as_ref() == Some(index) {
                    return true;
                }
            }
        }
        false
    }
}

impl TerminalGroup for UnseenTerminalGroup {
    fn count_strings(&self) -> BigCount {
        BigCount::from_biguint(self.unseen_count.clone())
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn first_string(&self) -> Vec<u8> {
        self.first_string_cache
            .get_or_init(|| {
                let iter = UnseenGroupIter::new(self);
                debug_assert!(!iter.is_end());
                iter.current.clone()
            })
            .clone()
    }

    fn lookup(&self, terminal: &[u8]) -> LookupData {
        let candidate = terminal.to_ascii_lowercase();
        let Some(index) = self.terminal_index(&candidate) else {
            return LookupData::failure(
                ParseStatus::TERMINAL_NOT_FOUND | ParseStatus::TERMINAL_CANT_BE_GENERATED,
            );
        };
        // One pass over the training terminals: everything below the
        // candidate shifts its rank down, an exact hit means the candidate is
        // a seen terminal probed against the wrong group.
        let mut lower = 0u64;
        for (_, line) in parser::lines_with_offsets(self.seen_bytes()) {
            let Some(parsed) = parser::terminal_line(line) else {
                continue;
            };
            let Some(seen_index) = self.terminal_index(parsed.terminal) else {
                continue;
            };
            if seen_index == index {
                return LookupData::failure(
                    ParseStatus::TERMINAL_NOT_FOUND | ParseStatus::TERMINAL_COLLISION,
                );
            }
            if seen_index < index {
                lower += 1;
            }
        }
        LookupData {
            parse_status: ParseStatus::CAN_PARSE,
            probability: self.probability,
            index: BigInt::from(index - lower),
            first_string_of_pattern: Vec::new(),
            source_ids: std::iter::once(Box::from(UNSEEN_SOURCE_ID)).collect(),
        }
    }

    fn iter(&self) -> Box<dyn TerminalGroupIter + '_> {
        Box::new(UnseenGroupIter::new(self))
    }

    fn random_terminal(&self, rng: &mut dyn rand::RngCore) -> Vec<u8> {
        // Rejection sampling: draws land on a training terminal once every
        // T/U tries on average, and the loader guarantees U >= 1.
        loop {
            let index = rng.gen_biguint_below(&self.total_space);
            if !self.collides_with_seen(&index) {
                return self.generate(&index);
            }
        }
    }
}

struct UnseenGroupIter<'a> {
    group: &'a UnseenTerminalGroup,
    region_start: BigUint,
    bits: BitArray,
    offset: usize,
    current: Vec<u8>,
    end: bool,
}

impl<'a> UnseenGroupIter<'a> {
    fn new(group: &'a UnseenTerminalGroup) -> Self {
        let mut iter = Self {
            group,
            region_start: BigUint::zero(),
            bits: BitArray::new(),
            offset: 0,
            current: Vec::new(),
            end: false,
        };
        iter.restart();
        iter
    }

    fn load_window(&mut self) {
        let remaining = &self.group.total_space - &self.region_start;
        let window_len = remaining
            .to_usize()
            .map_or(self.group.region_size, |r| r.min(self.group.region_size));
        self.bits.clear(window_len);
        self.group.mark_seen_in_window(&self.region_start, &mut self.bits);
    }

    // Position on the next open slot at or after `offset`, paging in new
    // windows as needed.
    fn seek_open(&mut self) {
        loop {
            let open = self.bits.find_next_open(self.offset);
            if open < self.bits.len() {
                self.offset = open;
                let index = &self.region_start + open;
                self.current = self.group.generate(&index);
                return;
            }
            self.region_start += self.bits.len();
            if self.region_start >= self.group.total_space {
                self.end = true;
                return;
            }
            self.offset = 0;
            self.load_window();
        }
    }
}

impl TerminalGroupIter for UnseenGroupIter<'_> {
    fn restart(&mut self) {
        self.region_start = BigUint::zero();
        self.offset = 0;
        self.end = false;
        self.load_window();
        self.seek_open();
    }

    fn increment(&mut self) -> bool {
        if self.end {
            return false;
        }
        self.offset += 1;
        self.seek_open();
        !self.end
    }

    fn is_end(&self) -> bool {
        self.end
    }

    fn current(&self) -> &[u8] {
        &self.current
    }
}
