//! Pattern enumeration under one structure: compaction, canonicalisation and
//! permutation ranking.
//!
//! A pattern assigns one terminal group to every position of a structure.
//! Repeated nonterminals make permutations of those assignments
//! probability-equivalent; the manager enumerates only canonical
//! representatives (digits non-decreasing within each permutation group) and
//! scales counts by the multiset-permutation multiplicity of the class.
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use num::{BigInt, BigUint, One, Zero};

use crate::big_count::BigCount;
use crate::mixed_radix::MixedRadixNumber;
use crate::nonterminal::Nonterminal;
use crate::terminal_group::{LookupData, ParseStatus, TerminalGroupIter};
use crate::utils::STRUCTURE_BREAK;

/// Enumerates the patterns of one structure through a mixed-radix counter
/// whose places index each position's terminal groups.
pub struct PatternManager<'a> {
    base_probability: f64,
    positions: &'a [Arc<Nonterminal>],
    counter: MixedRadixNumber,
    // Permutation-group id of each position, in first-occurrence order.
    group_ids: Vec<usize>,
    // Positions of each permutation group, ascending.
    group_positions: Vec<Vec<usize>>,
}

impl<'a> PatternManager<'a> {
    /// Create a manager over the structure's positions, starting at the
    /// all-zero (highest-probability) pattern.
    pub fn new(base_probability: f64, positions: &'a [Arc<Nonterminal>]) -> Self {
        let bases = positions
            .iter()
            .map(|nonterminal| nonterminal.groups().len() as u32)
            .collect();
        let mut ids: AHashMap<&str, usize> = AHashMap::new();
        let mut group_ids = Vec::with_capacity(positions.len());
        let mut group_positions: Vec<Vec<usize>> = Vec::new();
        for (position, nonterminal) in positions.iter().enumerate() {
            let next = group_positions.len();
            let id = *ids.entry(nonterminal.representation()).or_insert(next);
            if id == next {
                group_positions.push(Vec::new());
            }
            group_ids.push(id);
            group_positions[id].push(position);
        }
        Self {
            base_probability,
            positions,
            counter: MixedRadixNumber::new(bases),
            group_ids,
            group_positions,
        }
    }

    /// Return to the all-zero pattern.
    pub fn reset(&mut self) {
        self.counter.clear();
    }

    /// Advance to the next pattern. Returns `false` when the space is
    /// exhausted.
    pub fn increment(&mut self) -> bool {
        self.counter.increment()
    }

    /// Skip forward past the low-probability subtree under the current
    /// pattern. Returns `false` when the space is exhausted.
    pub fn intelligent_skip(&mut self) -> bool {
        self.counter.intelligent_skip()
    }

    /// The current pattern digits, one group index per position.
    pub fn digits(&self) -> &[u32] {
        self.counter.digits()
    }

    fn probability_of_digits(&self, digits: &[u32]) -> f64 {
        let mut probability = self.base_probability;
        for (position, &digit) in digits.iter().enumerate() {
            probability *= self.positions[position].group(digit as usize).probability();
        }
        probability
    }

    /// The probability of the current pattern, including the structure's base
    /// probability.
    pub fn pattern_probability(&self) -> f64 {
        self.probability_of_digits(self.counter.digits())
    }

    /// The current pattern's probability evaluated in canonical digit order.
    ///
    /// Floating-point products are order-sensitive; evaluating through the
    /// canonical representative makes every member of an equivalence class
    /// emit a bitwise-identical probability.
    pub fn canonicalized_probability(&self) -> f64 {
        self.probability_of_digits(&self.canonical_digits())
    }

    /// The number of strings the current pattern expands to.
    pub fn count_strings(&self) -> BigCount {
        let mut total = BigCount::one();
        for (position, &digit) in self.counter.digits().iter().enumerate() {
            total.mul_count(&self.positions[position].group(digit as usize).count_strings());
        }
        total
    }

    /// Whether the current pattern is the canonical representative of its
    /// equivalence class: within every permutation group, digits never
    /// decrease left to right.
    pub fn is_first_permutation(&self) -> bool {
        let mut last_seen: Vec<Option<u32>> = vec![None; self.group_positions.len()];
        for (position, &group_id) in self.group_ids.iter().enumerate() {
            if self.group_positions[group_id].len() < 2 {
                continue;
            }
            let digit = self.counter.get_place(position);
            if let Some(previous) = last_seen[group_id] {
                if digit < previous {
                    return false;
                }
            }
            last_seen[group_id] = Some(digit);
        }
        true
    }

    /// The size of the current pattern's equivalence class: the product over
    /// repeating groups of the multiset permutations of their digits.
    pub fn count_permutations(&self) -> BigCount {
        let mut total = BigCount::one();
        for positions in &self.group_positions {
            if positions.len() < 2 {
                continue;
            }
            let digits: Vec<u32> = positions
                .iter()
                .map(|&position| self.counter.get_place(position))
                .collect();
            total.mul_count(&BigCount::from_biguint(multiset_permutation_count(&digits)));
        }
        total
    }

    /// The canonical representative of the current pattern's class.
    pub fn canonical_digits(&self) -> Vec<u32> {
        let mut digits: Vec<u32> = self.counter.digits().to_vec();
        for positions in &self.group_positions {
            if positions.len() < 2 {
                continue;
            }
            // Min-heap refill: positions are ascending, so popping mins
            // produces the unique non-decreasing arrangement.
            let mut heap: BinaryHeap<Reverse<u32>> = positions
                .iter()
                .map(|&position| Reverse(digits[position]))
                .collect();
            for &position in positions {
                if let Some(Reverse(smallest)) = heap.pop() {
                    digits[position] = smallest;
                }
            }
        }
        digits
    }

    /// The first string of the canonical representative, terminals joined by
    /// the structure break byte.
    pub fn canonicalized_first_string(&self) -> Vec<u8> {
        let digits = self.canonical_digits();
        let mut out = Vec::new();
        for (position, &digit) in digits.iter().enumerate() {
            if position > 0 {
                out.push(STRUCTURE_BREAK);
            }
            out.extend_from_slice(&self.positions[position].group(digit as usize).first_string());
        }
        out
    }

    /// One terminal cursor per position for the current pattern.
    pub fn string_iterators(&self) -> Vec<Box<dyn TerminalGroupIter + '_>> {
        self.counter
            .digits()
            .iter()
            .enumerate()
            .map(|(position, &digit)| self.positions[position].group(digit as usize).iter())
            .collect()
    }

    // Rank of the current digit assignment among all permutations of its
    // class, combined across repeating groups as a mixed-radix number with
    // each group's permutation count as base.
    fn permutation_rank(&self) -> BigUint {
        let mut rank = BigUint::zero();
        let mut total = BigUint::one();
        for positions in &self.group_positions {
            if positions.len() < 2 {
                continue;
            }
            let digits: Vec<u32> = positions
                .iter()
                .map(|&position| self.counter.get_place(position))
                .collect();
            let (count, group_rank) = multiset_permutation_rank(&digits);
            rank = rank * &count + group_rank;
            total *= count;
        }
        debug_assert!(rank < total);
        rank
    }

    /// Resolve a terminal decomposition to its pattern and rank.
    ///
    /// Sets the counter to the matched pattern, then combines the permutation
    /// rank with the Horner rank of the per-position in-group indices:
    /// `rank = permutation_rank * strings_in_pattern + rank_in_pattern`.
    pub fn lookup_and_set_pattern(&mut self, terminals: &[&[u8]]) -> LookupData {
        debug_assert_eq!(terminals.len(), self.positions.len());
        let mut lookups = Vec::with_capacity(terminals.len());
        for (position, terminal) in terminals.iter().enumerate() {
            let result = self.positions[position].lookup(terminal);
            if !result.lookup.can_parse() {
                return LookupData::failure(result.lookup.parse_status);
            }
            lookups.push(result);
        }
        for (position, result) in lookups.iter().enumerate() {
            self.counter.set_place(position, result.group_index as u32);
        }
        let mut rank_in_pattern = BigUint::zero();
        for (position, result) in lookups.iter().enumerate() {
            let digit = result.group_index;
            let base = self.positions[position]
                .group(digit)
                .count_strings()
                .to_biguint();
            let Some(index) = result.lookup.index.to_biguint() else {
                return LookupData::failure(ParseStatus::UNEXPECTED_FAILURE);
            };
            rank_in_pattern = rank_in_pattern * base + index;
        }
        let strings_in_pattern = self.count_strings().to_biguint();
        let rank = self.permutation_rank() * strings_in_pattern + rank_in_pattern;
        let mut source_ids: AHashSet<Box<str>> = AHashSet::new();
        for result in &lookups {
            source_ids.extend(result.lookup.source_ids.iter().cloned());
        }
        LookupData {
            parse_status: ParseStatus::CAN_PARSE,
            probability: self.canonicalized_probability(),
            index: BigInt::from(rank),
            first_string_of_pattern: self.canonicalized_first_string(),
            source_ids,
        }
    }
}

fn multiplicities(digits: &[u32]) -> AHashMap<u32, u64> {
    let mut counts: AHashMap<u32, u64> = AHashMap::new();
    for &digit in digits {
        *counts.entry(digit).or_insert(0) += 1;
    }
    counts
}

/// `n! / ∏ mᵢ!` over the multiplicities of the digit values.
fn multiset_permutation_count(digits: &[u32]) -> BigUint {
    let mut count = BigCount::factorial(digits.len() as u64).to_biguint();
    for (_, m) in multiplicities(digits) {
        count /= BigCount::factorial(m).to_biguint();
    }
    count
}

/// The rank of `digits` among all permutations of its multiset, plus the
/// total permutation count.
///
/// Walking left to right with `S` elements remaining and `current` ways to
/// arrange them, placing a digit `d` skips `current * weak / S` earlier
/// permutations, where `weak` counts remaining elements smaller than `d`.
/// Every division is exact.
fn multiset_permutation_rank(digits: &[u32]) -> (BigUint, BigUint) {
    let total = multiset_permutation_count(digits);
    let mut remaining = multiplicities(digits);
    let mut current = total.clone();
    let mut size = digits.len() as u64;
    let mut rank = BigUint::zero();
    for &digit in digits {
        let weak: u64 = remaining
            .iter()
            .filter(|(&value, _)| value < digit)
            .map(|(_, &m)| m)
            .sum();
        rank += &current * weak / size;
        let multiplicity = remaining.get(&digit).copied().unwrap_or(0);
        current = current * multiplicity / size;
        if let Some(m) = remaining.get_mut(&digit) {
            *m -= 1;
        }
        size -= 1;
    }
    (total, rank)
}
