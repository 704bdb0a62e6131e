//! Terminal groups backed by a byte range of a mapped terminals file.
use std::ops::Range;
use std::sync::Arc;

use num::BigInt;
use rand::Rng;

use crate::big_count::BigCount;
use crate::nonterminal::TerminalData;
use crate::parser;
use crate::terminal_group::{LookupData, ParseStatus, TerminalGroup, TerminalGroupIter};

/// A group of training terminals sharing one probability.
///
/// The group does not own its terminals: it is a contiguous line range of the
/// host nonterminal's terminals file, re-parsed on access. Groups are small
/// (they only span lines of equal probability), so in-group lookup is a
/// linear scan.
pub struct SeenTerminalGroup {
    data: Arc<TerminalData>,
    range: Range<usize>,
    probability: f64,
    cardinality: u64,
    uppercase: bool,
}

impl SeenTerminalGroup {
    pub(crate) fn new(
        data: Arc<TerminalData>,
        range: Range<usize>,
        probability: f64,
        cardinality: u64,
        uppercase: bool,
    ) -> Self {
        Self {
            data,
            range,
            probability,
            cardinality,
            uppercase,
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }

    // Uppercasing applies only when the out-representation asks for it; the
    // stored terminals themselves are always lowercase.
    fn apply_case(&self, terminal: &[u8]) -> Vec<u8> {
        if self.uppercase {
            terminal.to_ascii_uppercase()
        } else {
            terminal.to_vec()
        }
    }
}

impl TerminalGroup for SeenTerminalGroup {
    fn count_strings(&self) -> BigCount {
        BigCount::Native(self.cardinality)
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn first_string(&self) -> Vec<u8> {
        parser::next_line(self.bytes(), 0)
            .and_then(|(line, _)| parser::terminal_line(line))
            .map(|line| self.apply_case(line.terminal))
            .unwrap_or_default()
    }

    fn lookup(&self, terminal: &[u8]) -> LookupData {
        let candidate = terminal.to_ascii_lowercase();
        for (index, (_, line)) in parser::lines_with_offsets(self.bytes()).enumerate() {
            let Some(parsed) = parser::terminal_line(line) else {
                return LookupData::failure(ParseStatus::UNEXPECTED_FAILURE);
            };
            if parsed.terminal == candidate.as_slice() {
                let source_ids = parser::source_ids(parsed.source_ids)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                return LookupData {
                    parse_status: ParseStatus::CAN_PARSE,
                    probability: self.probability,
                    index: BigInt::from(index),
                    first_string_of_pattern: Vec::new(),
                    source_ids,
                };
            }
        }
        LookupData::failure(ParseStatus::TERMINAL_NOT_FOUND)
    }

    fn iter(&self) -> Box<dyn TerminalGroupIter + '_> {
        let mut iter = SeenGroupIter {
            group: self,
            cursor: 0,
            current: Vec::new(),
            end: false,
        };
        iter.restart();
        Box::new(iter)
    }

    fn random_terminal(&self, rng: &mut dyn rand::RngCore) -> Vec<u8> {
        let target = rng.gen_range(0..self.cardinality);
        for (index, (_, line)) in parser::lines_with_offsets(self.bytes()).enumerate() {
            if index as u64 == target {
                return parser::terminal_line(line)
                    .map(|parsed| self.apply_case(parsed.terminal))
                    .unwrap_or_default();
            }
        }
        Vec::new()
    }
}

struct SeenGroupIter<'a> {
    group: &'a SeenTerminalGroup,
    cursor: usize,
    current: Vec<u8>,
    end: bool,
}

impl SeenGroupIter<'_> {
    fn load_line(&mut self) {
        match parser::next_line(self.group.bytes(), self.cursor)
            .and_then(|(line, next)| parser::terminal_line(line).map(|parsed| (parsed, next)))
        {
            Some((parsed, next)) => {
                self.current = self.group.apply_case(parsed.terminal);
                self.cursor = next;
            }
            None => self.end = true,
        }
    }
}

impl TerminalGroupIter for SeenGroupIter<'_> {
    fn restart(&mut self) {
        self.cursor = 0;
        self.end = false;
        self.load_line();
    }

    fn increment(&mut self) -> bool {
        if self.end {
            return false;
        }
        self.load_line();
        !self.end
    }

    fn is_end(&self) -> bool {
        self.end
    }

    fn current(&self) -> &[u8] {
        &self.current
    }
}
