//! Nonterminals and the deduplicating collection that owns them.
//!
//! A nonterminal wraps one terminals file: a probability-descending block of
//! training terminals, an optional blank separator, and one generator-mask
//! line per unseen group. The file is memory-mapped once and shared read-only
//! by every group of the nonterminal.
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use memmap2::Mmap;
use rand::Rng;

use crate::big_count::BigCount;
use crate::config::Config;
use crate::grammar::LoadGrammarError;
use crate::parser::{self, Run};
use crate::seen_group::SeenTerminalGroup;
use crate::terminal_group::{LookupData, ParseStatus, TerminalGroup};
use crate::unseen_group::UnseenTerminalGroup;
use crate::utils::TerminalClass;

/// The read-only bytes of one terminals file.
///
/// Production grammars are memory-mapped; tests and embedders can supply the
/// bytes directly. Terminal groups share the buffer through an `Arc` and hold
/// byte ranges into it, so no group outlives the mapping.
pub enum TerminalData {
    /// A memory-mapped terminals file.
    Mapped(Mmap),
    /// An in-memory buffer.
    Owned(Vec<u8>),
}

impl TerminalData {
    /// Map a terminals file read-only.
    pub fn map_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and grammar files are not mutated
        // while an engine instance is alive.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(TerminalData::Mapped(mmap))
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        TerminalData::Owned(bytes)
    }
}

impl Deref for TerminalData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            TerminalData::Mapped(mmap) => mmap,
            TerminalData::Owned(bytes) => bytes,
        }
    }
}

impl fmt::Debug for TerminalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TerminalData::Mapped(_) => "mapped",
            TerminalData::Owned(_) => "owned",
        };
        write!(f, "TerminalData({kind}, {} bytes)", self.len())
    }
}

/// A nonterminal lookup result: which group matched and where inside it.
#[derive(Debug, Clone)]
pub struct NonterminalLookup {
    /// Index of the matching group, unspecified when the lookup failed.
    pub group_index: usize,
    /// The group-local lookup result.
    pub lookup: LookupData,
}

/// One nonterminal: an ordered list of terminal groups over a shared
/// terminals file.
pub struct Nonterminal {
    representation: String,
    class: TerminalClass,
    arity: usize,
    groups: Vec<Box<dyn TerminalGroup>>,
}

impl Nonterminal {
    /// Load a nonterminal by mapping `<folder>/<repr>.txt`, with `U`
    /// normalised to `L` in the file name (terminals are stored lowercased).
    pub(crate) fn load(
        run: Run,
        terminals_folder: &Path,
        config: &Config,
    ) -> Result<Nonterminal, LoadGrammarError> {
        let normalized = if run.class == TerminalClass::Uppercase {
            TerminalClass::Lowercase
        } else {
            run.class
        };
        let path = terminals_folder.join(format!(
            "{}{}.txt",
            normalized.letter() as char,
            run.arity
        ));
        let data = TerminalData::map_file(&path)
            .map_err(|source| LoadGrammarError::TerminalsFile { path, source })?;
        Self::from_data(run, Arc::new(data), config)
    }

    /// Build a nonterminal from already-loaded terminals-file bytes.
    pub(crate) fn from_data(
        run: Run,
        data: Arc<TerminalData>,
        config: &Config,
    ) -> Result<Nonterminal, LoadGrammarError> {
        let representation = run.representation();
        let uppercase = run.class == TerminalClass::Uppercase;
        let bytes_len = data.len();
        let mut groups: Vec<Box<dyn TerminalGroup>> = Vec::new();

        struct PendingGroup {
            start: usize,
            probability: f64,
            cardinality: u64,
        }
        let mut pending: Option<PendingGroup> = None;
        let mut last_probability = f64::INFINITY;
        let mut cursor = 0usize;
        let mut line_number = 0usize;
        let mut seen_end = bytes_len;
        let mut in_unseen_block = false;

        while let Some((line, next)) = parser::next_line(&data, cursor) {
            line_number += 1;
            if line.is_empty() {
                seen_end = cursor;
                in_unseen_block = true;
                cursor = next;
                break;
            }
            let parsed = parser::terminal_line(line).ok_or_else(|| {
                LoadGrammarError::MalformedTerminalLine {
                    nonterminal: representation.clone(),
                    line_number,
                }
            })?;
            if !(parsed.probability > 0.0 && parsed.probability <= 1.0) {
                return Err(LoadGrammarError::ProbabilityOutOfRange {
                    value: parsed.probability,
                    location: format!("{representation} line {line_number}"),
                });
            }
            if parser::source_ids(parsed.source_ids).is_none() {
                return Err(LoadGrammarError::EmptySourceIds {
                    location: format!("{representation} line {line_number}"),
                });
            }
            if parsed.probability > last_probability {
                return Err(LoadGrammarError::ProbabilityNotDescending {
                    nonterminal: representation.clone(),
                    line_number,
                });
            }
            last_probability = parsed.probability;
            // Contiguous lines of bit-equal probability extend one group.
            let extends_group =
                matches!(&pending, Some(group) if group.probability == parsed.probability);
            if extends_group {
                if let Some(group) = pending.as_mut() {
                    group.cardinality += 1;
                }
            } else {
                if let Some(group) = pending.take() {
                    groups.push(Box::new(SeenTerminalGroup::new(
                        data.clone(),
                        group.start..cursor,
                        group.probability,
                        group.cardinality,
                        uppercase,
                    )));
                }
                pending = Some(PendingGroup {
                    start: cursor,
                    probability: parsed.probability,
                    cardinality: 1,
                });
            }
            cursor = next;
        }
        if let Some(group) = pending.take() {
            let end = if in_unseen_block { seen_end } else { bytes_len };
            groups.push(Box::new(SeenTerminalGroup::new(
                data.clone(),
                group.start..end,
                group.probability,
                group.cardinality,
                uppercase,
            )));
        }

        if in_unseen_block {
            while let Some((line, next)) = parser::next_line(&data, cursor) {
                line_number += 1;
                cursor = next;
                if line.is_empty() {
                    continue;
                }
                let parsed = parser::terminal_line(line).ok_or_else(|| {
                    LoadGrammarError::MalformedTerminalLine {
                        nonterminal: representation.clone(),
                        line_number,
                    }
                })?;
                if !(parsed.probability > 0.0 && parsed.probability <= 1.0) {
                    return Err(LoadGrammarError::ProbabilityOutOfRange {
                        value: parsed.probability,
                        location: format!("{representation} line {line_number}"),
                    });
                }
                let mask_text = std::str::from_utf8(parsed.terminal).unwrap_or("");
                let mask = parser::mask_classes(mask_text).ok_or_else(|| {
                    let character = mask_text
                        .chars()
                        .find(|c| !matches!(c, 'L' | 'D' | 'S' | '0'..='9'))
                        .unwrap_or('?');
                    LoadGrammarError::InvalidMaskCharacter {
                        character,
                        nonterminal: representation.clone(),
                    }
                })?;
                groups.push(Box::new(UnseenTerminalGroup::new(
                    data.clone(),
                    0..seen_end,
                    mask_text,
                    mask,
                    uppercase,
                    parsed.probability,
                    config.unseen_region_size,
                )?));
            }
        }

        if groups.is_empty() {
            return Err(LoadGrammarError::EmptyTerminalsFile {
                nonterminal: representation,
            });
        }

        let nonterminal = Nonterminal {
            representation,
            class: run.class,
            arity: run.arity,
            groups,
        };
        nonterminal.check_probability_mass(config);
        Ok(nonterminal)
    }

    // The per-nonterminal invariant: group probability times cardinality sums
    // to one. Drift beyond tolerance is diagnosed, not fatal.
    fn check_probability_mass(&self, config: &Config) {
        let mass = self.probability_mass();
        let tolerance =
            config.probability_tolerance_factor * f64::EPSILON * self.groups.len() as f64 * mass;
        if (mass - 1.0).abs() > tolerance.max(f64::EPSILON) {
            log::warn!(
                "nonterminal {} has probability mass {mass}, expected 1; \
                 the grammar will still load but counts and ranks reflect the stored mass",
                self.representation
            );
        }
    }

    /// Total probability mass over all groups.
    pub fn probability_mass(&self) -> f64 {
        self.groups
            .iter()
            .map(|group| group.probability() * group.count_strings().to_f64())
            .sum()
    }

    /// The representation key, e.g. `L3` or `U2`.
    pub fn representation(&self) -> &str {
        &self.representation
    }

    /// The character class of every terminal position.
    pub fn class(&self) -> TerminalClass {
        self.class
    }

    /// The number of characters of every terminal.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// The terminal groups in descending-probability order.
    pub fn groups(&self) -> &[Box<dyn TerminalGroup>] {
        &self.groups
    }

    /// The group at `index`.
    pub fn group(&self, index: usize) -> &dyn TerminalGroup {
        self.groups[index].as_ref()
    }

    /// The number of terminals across all groups.
    pub fn count_strings(&self) -> BigCount {
        let mut total = BigCount::zero();
        for group in &self.groups {
            total.add_count(&group.count_strings());
        }
        total
    }

    /// Look a terminal up across the groups in order, returning the first
    /// match. Failure statuses of the probed groups are unioned into the
    /// result.
    pub fn lookup(&self, terminal: &[u8]) -> NonterminalLookup {
        let mut failures = ParseStatus::NONE;
        for (group_index, group) in self.groups.iter().enumerate() {
            let lookup = group.lookup(terminal);
            if lookup.can_parse() {
                return NonterminalLookup {
                    group_index,
                    lookup,
                };
            }
            failures |= lookup.parse_status;
        }
        NonterminalLookup {
            group_index: usize::MAX,
            lookup: LookupData::failure(failures | ParseStatus::TERMINAL_NOT_FOUND),
        }
    }

    /// Sample a group index with probability proportional to its mass
    /// (probability times cardinality).
    pub fn random_group(&self, rng: &mut dyn rand::RngCore) -> usize {
        let total = self.probability_mass();
        let mut draw = rng.gen::<f64>() * total;
        for (index, group) in self.groups.iter().enumerate() {
            let mass = group.probability() * group.count_strings().to_f64();
            if draw < mass {
                return index;
            }
            draw -= mass;
        }
        self.groups.len() - 1
    }

    /// Sample a terminal uniformly from the group at `group_index`.
    pub fn random_string(&self, group_index: usize, rng: &mut dyn rand::RngCore) -> Vec<u8> {
        self.groups[group_index].random_terminal(rng)
    }
}

impl fmt::Debug for Nonterminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nonterminal")
            .field("representation", &self.representation)
            .field("groups", &self.groups.len())
            .field("count_strings", &self.count_strings().to_string())
            .finish()
    }
}

/// The deduplicating store of nonterminals, keyed by representation.
///
/// The first load of a representation wins; later structures referencing the
/// same nonterminal share it through an `Arc`.
pub struct NonterminalCollection {
    terminals_folder: PathBuf,
    nonterminals: AHashMap<String, Arc<Nonterminal>>,
}

impl NonterminalCollection {
    /// Create an empty collection reading terminals files from `folder`.
    pub fn new(terminals_folder: impl Into<PathBuf>) -> Self {
        Self {
            terminals_folder: terminals_folder.into(),
            nonterminals: AHashMap::new(),
        }
    }

    pub(crate) fn get_or_load(
        &mut self,
        run: Run,
        config: &Config,
    ) -> Result<Arc<Nonterminal>, LoadGrammarError> {
        let key = run.representation();
        if let Some(nonterminal) = self.nonterminals.get(&key) {
            return Ok(nonterminal.clone());
        }
        let nonterminal = Arc::new(Nonterminal::load(run, &self.terminals_folder, config)?);
        self.nonterminals.insert(key, nonterminal.clone());
        Ok(nonterminal)
    }

    /// The nonterminal for `representation`, if loaded.
    pub fn get(&self, representation: &str) -> Option<&Arc<Nonterminal>> {
        self.nonterminals.get(representation)
    }

    /// The number of distinct nonterminals loaded.
    pub fn len(&self) -> usize {
        self.nonterminals.len()
    }

    /// Whether no nonterminal has been loaded.
    pub fn is_empty(&self) -> bool {
        self.nonterminals.is_empty()
    }

    /// Iterate over the loaded nonterminals in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Nonterminal>> {
        self.nonterminals.values()
    }
}

impl fmt::Debug for NonterminalCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonterminalCollection")
            .field("terminals_folder", &self.terminals_folder)
            .field("nonterminals", &self.nonterminals.len())
            .finish()
    }
}
