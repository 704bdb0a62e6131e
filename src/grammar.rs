//! The top-level grammar: loading, enumeration, sampling and lookup across
//! all structures.
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::big_count::BigCount;
use crate::config::Config;
use crate::nonterminal::NonterminalCollection;
use crate::parser;
use crate::structure::Structure;
use crate::terminal_group::{LookupData, ParseStatus};

/// The error type for grammar loading. Every variant is fatal: a grammar
/// either loads completely or not at all, and no partial output is produced.
#[derive(Debug, thiserror::Error)]
pub enum LoadGrammarError {
    #[error("IO error: {0}")]
    /// Error reading the structures file.
    Io(#[from] io::Error),
    #[error("cannot read terminals file {path}: {source}")]
    /// Error opening or mapping a per-nonterminal terminals file.
    TerminalsFile {
        /// The file that failed to open.
        path: PathBuf,
        /// The underlying IO error.
        source: io::Error,
    },
    #[error("the structures file does not start with the `S ->` header")]
    /// The mandatory header line is missing.
    MissingHeader,
    #[error("malformed structure line {line_number}")]
    /// A structure line does not match `repr\tprob\tsource_ids`.
    MalformedStructureLine {
        /// One-based line number within the structures file.
        line_number: usize,
    },
    #[error("malformed terminal line {line_number} of nonterminal {nonterminal}")]
    /// A terminals-file line does not match `terminal\tprob\tsource_ids`.
    MalformedTerminalLine {
        /// The nonterminal whose file is malformed.
        nonterminal: String,
        /// One-based line number within the terminals file.
        line_number: usize,
    },
    #[error("probability {value} at {location} lies outside (0, 1]")]
    /// A probability field falls outside the half-open unit interval.
    ProbabilityOutOfRange {
        /// The offending value.
        value: f64,
        /// Where it was found.
        location: String,
    },
    #[error("empty source id list at {location}")]
    /// A source-id list is empty or contains an empty token.
    EmptySourceIds {
        /// Where it was found.
        location: String,
    },
    #[error("probabilities of nonterminal {nonterminal} increase at line {line_number}")]
    /// The seen block of a terminals file is not probability-descending.
    ProbabilityNotDescending {
        /// The nonterminal whose file is out of order.
        nonterminal: String,
        /// One-based line number of the offending line.
        line_number: usize,
    },
    #[error("invalid generator mask character {character:?} in nonterminal {nonterminal}")]
    /// An unseen-group mask contains a letter outside `L`, `D`, `S`.
    InvalidMaskCharacter {
        /// The offending character.
        character: char,
        /// The nonterminal whose file declares the mask.
        nonterminal: String,
    },
    #[error("training terminals fill the whole space of generator mask {mask}")]
    /// An unseen group has no unseen terminals left to carry its mass.
    UnseenSpaceExhausted {
        /// The mask whose space is exhausted.
        mask: String,
    },
    #[error("terminals file of nonterminal {nonterminal} defines no groups")]
    /// A terminals file contains neither seen terminals nor unseen masks.
    EmptyTerminalsFile {
        /// The empty nonterminal.
        nonterminal: String,
    },
}

/// A restricted probabilistic context-free grammar over password structures.
///
/// Immutable after load; every query operation takes `&self` and keeps its
/// working state on the stack, so instances can be shared freely.
pub struct Grammar {
    structures: Vec<Structure>,
    nonterminals: NonterminalCollection,
    config: Config,
}

impl Grammar {
    /// Load a grammar from a structures file and a folder of terminals
    /// files, with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadGrammarError`] when any file is missing or malformed;
    /// see the enum docs for the full taxonomy.
    pub fn load(
        structures_file: impl AsRef<Path>,
        terminals_folder: impl AsRef<Path>,
    ) -> Result<Grammar, LoadGrammarError> {
        Self::load_with_config(structures_file, terminals_folder, Config::default())
    }

    /// Load a grammar with an explicit [`Config`].
    pub fn load_with_config(
        structures_file: impl AsRef<Path>,
        terminals_folder: impl AsRef<Path>,
        config: Config,
    ) -> Result<Grammar, LoadGrammarError> {
        let text = std::fs::read_to_string(structures_file.as_ref())?;
        let mut collection = NonterminalCollection::new(terminals_folder.as_ref());
        let mut structures = Vec::new();
        let mut lines = text.lines().enumerate();
        let header = lines.next().map(|(_, line)| line);
        if !header.is_some_and(parser::is_structures_header) {
            return Err(LoadGrammarError::MissingHeader);
        }
        for (index, line) in lines {
            let line_number = index + 1;
            // The first blank line terminates the S-block; anything after it
            // is ignored.
            if line.is_empty() {
                break;
            }
            let (representation, probability, source_ids) = parser::structure_line(line)
                .ok_or(LoadGrammarError::MalformedStructureLine { line_number })?;
            if !(probability > 0.0 && probability <= 1.0) {
                return Err(LoadGrammarError::ProbabilityOutOfRange {
                    value: probability,
                    location: format!("structures file line {line_number}"),
                });
            }
            if representation.len() > config.max_structure_length {
                log::warn!(
                    "skipping structure {representation}: representation length {} exceeds {}",
                    representation.len(),
                    config.max_structure_length
                );
                continue;
            }
            let runs = parser::structure_runs(representation)
                .ok_or(LoadGrammarError::MalformedStructureLine { line_number })?;
            structures.push(Structure::load(
                representation.to_string(),
                runs,
                probability,
                source_ids,
                &mut collection,
                &config,
            )?);
        }
        Ok(Grammar {
            structures,
            nonterminals: collection,
            config,
        })
    }

    /// The retained structures in file order.
    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    /// The deduplicated nonterminal store.
    pub fn nonterminals(&self) -> &NonterminalCollection {
        &self.nonterminals
    }

    /// The configuration the grammar was loaded with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The number of strings the grammar can produce, summed over structures.
    pub fn count_strings(&self) -> BigCount {
        let mut total = BigCount::zero();
        for structure in &self.structures {
            total.add_count(&structure.count_strings());
        }
        total
    }

    /// Enumerate canonical patterns above `cutoff` for every structure.
    pub fn generate_patterns(&self, cutoff: f64, out: &mut dyn Write) -> io::Result<()> {
        for structure in &self.structures {
            structure.generate_patterns(cutoff, out)?;
        }
        Ok(())
    }

    /// Enumerate strings above `cutoff` for every structure. With `accurate`,
    /// probabilities are summed across structures and each distinct string is
    /// emitted exactly once.
    pub fn generate_strings(
        &self,
        cutoff: f64,
        accurate: bool,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        for structure in &self.structures {
            structure.generate_strings(cutoff, accurate.then_some(self), out)?;
        }
        Ok(())
    }

    /// Draw `count` strings from the grammar's distribution.
    ///
    /// Uniform variates are drawn up front, sorted, and assigned to
    /// structures by walking the cumulative structure probabilities once, so
    /// the output is deterministic for a given RNG seed. Variates beyond the
    /// grammar's total mass (possible when structure probabilities sum below
    /// one) produce no output.
    pub fn generate_random_strings(
        &self,
        count: u64,
        rng: &mut dyn rand::RngCore,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut draws: Vec<f64> = (0..count).map(|_| rng.gen::<f64>()).collect();
        draws.sort_by(f64::total_cmp);
        // With fewer than a hundred structures the cadence would be zero;
        // progress logging is skipped entirely in that case.
        let logging_frequency = self.structures.len() / 100;
        let mut cumulative = 0.0f64;
        let mut next_draw = 0usize;
        for (index, structure) in self.structures.iter().enumerate() {
            if logging_frequency != 0 && index % logging_frequency == 0 {
                log::info!(
                    "random generation at structure {index} of {}",
                    self.structures.len()
                );
            }
            cumulative += structure.probability();
            let first_assigned = next_draw;
            while next_draw < draws.len() && draws[next_draw] < cumulative {
                next_draw += 1;
            }
            let assigned = (next_draw - first_assigned) as u64;
            if assigned > 0 {
                structure.generate_random_strings(assigned, rng, out)?;
            }
        }
        Ok(())
    }

    // Reduce per-structure lookups to the best result plus the probability
    // sum over all parsing structures.
    fn reduce_lookups(&self, input: &[u8]) -> (LookupData, f64) {
        let mut best = LookupData::failure(ParseStatus::STRUCTURE_NOT_FOUND);
        let mut sum = 0.0f64;
        for structure in &self.structures {
            let candidate = structure.lookup(input);
            if candidate.can_parse() {
                sum += candidate.probability;
            }
            let better = if candidate.can_parse() != best.can_parse() {
                // Any parse beats any failure.
                candidate.can_parse()
            } else if candidate.can_parse() {
                // Among parses the higher probability wins; ties keep the
                // first structure encountered.
                candidate.probability > best.probability
            } else {
                // Among failures the numerically higher status wins.
                candidate.parse_status.0 > best.parse_status.0
            };
            if better {
                best = candidate;
            }
        }
        (best, sum)
    }

    /// Look a string up across all structures and return the best result:
    /// the highest-probability parse, or the most specific failure.
    pub fn lookup(&self, input: &[u8]) -> LookupData {
        self.reduce_lookups(input).0
    }

    /// Like [`lookup`](Self::lookup), but the returned probability is the
    /// sum over all structures that parse the string. Rank and pattern still
    /// belong to the winning structure.
    pub fn lookup_sum(&self, input: &[u8]) -> LookupData {
        let (mut best, sum) = self.reduce_lookups(input);
        if best.can_parse() {
            best.probability = sum;
        }
        best
    }

    /// The number of structures that parse `input`.
    pub fn count_parses(&self, input: &[u8]) -> u64 {
        self.structures
            .iter()
            .map(|structure| structure.count_parses(input))
            .sum()
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("structures", &self.structures.len())
            .field("nonterminals", &self.nonterminals.len())
            .field("count_strings", &self.count_strings().to_string())
            .finish()
    }
}
