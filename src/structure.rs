//! Structures: one top-level production each, owning parse, enumeration and
//! sampling over an ordered sequence of nonterminals.
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::big_count::BigCount;
use crate::config::Config;
use crate::grammar::{Grammar, LoadGrammarError};
use crate::nonterminal::{Nonterminal, NonterminalCollection};
use crate::parser::Run;
use crate::pattern::PatternManager;
use crate::terminal_group::{LookupData, ParseStatus};
use crate::utils::{self, STRUCTURE_BREAK};

/// One structure: a sequence of nonterminal references with a base
/// probability. Immutable after load.
pub struct Structure {
    representation: String,
    probability: f64,
    source_ids: Vec<Box<str>>,
    nonterminals: Vec<Arc<Nonterminal>>,
}

impl Structure {
    pub(crate) fn load(
        representation: String,
        runs: Vec<Run>,
        probability: f64,
        source_ids: Vec<Box<str>>,
        collection: &mut NonterminalCollection,
        config: &Config,
    ) -> Result<Structure, LoadGrammarError> {
        let mut nonterminals = Vec::with_capacity(runs.len());
        for run in runs {
            nonterminals.push(collection.get_or_load(run, config)?);
        }
        Ok(Structure {
            representation,
            probability,
            source_ids,
            nonterminals,
        })
    }

    /// The representation, e.g. `L3ED2ES1`.
    pub fn representation(&self) -> &str {
        &self.representation
    }

    /// The base probability of the structure.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// The source identifiers of the structure line.
    pub fn source_ids(&self) -> &[Box<str>] {
        &self.source_ids
    }

    /// The nonterminals in position order.
    pub fn nonterminals(&self) -> &[Arc<Nonterminal>] {
        &self.nonterminals
    }

    /// The number of strings the structure can produce: the product of each
    /// position's terminal count.
    pub fn count_strings(&self) -> BigCount {
        let mut total = BigCount::one();
        for nonterminal in &self.nonterminals {
            total.mul_count(&nonterminal.count_strings());
        }
        total
    }

    /// A fresh pattern manager positioned at the first pattern.
    pub fn pattern_manager(&self) -> PatternManager<'_> {
        PatternManager::new(self.probability, &self.nonterminals)
    }

    /// Emit `prob \t count \t first_string` for every canonical pattern whose
    /// probability clears `cutoff`. `count` is the size of the pattern's
    /// whole equivalence class in strings.
    pub fn generate_patterns(&self, cutoff: f64, out: &mut dyn Write) -> io::Result<()> {
        let mut manager = self.pattern_manager();
        manager.reset();
        loop {
            if manager.pattern_probability() < cutoff {
                if !manager.intelligent_skip() {
                    break;
                }
                continue;
            }
            if manager.is_first_permutation() {
                let mut count = manager.count_strings();
                count.mul_count(&manager.count_permutations());
                out.write_all(
                    utils::format_hex_float(manager.canonicalized_probability()).as_bytes(),
                )?;
                out.write_all(b"\t")?;
                out.write_all(count.to_string().as_bytes())?;
                out.write_all(b"\t")?;
                out.write_all(&manager.canonicalized_first_string())?;
                out.write_all(b"\n")?;
            }
            if !manager.increment() {
                break;
            }
        }
        Ok(())
    }

    /// Emit `prob \t string` for every string of every pattern whose
    /// probability clears `cutoff`, terminals joined by the structure break.
    ///
    /// Without `accurate`, the probability column is the canonicalised
    /// pattern probability. With `accurate`, each string is looked up across
    /// the whole grammar: the emitted probability is the sum over all parsing
    /// structures, and the line is emitted only when this structure's
    /// canonical pattern owns the string (so each distinct string appears
    /// exactly once across structures).
    pub fn generate_strings(
        &self,
        cutoff: f64,
        accurate: Option<&Grammar>,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut manager = self.pattern_manager();
        manager.reset();
        loop {
            if manager.pattern_probability() < cutoff {
                if !manager.intelligent_skip() {
                    break;
                }
                continue;
            }
            let probability_text =
                utils::format_hex_float(manager.canonicalized_probability());
            let canonical_first = manager.canonicalized_first_string();
            {
                let mut iterators = manager.string_iterators();
                let mut buffer: Vec<u8> = Vec::new();
                'strings: loop {
                    buffer.clear();
                    for (position, iterator) in iterators.iter().enumerate() {
                        if position > 0 {
                            buffer.push(STRUCTURE_BREAK);
                        }
                        buffer.extend_from_slice(iterator.current());
                    }
                    match accurate {
                        None => {
                            out.write_all(probability_text.as_bytes())?;
                            out.write_all(b"\t")?;
                            out.write_all(&buffer)?;
                            out.write_all(b"\n")?;
                        }
                        Some(grammar) => {
                            let summed = grammar.lookup_sum(&buffer);
                            debug_assert!(summed.can_parse());
                            if summed.can_parse()
                                && summed.first_string_of_pattern == canonical_first
                            {
                                out.write_all(
                                    utils::format_hex_float(summed.probability).as_bytes(),
                                )?;
                                out.write_all(b"\t")?;
                                out.write_all(&buffer)?;
                                out.write_all(b"\n")?;
                            }
                        }
                    }
                    // Rightmost position advances fastest; overflow restarts
                    // it and carries one position left.
                    let mut position = iterators.len();
                    loop {
                        if position == 0 {
                            break 'strings;
                        }
                        position -= 1;
                        if iterators[position].increment() {
                            break;
                        }
                        iterators[position].restart();
                    }
                }
            }
            if !manager.increment() {
                break;
            }
        }
        Ok(())
    }

    /// Emit `prob \t string` for `count` independent draws from the
    /// structure's distribution.
    pub fn generate_random_strings(
        &self,
        count: u64,
        rng: &mut dyn rand::RngCore,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let mut buffer: Vec<u8> = Vec::new();
        for _ in 0..count {
            buffer.clear();
            let mut probability = self.probability;
            for (position, nonterminal) in self.nonterminals.iter().enumerate() {
                if position > 0 {
                    buffer.push(STRUCTURE_BREAK);
                }
                let group = nonterminal.random_group(rng);
                probability *= nonterminal.group(group).probability();
                buffer.extend_from_slice(&nonterminal.random_string(group, rng));
            }
            out.write_all(utils::format_hex_float(probability).as_bytes())?;
            out.write_all(b"\t")?;
            out.write_all(&buffer)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Map a string byte-wise to representation letters. The structure break
    /// byte maps to the break letter; output length equals input length.
    pub fn convert_string_to_representation(input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .map(|&byte| utils::representation_letter(byte))
            .collect()
    }

    /// Look a string up under this structure.
    ///
    /// Structure breaks are stripped first, so tokenised and plain inputs
    /// resolve identically. Each structure admits at most one parse: the
    /// character classes of the input either match the nonterminal sequence
    /// exactly or the lookup fails with `STRUCTURE_NOT_FOUND`.
    pub fn lookup(&self, input: &[u8]) -> LookupData {
        let stripped: Vec<u8> = input
            .iter()
            .copied()
            .filter(|&byte| byte != STRUCTURE_BREAK)
            .collect();
        let representation = Self::convert_string_to_representation(&stripped);
        let mut slices: Vec<&[u8]> = Vec::with_capacity(self.nonterminals.len());
        let mut offset = 0usize;
        for nonterminal in &self.nonterminals {
            let end = offset + nonterminal.arity();
            if end > stripped.len() {
                return LookupData::failure(ParseStatus::STRUCTURE_NOT_FOUND);
            }
            let letter = nonterminal.class().letter();
            if representation[offset..end].iter().any(|&l| l != letter) {
                return LookupData::failure(ParseStatus::STRUCTURE_NOT_FOUND);
            }
            slices.push(&stripped[offset..end]);
            offset = end;
        }
        if offset != stripped.len() {
            return LookupData::failure(ParseStatus::STRUCTURE_NOT_FOUND);
        }
        let mut manager = self.pattern_manager();
        let mut result = manager.lookup_and_set_pattern(&slices);
        if result.can_parse() {
            result.source_ids.extend(self.source_ids.iter().cloned());
        }
        result
    }

    /// `1` if the structure parses `input`, else `0`.
    pub fn count_parses(&self, input: &[u8]) -> u64 {
        u64::from(self.lookup(input).can_parse())
    }
}

impl fmt::Debug for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Structure")
            .field("representation", &self.representation)
            .field("probability", &self.probability)
            .field("nonterminals", &self.nonterminals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonterminal::TerminalData;
    use crate::parser;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn nonterminal(representation: &str, contents: &str) -> Arc<Nonterminal> {
        let runs = parser::structure_runs(representation).unwrap();
        Arc::new(
            Nonterminal::from_data(
                runs[0],
                Arc::new(TerminalData::from_bytes(contents.as_bytes().to_vec())),
                &Config::default(),
            )
            .unwrap(),
        )
    }

    fn structure(
        representation: &str,
        probability: f64,
        nonterminals: Vec<Arc<Nonterminal>>,
    ) -> Structure {
        Structure {
            representation: representation.to_string(),
            probability,
            source_ids: vec![Box::from("test")],
            nonterminals,
        }
    }

    #[test]
    fn representation_conversion_covers_every_class() {
        assert_eq!(
            Structure::convert_string_to_representation(b"aB3! \x01z"),
            b"LUDSSEL"
        );
    }

    #[test]
    fn string_generation_nests_iterators_rightmost_fastest() {
        let shared = nonterminal("L1", "a\t0x1p-1\tA\nb\t0x1p-1\tA\n");
        let structure = structure("L1EL1", 1.0, vec![shared.clone(), shared]);
        let mut out = Vec::new();
        structure.generate_strings(0.0, None, &mut out).unwrap();
        assert_eq!(
            out,
            b"0x1p-2\ta\x01a\n0x1p-2\ta\x01b\n0x1p-2\tb\x01a\n0x1p-2\tb\x01b\n"
        );
    }

    #[test]
    fn pattern_generation_multiplies_class_counts() {
        let shared = nonterminal("L1", "a\t0x1p-1\tA\nb\t0x1p-1\tA\n");
        let structure = structure("L1EL1", 1.0, vec![shared.clone(), shared]);
        let mut out = Vec::new();
        structure.generate_patterns(0.0, &mut out).unwrap();
        assert_eq!(out, b"0x1p-2\t4\ta\x01a\n");
        assert_eq!(structure.count_strings(), BigCount::Native(4));
    }

    #[test]
    fn cutoff_skips_low_probability_patterns() {
        // Groups at 0.5 and 0.1: patterns (0,0)=0.25, (0,1)=(1,0)=0.05,
        // (1,1)=0.01. A 0.05 cutoff keeps the canonical patterns (0,0) and
        // (0,1); the skip fires on (1,1) and overflows.
        let skewed = nonterminal(
            "L1",
            "x\t0x1p-1\tA\ny\t0x1.999999999999ap-4\tA\n",
        );
        let structure = structure("L1EL1", 1.0, vec![skewed.clone(), skewed]);
        let mut out = Vec::new();
        structure.generate_patterns(0.05, &mut out).unwrap();
        let lines: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(b"0x1p-2\t1\tx\x01x"));
        assert!(lines[1].ends_with(b"x\x01y"));
        // A cutoff above 0.05 keeps only the top pattern.
        let mut out = Vec::new();
        structure.generate_patterns(0.2, &mut out).unwrap();
        assert_eq!(out, b"0x1p-2\t1\tx\x01x\n");
    }

    #[test]
    fn lookup_strips_structure_breaks() {
        let letters = nonterminal("L3", "cat\t0x1p-1\tA\ndog\t0x1p-1\tB\n");
        let digits = nonterminal("D1", "1\t0x1p+0\tC\n");
        let structure = structure("L3ED1", 0.5, vec![letters, digits]);
        let plain = structure.lookup(b"dog1");
        let tokenised = structure.lookup(b"dog\x011");
        assert!(plain.can_parse());
        assert_eq!(plain.index, tokenised.index);
        assert_eq!(plain.probability, 0.5 * 0.5 * 1.0);
        assert_eq!(plain.first_string_of_pattern, b"cat\x011");
        assert!(plain.source_ids.contains("B"));
        assert!(plain.source_ids.contains("C"));
        assert!(plain.source_ids.contains("test"));
        assert_eq!(structure.count_parses(b"dog1"), 1);
    }

    #[test]
    fn mismatched_shapes_fail_with_structure_not_found() {
        let letters = nonterminal("L3", "cat\t0x1p-1\tA\ndog\t0x1p-1\tB\n");
        let structure = structure("L3", 1.0, vec![letters]);
        for input in [&b"cats"[..], b"ca", b"ca7", b"CAT"] {
            assert_eq!(
                structure.lookup(input).parse_status,
                ParseStatus::STRUCTURE_NOT_FOUND,
                "{input:?}"
            );
        }
        assert_eq!(structure.count_parses(b"ca7"), 0);
    }

    #[test]
    fn random_strings_parse_under_the_structure() {
        let letters = nonterminal("L1", "a\t0x1p-1\tA\nb\t0x1p-2\tA\nc\t0x1p-2\tA\n");
        let digits = nonterminal("D1", "1\t0x1p-1\tB\n2\t0x1p-1\tB\n");
        let structure = structure("L1ED1", 1.0, vec![letters, digits]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut out = Vec::new();
        structure
            .generate_random_strings(20, &mut rng, &mut out)
            .unwrap();
        let lines: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 20);
        for line in lines {
            let tab = line.iter().position(|&b| b == b'\t').unwrap();
            let probability =
                utils::parse_hex_float(std::str::from_utf8(&line[..tab]).unwrap()).unwrap();
            let string = &line[tab + 1..];
            let lookup = structure.lookup(string);
            assert!(lookup.can_parse());
            assert!((lookup.probability - probability).abs() < 1e-15);
        }
    }
}
