#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use guesscalc::{Config, Grammar, ParseStatus};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixture(name: &str) -> (PathBuf, PathBuf) {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name);
        (root.join("nonterminalRules.txt"), root.join("terminals"))
    }

    fn load(name: &str) -> Grammar {
        let (rules, terminals) = fixture(name);
        Grammar::load(rules, terminals).unwrap()
    }

    fn lines(output: &[u8]) -> Vec<&[u8]> {
        output
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn split_line(line: &[u8]) -> (&[u8], Vec<&[u8]>) {
        let mut fields = line.split(|&b| b == b'\t');
        let first = fields.next().unwrap();
        (first, fields.collect())
    }

    #[test]
    fn single_structure_pattern_enumeration() {
        let grammar = load("basic");
        assert_eq!(grammar.count_strings().to_string(), "2");
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        assert_eq!(out, b"0x1p-1\t2\tcat\n");
    }

    #[test]
    fn lookup_of_a_seen_terminal() {
        let grammar = load("basic");
        let lookup = grammar.lookup(b"dog");
        assert!(lookup.can_parse());
        assert_eq!(lookup.probability, 0.5);
        assert_eq!(lookup.index.to_string(), "1");
        assert_eq!(lookup.first_string_of_pattern, b"cat");
        assert!(lookup.source_ids.contains("training"));
    }

    #[test]
    fn lookup_failures_carry_statuses() {
        let grammar = load("basic");
        let miss = grammar.lookup(b"owl");
        assert!(!miss.can_parse());
        assert!(miss
            .parse_status
            .contains(ParseStatus::TERMINAL_NOT_FOUND));
        assert_eq!(miss.index.to_string(), "-1");
        let shape = grammar.lookup(b"to0");
        assert!(!shape.can_parse());
        assert_eq!(shape.parse_status, ParseStatus::STRUCTURE_NOT_FOUND);
    }

    #[test]
    fn pattern_compaction_counts_the_whole_class() {
        let grammar = load("compaction");
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        assert_eq!(out, b"0x1p-2\t4\ta\x01a\n");
        let mut out = Vec::new();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        assert_eq!(
            lines(&out),
            vec![
                &b"0x1p-2\ta\x01a"[..],
                b"0x1p-2\ta\x01b",
                b"0x1p-2\tb\x01a",
                b"0x1p-2\tb\x01b",
            ]
        );
    }

    #[test]
    fn intelligent_skip_respects_the_cutoff() {
        let grammar = load("skip");
        // Patterns: (0,0)=0.25, (0,1)~(1,0)=0.05, (1,1)=0.01. The canonical
        // survivors above 0.05 are (0,0) and (0,1).
        let mut out = Vec::new();
        grammar.generate_patterns(0.05, &mut out).unwrap();
        let emitted = lines(&out);
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0], b"0x1p-2\t1\tx\x01x");
        assert!(emitted[1].ends_with(b"\t2\tx\x01y"));
        // Raising the cutoff past 0.05 leaves only the top pattern.
        let mut out = Vec::new();
        grammar.generate_patterns(0.2, &mut out).unwrap();
        assert_eq!(lines(&out).len(), 1);
        // Cutoff zero enumerates the three canonical patterns.
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        assert_eq!(lines(&out).len(), 3);
    }

    #[test]
    fn permutation_rank_of_a_shuffled_pattern() {
        let grammar = load("permrank");
        let lookup = grammar.lookup(b"bac");
        assert!(lookup.can_parse());
        // Canonical representative is abc; bac is permutation number 2 of
        // the class, and every group holds a single string.
        assert_eq!(lookup.index.to_string(), "2");
        assert_eq!(lookup.first_string_of_pattern, b"a\x01b\x01c");
        assert_eq!(lookup.probability, 1.0 * 0.4 * 0.3 * 0.2);
        // The canonical member itself ranks first in its class.
        assert_eq!(grammar.lookup(b"abc").index.to_string(), "0");
        assert_eq!(grammar.lookup(b"cba").index.to_string(), "5");
    }

    #[test]
    fn zero_cutoff_enumerates_every_canonical_pattern_once() {
        let grammar = load("permrank");
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        let emitted = lines(&out);
        // Multisets of size 3 over 4 groups.
        assert_eq!(emitted.len(), 20);
        let mut first_strings = Vec::new();
        let mut total: u64 = 0;
        for line in emitted {
            let (_, rest) = split_line(line);
            total += std::str::from_utf8(rest[0]).unwrap().parse::<u64>().unwrap();
            assert!(!first_strings.contains(&rest[1].to_vec()));
            first_strings.push(rest[1].to_vec());
        }
        // Class sizes add up to the structure's full string count.
        assert_eq!(total, 64);
        assert_eq!(grammar.count_strings().to_string(), "64");
    }

    #[test]
    fn ranks_form_a_bijection_within_each_pattern_class() {
        let grammar = load("mass");
        assert_eq!(grammar.count_strings().to_string(), "16");
        let mut out = Vec::new();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        let emitted = lines(&out);
        assert_eq!(emitted.len(), 16);
        // Class sizes from pattern enumeration, keyed by first string.
        let mut patterns = Vec::new();
        grammar.generate_patterns(0.0, &mut patterns).unwrap();
        let class_sizes: Vec<(Vec<u8>, u64)> = lines(&patterns)
            .iter()
            .map(|line| {
                let (_, rest) = split_line(line);
                let count = std::str::from_utf8(rest[0]).unwrap().parse().unwrap();
                (rest[1].to_vec(), count)
            })
            .collect();
        let mut seen_ranks: Vec<(Vec<u8>, u64)> = Vec::new();
        for line in emitted {
            let (_, rest) = split_line(line);
            let lookup = grammar.lookup(rest[0]);
            assert!(lookup.can_parse());
            let rank: u64 = lookup.index.to_string().parse().unwrap();
            let class = lookup.first_string_of_pattern.clone();
            let size = class_sizes
                .iter()
                .find(|(first, _)| *first == class)
                .map(|(_, count)| *count)
                .unwrap();
            assert!(rank < size, "rank {rank} outside class of {size}");
            let key = (class, rank);
            assert!(!seen_ranks.contains(&key), "duplicate rank {key:?}");
            seen_ranks.push(key);
        }
        assert_eq!(seen_ranks.len(), 16);
    }

    #[test]
    fn pattern_counts_cover_the_structure() {
        let grammar = load("mass");
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        let mut total: u64 = 0;
        for line in lines(&out) {
            let (_, rest) = split_line(line);
            total += std::str::from_utf8(rest[0]).unwrap().parse::<u64>().unwrap();
        }
        assert_eq!(total, 16);
    }

    #[test]
    fn accurate_mode_emits_each_string_once_with_summed_probability() {
        let grammar = load("overlap");
        // Both structures cover the same password with probability 1/2 each.
        assert_eq!(grammar.count_parses(b"abc"), 2);
        let summed = grammar.lookup_sum(b"abc");
        assert_eq!(summed.probability, 1.0);
        assert_eq!(summed.first_string_of_pattern, b"abc");

        let mut out = Vec::new();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        assert_eq!(
            lines(&out),
            vec![&b"0x1p-1\tabc"[..], b"0x1p-1\ta\x01bc"]
        );

        let mut out = Vec::new();
        grammar.generate_strings(0.0, true, &mut out).unwrap();
        assert_eq!(lines(&out), vec![&b"0x1p+0\tabc"[..]]);
    }

    #[test]
    fn unseen_groups_extend_the_terminal_space() {
        let (rules, terminals) = fixture("unseen");
        // A tiny region size forces the iterator across several windows.
        let config = Config {
            unseen_region_size: 16,
            ..Config::default()
        };
        let grammar = Grammar::load_with_config(rules, terminals, config).unwrap();
        assert_eq!(grammar.count_strings().to_string(), "100");

        let seen = grammar.lookup(b"42");
        assert!(seen.can_parse());
        assert_eq!(seen.probability, 0.4);
        assert_eq!(seen.index.to_string(), "0");

        let unseen = grammar.lookup(b"07");
        assert!(unseen.can_parse());
        assert_eq!(unseen.index.to_string(), "7");
        assert!((unseen.probability - 0.6 / 99.0).abs() < 1e-15);
        assert!(unseen.source_ids.contains("UNSEEN"));
        // Training terminals below shift later ranks down.
        assert_eq!(grammar.lookup(b"99").index.to_string(), "97");

        let mut out = Vec::new();
        grammar.generate_strings(0.01, false, &mut out).unwrap();
        assert_eq!(lines(&out), vec![&b"0x1.999999999999ap-2\t42"[..]]);
        let mut out = Vec::new();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        assert_eq!(lines(&out).len(), 100);
    }

    #[test]
    fn grammar_with_no_structures_answers_everything_empty() {
        let grammar = load("empty");
        assert_eq!(grammar.count_strings().to_string(), "0");
        assert_eq!(grammar.count_parses(b"anything"), 0);
        let lookup = grammar.lookup(b"anything");
        assert!(!lookup.can_parse());
        assert_eq!(lookup.parse_status, ParseStatus::STRUCTURE_NOT_FOUND);
        let mut out = Vec::new();
        grammar.generate_patterns(0.0, &mut out).unwrap();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        grammar.generate_random_strings(5, &mut rng, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn overlong_structures_are_skipped_and_uppercase_is_applied() {
        let grammar = load("caps");
        assert_eq!(grammar.structures().len(), 1);
        let lookup = grammar.lookup(b"Abc");
        assert!(lookup.can_parse());
        assert_eq!(lookup.first_string_of_pattern, b"A\x01bc");
        // Lowercase input does not match the uppercase run.
        assert_eq!(
            grammar.lookup(b"abc").parse_status,
            ParseStatus::STRUCTURE_NOT_FOUND
        );
        let mut out = Vec::new();
        grammar.generate_strings(0.0, false, &mut out).unwrap();
        assert_eq!(
            lines(&out),
            vec![&b"0x1p-2\tA\x01bc"[..], b"0x1p-2\tB\x01bc"]
        );
    }

    #[test]
    fn random_generation_is_deterministic_and_parseable() {
        let grammar = load("basic");
        let mut first = Vec::new();
        let mut rng = StdRng::seed_from_u64(97);
        grammar
            .generate_random_strings(10, &mut rng, &mut first)
            .unwrap();
        let emitted = lines(&first);
        assert_eq!(emitted.len(), 10);
        for line in &emitted {
            let (probability, rest) = split_line(line);
            assert_eq!(probability, b"0x1p-1");
            let lookup = grammar.lookup(rest[0]);
            assert!(lookup.can_parse());
        }
        let mut second = Vec::new();
        let mut rng = StdRng::seed_from_u64(97);
        grammar
            .generate_random_strings(10, &mut rng, &mut second)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn nonterminal_probability_mass_sums_to_one() {
        for name in ["basic", "compaction", "permrank", "mass", "unseen", "caps"] {
            let grammar = load(name);
            for nonterminal in grammar.nonterminals().iter() {
                let mass = nonterminal.probability_mass();
                assert!(
                    (mass - 1.0).abs() < 1e-9,
                    "{name}/{}: mass {mass}",
                    nonterminal.representation()
                );
            }
        }
    }

    #[test]
    fn structure_counts_multiply_nonterminal_counts() {
        let grammar = load("mass");
        for structure in grammar.structures() {
            let mut expected: u64 = 1;
            for nonterminal in structure.nonterminals() {
                expected *= nonterminal.count_strings().to_u64().unwrap();
            }
            assert_eq!(structure.count_strings().to_u64(), Some(expected));
        }
    }

    #[test]
    fn lookup_round_trips_generated_strings() {
        // Every string the grammar emits must look itself up to a pattern
        // whose canonical first string matches a pattern-enumeration line.
        let grammar = load("mass");
        let mut patterns = Vec::new();
        grammar.generate_patterns(0.0, &mut patterns).unwrap();
        let firsts: Vec<Vec<u8>> = lines(&patterns)
            .iter()
            .map(|line| split_line(line).1[1].to_vec())
            .collect();
        let mut strings = Vec::new();
        grammar.generate_strings(0.0, false, &mut strings).unwrap();
        for line in lines(&strings) {
            let (_, rest) = split_line(line);
            let lookup = grammar.lookup(rest[0]);
            assert!(lookup.can_parse());
            assert!(firsts.contains(&lookup.first_string_of_pattern));
        }
    }
}
