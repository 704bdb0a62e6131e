/*!
# guesscalc

This crate provides a guess-number calculator for password-strength analysis
built around a restricted probabilistic context-free grammar (PCFG). Given a
grammar learned from training passwords, it models an attacker that emits
guesses in descending probability order and answers three questions:

- **Enumerate**: stream every password (or every pattern) whose probability
  clears a cutoff.
- **Lookup**: compute the probability and exact multi-precision guess rank of
  one password under the model.
- **Sample**: draw passwords from the grammar's distribution (Monte-Carlo
  mode).

The grammar is restricted: every structure is a sequence of nonterminals, and
every nonterminal produces terminals only. That restriction is what makes
exact ranking tractable — patterns factor into per-position terminal groups,
and permutation-equivalent patterns are collapsed by *pattern compaction*.

```rust
use std::fs;
use guesscalc::Grammar;

let dir = std::env::temp_dir().join("guesscalc-doc-example");
let terminals = dir.join("terminals");
fs::create_dir_all(&terminals).unwrap();
fs::write(dir.join("nonterminalRules.txt"), "S ->\nL3\t0x1p+0\tdemo\n\n").unwrap();
fs::write(
    terminals.join("L3.txt"),
    "cat\t0x1p-1\tdemo\ndog\t0x1p-1\tdemo\n",
)
.unwrap();

let grammar = Grammar::load(dir.join("nonterminalRules.txt"), &terminals).unwrap();
assert_eq!(grammar.count_strings().to_string(), "2");

// One canonical pattern covering both strings.
let mut patterns = Vec::new();
grammar.generate_patterns(0.0, &mut patterns).unwrap();
assert_eq!(patterns, b"0x1p-1\t2\tcat\n");

// "dog" is the second guess of that pattern.
let lookup = grammar.lookup(b"dog");
assert!(lookup.can_parse());
assert_eq!(lookup.probability, 0.5);
assert_eq!(lookup.index.to_string(), "1");
```

# Overview

The primary type is [`Grammar`], loaded from a structures file plus one
terminals file per nonterminal (see the formats below). Its operations —
[`Grammar::generate_patterns`], [`Grammar::generate_strings`],
[`Grammar::generate_random_strings`], [`Grammar::lookup`] and
[`Grammar::lookup_sum`] — stream results to a caller-supplied writer, so the
surrounding driver owns stdout, sharding and sorting. Probabilities are
emitted as C `%a` hex-floats to keep round-trips bit-exact.

Internally each [`Structure`](structure::Structure) walks its pattern space
through a [`PatternManager`](pattern::PatternManager): a mixed-radix counter
whose places index the terminal groups of each position, ordered by
descending probability. Two pieces carry the heavy lifting:

- *Intelligent skipping*
  ([`MixedRadixNumber::intelligent_skip`](mixed_radix::MixedRadixNumber::intelligent_skip)):
  once a pattern falls below the cutoff, every pattern that only differs in
  less-significant places can be skipped wholesale.
- *Pattern compaction* ([`pattern`]): positions holding the same nonterminal
  make permuted group assignments probability-equivalent, so only canonical
  patterns are enumerated and class sizes are recovered by multiset
  permutation counting.

Terminal groups come in two flavours: ranges of a memory-mapped terminals
file ([`seen_group`]) and generated complements of a character-class mask
([`unseen_group`]), which materialise terminals absent from training without
ever storing them.

# File formats

The structures file starts with an `S ->` header, followed by one
`repr\tprob\tsource_ids` line per structure and a terminating blank line.
Representations are run-length encoded over the character classes `L`
(lowercase), `U` (uppercase), `D` (digit) and `S` (symbol), with runs joined
by `E`: `L3ED2ES1` is an `L3` then a `D2` then an `S1`.

Each nonterminal reads `<terminals_folder>/<repr>.txt` (with `U` lowered to
`L`; terminals are stored lowercase and re-cased at emit time): a
probability-descending block of `terminal\tprob\tsource_ids` lines, then
optionally a blank separator and one `mask\ttotal_mass\tsource_ids` line per
unseen group.

In emitted strings, terminals are joined by the `0x01` structure-break byte;
[`Grammar::lookup`] strips it, so tokenised and plain inputs resolve
identically.

# Concurrency

The engine is single-threaded per operation and holds no mutable state
between queries. Parallel deployments shard the structures file, run one
engine instance per shard and merge the output streams; no state is shared
across shards.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
pub mod big_count;
pub mod bit_array;
pub mod config;
pub mod grammar;
pub mod mixed_radix;
pub mod nonterminal;
mod parser;
pub mod pattern;
pub mod seen_group;
pub mod structure;
pub mod terminal_group;
pub mod unseen_group;
pub mod utils;

pub use big_count::BigCount;
pub use bit_array::BitArray;
pub use config::Config;
pub use grammar::Grammar;
pub use grammar::LoadGrammarError;
pub use mixed_radix::MixedRadixNumber;
pub use nonterminal::{Nonterminal, NonterminalCollection, TerminalData};
pub use structure::Structure;
pub use terminal_group::{LookupData, ParseStatus, TerminalGroup, TerminalGroupIter};
pub use utils::TerminalClass;
