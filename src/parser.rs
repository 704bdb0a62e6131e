//! Parsers for the structures file and the per-nonterminal terminals files.
//!
//! Representations and generator masks form a tiny run-length language
//! (`L3ED2ES1`) parsed with nom; the tab-separated line layout around them is
//! split directly.
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{all_consuming, map, map_opt, map_res, opt, verify};
use nom::multi::{many1, separated_list1};
use nom::sequence::pair;
use nom::IResult;

use crate::utils::{self, TerminalClass};

/// One run of a structure representation: a nonterminal of `arity` characters
/// drawn from `class`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub class: TerminalClass,
    pub arity: usize,
}

impl Run {
    /// The representation key of this run, e.g. `L3`.
    pub fn representation(&self) -> String {
        format!("{}{}", self.class.letter() as char, self.arity)
    }
}

fn class_letter(input: &str) -> IResult<&str, TerminalClass> {
    map_opt(one_of("LUDS"), |letter| {
        TerminalClass::from_letter(letter as u8)
    })(input)
}

fn arity(input: &str) -> IResult<&str, usize> {
    verify(map_res(digit1, str::parse), |&value| value > 0)(input)
}

fn run(input: &str) -> IResult<&str, Run> {
    map(pair(class_letter, arity), |(class, arity)| Run {
        class,
        arity,
    })(input)
}

/// Parse a structure representation such as `L3ED2ES1` into its runs.
pub(crate) fn structure_runs(input: &str) -> Option<Vec<Run>> {
    all_consuming(separated_list1(char('E'), run))(input)
        .ok()
        .map(|(_, runs)| runs)
}

fn mask_run(input: &str) -> IResult<&str, (TerminalClass, usize)> {
    // Uppercase never appears in a generator mask; casing is an
    // out-representation concern.
    let letter = map_opt(one_of("LDS"), |l| TerminalClass::from_letter(l as u8));
    pair(letter, map(opt(arity), |a| a.unwrap_or(1)))(input)
}

/// Parse a generator mask into one class per generated character. Both the
/// run-length form (`L3`, `L1D2`) and the expanded form (`LLL`) are accepted.
pub(crate) fn mask_classes(input: &str) -> Option<Vec<TerminalClass>> {
    let (_, runs) = all_consuming(many1(mask_run))(input).ok()?;
    let mut classes = Vec::new();
    for (class, count) in runs {
        classes.extend(std::iter::repeat(class).take(count));
    }
    Some(classes)
}

/// Whether a line is the structures-file header.
pub(crate) fn is_structures_header(line: &str) -> bool {
    line.trim_end() == "S ->"
}

/// Parse one `repr\tprob\tsource_ids` structure line.
pub(crate) fn structure_line(line: &str) -> Option<(&str, f64, Vec<Box<str>>)> {
    let mut fields = line.split('\t');
    let representation = fields.next()?;
    let probability = utils::parse_probability(fields.next()?)?;
    let ids = source_ids(fields.next()?.as_bytes())?;
    if representation.is_empty() || fields.next().is_some() {
        return None;
    }
    Some((representation, probability, ids))
}

/// One parsed `terminal\tprob\tsource_ids` line of a terminals file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TerminalLine<'a> {
    pub terminal: &'a [u8],
    pub probability: f64,
    pub source_ids: &'a [u8],
}

/// Parse one terminals-file line. The terminal field is raw bytes; symbol
/// terminals may contain any printable character except the tab separator.
pub(crate) fn terminal_line(line: &[u8]) -> Option<TerminalLine<'_>> {
    let mut fields = line.split(|&b| b == b'\t');
    let terminal = fields.next()?;
    let probability = utils::parse_probability(std::str::from_utf8(fields.next()?).ok()?)?;
    let ids = fields.next()?;
    if terminal.is_empty() || ids.is_empty() || fields.next().is_some() {
        return None;
    }
    Some(TerminalLine {
        terminal,
        probability,
        source_ids: ids,
    })
}

/// Parse a comma-separated source-id list. Empty lists and empty tokens are
/// rejected.
pub(crate) fn source_ids(field: &[u8]) -> Option<Vec<Box<str>>> {
    let text = std::str::from_utf8(field).ok()?;
    let mut ids = Vec::new();
    for token in text.split(',') {
        if token.is_empty() {
            return None;
        }
        ids.push(Box::from(token));
    }
    Some(ids)
}

/// Iterate the newline-separated lines of `bytes` together with the byte
/// offset each line starts at. A trailing newline does not produce a phantom
/// empty line.
pub(crate) fn lines_with_offsets(bytes: &[u8]) -> impl Iterator<Item = (usize, &[u8])> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(bytes.len());
        let item = (start, &bytes[start..end]);
        start = end + 1;
        Some(item)
    })
}

/// The line starting at `cursor` and the offset just past its newline, or
/// `None` at end of input.
pub(crate) fn next_line(bytes: &[u8], cursor: usize) -> Option<(&[u8], usize)> {
    if cursor >= bytes.len() {
        return None;
    }
    let end = bytes[cursor..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| cursor + p)
        .unwrap_or(bytes.len());
    Some((&bytes[cursor..end], end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representation_runs() {
        let runs = structure_runs("L3ED2ES1").unwrap();
        assert_eq!(
            runs,
            vec![
                Run {
                    class: TerminalClass::Lowercase,
                    arity: 3
                },
                Run {
                    class: TerminalClass::Digit,
                    arity: 2
                },
                Run {
                    class: TerminalClass::Symbol,
                    arity: 1
                },
            ]
        );
        assert_eq!(runs[0].representation(), "L3");
        assert!(structure_runs("U12").is_some());
        assert!(structure_runs("").is_none());
        assert!(structure_runs("L0").is_none());
        assert!(structure_runs("L3E").is_none());
        assert!(structure_runs("X3").is_none());
        assert!(structure_runs("L3EEL1").is_none());
    }

    #[test]
    fn mask_forms() {
        let expanded = mask_classes("LLL").unwrap();
        assert_eq!(expanded, vec![TerminalClass::Lowercase; 3]);
        assert_eq!(mask_classes("L3").unwrap(), expanded);
        assert_eq!(
            mask_classes("L1D2").unwrap(),
            vec![
                TerminalClass::Lowercase,
                TerminalClass::Digit,
                TerminalClass::Digit,
            ]
        );
        assert!(mask_classes("U2").is_none());
        assert!(mask_classes("").is_none());
    }

    #[test]
    fn structure_lines() {
        let (repr, prob, ids) = structure_line("L3ED2\t0x1p-2\talpha,beta").unwrap();
        assert_eq!(repr, "L3ED2");
        assert_eq!(prob, 0.25);
        assert_eq!(ids, vec![Box::from("alpha"), Box::from("beta")]);
        assert!(structure_line("L3\t0.5").is_none());
        assert!(structure_line("L3\t0.5\t").is_none());
        assert!(structure_line("L3\t0.5\ta,,b").is_none());
        assert!(structure_line("L3\tnot-a-float\tX").is_none());
    }

    #[test]
    fn terminal_lines() {
        let line = terminal_line(b"cat\t0x1p-1\ttraining").unwrap();
        assert_eq!(line.terminal, b"cat");
        assert_eq!(line.probability, 0.5);
        assert_eq!(line.source_ids, b"training");
        assert!(terminal_line(b"").is_none());
        assert!(terminal_line(b"cat\t0.5").is_none());
    }

    #[test]
    fn line_walking() {
        let bytes = b"one\ntwo\n\nthree\n";
        let collected: Vec<_> = lines_with_offsets(bytes).collect();
        assert_eq!(
            collected,
            vec![
                (0, &b"one"[..]),
                (4, &b"two"[..]),
                (8, &b""[..]),
                (9, &b"three"[..]),
            ]
        );
        assert_eq!(next_line(bytes, 4), Some((&b"two"[..], 8)));
        assert_eq!(next_line(bytes, bytes.len()), None);
    }

    #[test]
    fn header_detection() {
        assert!(is_structures_header("S ->"));
        assert!(is_structures_header("S ->\r"));
        assert!(!is_structures_header("S->"));
    }
}
