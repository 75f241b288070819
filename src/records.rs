//! Record grammar for worktodo and results lines
//!
//! Both files are plain text with one record per line. Records are found by
//! pattern rather than by splitting on newlines, so comments, blank lines and
//! client chatter in the same file are ignored:
//!
//! - an assignment is a labelled type followed by `=` and ends in three
//!   comma-separated numeric fields, e.g.
//!   `Factor=N/A,66362159,72,73` or `DoubleCheck=1A2B...,39614081,74,1`
//! - a result is a line carrying the exponent it reports on, e.g.
//!   `no factor for M66362159 from 2^72 to 2^73 [mfakto 0.15]` or
//!   `M( 39614081 )C, 0x1f7a..., n = 2097152, clLucas v1.04`
//!
//! The exponent is the record key. A result is matched to outstanding work by
//! looking for its key in the worktodo text.
//!
//! Results are matched on raw bytes: a retained result is written back to
//! `results.txt`, so it must come out exactly as the client wrote it, even if
//! the client wrote something that is not UTF-8.

use crate::config::ManagerMode;
use crate::error::{Error, Result};
use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use std::collections::HashSet;

const TF_ASSIGNMENT: &str = r"(Factor)=.*(,[0-9]+){3}";
const TF_RESULT: &str = r".*M([0-9]+) .*";
const TF_KEY: &str = r"M([0-9]+)";

const LL_ASSIGNMENT: &str = r"(DoubleCheck|Test)=.*(,[0-9]+){3}";
const LL_RESULT: &str = r"M\( ([0-9]*) \).*";
const LL_KEY: &str = r"M\( ([0-9]+) \)";

/// Compiled patterns for one client family
#[derive(Clone, Debug)]
pub struct RecordGrammar {
    assignment: Regex,
    result: BytesRegex,
    key: BytesRegex,
}

impl RecordGrammar {
    /// Build a grammar from raw patterns
    ///
    /// `key` must contain one capture group holding the record key.
    pub fn new(assignment: &str, result: &str, key: &str) -> Result<Self> {
        // `(?-u)` lets `.` match any byte except `\n`, valid UTF-8 or not
        let compile_bytes = |name: &str, pattern: &str| {
            BytesRegex::new(&format!("(?-u){pattern}"))
                .map_err(|e| Error::config(name, e.to_string()))
        };
        let key_regex = compile_bytes("key", key)?;
        if key_regex.captures_len() < 2 {
            return Err(Error::config("key", "key pattern needs a capture group"));
        }
        Ok(Self {
            assignment: Regex::new(assignment)
                .map_err(|e| Error::config("assignment", e.to_string()))?,
            result: compile_bytes("result", result)?,
            key: key_regex,
        })
    }

    /// The built-in grammar for a client family
    pub fn for_mode(mode: ManagerMode) -> Result<Self> {
        match mode {
            ManagerMode::TrialFactoring => Self::new(TF_ASSIGNMENT, TF_RESULT, TF_KEY),
            ManagerMode::LucasLehmer => Self::new(LL_ASSIGNMENT, LL_RESULT, LL_KEY),
        }
    }

    /// All assignment records in `text`, in file order
    pub fn assignments<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.assignment.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// All result records in `text`, in file order
    pub fn results<'a>(&self, text: &'a [u8]) -> Vec<&'a [u8]> {
        self.result.find_iter(text).map(|m| m.as_bytes()).collect()
    }

    /// Key (exponent) of a result record, if it carries one
    ///
    /// Keys that are not valid UTF-8 are treated as missing.
    pub fn result_key<'a>(&self, record: &'a [u8]) -> Option<&'a str> {
        self.key
            .captures(record)
            .and_then(|c| c.get(1))
            .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Turn every carriage return into a line feed
///
/// Handles files written on Windows (`\r\n`) and classic Mac (`\r`) alike.
/// The extra blank lines this produces are invisible to the record patterns.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace('\r', "\n")
}

/// [`normalize_line_endings`] for raw file contents
pub fn normalize_line_ending_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .map(|&b| if b == b'\r' { b'\n' } else { b })
        .collect()
}

/// Drop exact duplicate records, keeping the first occurrence of each
pub fn dedup_exact(records: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.clone()))
        .collect()
}

/// Raise the trailing numeric field of an assignment to at least `minimum`
///
/// The last field of a trial factoring assignment is the bit level to factor
/// to. It is only ever raised, never lowered, and records whose last field is
/// not numeric are returned unchanged.
pub fn raise_target(record: &str, minimum: u32) -> String {
    let Some(idx) = record.rfind(',') else {
        return record.to_string();
    };
    match record[idx + 1..].parse::<u32>() {
        Ok(value) if value < minimum => format!("{},{}", &record[..idx], minimum),
        _ => record.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn tf() -> RecordGrammar {
        RecordGrammar::for_mode(ManagerMode::TrialFactoring).unwrap()
    }

    fn ll() -> RecordGrammar {
        RecordGrammar::for_mode(ManagerMode::LucasLehmer).unwrap()
    }

    #[test]
    fn test_tf_assignments_ignore_noise() {
        let text = "\
# cached by hand
Factor=N/A,66362159,72,73

Factor=0A1B2C3D,66362171,71,74
Test=1234,39614081,74,1
garbage line
";
        assert_eq!(
            tf().assignments(text),
            vec!["Factor=N/A,66362159,72,73", "Factor=0A1B2C3D,66362171,71,74"]
        );
    }

    #[test]
    fn test_assignments_inside_html() {
        let body = "<pre>Factor=ABC,70000001,71,72</pre>\n<p>Factor=ABC,70000001,71,72</p>";
        let found = tf().assignments(body);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], "Factor=ABC,70000001,71,72");
    }

    #[test]
    fn test_ll_assignments() {
        let text = "DoubleCheck=AB12,39614081,74,1\nTest=CD34,80000023,75,1\nFactor=N/A,1,2,3\n";
        assert_eq!(
            ll().assignments(text),
            vec!["DoubleCheck=AB12,39614081,74,1", "Test=CD34,80000023,75,1"]
        );
    }

    #[test]
    fn test_tf_results_and_keys() {
        let text = "\
no factor for M66362159 from 2^72 to 2^73 [mfakto 0.15pre6-Win cl_barrett15_73_gs_2]
M66362171 has a factor: 123456789012345 [TF:71:74*:mfakto 0.15]
mfakto 0.15 (64bit build), waiting for work
";
        let results = tf().results(text.as_bytes());
        assert_eq!(results.len(), 2);
        assert_eq!(tf().result_key(results[0]), Some("66362159"));
        assert_eq!(tf().result_key(results[1]), Some("66362171"));
    }

    #[test]
    fn test_ll_results_and_keys() {
        let text = b"M( 39614081 )C, 0x1f7a2b3c4d5e6f70, n = 2097152, clLucas v1.04\r\n";
        let normalized = normalize_line_ending_bytes(text);
        let results = ll().results(&normalized);
        assert_eq!(results.len(), 1);
        assert!(!results[0].contains(&b'\n'));
        assert_eq!(ll().result_key(results[0]), Some("39614081"));
    }

    #[test]
    fn test_result_without_key_digits() {
        let record = b"M(  )C, 0x0, clLucas";
        assert_eq!(ll().result_key(record), None);
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\n\nb\nc\n");
        assert_eq!(normalize_line_ending_bytes(b"a\r\nb\rc\n"), b"a\n\nb\nc\n");
    }

    #[test]
    fn test_result_with_invalid_utf8_is_matched_whole() {
        let text = b"no factor for M66362159 from 2^72 to 2^73 [mfakto \xe9]\nnext";
        let results = tf().results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], &text[..text.len() - 5]);
        assert_eq!(tf().result_key(results[0]), Some("66362159"));
    }

    #[test]
    fn test_dedup_exact_keeps_first_occurrence_order() {
        let records = vec![
            "Factor=A,1,2,3".to_string(),
            "Factor=B,4,5,6".to_string(),
            "Factor=A,1,2,3".to_string(),
            "Factor=A,1,2,3 ".to_string(),
        ];
        assert_eq!(
            dedup_exact(records),
            vec!["Factor=A,1,2,3", "Factor=B,4,5,6", "Factor=A,1,2,3 "]
        );
    }

    #[test]
    fn test_raise_target_only_raises() {
        assert_eq!(raise_target("Factor=A,66362159,71,72", 73), "Factor=A,66362159,71,73");
        assert_eq!(raise_target("Factor=A,66362159,71,74", 73), "Factor=A,66362159,71,74");
        assert_eq!(raise_target("Factor=A,66362159,71,73", 73), "Factor=A,66362159,71,73");
        // a shorter target value must not leave stray digits behind
        assert_eq!(raise_target("Factor=A,66362159,7,8", 100), "Factor=A,66362159,7,100");
        assert_eq!(raise_target("no commas", 73), "no commas");
    }

    #[test]
    fn test_custom_grammar_requires_capture_group() {
        let err = RecordGrammar::new("W=.*", "R .*", "R").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(RecordGrammar::new("W=.*", "R .*", "R([0-9]+)").is_ok());
    }
}
