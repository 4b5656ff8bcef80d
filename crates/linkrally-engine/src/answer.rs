//! Delimited-answer parsing for model replies.
//!
//! A valid reply carries exactly one `<answer>N</answer>` tag whose value
//! is an integer in `[1, link_count]`. The error `Display` strings are fed
//! back to the model verbatim on retry, so they are phrased as corrections.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<answer>\s*(.*?)\s*</answer>").expect("answer regex compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAnswerError {
    #[error("no <answer></answer> tag was found in the reply")]
    Missing,
    #[error("expected exactly one <answer></answer> tag but found {0}")]
    Multiple(usize),
    #[error("the answer '{0}' is not an integer")]
    NotAnInteger(String),
    #[error("the answer {value} is out of range; it must be between 1 and {max}")]
    OutOfRange { value: i64, max: usize },
}

/// Extracts the 1-based link selection from a model reply.
pub fn parse_answer(reply: &str, link_count: usize) -> Result<usize, ParseAnswerError> {
    let matches: Vec<&str> = ANSWER_RE
        .captures_iter(reply)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    match matches.len() {
        0 => return Err(ParseAnswerError::Missing),
        1 => {}
        n => return Err(ParseAnswerError::Multiple(n)),
    }
    let raw = matches[0];
    let value: i64 = raw
        .parse()
        .map_err(|_| ParseAnswerError::NotAnInteger(raw.to_string()))?;
    if value < 1 || value as u64 > link_count as u64 {
        return Err(ParseAnswerError::OutOfRange {
            value,
            max: link_count,
        });
    }
    Ok(value as usize)
}
