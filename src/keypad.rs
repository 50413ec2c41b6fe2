//! Line-oriented keypad: one number per line on stdin.

use thiserror::Error;

#[derive(Debug, PartialEq, Eq)]
pub enum Entry {
    /// Digits to speak.
    Number(String),
    /// Blank line, nothing to do.
    Empty,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeypadError {
    #[error("only digits 0-9 are accepted, got {0:?}")]
    NotDigits(String),

    #[error("at most {max} digits, got {len}")]
    TooLong { len: usize, max: usize },
}

/// Parse one input line. Spaces inside the number are ignored ("12 34").
pub fn parse_entry(line: &str, max_digits: usize) -> Result<Entry, KeypadError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Entry::Empty);
    }
    if trimmed.eq_ignore_ascii_case("q") || trimmed.eq_ignore_ascii_case("quit") {
        return Ok(Entry::Quit);
    }

    let digits: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(KeypadError::NotDigits(trimmed.to_string()));
    }
    if digits.len() > max_digits {
        return Err(KeypadError::TooLong {
            len: digits.len(),
            max: max_digits,
        });
    }
    Ok(Entry::Number(digits))
}
