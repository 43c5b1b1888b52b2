//! Path expressions for looking values up inside a configuration block.
//!
//! A path is a sequence of steps: dotted names, `["literal"]` selectors
//! (which match a block instance's label first, and fall back to matching
//! a key, so keys containing dots stay addressable), and `[N]` list
//! indices. `Registry.Package["snake"].Version["1.0"].manifest_url` is the
//! canonical example.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// A dotted name segment, `foo`.
    Name(String),
    /// A quoted selector, `["foo"]`.
    Label(String),
    /// A list index, `[3]`.
    Index(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathExpr {
    steps: Vec<Step>,
}

#[derive(Debug, Eq, PartialEq, Error)]
pub enum PathParseError {
    #[error("empty path expression")]
    Empty,
    #[error("unterminated selector")]
    UnterminatedSelector,
    #[error("invalid selector {0:?}")]
    InvalidSelector(String),
    #[error("invalid name segment {0:?}")]
    InvalidName(String),
    #[error("trailing separator")]
    TrailingSeparator,
}

impl PathExpr {
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn parse(input: &str) -> Result<Self, PathParseError> {
        if input.is_empty() {
            return Err(PathParseError::Empty);
        }

        let bytes = input.as_bytes();
        let mut steps = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    i += 1;
                    if i == bytes.len() {
                        return Err(PathParseError::TrailingSeparator);
                    }
                }
                b'[' => {
                    i += 1;
                    if i < bytes.len() && bytes[i] == b'"' {
                        i += 1;
                        let start = i;
                        while i < bytes.len() && bytes[i] != b'"' {
                            i += 1;
                        }
                        if i == bytes.len() {
                            return Err(PathParseError::UnterminatedSelector);
                        }
                        let label = &input[start..i];
                        i += 1;
                        if i == bytes.len() || bytes[i] != b']' {
                            return Err(PathParseError::UnterminatedSelector);
                        }
                        i += 1;
                        steps.push(Step::Label(label.to_string()));
                    } else {
                        let start = i;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                        if i == bytes.len() || bytes[i] != b']' {
                            return Err(PathParseError::UnterminatedSelector);
                        }
                        let digits = &input[start..i];
                        i += 1;
                        let index = digits
                            .parse::<usize>()
                            .map_err(|_| PathParseError::InvalidSelector(digits.to_string()))?;
                        steps.push(Step::Index(index));
                    }
                }
                _ => {
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                        i += 1;
                    }
                    let name = &input[start..i];
                    if name.chars().any(|c| c.is_whitespace() || c == ']' || c == '"') {
                        return Err(PathParseError::InvalidName(name.to_string()));
                    }
                    steps.push(Step::Name(name.to_string()));
                }
            }
        }

        if steps.is_empty() {
            return Err(PathParseError::Empty);
        }

        Ok(Self { steps })
    }
}

impl FromStr for PathExpr {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::Name(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Step::Label(label) => write!(f, "[\"{label}\"]")?,
                Step::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}
