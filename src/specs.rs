//! Acceptance specifications for observed values
//!
//! A [`Spec`] is a predicate over the text an operator typed or an instrument returned. Checking a
//! value never fails: missing, empty, or malformed text simply does not comply. Only building a
//! spec can fail, since a malformed definition is a mistake in the procedure itself.

use std::{
    fmt,
    str::FromStr,
    sync::LazyLock,
};
use regex::Regex;
use thiserror::Error;
use crate::decimal::{ Decimal, ParseDecimalError };

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("date pattern is a valid regex")
});

/// A malformed specification definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError
{
    #[error("range {0:?} must have exactly one comma separating its bounds")]
    Separator(String),
    #[error("range {range:?} must open with '[' or '('")]
    LeftBracket { range: String },
    #[error("range {range:?} must close with ']' or ')'")]
    RightBracket { range: String },
    #[error("range {range:?} has an invalid bound {bound:?}: {cause}")]
    Bound
    {
        range: String,
        bound: String,
        cause: ParseDecimalError,
    },
}

/// An interval of acceptable numeric values, e.g. `[1, 2.5)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec
{
    range_str: String,
    left_bound: Decimal,
    left_inclusive: bool,
    right_bound: Decimal,
    right_inclusive: bool,
}

impl RangeSpec
{
    /// Parses a range definition
    ///
    /// The first character of the left token picks the left side's inclusivity (`[` inclusive,
    /// `(` exclusive) and the last character of the right token picks the right side's (`]`
    /// inclusive, `)` exclusive). Both bounds must be exact decimals. The definition is kept
    /// verbatim as the display form.
    pub fn new(range_str: &str) -> Result<Self, SpecError>
    {
        let mut tokens = range_str.split(',');
        let (left, right) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(left), Some(right), None) => (left.trim(), right.trim()),
            _ => return Err(SpecError::Separator(range_str.to_owned())),
        };

        let left_inclusive = match left.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(SpecError::LeftBracket { range: range_str.to_owned() }),
        };

        let right_inclusive = match right.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(SpecError::RightBracket { range: range_str.to_owned() }),
        };

        let parse_bound = |bound: &str| -> Result<Decimal, SpecError> {
            bound.parse::<Decimal>().map_err(|cause| SpecError::Bound {
                range: range_str.to_owned(),
                bound: bound.to_owned(),
                cause: cause,
            })
        };

        Ok(Self {
            range_str: range_str.to_owned(),
            left_bound: parse_bound(&left[1..])?,
            left_inclusive: left_inclusive,
            right_bound: parse_bound(&right[..right.len() - 1])?,
            right_inclusive: right_inclusive,
        })
    }

    pub fn left_bound(&self) -> Decimal
    {
        self.left_bound
    }

    pub fn right_bound(&self) -> Decimal
    {
        self.right_bound
    }

    pub fn left_inclusive(&self) -> bool
    {
        self.left_inclusive
    }

    pub fn right_inclusive(&self) -> bool
    {
        self.right_inclusive
    }

    /// Checks a value that has already been parsed
    pub fn contains(&self, value: &Decimal) -> bool
    {
        let left_ok = if self.left_inclusive { *value >= self.left_bound } else { *value > self.left_bound };
        let right_ok = if self.right_inclusive { *value <= self.right_bound } else { *value < self.right_bound };

        left_ok && right_ok
    }

    pub fn complies(&self, text: Option<&str>) -> bool
    {
        match text.map(str::parse::<Decimal>) {
            Some(Ok(value)) => self.contains(&value),
            _ => false,
        }
    }
}

impl fmt::Display for RangeSpec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.range_str)
    }
}

/// A predicate over observed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spec
{
    /// Anything but empty text
    Any,
    /// A numeric interval
    Range(RangeSpec),
    /// A date written `mm/dd/yyyy`
    ///
    /// Only the shape is checked. `13/99/2099` complies.
    Date,
}

impl Spec
{
    pub fn range(range_str: &str) -> Result<Self, SpecError>
    {
        Ok(Self::Range(RangeSpec::new(range_str)?))
    }

    /// Whether the text meets this spec
    ///
    /// Accepts `&str` or `Option<&str>`. `None` never complies.
    pub fn complies<'a>(&self, text: impl Into<Option<&'a str>>) -> bool
    {
        let text = text.into();

        match self {
            Self::Any => text.map_or(false, |text| !text.is_empty()),
            Self::Range(range) => range.complies(text),
            Self::Date => text.map_or(false, |text| DATE_PATTERN.is_match(text)),
        }
    }
}

impl fmt::Display for Spec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Range(range) => range.fmt(f),
            Self::Date => f.write_str("mm/dd/yyyy"),
        }
    }
}

impl FromStr for Spec
{
    type Err = SpecError;

    /// Reads a spec back from its display form
    fn from_str(text: &str) -> Result<Self, Self::Err>
    {
        match text.trim() {
            "Any" => Ok(Self::Any),
            "mm/dd/yyyy" => Ok(Self::Date),
            _ => Self::range(text),
        }
    }
}

impl From<RangeSpec> for Spec
{
    fn from(range: RangeSpec) -> Self
    {
        Self::Range(range)
    }
}
