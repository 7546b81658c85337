//! Exact decimal numbers for observed values and specification bounds

use std::{
    fmt::{ self, Write },
    cmp::{ PartialEq, PartialOrd, Eq, Ord, Ordering },
    str::FromStr,
};
use thiserror::Error;

/// Signed decimal value stored as an integer mantissa and a power-of-ten scale
///
/// The value is `mantissa * 10^-scale`. A negative scale is produced by exponent notation
/// such as `1e3`.
///
/// # Implementation Notes
/// Floating point is unacceptable for bound checks: `2.5` must compare equal to `2.50` and a
/// reading of `8.30` must land exactly on an `8.30` bound. The scale given in the text is kept
/// as-is so that trailing zeros survive formatting, which matters for instrument readings where
/// the number of digits shown is the resolution of the meter.
#[derive(Debug, Clone, Copy)]
pub struct Decimal
{
    mantissa: i128,
    scale: i32,
}

/// Why a string could not be read as a decimal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseDecimalError
{
    #[error("no digits in decimal value")]
    Empty,
    #[error("unexpected character {0:?} in decimal value")]
    InvalidChar(char),
    #[error("invalid exponent in decimal value")]
    InvalidExponent,
    #[error("decimal value has too many digits")]
    Overflow,
}

/// Largest exponent magnitude accepted when parsing. Anything past this cannot be compared against
/// a bench reading in a meaningful way.
const MAX_EXPONENT: i32 = 4096;

impl Decimal
{
    pub const ZERO: Decimal = Decimal { mantissa: 0, scale: 0 };

    pub fn new(mantissa: i128, scale: i32) -> Self
    {
        Self {
            mantissa: mantissa,
            scale: scale,
        }
    }

    pub fn from_int(value: i64) -> Self
    {
        Self::new(value as i128, 0)
    }

    pub fn mantissa(&self) -> i128
    {
        self.mantissa
    }

    /// Number of digits after the decimal point as written
    pub fn scale(&self) -> i32
    {
        self.scale
    }

    pub fn is_negative(&self) -> bool
    {
        self.mantissa < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self>
    {
        let scale = self.scale.max(rhs.scale);
        let lhs = rescale(self.mantissa, scale - self.scale)?;
        let rhs = rescale(rhs.mantissa, scale - rhs.scale)?;
        Some(Self::new(lhs.checked_add(rhs)?, scale))
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self>
    {
        Some(Self::new(
            self.mantissa.checked_mul(rhs.mantissa)?,
            self.scale.checked_add(rhs.scale)?,
        ))
    }

    /// Divides by a whole number, rounding half away from zero to `places` digits after the point
    pub fn checked_div_int(self, divisor: u32, places: u32) -> Option<Self>
    {
        if divisor == 0 {
            return None;
        }

        // carry one guard digit for rounding
        let target = places as i32 + 1;
        let numerator = if target >= self.scale {
            rescale(self.mantissa, target - self.scale)?
        }
        else {
            self.mantissa / 10i128.checked_pow((self.scale - target) as u32)?
        };

        let guarded = numerator / divisor as i128;
        let rounded = if guarded >= 0 { (guarded + 5) / 10 } else { (guarded - 5) / 10 };

        Some(Self::new(rounded, places as i32))
    }
}

/// Multiplies `mantissa` by `10^places`, `None` on overflow
fn rescale(mantissa: i128, places: i32) -> Option<i128>
{
    debug_assert!(places >= 0);
    mantissa.checked_mul(10i128.checked_pow(places as u32)?)
}

impl FromStr for Decimal
{
    type Err = ParseDecimalError;

    /// Parses plain and exponent notation, e.g. `-1.250`, `+3`, `.5`, `2.`, `1.2E-3`
    ///
    /// Surrounding whitespace is ignored. `NaN` and infinities are rejected since they cannot take
    /// part in a bound check.
    fn from_str(text: &str) -> Result<Self, Self::Err>
    {
        let text = text.trim();
        let mut chars = text.chars().peekable();

        let negative = match chars.peek() {
            Some('-') => { chars.next(); true },
            Some('+') => { chars.next(); false },
            _ => false,
        };

        let mut mantissa: i128 = 0;
        let mut scale: i32 = 0;
        let mut digits = 0usize;
        // fractional zeros not yet folded into the mantissa
        let mut pending_zeros: i32 = 0;
        let mut seen_point = false;
        let mut exponent: Option<i32> = None;

        while let Some(c) = chars.next() {
            match c {
                '0'..='9' => {
                    digits += 1;

                    if seen_point && c == '0' {
                        pending_zeros += 1;
                        continue;
                    }

                    for _ in 0..pending_zeros {
                        mantissa = mantissa.checked_mul(10).ok_or(ParseDecimalError::Overflow)?;
                    }
                    scale += pending_zeros;
                    pending_zeros = 0;

                    mantissa = mantissa
                        .checked_mul(10)
                        .and_then(|m| m.checked_add((c as u8 - b'0') as i128))
                        .ok_or(ParseDecimalError::Overflow)?;

                    if seen_point {
                        scale += 1;
                    }
                },
                '.' if !seen_point => seen_point = true,
                'e' | 'E' => {
                    let rest: String = chars.by_ref().collect();
                    let value = rest.parse::<i32>().map_err(|_| ParseDecimalError::InvalidExponent)?;

                    if value.abs() > MAX_EXPONENT {
                        return Err(ParseDecimalError::InvalidExponent);
                    }

                    exponent = Some(value);
                },
                other => return Err(ParseDecimalError::InvalidChar(other)),
            }
        }

        if digits == 0 {
            return Err(ParseDecimalError::Empty);
        }

        // trailing zeros keep the written precision as far as the mantissa allows
        while pending_zeros > 0 {
            match mantissa.checked_mul(10) {
                Some(widened) => mantissa = widened,
                None => break,
            }
            scale += 1;
            pending_zeros -= 1;
        }

        if let Some(exponent) = exponent {
            scale -= exponent;
        }

        Ok(Self::new(if negative { -mantissa } else { mantissa }, scale))
    }
}

impl PartialEq for Decimal
{
    fn eq(&self, rhs: &Self) -> bool
    {
        self.cmp(rhs) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal
{
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering>
    {
        Some(self.cmp(rhs))
    }
}

impl Ord for Decimal
{
    fn cmp(&self, rhs: &Self) -> Ordering
    {
        if self.scale == rhs.scale {
            return self.mantissa.cmp(&rhs.mantissa);
        }

        let (lhs_sign, rhs_sign) = (self.mantissa.signum(), rhs.mantissa.signum());
        if lhs_sign != rhs_sign || lhs_sign == 0 {
            return lhs_sign.cmp(&rhs_sign);
        }

        // Same sign from here. Align to the finer scale. If the coarser value overflows while
        // being widened, its magnitude exceeds anything the finer one can hold.
        if self.scale < rhs.scale {
            match rescale(self.mantissa, rhs.scale - self.scale) {
                Some(lhs) => lhs.cmp(&rhs.mantissa),
                None => lhs_sign.cmp(&0),
            }
        }
        else {
            match rescale(rhs.mantissa, self.scale - rhs.scale) {
                Some(widened) => self.mantissa.cmp(&widened),
                None => 0.cmp(&rhs_sign),
            }
        }
    }
}

impl fmt::Display for Decimal
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.mantissa < 0 {
            f.write_char('-')?;
        }

        let digits = self.mantissa.unsigned_abs().to_string();

        if self.scale <= 0 {
            f.write_str(&digits)?;
            for _ in 0..(-self.scale) {
                f.write_char('0')?;
            }
            return Ok(());
        }

        let scale = self.scale as usize;

        if digits.len() > scale {
            let (whole, fraction) = digits.split_at(digits.len() - scale);
            write!(f, "{}.{}", whole, fraction)
        }
        else {
            f.write_str("0.")?;
            for _ in 0..(scale - digits.len()) {
                f.write_char('0')?;
            }
            f.write_str(&digits)
        }
    }
}
