//! Physical units and dimensional analysis
//!
//! Every numeric quantity in a model (compartment lengths, concentrations,
//! diffusion coefficients, parameters) carries a [`Unit`]. A unit is a scale
//! factor relative to the SI base (metre, second, mole) plus a [`Dimension`]
//! made of integer exponents of length, time and amount.
//!
//! Units are parsed from strings such as `"uM"`, `"molecule/um^2"`,
//! `"um^2/s"` or `"1/(uM*s)"` and serialize back to the string they were
//! declared with.
//!
//! # Example
//!
//! ```rust
//! use smart_rs::physics::units::{Unit, Dimension};
//!
//! let diffusion = Unit::parse("um^2/s").unwrap();
//! assert_eq!(diffusion.dimension(), Dimension::LENGTH.powi(2) / Dimension::TIME);
//!
//! let factor = Unit::parse("uM").unwrap().conversion_factor(&Unit::parse("nM").unwrap()).unwrap();
//! assert!((factor - 1000.0).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Avogadro constant (1/mol)
pub const AVOGADRO: f64 = 6.022_140_76e23;

// =================================================================================================
// Errors
// =================================================================================================

/// Failure to understand a unit string or to convert between units
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    /// Malformed unit expression
    #[error("cannot parse unit '{input}': {message}")]
    Parse {
        /// Full input string
        input: String,
        /// What went wrong
        message: String,
    },

    /// Unit symbol not in the table
    #[error("unknown unit symbol '{symbol}' in '{input}'")]
    UnknownSymbol {
        /// Full input string
        input: String,
        /// Unrecognised symbol
        symbol: String,
    },

    /// Conversion between incompatible dimensions
    #[error("cannot convert {from} into {to}")]
    Incompatible {
        /// Source dimension
        from: Dimension,
        /// Target dimension
        to: Dimension,
    },
}

// =================================================================================================
// Dimension
// =================================================================================================

/// Integer exponents of the three base dimensions used by reaction-diffusion models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension {
    /// Exponent of `[length]`
    pub length: i32,
    /// Exponent of `[time]`
    pub time: i32,
    /// Exponent of `[amount]`
    pub amount: i32,
}

impl Dimension {
    /// Pure number
    pub const DIMENSIONLESS: Dimension = Dimension { length: 0, time: 0, amount: 0 };
    /// `[length]`
    pub const LENGTH: Dimension = Dimension { length: 1, time: 0, amount: 0 };
    /// `[time]`
    pub const TIME: Dimension = Dimension { length: 0, time: 1, amount: 0 };
    /// `[amount]`
    pub const AMOUNT: Dimension = Dimension { length: 0, time: 0, amount: 1 };

    /// Raise to an integer power
    pub fn powi(self, n: i32) -> Self {
        Self {
            length: self.length * n,
            time: self.time * n,
            amount: self.amount * n,
        }
    }

    /// Square root, defined only when every exponent is even
    pub fn sqrt(self) -> Option<Self> {
        if self.length % 2 == 0 && self.time % 2 == 0 && self.amount % 2 == 0 {
            Some(Self {
                length: self.length / 2,
                time: self.time / 2,
                amount: self.amount / 2,
            })
        } else {
            None
        }
    }

    /// True for a pure number
    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }

    /// Concentration dimension on a domain of topological dimension `dim`
    pub fn concentration(dim: usize) -> Self {
        Self::AMOUNT / Self::LENGTH.powi(dim as i32)
    }

    /// Rate of change of a concentration on a domain of topological dimension `dim`
    pub fn concentration_rate(dim: usize) -> Self {
        Self::concentration(dim) / Self::TIME
    }
}

impl std::ops::Mul for Dimension {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            length: self.length + rhs.length,
            time: self.time + rhs.time,
            amount: self.amount + rhs.amount,
        }
    }
}

impl std::ops::Div for Dimension {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self {
            length: self.length - rhs.length,
            time: self.time - rhs.time,
            amount: self.amount - rhs.amount,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }

        let factors = [("amount", self.amount), ("length", self.length), ("time", self.time)];
        let mut numerator = Vec::new();
        let mut denominator = Vec::new();

        for (name, exponent) in factors {
            let target = if exponent > 0 { &mut numerator } else { &mut denominator };
            match exponent.abs() {
                0 => {}
                1 => target.push(format!("[{}]", name)),
                n => target.push(format!("[{}]^{}", name, n)),
            }
        }

        let head = if numerator.is_empty() { "1".to_string() } else { numerator.join("*") };
        if denominator.is_empty() {
            write!(f, "{}", head)
        } else {
            write!(f, "{}/{}", head, denominator.join("/"))
        }
    }
}

// =================================================================================================
// Unit
// =================================================================================================

/// A physical unit: scale relative to SI base units and a dimension
///
/// Two units are equal when they were declared with the same symbol string;
/// use [`Unit::is_equivalent`] to compare the physical meaning instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Unit {
    symbol: String,
    scale: f64,
    dimension: Dimension,
}

impl Unit {
    /// Parse a unit string
    pub fn parse(input: &str) -> Result<Self, UnitError> {
        let mut parser = UnitParser::new(input)?;
        let (scale, dimension) = parser.parse_product()?;
        if parser.position < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }

        Ok(Self {
            symbol: input.trim().to_string(),
            scale,
            dimension,
        })
    }

    /// The pure number `1`
    pub fn dimensionless() -> Self {
        Self {
            symbol: "dimensionless".to_string(),
            scale: 1.0,
            dimension: Dimension::DIMENSIONLESS,
        }
    }

    /// The second, used as the simulation time unit
    pub fn second() -> Self {
        Self {
            symbol: "s".to_string(),
            scale: 1.0,
            dimension: Dimension::TIME,
        }
    }

    /// Symbol the unit was declared with
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Value of one of this unit in SI base units
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Dimension of the unit
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Same dimension (conversion possible)
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dimension == other.dimension
    }

    /// Same dimension and same scale
    pub fn is_equivalent(&self, other: &Unit) -> bool {
        self.is_compatible(other) && scales_match(self.scale, other.scale)
    }

    /// Factor `f` such that `x [self] = x * f [target]`
    pub fn conversion_factor(&self, target: &Unit) -> Result<f64, UnitError> {
        if !self.is_compatible(target) {
            return Err(UnitError::Incompatible {
                from: self.dimension,
                to: target.dimension,
            });
        }
        Ok(self.scale / target.scale)
    }

    /// Integer power of the unit
    pub fn powi(&self, n: i32) -> Self {
        Self {
            symbol: format!("({})^{}", self.symbol, n),
            scale: self.scale.powi(n),
            dimension: self.dimension.powi(n),
        }
    }

    /// Square root of the unit, defined when every exponent is even
    pub fn sqrt(&self) -> Option<Self> {
        self.dimension.sqrt().map(|dimension| Self {
            symbol: format!("sqrt({})", self.symbol),
            scale: self.scale.sqrt(),
            dimension,
        })
    }
}

fn scales_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

impl std::ops::Mul for &Unit {
    type Output = Unit;

    fn mul(self, rhs: &Unit) -> Unit {
        Unit {
            symbol: format!("({})*({})", self.symbol, rhs.symbol),
            scale: self.scale * rhs.scale,
            dimension: self.dimension * rhs.dimension,
        }
    }
}

impl std::ops::Div for &Unit {
    type Output = Unit;

    fn div(self, rhs: &Unit) -> Unit {
        Unit {
            symbol: format!("({})/({})", self.symbol, rhs.symbol),
            scale: self.scale / rhs.scale,
            dimension: self.dimension / rhs.dimension,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

impl TryFrom<String> for Unit {
    type Error = UnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Unit::parse(&value)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol
    }
}

impl std::str::FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

// =================================================================================================
// Symbol table
// =================================================================================================

fn lookup_symbol(symbol: &str) -> Option<(f64, Dimension)> {
    let volume = Dimension::LENGTH.powi(3);
    let molar = Dimension::AMOUNT / volume;

    let entry = match symbol {
        "dimensionless" => (1.0, Dimension::DIMENSIONLESS),

        // length
        "m" | "meter" | "metre" => (1.0, Dimension::LENGTH),
        "cm" => (1e-2, Dimension::LENGTH),
        "mm" => (1e-3, Dimension::LENGTH),
        "um" | "µm" | "micrometer" | "micron" => (1e-6, Dimension::LENGTH),
        "nm" | "nanometer" => (1e-9, Dimension::LENGTH),

        // time
        "s" | "sec" | "second" => (1.0, Dimension::TIME),
        "ms" => (1e-3, Dimension::TIME),
        "us" | "µs" => (1e-6, Dimension::TIME),
        "min" | "minute" => (60.0, Dimension::TIME),
        "h" | "hour" => (3600.0, Dimension::TIME),

        // amount
        "mol" | "mole" => (1.0, Dimension::AMOUNT),
        "mmol" => (1e-3, Dimension::AMOUNT),
        "umol" | "µmol" => (1e-6, Dimension::AMOUNT),
        "nmol" => (1e-9, Dimension::AMOUNT),
        "molecule" | "molecules" => (1.0 / AVOGADRO, Dimension::AMOUNT),

        // volume
        "L" | "l" | "liter" | "litre" => (1e-3, volume),
        "mL" => (1e-6, volume),
        "uL" | "µL" => (1e-9, volume),
        "fL" => (1e-18, volume),

        // molarity (mol/L = 1e3 mol/m^3)
        "M" | "molar" => (1e3, molar),
        "mM" => (1.0, molar),
        "uM" | "µM" => (1e-3, molar),
        "nM" => (1e-6, molar),
        "pM" => (1e-9, molar),

        _ => return None,
    };

    Some(entry)
}

// =================================================================================================
// Parser
// =================================================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Symbol(String),
    Number(f64),
    Star,
    Slash,
    Caret,
    Minus,
    LeftParen,
    RightParen,
}

struct UnitParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> UnitParser<'a> {
    fn new(input: &'a str) -> Result<Self, UnitError> {
        let mut tokens = Vec::new();
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                ' ' | '\t' => i += 1,
                '*' if chars.get(i + 1) == Some(&'*') => {
                    tokens.push(Token::Caret);
                    i += 2;
                }
                '*' | '·' => {
                    tokens.push(Token::Star);
                    i += 1;
                }
                '/' => {
                    tokens.push(Token::Slash);
                    i += 1;
                }
                '^' => {
                    tokens.push(Token::Caret);
                    i += 1;
                }
                '-' => {
                    tokens.push(Token::Minus);
                    i += 1;
                }
                '(' => {
                    tokens.push(Token::LeftParen);
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::RightParen);
                    i += 1;
                }
                c if c.is_ascii_digit() || c == '.' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let value = text.parse::<f64>().map_err(|_| UnitError::Parse {
                        input: input.to_string(),
                        message: format!("invalid number '{}'", text),
                    })?;
                    tokens.push(Token::Number(value));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    tokens.push(Token::Symbol(chars[start..i].iter().collect()));
                }
                other => {
                    return Err(UnitError::Parse {
                        input: input.to_string(),
                        message: format!("unexpected character '{}'", other),
                    });
                }
            }
        }

        if tokens.is_empty() {
            return Err(UnitError::Parse {
                input: input.to_string(),
                message: "empty unit".to_string(),
            });
        }

        Ok(Self { input, tokens, position: 0 })
    }

    fn error(&self, message: &str) -> UnitError {
        UnitError::Parse {
            input: self.input.to_string(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn parse_product(&mut self) -> Result<(f64, Dimension), UnitError> {
        let (mut scale, mut dimension) = self.parse_factor()?;

        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.position += 1;
                    let (s, d) = self.parse_factor()?;
                    scale *= s;
                    dimension = dimension * d;
                }
                Some(Token::Slash) => {
                    self.position += 1;
                    let (s, d) = self.parse_factor()?;
                    scale /= s;
                    dimension = dimension / d;
                }
                _ => break,
            }
        }

        Ok((scale, dimension))
    }

    fn parse_factor(&mut self) -> Result<(f64, Dimension), UnitError> {
        let (scale, dimension) = self.parse_primary()?;

        if self.peek() == Some(&Token::Caret) {
            self.position += 1;
            let negative = if self.peek() == Some(&Token::Minus) {
                self.position += 1;
                true
            } else {
                false
            };
            let exponent = match self.next() {
                Some(Token::Number(n)) if n.fract() == 0.0 => n as i32,
                _ => return Err(self.error("exponent must be an integer")),
            };
            let exponent = if negative { -exponent } else { exponent };
            return Ok((scale.powi(exponent), dimension.powi(exponent)));
        }

        Ok((scale, dimension))
    }

    fn parse_primary(&mut self) -> Result<(f64, Dimension), UnitError> {
        match self.next() {
            Some(Token::Number(n)) => Ok((n, Dimension::DIMENSIONLESS)),
            Some(Token::Symbol(symbol)) => {
                lookup_symbol(&symbol).ok_or_else(|| UnitError::UnknownSymbol {
                    input: self.input.to_string(),
                    symbol,
                })
            }
            Some(Token::LeftParen) => {
                let inner = self.parse_product()?;
                match self.next() {
                    Some(Token::RightParen) => Ok(inner),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            _ => Err(self.error("expected a unit symbol, a number or '('")),
        }
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_simple_symbols() {
        let um = Unit::parse("um").unwrap();
        assert_eq!(um.dimension(), Dimension::LENGTH);
        assert_relative_eq!(um.scale(), 1e-6);

        let seconds = Unit::parse("s").unwrap();
        assert_eq!(seconds.dimension(), Dimension::TIME);
    }

    #[test]
    fn test_parse_compound() {
        let diffusion = Unit::parse("um^2/s").unwrap();
        assert_eq!(diffusion.dimension(), Dimension { length: 2, time: -1, amount: 0 });
        assert_relative_eq!(diffusion.scale(), 1e-12);

        let kon = Unit::parse("1/(uM*s)").unwrap();
        assert_eq!(kon.dimension(), Dimension { length: 3, time: -1, amount: -1 });
        assert_relative_eq!(kon.scale(), 1e3);

        let density = Unit::parse("molecule/um**2").unwrap();
        assert_eq!(density.dimension(), Dimension::concentration(2));
    }

    #[test]
    fn test_negative_exponent() {
        let rate = Unit::parse("s^-1").unwrap();
        assert_eq!(rate.dimension(), Dimension::TIME.powi(-1));
    }

    #[test]
    fn test_molar_is_volume_concentration() {
        let um = Unit::parse("uM").unwrap();
        assert_eq!(um.dimension(), Dimension::concentration(3));
        let explicit = Unit::parse("umol/L").unwrap();
        assert!(um.is_equivalent(&explicit));
    }

    #[test]
    fn test_conversion_factor() {
        let um = Unit::parse("uM").unwrap();
        let nm = Unit::parse("nM").unwrap();
        assert_relative_eq!(um.conversion_factor(&nm).unwrap(), 1000.0, epsilon = 1e-9);

        let length = Unit::parse("um").unwrap();
        assert!(matches!(
            um.conversion_factor(&length),
            Err(UnitError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_micromolar_cubic_micrometer_in_molecules() {
        let amount = &Unit::parse("uM").unwrap() * &Unit::parse("um^3").unwrap();
        let molecules = Unit::parse("molecule").unwrap();
        let factor = amount.conversion_factor(&molecules).unwrap();
        assert_relative_eq!(factor, 602.214076, epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_symbol() {
        let err = Unit::parse("furlong/fortnight").unwrap_err();
        assert!(matches!(err, UnitError::UnknownSymbol { ref symbol, .. } if symbol == "furlong"));
    }

    #[test]
    fn test_malformed() {
        assert!(Unit::parse("").is_err());
        assert!(Unit::parse("um^").is_err());
        assert!(Unit::parse("(um").is_err());
        assert!(Unit::parse("um^1.5").is_err());
    }

    #[test]
    fn test_dimension_display() {
        assert_eq!(Dimension::concentration_rate(3).to_string(), "[amount]/[length]^3/[time]");
        assert_eq!(Dimension::DIMENSIONLESS.to_string(), "dimensionless");
        assert_eq!(Dimension::TIME.powi(-1).to_string(), "1/[time]");
    }

    #[test]
    fn test_serde_keeps_symbol() {
        let unit = Unit::parse("molecule/um^2").unwrap();
        let json = serde_json::to_string(&unit).unwrap();
        assert_eq!(json, "\"molecule/um^2\"");
        let back: Unit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn test_sqrt() {
        let area = Unit::parse("um^2").unwrap();
        assert_eq!(area.sqrt().unwrap().dimension(), Dimension::LENGTH);
        assert!(Unit::parse("um").unwrap().sqrt().is_none());
    }
}
