//! Asset symbols and ordered pair keys
//!
//! Symbols are uppercase asset codes ("BTC", "USDT"). A `PairKey` is an
//! ordered (base, quote) combination whose concatenated form ("BTCUSDT")
//! matches the upstream exchange symbol convention, so the same key works
//! for ticker lookups, availability masks, and matrix cell addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted symbol length (longest listed assets are well under this).
pub const MAX_SYMBOL_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Empty symbol")]
    Empty,

    #[error("Symbol too long: {0} chars (max {MAX_SYMBOL_LEN})")]
    TooLong(usize),

    #[error("Invalid character in symbol: {0:?}")]
    InvalidChar(char),

    #[error("Pair base and quote must differ: {0}")]
    DegeneratePair(String),
}

/// Uppercase asset code (e.g. "BTC", "ETH", "1INCH")
///
/// Validated to be non-empty ASCII uppercase alphanumeric. Lowercase input
/// is accepted and normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol, normalizing to uppercase.
    ///
    /// # Panics
    /// Panics if the code is empty or contains non-alphanumeric characters.
    pub fn new(code: impl AsRef<str>) -> Self {
        match Self::try_new(code.as_ref()) {
            Ok(s) => s,
            Err(e) => panic!("invalid symbol {:?}: {}", code.as_ref(), e),
        }
    }

    /// Try to create a Symbol, returning an error on invalid input.
    pub fn try_new(code: &str) -> Result<Self, SymbolError> {
        let normalized = code.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(normalized.len()));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !c.is_ascii_uppercase() && !c.is_ascii_digit())
        {
            return Err(SymbolError::InvalidChar(bad));
        }
        Ok(Self(normalized))
    }

    /// Get the symbol string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Ordered (base, quote) asset pair
///
/// Direction matters: (BTC, ETH) addresses a different matrix cell than
/// (ETH, BTC). The concatenated form `BTCETH` is the upstream exchange
/// symbol convention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub base: Symbol,
    pub quote: Symbol,
}

impl PairKey {
    /// Create a new PairKey.
    ///
    /// # Panics
    /// Panics if base and quote are the same asset.
    pub fn new(base: Symbol, quote: Symbol) -> Self {
        match Self::try_new(base, quote) {
            Ok(p) => p,
            Err(e) => panic!("invalid pair: {}", e),
        }
    }

    /// Try to create a PairKey, rejecting degenerate (X, X) pairs.
    pub fn try_new(base: Symbol, quote: Symbol) -> Result<Self, SymbolError> {
        if base == quote {
            return Err(SymbolError::DegeneratePair(base.0));
        }
        Ok(Self { base, quote })
    }

    /// Upstream exchange symbol form: base and quote concatenated.
    pub fn concat(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// The same pair with base and quote swapped.
    pub fn flipped(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Whether `symbols` lists this pair in either orientation.
    pub fn listed_in(&self, symbols: &std::collections::BTreeSet<String>) -> bool {
        symbols.contains(&self.concat()) || symbols.contains(&self.flipped().concat())
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
