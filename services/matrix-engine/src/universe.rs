//! Coin universe registry
//!
//! Holds the ordered set of enabled assets plus the designated quote
//! anchor. The registry is owned by an external settings surface; the
//! engine re-reads a snapshot at the start of every tick and never
//! caches it across ticks, so mid-flight edits apply cleanly on the
//! next tick.

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;
use types::symbol::{PairKey, Symbol, SymbolError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UniverseError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    #[error("quote anchor {0} cannot be removed")]
    AnchorRemoval(Symbol),
}

/// An ordered, de-duplicated asset set with a distinguished quote anchor.
///
/// The anchor is always a member; it is appended if the supplied list
/// omits it. Order is insertion order and defines the default grid
/// ordering on reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinUniverse {
    anchor: Symbol,
    coins: Vec<Symbol>,
}

impl CoinUniverse {
    pub fn new(anchor: Symbol, coins: Vec<Symbol>) -> Self {
        let mut unique: Vec<Symbol> = Vec::with_capacity(coins.len() + 1);
        for coin in coins {
            if !unique.contains(&coin) {
                unique.push(coin);
            }
        }
        if !unique.contains(&anchor) {
            unique.push(anchor.clone());
        }
        Self {
            anchor,
            coins: unique,
        }
    }

    pub fn anchor(&self) -> &Symbol {
        &self.anchor
    }

    pub fn coins(&self) -> &[Symbol] {
        &self.coins
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.coins.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Every ordered (base, quote) pair over the universe, base != quote.
    pub fn ordered_pairs(&self) -> Vec<PairKey> {
        let mut pairs = Vec::with_capacity(self.coins.len() * self.coins.len());
        for base in &self.coins {
            for quote in &self.coins {
                if base != quote {
                    pairs.push(PairKey {
                        base: base.clone(),
                        quote: quote.clone(),
                    });
                }
            }
        }
        pairs
    }
}

/// Shared, mutable handle over the current universe.
pub struct CoinUniverseRegistry {
    inner: RwLock<CoinUniverse>,
}

impl CoinUniverseRegistry {
    pub fn new(universe: CoinUniverse) -> Self {
        info!(
            anchor = %universe.anchor(),
            coins = universe.len(),
            "coin universe initialized"
        );
        Self {
            inner: RwLock::new(universe),
        }
    }

    /// Build a registry from raw config strings, validating every code.
    pub fn from_config(anchor: &str, coins: &[String]) -> Result<Self, UniverseError> {
        let anchor = Symbol::try_new(anchor)?;
        let mut parsed = Vec::with_capacity(coins.len());
        for code in coins {
            parsed.push(Symbol::try_new(code)?);
        }
        Ok(Self::new(CoinUniverse::new(anchor, parsed)))
    }

    /// A point-in-time copy of the universe.
    pub fn snapshot(&self) -> CoinUniverse {
        self.inner.read().clone()
    }

    /// Enable a coin. Returns false if it was already enabled.
    pub fn add_coin(&self, code: &str) -> Result<bool, UniverseError> {
        let symbol = Symbol::try_new(code)?;
        let mut inner = self.inner.write();
        if inner.coins.contains(&symbol) {
            return Ok(false);
        }
        info!(coin = %symbol, "coin added to universe");
        inner.coins.push(symbol);
        Ok(true)
    }

    /// Disable a coin. The anchor itself cannot be removed.
    pub fn remove_coin(&self, code: &str) -> Result<bool, UniverseError> {
        let symbol = Symbol::try_new(code)?;
        let mut inner = self.inner.write();
        if symbol == inner.anchor {
            return Err(UniverseError::AnchorRemoval(symbol));
        }
        let before = inner.coins.len();
        inner.coins.retain(|c| c != &symbol);
        let removed = inner.coins.len() != before;
        if removed {
            info!(coin = %symbol, "coin removed from universe");
        }
        Ok(removed)
    }

    /// Replace the coin list wholesale, keeping the current anchor.
    pub fn set_coins(&self, codes: &[String]) -> Result<(), UniverseError> {
        let mut parsed = Vec::with_capacity(codes.len());
        for code in codes {
            parsed.push(Symbol::try_new(code)?);
        }
        let mut inner = self.inner.write();
        let next = CoinUniverse::new(inner.anchor.clone(), parsed);
        info!(coins = next.len(), "coin universe replaced");
        *inner = next;
        Ok(())
    }
}
