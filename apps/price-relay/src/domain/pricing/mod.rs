//! Price Domain Types
//!
//! Core value types for the price path: symbol sets used as cache keys,
//! per-symbol quotes, and the snapshot mapping cached per key.
//!
//! # Design
//!
//! - `SymbolSet` is a sorted set so the derived cache key is independent of
//!   the order symbols were requested in.
//! - `PriceQuote` is immutable. A newer quote replaces an older one, the
//!   comparison being the parsed ISO-8601 `timestamp`.
//! - `PriceSnapshot` serializes as a flat `{ "<symbol>": PriceQuote }` object,
//!   matching the upstream backend and the gateway response body.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a single instrument identifier.
pub const MAX_SYMBOL_LEN: usize = 32;

// =============================================================================
// Symbol Set
// =============================================================================

/// Errors produced while building a `SymbolSet`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// No symbols were supplied.
    #[error("symbols parameter required")]
    Empty,
    /// A symbol contained unsupported characters or was too long.
    #[error("invalid symbol: {0}")]
    Invalid(String),
}

/// The set of instrument identifiers a price request covers.
///
/// Ordering is only used for hashing and key derivation; `{A,B}` and `{B,A}`
/// are the same set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolSet(BTreeSet<String>);

impl SymbolSet {
    /// Build a set from symbols, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` when no non-blank symbols remain and
    /// `SymbolError::Invalid` for the first malformed symbol.
    pub fn new<I, S>(symbols: I) -> Result<Self, SymbolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in symbols {
            let symbol = raw.as_ref().trim();
            if symbol.is_empty() {
                continue;
            }
            if !is_valid_symbol(symbol) {
                return Err(SymbolError::Invalid(symbol.to_string()));
            }
            set.insert(symbol.to_string());
        }

        if set.is_empty() {
            return Err(SymbolError::Empty);
        }
        Ok(Self(set))
    }

    /// Build a set from the valid symbols only, skipping blank and malformed
    /// ones. The result may be empty.
    #[must_use]
    pub fn lenient<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            symbols
                .into_iter()
                .map(|raw| raw.as_ref().trim().to_string())
                .filter(|symbol| !symbol.is_empty() && is_valid_symbol(symbol))
                .collect(),
        )
    }

    /// Parse a comma-separated list such as `EUR/USD,GBP/USD`.
    ///
    /// # Errors
    ///
    /// Same as [`SymbolSet::new`].
    pub fn parse_csv(list: &str) -> Result<Self, SymbolError> {
        Self::new(list.split(','))
    }

    /// Order-independent cache key: symbols sorted and joined with `,`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.to_csv()
    }

    /// Comma-separated form used for the upstream query string.
    #[must_use]
    pub fn to_csv(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    }

    /// Whether the set contains `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.0.contains(symbol)
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty. Only `Default` and
    /// [`SymbolSet::lenient`] can produce an empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Symbols as an owned vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv())
    }
}

fn is_valid_symbol(symbol: &str) -> bool {
    symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'))
}

// =============================================================================
// Price Quote
// =============================================================================

/// Latest known price for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Mid price.
    pub mid_price: f64,
    /// Ask price.
    pub ask_price: f64,
    /// Bid price.
    pub bid_price: f64,
    /// ISO-8601 time the quote was observed.
    pub timestamp: String,
}

impl PriceQuote {
    /// Create a quote.
    #[must_use]
    pub const fn new(mid_price: f64, ask_price: f64, bid_price: f64, timestamp: String) -> Self {
        Self {
            mid_price,
            ask_price,
            bid_price,
            timestamp,
        }
    }

    /// Quote for sources that only report a single price.
    #[must_use]
    pub fn from_price(price: f64, observed_at: DateTime<Utc>) -> Self {
        Self::new(price, price, price, observed_at.to_rfc3339())
    }

    /// Parsed timestamp, if it is valid RFC 3339.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Whether this quote should replace `current`.
    ///
    /// Highest timestamp wins; an equal timestamp never replaces. When
    /// either timestamp cannot be parsed the quote replaces only if it
    /// differs from `current`.
    #[must_use]
    pub fn supersedes(&self, current: &Self) -> bool {
        match (self.observed_at(), current.observed_at()) {
            (Some(incoming), Some(existing)) => incoming > existing,
            _ => self != current,
        }
    }
}

// =============================================================================
// Price Snapshot
// =============================================================================

/// Full known state at one instant: symbol to latest quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSnapshot(BTreeMap<String, PriceQuote>);

impl PriceSnapshot {
    /// Empty snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&PriceQuote> {
        self.0.get(symbol)
    }

    /// Insert a quote unconditionally, returning the previous one.
    pub fn insert(&mut self, symbol: impl Into<String>, quote: PriceQuote) -> Option<PriceQuote> {
        self.0.insert(symbol.into(), quote)
    }

    /// Patch one symbol, keeping the existing quote if it is newer.
    ///
    /// Unknown symbols extend the snapshot. Returns `true` if the snapshot
    /// changed.
    pub fn apply_patch(&mut self, symbol: &str, quote: PriceQuote) -> bool {
        match self.0.get(symbol) {
            Some(current) if !quote.supersedes(current) => false,
            _ => {
                self.0.insert(symbol.to_string(), quote);
                true
            }
        }
    }

    /// Replace this snapshot with `fetched`, keeping any overlapping quote
    /// that is at least as new as the fetched one.
    ///
    /// Symbols absent from `fetched` are dropped.
    #[must_use]
    pub fn replaced_by(&self, fetched: Self) -> Self {
        let mut next = fetched;
        for (symbol, quote) in &mut next.0 {
            if let Some(current) = self.0.get(symbol)
                && !quote.supersedes(current)
            {
                *quote = current.clone();
            }
        }
        next
    }

    /// Restrict the snapshot to the given symbols.
    #[must_use]
    pub fn filtered(&self, symbols: &SymbolSet) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(symbol, _)| symbols.contains(symbol))
                .map(|(symbol, quote)| (symbol.clone(), quote.clone()))
                .collect(),
        )
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no symbols are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(symbol, quote)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PriceQuote)> {
        self.0.iter().map(|(s, q)| (s.as_str(), q))
    }

    /// Symbols present in the snapshot.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, PriceQuote)> for PriceSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, PriceQuote)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PriceSnapshot {
    type Item = (String, PriceQuote);
    type IntoIter = std::collections::btree_map::IntoIter<String, PriceQuote>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn quote(mid: f64, timestamp: &str) -> PriceQuote {
        PriceQuote::new(mid, mid + 0.0001, mid - 0.0001, timestamp.to_string())
    }

    #[test]
    fn cache_key_is_order_independent() {
        let a = SymbolSet::new(["EUR/USD", "GBP/USD"]).unwrap();
        let b = SymbolSet::new(["GBP/USD", "EUR/USD"]).unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "EUR/USD,GBP/USD");
    }

    #[test]
    fn parse_csv_trims_and_drops_blanks() {
        let set = SymbolSet::parse_csv(" EUR/USD , ,GBP/USD,").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("EUR/USD"));
        assert!(set.contains("GBP/USD"));
    }

    #[test]
    fn lenient_skips_malformed_symbols() {
        let set = SymbolSet::lenient(["EUR/USD", "bad symbol!", " ", "GBP/USD"]);
        assert_eq!(set.to_vec(), vec!["EUR/USD".to_string(), "GBP/USD".to_string()]);
        assert!(SymbolSet::lenient(["???"]).is_empty());
    }

    #[test]
    fn parse_csv_deduplicates() {
        let set = SymbolSet::parse_csv("EUR/USD,EUR/USD").unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test_case("" ; "empty string")]
    #[test_case(",,," ; "only separators")]
    #[test_case("  " ; "whitespace")]
    fn parse_csv_empty(input: &str) {
        assert_eq!(SymbolSet::parse_csv(input), Err(SymbolError::Empty));
    }

    #[test_case("EUR USD" ; "inner space")]
    #[test_case("EUR/USD;DROP" ; "semicolon")]
    #[test_case("ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789" ; "too long")]
    fn parse_csv_invalid(input: &str) {
        assert!(matches!(
            SymbolSet::parse_csv(input),
            Err(SymbolError::Invalid(_))
        ));
    }

    #[test_case("US30" ; "index")]
    #[test_case("XAU/USD" ; "metal")]
    #[test_case("BTC-USD" ; "dash")]
    #[test_case("ES.F" ; "dot")]
    fn accepts_supported_symbols(symbol: &str) {
        assert!(SymbolSet::parse_csv(symbol).is_ok());
    }

    #[test]
    fn quote_serializes_with_snake_case_fields() {
        let q = quote(1.09, "2025-01-01T00:00:00Z");
        let json = serde_json::to_value(&q).unwrap();
        assert!(json.get("mid_price").is_some());
        assert!(json.get("ask_price").is_some());
        assert!(json.get("bid_price").is_some());
        assert_eq!(json["timestamp"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn snapshot_is_a_flat_object() {
        let mut snapshot = PriceSnapshot::new();
        snapshot.insert("EUR/USD", quote(1.09, "2025-01-01T00:00:00Z"));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["EUR/USD"]["mid_price"].is_number());

        let back: PriceSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn newer_quote_supersedes_older() {
        let old = quote(1.0, "2025-01-01T00:00:00Z");
        let new = quote(1.1, "2025-01-01T00:00:01Z");
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn equal_timestamp_does_not_supersede() {
        let current = quote(1.0, "2025-01-01T00:00:00Z");
        assert!(!current.clone().supersedes(&current));
        assert!(!quote(1.2, "2025-01-01T00:00:00Z").supersedes(&current));
    }

    #[test]
    fn unparseable_timestamp_supersedes_when_different() {
        let existing = quote(1.0, "2025-01-01T00:00:00Z");
        let incoming = quote(1.1, "not-a-time");
        assert!(incoming.supersedes(&existing));
        assert!(!incoming.clone().supersedes(&incoming));
    }

    #[test]
    fn apply_patch_ignores_identical_quote() {
        let mut snapshot = PriceSnapshot::new();
        assert!(snapshot.apply_patch("EUR/USD", quote(1.09, "2025-01-01T00:00:00Z")));
        assert!(!snapshot.apply_patch("EUR/USD", quote(1.09, "2025-01-01T00:00:00Z")));
    }

    #[test]
    fn apply_patch_extends_with_unknown_symbol() {
        let mut snapshot = PriceSnapshot::new();
        snapshot.insert("EUR/USD", quote(1.09, "2025-01-01T00:00:00Z"));

        assert!(snapshot.apply_patch("GBP/USD", quote(1.27, "2025-01-01T00:00:00Z")));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn apply_patch_ignores_older_quote() {
        let mut snapshot = PriceSnapshot::new();
        snapshot.insert("EUR/USD", quote(1.09, "2025-01-01T00:00:05Z"));

        assert!(!snapshot.apply_patch("EUR/USD", quote(1.00, "2025-01-01T00:00:01Z")));
        assert!((snapshot.get("EUR/USD").unwrap().mid_price - 1.09).abs() < f64::EPSILON);
    }

    #[test]
    fn replaced_by_drops_missing_and_keeps_newer_overlap() {
        let mut current = PriceSnapshot::new();
        current.insert("EUR/USD", quote(1.10, "2025-01-01T00:00:10Z"));
        current.insert("USD/JPY", quote(157.0, "2025-01-01T00:00:00Z"));

        let mut fetched = PriceSnapshot::new();
        fetched.insert("EUR/USD", quote(1.05, "2025-01-01T00:00:05Z"));
        fetched.insert("GBP/USD", quote(1.27, "2025-01-01T00:00:05Z"));

        let next = current.replaced_by(fetched);
        assert_eq!(next.len(), 2);
        assert!(next.get("USD/JPY").is_none());
        assert!((next.get("EUR/USD").unwrap().mid_price - 1.10).abs() < f64::EPSILON);
        assert!((next.get("GBP/USD").unwrap().mid_price - 1.27).abs() < f64::EPSILON);
    }

    #[test]
    fn filtered_keeps_requested_symbols() {
        let mut snapshot = PriceSnapshot::new();
        snapshot.insert("EUR/USD", quote(1.09, "2025-01-01T00:00:00Z"));
        snapshot.insert("GBP/USD", quote(1.27, "2025-01-01T00:00:00Z"));

        let only_eur = snapshot.filtered(&SymbolSet::new(["EUR/USD"]).unwrap());
        assert_eq!(only_eur.len(), 1);
        assert!(only_eur.get("EUR/USD").is_some());
    }

    proptest! {
        #[test]
        fn cache_key_ignores_permutation(
            mut symbols in proptest::collection::vec("[A-Z]{3}/[A-Z]{3}", 1..8),
            seed in any::<u64>(),
        ) {
            let original = SymbolSet::new(&symbols).unwrap();
            let len = symbols.len();
            symbols.rotate_left((seed as usize) % len);
            symbols.reverse();
            let permuted = SymbolSet::new(&symbols).unwrap();
            prop_assert_eq!(original.cache_key(), permuted.cache_key());
        }
    }
}
