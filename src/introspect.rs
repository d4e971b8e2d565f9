//! API cards and their cache
//!
//! Callers that describe library APIs to code generators keep one
//! [`SignatureCache`] per session. Entries are keyed by library version so a
//! library upgrade never serves a stale signature.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolKey {
    pub library: String,
    pub version: String,
    /// Fully qualified dotted path, e.g. `pvlib.irradiance.get_total_irradiance`
    pub symbol: String,
}

impl SymbolKey {
    pub fn new(library: impl Into<String>, version: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            version: version.into(),
            symbol: symbol.into(),
        }
    }

    /// Key whose library is the symbol's root package.
    pub fn for_symbol(symbol: &str, version: impl Into<String>) -> Self {
        let library = symbol.split('.').next().unwrap_or(symbol);
        Self::new(library, version, symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Method,
    Function,
}

/// Description of one callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCard {
    pub symbol: String,
    pub import_stmt: String,
    pub callable_name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub doc: Option<String>,
    pub version: String,
}

/// Docstrings are cut to this many non-empty lines.
pub const DOC_LINES: usize = 3;

impl ApiCard {
    pub fn new(symbol: &str, kind: SymbolKind, signature: &str, doc: Option<&str>, version: &str) -> Self {
        let (import_stmt, callable_name) = import_parts(symbol);
        Self {
            symbol: symbol.to_string(),
            import_stmt,
            callable_name,
            kind,
            signature: if signature.is_empty() { "()".to_string() } else { signature.to_string() },
            doc: doc.and_then(short_doc),
            version: version.to_string(),
        }
    }
}

/// `a.b.c` → (`from a.b import c`, `c`); `c` → (`import c`, `c`).
pub fn import_parts(symbol: &str) -> (String, String) {
    match symbol.rsplit_once('.') {
        Some((module, name)) => (format!("from {} import {}", module, name), name.to_string()),
        None => (format!("import {}", symbol), symbol.to_string()),
    }
}

fn short_doc(doc: &str) -> Option<String> {
    let lines: Vec<&str> = doc
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(DOC_LINES)
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Caller-owned card cache.
#[derive(Debug, Default)]
pub struct SignatureCache {
    entries: HashMap<SymbolKey, ApiCard>,
    stats: CacheStats,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SymbolKey) -> Option<&ApiCard> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: SymbolKey, card: ApiCard) -> Option<ApiCard> {
        self.entries.insert(key, card)
    }

    /// Cached card, or the result of `resolve`. Unresolvable symbols are not
    /// cached.
    pub fn get_or_insert_with<F>(&mut self, key: SymbolKey, resolve: F) -> Option<&ApiCard>
    where
        F: FnOnce() -> Option<ApiCard>,
    {
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
            return self.entries.get(&key);
        }

        self.stats.misses += 1;
        let card = resolve()?;
        Some(&*self.entries.entry(key).or_insert(card))
    }

    /// Drop every version of one library. Returns how many cards went.
    pub fn invalidate_library(&mut self, library: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.library != library);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(symbol: &str, version: &str) -> ApiCard {
        ApiCard::new(symbol, SymbolKind::Function, "(x, y=1)", Some("Doc."), version)
    }

    #[test]
    fn import_statement_from_dotted_path() {
        let card = card("pvlib.irradiance.get_total_irradiance", "0.10.0");
        assert_eq!(card.import_stmt, "from pvlib.irradiance import get_total_irradiance");
        assert_eq!(card.callable_name, "get_total_irradiance");
        assert_eq!(import_parts("len"), ("import len".to_string(), "len".to_string()));
    }

    #[test]
    fn doc_keeps_three_nonempty_lines() {
        let card = ApiCard::new("a.f", SymbolKind::Class, "", Some("\n  one\n\ntwo\nthree\nfour\n"), "1");
        assert_eq!(card.doc.as_deref(), Some("one\ntwo\nthree"));
        assert_eq!(card.signature, "()");
        assert!(ApiCard::new("a.f", SymbolKind::Class, "()", Some("  \n"), "1").doc.is_none());
    }

    #[test]
    fn cache_counts_hits_and_misses() {
        let mut cache = SignatureCache::new();
        let key = SymbolKey::for_symbol("pandas.read_csv", "2.2.0");
        assert_eq!(key.library, "pandas");

        let first = cache.get_or_insert_with(key.clone(), || Some(card("pandas.read_csv", "2.2.0")));
        assert!(first.is_some());
        let mut called = false;
        cache.get_or_insert_with(key.clone(), || {
            called = true;
            None
        });
        assert!(!called);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn unresolved_symbols_are_not_cached() {
        let mut cache = SignatureCache::new();
        let key = SymbolKey::for_symbol("numpy.nothing", "1.26");
        assert!(cache.get_or_insert_with(key.clone(), || None).is_none());
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn versions_are_distinct_and_invalidation_is_per_library() {
        let mut cache = SignatureCache::new();
        cache.insert(SymbolKey::for_symbol("pvlib.a", "0.9"), card("pvlib.a", "0.9"));
        cache.insert(SymbolKey::for_symbol("pvlib.a", "0.10"), card("pvlib.a", "0.10"));
        cache.insert(SymbolKey::for_symbol("numpy.sum", "1.26"), card("numpy.sum", "1.26"));
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.invalidate_library("pvlib"), 2);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
