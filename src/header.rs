//! Ordered, case-insensitive, multi-valued header storage.
//!
//! [`http::HeaderMap`] already does most of this, but it does not expose
//! the interleaved insertion order across *distinct* names that request
//! emission (`spec.md` §3/§4.4) needs to reproduce headers exactly as a
//! caller supplied them. [`HeaderStore`] is a thin ordered list on top of
//! `http::HeaderName`/`http::HeaderValue` with `http::HeaderMap` conversions
//! for interop with the rest of the `http` ecosystem.

use http::{HeaderMap, HeaderName, HeaderValue};

/// An ordered list of header name/value pairs.
///
/// Lookup and mutation are case-insensitive on the name (enforced by
/// `http::HeaderName`'s own `Eq`/`Hash`, which normalize to lowercase).
/// Duplicate names are preserved in insertion order for request emission;
/// `get` returns the *last* inserted value for a name, matching the
/// common single-value accessor contract for responses, while `get_all`
/// returns every value in order.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderStore {
    /// Creates an empty header store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, preserving any existing value(s) under the same name.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// Removes all existing values for `name` and inserts `value` as the only one.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.retain(|(n, _)| n != &name);
        self.entries.push((name, value));
    }

    /// Merges `other` into `self`, appending (not replacing) on name collisions,
    /// matching the "user headers merged preserving case; duplicates permitted"
    /// requirement from `spec.md` §4.4.
    pub fn merge(&mut self, other: &HeaderStore) {
        for (name, value) in &other.entries {
            self.entries.push((name.clone(), value.clone()));
        }
    }

    /// Returns the last value inserted for `name`, if any.
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Returns every value inserted for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a HeaderValue> {
        self.entries.iter().filter(move |(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns true if any value is present for `name`.
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Removes every value for `name`, returning how many were removed.
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        before - self.entries.len()
    }

    /// Iterates all (name, value) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    /// Number of (name, value) pairs, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<HeaderMap> for HeaderStore {
    fn from(map: HeaderMap) -> Self {
        let mut store = HeaderStore::new();
        for (name, value) in map.into_iter().filter_map(|(n, v)| n.map(|n| (n, v))) {
            store.append(name, value);
        }
        store
    }
}

impl From<&HeaderStore> for HeaderMap {
    fn from(store: &HeaderStore) -> Self {
        let mut map = HeaderMap::with_capacity(store.len());
        for (name, value) in store.iter() {
            map.append(name.clone(), value.clone());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hn(s: &str) -> HeaderName {
        HeaderName::from_bytes(s.as_bytes()).unwrap()
    }
    fn hv(s: &str) -> HeaderValue {
        HeaderValue::from_str(s).unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut store = HeaderStore::new();
        store.append(hn("Content-Type"), hv("text/plain"));
        assert_eq!(
            store.get(&hn("content-type")).unwrap().to_str().unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn duplicates_preserved_and_get_returns_last() {
        let mut store = HeaderStore::new();
        store.append(hn("Set-Cookie"), hv("a=1"));
        store.append(hn("Set-Cookie"), hv("b=2"));
        let all: Vec<_> = store.get_all(&hn("set-cookie")).map(|v| v.to_str().unwrap()).collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
        assert_eq!(store.get(&hn("set-cookie")).unwrap().to_str().unwrap(), "b=2");
    }

    #[test]
    fn insert_replaces_all_prior_values() {
        let mut store = HeaderStore::new();
        store.append(hn("X-A"), hv("1"));
        store.append(hn("X-A"), hv("2"));
        store.insert(hn("X-A"), hv("3"));
        let all: Vec<_> = store.get_all(&hn("x-a")).collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].to_str().unwrap(), "3");
    }

    #[test]
    fn merge_appends_without_dropping_existing() {
        let mut a = HeaderStore::new();
        a.append(hn("Accept"), hv("text/html"));
        let mut b = HeaderStore::new();
        b.append(hn("Accept"), hv("application/json"));
        a.merge(&b);
        assert_eq!(a.get_all(&hn("accept")).count(), 2);
    }
}
