//! Tag sets and their canonical fingerprints.
//!
//! A fingerprint is the tag set rendered as `key=value` pairs joined by `,`
//! in ascending key order. Backslash, `,` and `=` inside keys and values are
//! backslash-escaped, so two tag sets share a fingerprint only when they are
//! equal.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

/// Ordered string-to-string tag mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// An empty tag set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces a tag, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces a tag.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates tags in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `self` layered over `base`: keys present in both keep `self`'s value.
    #[must_use]
    pub fn merged_over(&self, base: &Self) -> Self {
        if base.is_empty() {
            return self.clone();
        }
        let mut merged = base.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Canonical series key for this tag set.
    pub fn fingerprint(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 16);
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(&mut out, key);
            out.push('=');
            escape_into(&mut out, value);
        }
        out
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        if matches!(ch, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('{')?;
        f.write_str(&self.fingerprint())?;
        f.write_char('}')
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds a [`TagSet`] from `key => value` pairs.
///
/// ```rust
/// use metricflow_core::tags;
///
/// let t = tags! { "env" => "prod", "region" => "eu" };
/// assert_eq!(t.fingerprint(), "env=prod,region=eu");
/// ```
#[macro_export]
macro_rules! tags {
    () => { $crate::metrics::TagSet::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::metrics::TagSet::new()$(.with($key, $value))+
    };
}
