//! Per-fingerprint storage shared by every accumulator.

use std::sync::Arc;

use dashmap::DashMap;

use super::tags::TagSet;

/// One tagged series and its kind-specific state.
#[derive(Debug)]
pub struct Series<S> {
    pub tags: TagSet,
    pub state: S,
}

/// Exported value of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSample<T> {
    pub fingerprint: String,
    pub tags: TagSet,
    pub value: T,
}

/// Concurrent fingerprint-to-series map.
///
/// Lookups of an existing series take a shard read lock only; the write lock
/// is taken once per new fingerprint.
#[derive(Debug)]
pub(crate) struct SeriesMap<S> {
    map: DashMap<String, Arc<Series<S>>>,
}

impl<S> Default for SeriesMap<S> {
    fn default() -> Self {
        Self { map: DashMap::new() }
    }
}

impl<S> SeriesMap<S> {
    pub(crate) fn get_or_insert_with(
        &self,
        tags: &TagSet,
        init: impl FnOnce() -> S,
    ) -> Arc<Series<S>> {
        let fingerprint = tags.fingerprint();
        if let Some(existing) = self.map.get(&fingerprint) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .map
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(Series { tags: tags.clone(), state: init() }));
        Arc::clone(entry.value())
    }

    pub(crate) fn get(&self, tags: &TagSet) -> Option<Arc<Series<S>>> {
        self.map.get(&tags.fingerprint()).map(|entry| Arc::clone(entry.value()))
    }

    /// Copies out every series handle so shard locks are not held while the
    /// caller reads values.
    pub(crate) fn collect(&self) -> Vec<(String, Arc<Series<S>>)> {
        self.map.iter().map(|entry| (entry.key().clone(), Arc::clone(entry.value()))).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn clear(&self) {
        self.map.clear();
    }
}
