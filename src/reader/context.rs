use std::num::NonZeroUsize;
use lru::LruCache;
use crate::core::cancel::CancellationToken;
use crate::core::types::FileId;
use crate::reader::problems::ProblemFiles;
use crate::stub::id_list::StubIdList;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    index: String,
    key: Vec<u8>,
    file: FileId,
}

/// `(index, canonical key, file) -> StubIdList`, valid for one forward index
/// generation; a different generation empties it
pub struct StubIdCache {
    entries: LruCache<CacheKey, StubIdList>,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl StubIdCache {
    pub fn new(capacity: usize) -> Self {
        StubIdCache {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            generation: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn sync(&mut self, generation: u64) {
        if generation != self.generation {
            self.entries.clear();
            self.generation = generation;
        }
    }

    pub fn get(&mut self, generation: u64, index: &str, key: &[u8], file: FileId) -> Option<StubIdList> {
        self.sync(generation);
        let cache_key = CacheKey { index: index.to_string(), key: key.to_vec(), file };
        match self.entries.get(&cache_key) {
            Some(ids) => {
                self.hits += 1;
                Some(ids.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, generation: u64, index: &str, key: &[u8], file: FileId, ids: StubIdList) {
        self.sync(generation);
        self.entries.put(CacheKey { index: index.to_string(), key: key.to_vec(), file }, ids);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-query state owned by the calling thread: the stub id cache, the
/// problem accumulator and an optional cancellation token
pub struct QueryContext {
    pub(crate) cache: StubIdCache,
    pub(crate) problems: ProblemFiles,
    cancel: Option<CancellationToken>,
}

impl QueryContext {
    pub fn new(cache_size: usize) -> Self {
        QueryContext {
            cache: StubIdCache::new(cache_size),
            problems: ProblemFiles::new(),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn cache(&self) -> &StubIdCache {
        &self.cache
    }

    pub fn problems(&self) -> &ProblemFiles {
        &self.problems
    }

    pub fn problems_mut(&mut self) -> &mut ProblemFiles {
        &mut self.problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generation_drops_cached_lists() {
        let mut cache = StubIdCache::new(2);
        cache.put(1, "names", b"Foo", FileId(1), StubIdList::Single(3));
        assert_eq!(cache.get(1, "names", b"Foo", FileId(1)), Some(StubIdList::Single(3)));
        assert_eq!(cache.get(1, "names", b"Foo", FileId(2)), None);
        assert_eq!(cache.hit_rate(), 0.5);

        assert_eq!(cache.get(2, "names", b"Foo", FileId(1)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        let mut cache = StubIdCache::new(2);
        for file in 0..5 {
            cache.put(0, "names", b"k", FileId(file), StubIdList::Empty);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0, "names", b"k", FileId(4)).is_some());
        assert!(cache.get(0, "names", b"k", FileId(0)).is_none());
    }
}
