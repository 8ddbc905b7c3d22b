//! Page arena behind [`PagingCache`]

use parking_lot::Mutex;
use portex_core::{Error, Result};
use std::fmt;
use tracing::trace;

/// One page returned by a [`PageSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in collection order
    pub items: Vec<T>,
    /// Cursor of the following page; `None` on the last page
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Page followed by `next_cursor`.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Page { items, next_cursor }
    }

    /// Final page.
    pub fn last(items: Vec<T>) -> Self {
        Page {
            items,
            next_cursor: None,
        }
    }
}

/// Fetches one page for a cursor (`None` requests the first page).
pub trait PageSource<T>: Send + Sync {
    /// Fetch the page at `cursor`.
    fn fetch(&self, cursor: Option<&str>) -> Result<Page<T>>;
}

impl<T, F> PageSource<T> for F
where
    F: Fn(Option<&str>) -> Result<Page<T>> + Send + Sync,
{
    fn fetch(&self, cursor: Option<&str>) -> Result<Page<T>> {
        self(cursor)
    }
}

/// Fetched pages, kept as they arrived and indexed by page number
struct Arena<T> {
    pages: Vec<Vec<T>>,
    /// Collection offset of each page's first item
    offsets: Vec<usize>,
    len: usize,
    next_cursor: Option<String>,
    /// True once the last page is in; `len` is then the total
    exhausted: bool,
    fetches: usize,
}

impl<T> Arena<T> {
    fn empty() -> Self {
        Arena {
            pages: Vec::new(),
            offsets: Vec::new(),
            len: 0,
            next_cursor: None,
            exhausted: false,
            fetches: 0,
        }
    }

    fn push(&mut self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        self.offsets.push(self.len);
        self.len += items.len();
        self.pages.push(items);
    }

    /// Resolve a collection index to `(page, offset within page)`.
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.len {
            return None;
        }
        let page = self.offsets.partition_point(|&start| start <= index) - 1;
        Some((page, index - self.offsets[page]))
    }

    fn item(&self, index: usize) -> Option<&T> {
        self.locate(index).map(|(page, offset)| &self.pages[page][offset])
    }
}

/// Demand-driven cache over a cursor-paginated collection
///
/// Pages are kept in an arena indexed by page number as they arrive, so any
/// index below [`cached_len`](PagingCache::cached_len) is served without a
/// fetch. A failed fetch leaves the cache unchanged; the next access retries
/// it.
pub struct PagingCache<T> {
    source: Option<Box<dyn PageSource<T>>>,
    arena: Mutex<Arena<T>>,
}

impl<T> fmt::Debug for PagingCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("PagingCache")
            .field("pages", &arena.pages.len())
            .field("cached", &arena.len)
            .field("exhausted", &arena.exhausted)
            .field("fetches", &arena.fetches)
            .finish()
    }
}

impl<T: Clone> PagingCache<T> {
    /// Cache over `source`; nothing is fetched until first access.
    pub fn new(source: impl PageSource<T> + 'static) -> Self {
        PagingCache {
            source: Some(Box::new(source)),
            arena: Mutex::new(Arena::empty()),
        }
    }

    /// Fully materialized cache over local items.
    pub fn from_items(items: Vec<T>) -> Self {
        let mut arena = Arena::empty();
        arena.push(items);
        arena.exhausted = true;
        PagingCache {
            source: None,
            arena: Mutex::new(arena),
        }
    }

    /// Item at `index`; negative indices count from the end.
    ///
    /// Returns `Ok(None)` when the index is out of range.
    pub fn get(&self, index: i64) -> Result<Option<T>> {
        let mut arena = self.arena.lock();
        let position = if index < 0 {
            self.fill_all(&mut arena)?;
            match usize::try_from(index.unsigned_abs()) {
                Ok(back) if back <= arena.len => arena.len - back,
                _ => return Ok(None),
            }
        } else {
            let position = usize::try_from(index).unwrap_or(usize::MAX);
            self.fill_to(&mut arena, position.saturating_add(1))?;
            position
        };
        Ok(arena.item(position).cloned())
    }

    /// Items selected by a slice with Python semantics.
    ///
    /// Bounded forward slices only fetch the pages they cover; anything else
    /// needs the total length.
    pub fn get_slice(&self, start: Option<i64>, stop: Option<i64>, step: i64) -> Result<Vec<T>> {
        if step == 0 {
            return Err(Error::InvalidArgument("slice step cannot be zero".into()));
        }
        let mut arena = self.arena.lock();
        let forward_bounded = step > 0
            && start.map_or(true, |s| s >= 0)
            && stop.map_or(false, |s| s >= 0);
        let indices: Vec<usize> = if forward_bounded {
            let start = start.unwrap_or(0) as usize;
            let stop = stop.unwrap_or(0) as usize;
            self.fill_to(&mut arena, stop)?;
            let stop = stop.min(arena.len);
            (start..stop.max(start)).step_by(step as usize).collect()
        } else {
            self.fill_all(&mut arena)?;
            slice_indices(arena.len, start, stop, step)
        };
        Ok(indices
            .into_iter()
            .filter_map(|i| arena.item(i).cloned())
            .collect())
    }

    /// Total number of items. Fetches every remaining page.
    pub fn len(&self) -> Result<usize> {
        let mut arena = self.arena.lock();
        self.fill_all(&mut arena)?;
        Ok(arena.len)
    }

    /// True if the collection has no items. Fetches at most one page.
    pub fn is_empty(&self) -> Result<bool> {
        let mut arena = self.arena.lock();
        self.fill_to(&mut arena, 1)?;
        Ok(arena.len == 0)
    }

    /// Fetch every remaining page.
    pub fn materialize(&self) -> Result<()> {
        let mut arena = self.arena.lock();
        self.fill_all(&mut arena)
    }

    /// All items, fetching as needed.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut arena = self.arena.lock();
        self.fill_all(&mut arena)?;
        Ok(arena.pages.iter().flatten().cloned().collect())
    }

    /// Lazy iterator; pages are fetched as iteration reaches them.
    pub fn iter(&self) -> PagingIter<'_, T> {
        PagingIter {
            cache: self,
            next: 0,
            done: false,
        }
    }

    /// Number of pages fetched so far.
    pub fn fetch_count(&self) -> usize {
        self.arena.lock().fetches
    }

    /// Number of items already cached.
    pub fn cached_len(&self) -> usize {
        self.arena.lock().len
    }

    /// Number of non-empty pages held in the arena.
    pub fn cached_pages(&self) -> usize {
        self.arena.lock().pages.len()
    }

    /// True once the last page has been fetched.
    pub fn is_length_known(&self) -> bool {
        self.arena.lock().exhausted
    }

    fn fill_to(&self, arena: &mut Arena<T>, wanted: usize) -> Result<()> {
        while arena.len < wanted && !arena.exhausted {
            self.fetch_next(arena)?;
        }
        Ok(())
    }

    fn fill_all(&self, arena: &mut Arena<T>) -> Result<()> {
        while !arena.exhausted {
            self.fetch_next(arena)?;
        }
        Ok(())
    }

    fn fetch_next(&self, arena: &mut Arena<T>) -> Result<()> {
        let Some(source) = &self.source else {
            arena.exhausted = true;
            return Ok(());
        };
        let page = source.fetch(arena.next_cursor.as_deref())?;
        trace!(
            target: "portex::paging",
            offset = arena.len,
            count = page.items.len(),
            last = page.next_cursor.is_none(),
            "Fetched page"
        );
        arena.fetches += 1;
        arena.push(page.items);
        arena.exhausted = page.next_cursor.is_none();
        arena.next_cursor = page.next_cursor;
        Ok(())
    }
}

/// Lazy iterator over a [`PagingCache`]
pub struct PagingIter<'a, T> {
    cache: &'a PagingCache<T>,
    next: usize,
    done: bool,
}

impl<'a, T: Clone> Iterator for PagingIter<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cache.get(self.next as i64) {
            Ok(Some(item)) => {
                self.next += 1;
                Some(Ok(item))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Resolve a Python-style slice against a known length.
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = start.map_or(0, |s| clamp(s, 0, len));
        let stop = stop.map_or(len, |s| clamp(s, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let stop = stop.map_or(-1, |s| clamp(s, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn numbered(total: usize, page_size: usize) -> (Arc<AtomicUsize>, PagingCache<usize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = PagingCache::new(move |cursor: Option<&str>| -> Result<Page<usize>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let offset: usize = cursor.map_or(Ok(0), str::parse).map_err(|_| Error::Network("bad cursor".into()))?;
            let end = (offset + page_size).min(total);
            let next = (end < total).then(|| end.to_string());
            Ok(Page::new((offset..end).collect(), next))
        });
        (calls, cache)
    }

    #[test]
    fn test_forward_access_fetches_only_needed_pages() {
        let (calls, cache) = numbered(100, 10);
        assert_eq!(cache.get(0).unwrap(), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(25).unwrap(), Some(25));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get(5).unwrap(), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "cached pages are reused");
        assert!(!cache.is_length_known());
    }

    #[test]
    fn test_len_and_negative_index_fetch_everything() {
        let (_, cache) = numbered(35, 10);
        assert_eq!(cache.get(-1).unwrap(), Some(34));
        assert!(cache.is_length_known());
        assert_eq!(cache.fetch_count(), 4);
        assert_eq!(cache.len().unwrap(), 35);
        assert_eq!(cache.fetch_count(), 4);
        assert_eq!(cache.get(-35).unwrap(), Some(0));
        assert_eq!(cache.get(-36).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_is_none() {
        let (_, cache) = numbered(5, 2);
        assert_eq!(cache.get(5).unwrap(), None);
        assert_eq!(cache.get(4).unwrap(), Some(4));
    }

    #[test]
    fn test_extreme_indices_are_out_of_range() {
        let cache = PagingCache::from_items(vec![1, 2, 3]);
        assert_eq!(cache.get(i64::MIN).unwrap(), None);
        assert_eq!(cache.get(i64::MAX).unwrap(), None);
        assert_eq!(cache.get_slice(Some(i64::MIN), None, 1).unwrap(), vec![1, 2, 3]);
        assert_eq!(cache.get_slice(Some(1), None, i64::MAX).unwrap(), vec![2]);
        assert_eq!(cache.get_slice(None, None, i64::MIN).unwrap(), vec![3]);
    }

    #[test]
    fn test_pages_are_kept_separately() {
        let (_, cache) = numbered(25, 10);
        assert_eq!(cache.get(12).unwrap(), Some(12));
        assert_eq!(cache.cached_pages(), 2);
        assert_eq!(cache.cached_len(), 20);
        assert_eq!(cache.get(-1).unwrap(), Some(24));
        assert_eq!(cache.cached_pages(), 3);
        for i in [0, 9, 10, 19, 20, 24] {
            assert_eq!(cache.get(i).unwrap(), Some(i as usize));
        }
        assert_eq!(cache.to_vec().unwrap(), (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_uneven_and_empty_pages() {
        let cache = PagingCache::new(|cursor: Option<&str>| -> Result<Page<u32>> {
            Ok(match cursor {
                None => Page::new(vec![0], Some("a".into())),
                Some("a") => Page::new(vec![], Some("b".into())),
                Some("b") => Page::new(vec![1, 2, 3, 4], Some("c".into())),
                _ => Page::last(vec![5, 6]),
            })
        });
        assert_eq!(cache.get(4).unwrap(), Some(4));
        assert_eq!(cache.cached_pages(), 2);
        assert_eq!(cache.get_slice(Some(-3), None, 1).unwrap(), vec![4, 5, 6]);
        assert_eq!(cache.fetch_count(), 4);
    }

    #[test]
    fn test_bounded_slice_is_lazy() {
        let (calls, cache) = numbered(100, 10);
        assert_eq!(cache.get_slice(Some(2), Some(12), 3).unwrap(), vec![2, 5, 8, 11]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_and_reverse_slices() {
        let (_, cache) = numbered(10, 4);
        assert_eq!(cache.get_slice(Some(-3), None, 1).unwrap(), vec![7, 8, 9]);
        assert_eq!(cache.get_slice(None, None, -4).unwrap(), vec![9, 5, 1]);
        assert_eq!(cache.get_slice(Some(3), Some(0), -1).unwrap(), vec![3, 2, 1]);
        assert!(cache.get_slice(None, None, 0).is_err());
    }

    #[test]
    fn test_iter_streams_pages() {
        let (calls, cache) = numbered(7, 3);
        let first: Vec<usize> = cache.iter().take(4).map(|r| r.unwrap()).collect();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let all: Result<Vec<usize>> = cache.iter().collect();
        assert_eq!(all.unwrap(), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_fetch_is_retried_on_next_access() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let cache = PagingCache::new(move |cursor: Option<&str>| -> Result<Page<i32>> {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            match cursor {
                None => Ok(Page::new(vec![1, 2], Some("p2".into()))),
                Some(_) if n == 1 => Err(Error::Network("timeout".into())),
                Some(_) => Ok(Page::last(vec![3])),
            }
        });
        assert!(matches!(cache.get(2), Err(Error::Network(_))));
        assert_eq!(cache.cached_len(), 2);
        assert_eq!(cache.get(2).unwrap(), Some(3));
        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn test_from_items_never_fetches() {
        let cache = PagingCache::from_items(vec!['a', 'b']);
        assert_eq!(cache.len().unwrap(), 2);
        assert_eq!(cache.get(-1).unwrap(), Some('b'));
        assert_eq!(cache.fetch_count(), 0);
    }

    #[test]
    fn test_empty_collection() {
        let cache: PagingCache<u8> = PagingCache::new(|_: Option<&str>| -> Result<Page<u8>> { Ok(Page::last(vec![])) });
        assert!(cache.is_empty().unwrap());
        assert_eq!(cache.get(0).unwrap(), None);
        assert_eq!(cache.get(-1).unwrap(), None);
    }

    #[test]
    fn test_slice_indices_matches_python() {
        assert_eq!(slice_indices(5, Some(1), Some(-1), 1), vec![1, 2, 3]);
        assert_eq!(slice_indices(5, Some(-100), Some(100), 2), vec![0, 2, 4]);
        assert_eq!(slice_indices(5, None, Some(-6), -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(0, None, None, -1), Vec::<usize>::new());
    }
}
