use std::cmp::Reverse;

use priority_queue::PriorityQueue;

use super::buffer_pool::PageId;

/// Tracks the unpinned pages of the buffer pool in least-recently-used order.
pub struct LRUReplacer {
    // Saves the page id with its release timestamp as priority
    current_pages: PriorityQueue<PageId, Reverse<i64>>,
}

impl LRUReplacer {
    /// Allocates a new LRUReplacer with a given capacity.
    pub fn new(capacity: usize) -> LRUReplacer {
        LRUReplacer {
            current_pages: PriorityQueue::with_capacity(capacity),
        }
    }

    /// Returns the current number of evictable pages.
    pub fn current_size(&self) -> usize {
        self.current_pages.len()
    }

    /// Adds a page id to the evictable set, annotated with the current
    /// timestamp. Microsecond resolution keeps back-to-back releases ordered.
    pub fn add_page(&mut self, page_id: PageId) {
        let time_stamp = chrono::Utc::now().timestamp_micros();

        self.current_pages.push(page_id, Reverse(time_stamp));
    }

    /// Removes the page id from the evictable set and returns it.
    /// Returns None if the page id was not present in the set.
    pub fn drop_page(&mut self, page_id: PageId) -> Option<PageId> {
        self.current_pages.remove(&page_id).map(|page| page.0)
    }

    pub fn drop_all_pages(&mut self) {
        self.current_pages.clear();
    }

    /// Removes and returns the page id that has been evictable for the
    /// longest. If there is no page available, [None] is returned.
    pub fn pop_least_recently_used(&mut self) -> Option<PageId> {
        self.current_pages.pop().map(|page| page.0)
    }
}

#[cfg(test)]
mod lru_tests {
    use std::{thread::sleep, time::Duration};

    use super::LRUReplacer;

    #[test]
    fn pin_nonexisting() {
        let mut lru_replacer = LRUReplacer::new(10);

        assert_eq!(lru_replacer.drop_page(0), None);
    }

    #[test]
    fn pin_existing() {
        let mut lru_replacer = LRUReplacer::new(10);
        lru_replacer.add_page(0);

        assert_eq!(lru_replacer.drop_page(0), Some(0));
    }

    #[test]
    fn usual_get_victim() {
        let mut lru_replacer = LRUReplacer::new(10);
        let one_ms = Duration::from_millis(1);

        lru_replacer.add_page(0);
        sleep(one_ms);
        lru_replacer.add_page(2);
        sleep(one_ms);
        lru_replacer.add_page(1);

        assert_eq!(lru_replacer.pop_least_recently_used(), Some(0));
        assert_eq!(lru_replacer.pop_least_recently_used(), Some(2));
        assert_eq!(lru_replacer.pop_least_recently_used(), Some(1));
    }

    #[test]
    fn dropped_page_is_not_a_victim() {
        let mut lru_replacer = LRUReplacer::new(10);

        lru_replacer.add_page(0);
        lru_replacer.add_page(1);
        lru_replacer.drop_page(0);

        assert_eq!(lru_replacer.pop_least_recently_used(), Some(1));
        assert_eq!(lru_replacer.pop_least_recently_used(), None);
        assert_eq!(lru_replacer.current_size(), 0);
    }
}
