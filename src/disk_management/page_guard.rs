//! Scoped page guards: a pin on a buffered page, an optional latch, and a
//! dirty flag, released in a fixed order on every exit path. The guards are
//! the only way pages leave the buffer pool, which is what makes the pin and
//! latch accounting of the hash index auditable: one acquisition, exactly one
//! release.

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use super::buffer_pool::{BufferPool, PageData, PageId, RawPage, INVALID_PAGE_ID};

type ReadLatch = ArcRwLockReadGuard<RawRwLock, PageData>;
type WriteLatch = ArcRwLockWriteGuard<RawRwLock, PageData>;

/// A pinned, unlatched page. Mostly a staging state: callers upgrade into a
/// latched guard before touching page contents that others might see.
pub struct BasicPageGuard {
    buffer_pool: Option<Arc<BufferPool>>,
    page: Option<RawPage>,
    page_id: PageId,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPool>,
        page_id: PageId,
        page: RawPage,
    ) -> BasicPageGuard {
        BasicPageGuard {
            buffer_pool: Some(buffer_pool),
            page: Some(page),
            page_id,
            is_dirty: false,
        }
    }

    pub fn empty() -> BasicPageGuard {
        BasicPageGuard {
            buffer_pool: None,
            page: None,
            page_id: INVALID_PAGE_ID,
            is_dirty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.page.is_none()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Runs `f` against the page contents under a transient shared latch.
    pub fn with_data<R>(&self, f: impl FnOnce(&PageData) -> R) -> R {
        let page = self.page.as_ref().expect("accessed an empty page guard");
        f(&page.data.read())
    }

    /// Runs `f` against the page contents under a transient exclusive latch
    /// and marks the guard dirty.
    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut PageData) -> R) -> R {
        self.is_dirty = true;
        let page = self.page.as_ref().expect("accessed an empty page guard");
        f(&mut page.data.write())
    }

    /// Trades this guard for one holding the page's shared latch. The pin
    /// carries over; the consumed guard releases nothing. Upgrading an empty
    /// guard is a no-op and yields an empty guard.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let (buffer_pool, page) = match (self.buffer_pool.take(), self.page.take()) {
            (Some(buffer_pool), Some(page)) => (buffer_pool, page),
            _ => return ReadPageGuard::empty(),
        };
        ReadPageGuard {
            latch: Some(page.data.read_arc()),
            buffer_pool: Some(buffer_pool),
            page_id: self.page_id,
            is_dirty: self.is_dirty,
        }
    }

    /// Trades this guard for one holding the page's exclusive latch. The pin
    /// carries over; the consumed guard releases nothing. Upgrading an empty
    /// guard is a no-op and yields an empty guard.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let (buffer_pool, page) = match (self.buffer_pool.take(), self.page.take()) {
            (Some(buffer_pool), Some(page)) => (buffer_pool, page),
            _ => return WritePageGuard::empty(),
        };
        WritePageGuard {
            latch: Some(page.data.write_arc()),
            buffer_pool: Some(buffer_pool),
            page_id: self.page_id,
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.page = None;
        if let Some(buffer_pool) = self.buffer_pool.take() {
            buffer_pool.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// A pinned page under its shared latch. Unpins clean on drop unless it was
/// upgraded out of an already-dirtied basic guard.
pub struct ReadPageGuard {
    buffer_pool: Option<Arc<BufferPool>>,
    latch: Option<ReadLatch>,
    page_id: PageId,
    is_dirty: bool,
}

impl ReadPageGuard {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPool>,
        page_id: PageId,
        page: RawPage,
    ) -> ReadPageGuard {
        ReadPageGuard {
            latch: Some(page.data.read_arc()),
            buffer_pool: Some(buffer_pool),
            page_id,
            is_dirty: false,
        }
    }

    pub fn empty() -> ReadPageGuard {
        ReadPageGuard {
            buffer_pool: None,
            latch: None,
            page_id: INVALID_PAGE_ID,
            is_dirty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.latch.is_none()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &PageData {
        self.latch.as_deref().expect("accessed an empty page guard")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release order: latch first, then the pin.
        drop(self.latch.take());
        if let Some(buffer_pool) = self.buffer_pool.take() {
            buffer_pool.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// A pinned page under its exclusive latch. Always unpins dirty, whether or
/// not the holder wrote.
pub struct WritePageGuard {
    buffer_pool: Option<Arc<BufferPool>>,
    latch: Option<WriteLatch>,
    page_id: PageId,
}

impl WritePageGuard {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPool>,
        page_id: PageId,
        page: RawPage,
    ) -> WritePageGuard {
        WritePageGuard {
            latch: Some(page.data.write_arc()),
            buffer_pool: Some(buffer_pool),
            page_id,
        }
    }

    pub fn empty() -> WritePageGuard {
        WritePageGuard {
            buffer_pool: None,
            latch: None,
            page_id: INVALID_PAGE_ID,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.latch.is_none()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &PageData {
        self.latch.as_deref().expect("accessed an empty page guard")
    }

    pub fn data_mut(&mut self) -> &mut PageData {
        self.latch
            .as_deref_mut()
            .expect("accessed an empty page guard")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Release order: latch first, then the pin.
        drop(self.latch.take());
        if let Some(buffer_pool) = self.buffer_pool.take() {
            buffer_pool.unpin_page(self.page_id, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tempfile::TempDir;

    use super::super::disk_manager::DiskManager;
    use super::*;

    fn test_pool() -> (TempDir, Arc<BufferPool>) {
        let dir = TempDir::new().expect("could not create a scratch directory");
        let file_manager = Arc::new(Mutex::new(DiskManager::new(&dir.path().join("test.db"))));
        (dir, Arc::new(BufferPool::new(file_manager, 8)))
    }

    #[test]
    fn guards_balance_pins() {
        let (_dir, pool) = test_pool();

        let mut page_id = INVALID_PAGE_ID;
        let guard = pool.new_page_guarded(&mut page_id);
        assert_eq!(pool.pinned_page_count(), 1);

        // Upgrading transfers the pin instead of stacking a second one.
        let write_guard = guard.upgrade_write();
        assert_eq!(pool.pinned_page_count(), 1);
        drop(write_guard);
        assert_eq!(pool.pinned_page_count(), 0);

        let read_guard = pool.fetch_page_read(page_id);
        let second_read_guard = pool.fetch_page_read(page_id);
        assert_eq!(pool.pinned_page_count(), 1);
        drop(read_guard);
        drop(second_read_guard);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn write_is_visible_to_later_readers() {
        let (_dir, pool) = test_pool();

        let mut page_id = INVALID_PAGE_ID;
        let mut guard = pool.new_page_guarded(&mut page_id).upgrade_write();
        guard.data_mut()[123] = 45;
        drop(guard);

        let guard = pool.fetch_page_read(page_id);
        assert_eq!(guard.data()[123], 45);
        assert_eq!(guard.page_id(), page_id);
    }

    #[test]
    fn empty_guards_are_inert() {
        let basic = BasicPageGuard::empty();
        assert!(basic.is_empty());
        drop(basic);

        let read = ReadPageGuard::empty();
        assert!(read.is_empty());
        drop(read);

        let write = WritePageGuard::empty();
        assert!(write.is_empty());
        drop(write);
    }

    #[test]
    fn upgrading_an_empty_guard_is_a_noop() {
        let read = BasicPageGuard::empty().upgrade_read();
        assert!(read.is_empty());
        drop(read);

        let write = BasicPageGuard::empty().upgrade_write();
        assert!(write.is_empty());
        drop(write);
    }

    #[test]
    fn write_latch_excludes_readers() {
        let (_dir, pool) = test_pool();

        let mut page_id = INVALID_PAGE_ID;
        let write_guard = pool.new_page_guarded(&mut page_id).upgrade_write();

        let acquired = Arc::new(AtomicBool::new(false));
        let reader = {
            let pool = pool.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let guard = pool.fetch_page_read(page_id);
                acquired.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(write_guard);
        reader.join().expect("reader thread panicked");
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn basic_guard_data_access_marks_dirty() {
        let (_dir, pool) = test_pool();

        let mut page_id = INVALID_PAGE_ID;
        let mut guard = pool.new_page_guarded(&mut page_id);
        guard.with_data_mut(|data| data[0] = 17);
        guard.with_data(|data| assert_eq!(data[0], 17));
        drop(guard);

        let guard = pool.fetch_page_read(page_id);
        assert_eq!(guard.data()[0], 17);
    }
}
