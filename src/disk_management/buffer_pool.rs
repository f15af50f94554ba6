use std::{collections::HashMap, sync::Arc};

use log::trace;
use parking_lot::{Mutex, RwLock};

use super::disk_manager::DiskManager;
use super::lru_replacer::LRUReplacer;
use super::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};

pub const PAGE_SIZE: usize = 4096;

pub type PageId = u32;
pub type PageData = [u8; PAGE_SIZE];

pub const INVALID_PAGE_ID: PageId = PageId::MAX;

/// One buffered page. The reader-writer lock doubles as the page latch; page
/// guards hold owned lock guards on it across their lifetime.
#[derive(Clone)]
pub struct RawPage {
    pub data: Arc<RwLock<PageData>>,
}

impl RawPage {
    pub fn new(data: PageData) -> RawPage {
        RawPage {
            data: Arc::new(RwLock::new(data)),
        }
    }
}

struct PageTableEntry {
    frame_index: usize,
    dirty: bool,
    pin_count: usize,
}

impl PageTableEntry {
    fn new(frame_index: usize) -> PageTableEntry {
        PageTableEntry {
            frame_index,
            dirty: false,
            pin_count: 1,
        }
    }
}

struct PoolState {
    frames: Vec<Option<RawPage>>,
    page_table: HashMap<PageId, PageTableEntry>,
    lru_replacer: LRUReplacer,
    freed_page_ids: Vec<PageId>,
}

/// Fixed-size cache of pages with pin accounting. Pages are handed out only
/// through guards (see [`super::page_guard`]); a pinned page is never evicted
/// and a page's pin count returns to zero exactly when its last guard drops.
///
/// Lock order: pool state, then disk manager. Page latches are only ever
/// acquired with the pool state unlocked.
pub struct BufferPool {
    pool_size: usize,
    state: Mutex<PoolState>,
    file_manager: Arc<Mutex<DiskManager>>,
}

impl BufferPool {
    pub fn new(file_manager: Arc<Mutex<DiskManager>>, pool_size: usize) -> BufferPool {
        BufferPool {
            pool_size,
            state: Mutex::new(PoolState {
                frames: vec![None; pool_size],
                page_table: HashMap::new(),
                lru_replacer: LRUReplacer::new(pool_size),
                freed_page_ids: Vec::new(),
            }),
            file_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocates a fresh page and returns it pinned behind an unlatched guard.
    /// The new page id is written through `page_id`. Returns an empty guard
    /// when every frame is pinned.
    pub fn new_page_guarded(self: &Arc<Self>, page_id: &mut PageId) -> BasicPageGuard {
        let page = {
            let mut state = self.state.lock();
            let frame_index = match self.find_free_frame(&mut state) {
                Some(index) => index,
                None => return BasicPageGuard::empty(),
            };
            let new_page_id = self.allocate_page_id(&mut state);
            let page = RawPage::new([0; PAGE_SIZE]);
            state.frames[frame_index] = Some(page.clone());
            state
                .page_table
                .insert(new_page_id, PageTableEntry::new(frame_index));
            *page_id = new_page_id;
            page
        };
        BasicPageGuard::new(self.clone(), *page_id, page)
    }

    /// Pins the page and takes its shared latch. Returns an empty guard when
    /// the page cannot be brought into the pool.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> ReadPageGuard {
        let page = {
            let mut state = self.state.lock();
            self.pin_page(&mut state, page_id)
        };
        match page {
            Some(page) => ReadPageGuard::new(self.clone(), page_id, page),
            None => ReadPageGuard::empty(),
        }
    }

    /// Pins the page and takes its exclusive latch. Returns an empty guard
    /// when the page cannot be brought into the pool.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> WritePageGuard {
        let page = {
            let mut state = self.state.lock();
            self.pin_page(&mut state, page_id)
        };
        match page {
            Some(page) => WritePageGuard::new(self.clone(), page_id, page),
            None => WritePageGuard::empty(),
        }
    }

    /// Releases one pin on the page, accumulating the dirty bit. At pin count
    /// zero the page becomes evictable. Unpinning an untracked page is a
    /// no-op; the guards guarantee pins and unpins come in pairs.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let entry = match state.page_table.get_mut(&page_id) {
            Some(entry) => entry,
            None => return,
        };
        debug_assert!(entry.pin_count > 0, "unpinning a page with no pins");
        if entry.pin_count == 0 {
            return;
        }
        entry.pin_count -= 1;
        if !entry.dirty {
            entry.dirty = is_dirty;
        }
        if entry.pin_count == 0 {
            state.lru_replacer.add_page(page_id);
        }
    }

    /// Drops an unpinned page from the pool and returns its id to the free
    /// pool for reuse by later allocations. Returns false if the page is
    /// still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        if let Some(entry) = state.page_table.get(&page_id) {
            if entry.pin_count > 0 {
                return false;
            }
        }
        if let Some(entry) = state.page_table.remove(&page_id) {
            state.frames[entry.frame_index] = None;
            state.lru_replacer.drop_page(page_id);
        }
        if !state.freed_page_ids.contains(&page_id) {
            state.freed_page_ids.push(page_id);
        }
        trace!("freed page {}", page_id);
        true
    }

    /// Writes every dirty page through to disk and marks it clean. Resident
    /// pages stay resident; callers must not hold write guards across this.
    pub fn flush_all_pages(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let mut file_manager = self.file_manager.lock();
        for (page_id, entry) in state.page_table.iter_mut() {
            if !entry.dirty {
                continue;
            }
            let frame = state.frames[entry.frame_index]
                .as_ref()
                .expect("tracked page has no frame");
            file_manager.write_page(*page_id, &frame.data.read());
            entry.dirty = false;
        }
    }

    /// Number of pages with at least one outstanding pin. Zero whenever no
    /// guard is alive.
    pub fn pinned_page_count(&self) -> usize {
        self.state
            .lock()
            .page_table
            .values()
            .filter(|entry| entry.pin_count > 0)
            .count()
    }

    /// Pins `page_id`, reading it from disk if it is not resident. None when
    /// no frame can be claimed.
    fn pin_page(&self, state: &mut PoolState, page_id: PageId) -> Option<RawPage> {
        if let Some(entry) = state.page_table.get_mut(&page_id) {
            entry.pin_count += 1;
            if entry.pin_count == 1 {
                state.lru_replacer.drop_page(page_id);
            }
            return state.frames[entry.frame_index].clone();
        }

        let frame_index = self.find_free_frame(state)?;
        let data = self.file_manager.lock().read_page(page_id);
        let page = RawPage::new(data);
        state.frames[frame_index] = Some(page.clone());
        state
            .page_table
            .insert(page_id, PageTableEntry::new(frame_index));
        Some(page)
    }

    /// Claims a frame: an unused slot if one exists, otherwise the least
    /// recently used unpinned page is evicted (written back when dirty).
    fn find_free_frame(&self, state: &mut PoolState) -> Option<usize> {
        if let Some(index) = state.frames.iter().position(|frame| frame.is_none()) {
            return Some(index);
        }

        let victim_page_id = state.lru_replacer.pop_least_recently_used()?;
        let entry = state
            .page_table
            .remove(&victim_page_id)
            .expect("replacer returned an untracked page");
        if entry.dirty {
            let frame = state.frames[entry.frame_index]
                .as_ref()
                .expect("victim page has no frame");
            self.file_manager
                .lock()
                .write_page(victim_page_id, &frame.data.read());
            trace!("evicted dirty page {}", victim_page_id);
        }
        state.frames[entry.frame_index] = None;
        Some(entry.frame_index)
    }

    /// Next page id: a previously freed id if available, otherwise the file
    /// is extended by one zeroed page.
    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        if let Some(page_id) = state.freed_page_ids.pop() {
            return page_id;
        }
        let mut file_manager = self.file_manager.lock();
        let page_id = (file_manager.file_length() / PAGE_SIZE as u64) as PageId;
        file_manager.write_page(page_id, &[0; PAGE_SIZE]);
        page_id
    }
}
