use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use super::buffer_pool::{PageData, PageId, PAGE_SIZE};

/// Positional page I/O over a single database file. Pages are addressed by
/// their id times the page size; the buffer pool extends the file with a
/// zeroed page before it ever hands out a fresh page id, so every read hits
/// allocated bytes.
pub struct DiskManager {
    file: File,
}

impl DiskManager {
    pub fn new(db_file_path: &Path) -> DiskManager {
        let file = File::options()
            .create(true)
            .write(true)
            .read(true)
            .open(db_file_path)
            .expect("could not open the database file");
        DiskManager { file }
    }

    pub fn write_page(&mut self, page_id: PageId, data: &PageData) {
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .expect("could not seek to the page offset");
        self.file
            .write_all(data)
            .expect("could not write the page contents");
        self.file.flush().expect("could not flush the page contents");
    }

    pub fn read_page(&mut self, page_id: PageId) -> PageData {
        let mut buffer = [0; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .expect("could not seek to the page offset");
        self.file
            .read_exact(&mut buffer)
            .expect("could not read the page contents");
        buffer
    }

    /// Current length of the database file in bytes. Always a multiple of the
    /// page size.
    pub fn file_length(&self) -> u64 {
        self.file
            .metadata()
            .expect("could not stat the database file")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn page_roundtrip() {
        let dir = TempDir::new().expect("could not create a scratch directory");
        let mut disk_manager = DiskManager::new(&dir.path().join("test.db"));

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        disk_manager.write_page(3, &page);

        assert_eq!(disk_manager.read_page(3), page);
        assert_eq!(disk_manager.file_length(), 4 * PAGE_SIZE as u64);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = TempDir::new().expect("could not create a scratch directory");
        let path = dir.path().join("test.db");

        let mut page = [0u8; PAGE_SIZE];
        page[7] = 42;
        {
            let mut disk_manager = DiskManager::new(&path);
            disk_manager.write_page(0, &page);
        }

        let mut disk_manager = DiskManager::new(&path);
        assert_eq!(disk_manager.read_page(0), page);
    }
}
