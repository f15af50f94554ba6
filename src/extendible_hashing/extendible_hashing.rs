use std::{
    fmt::Debug,
    hash::{BuildHasher, Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

use bincode::{Decode, Encode};
use log::debug;

use crate::disk_management::buffer_pool::{BufferPool, PageId, INVALID_PAGE_ID};
use crate::disk_management::page_guard::WritePageGuard;

use super::hash_bucket_page::HashBucketPage;
use super::hash_directory_page::{HashDirectoryPage, DIRECTORY_MAX_DEPTH};
use super::hash_header_page::{HashHeaderPage, HEADER_MAX_DEPTH};

/// Disk-resident extendible hash index.
///
/// Keys resolve through three page levels: a header page picks a directory by
/// the high bits of the hash, the directory picks a bucket by the low bits,
/// and the bucket stores the entries. Buckets split and directories double on
/// overflow; emptied buckets merge back and directories shrink. Every page
/// access goes through a guard, so pins and latches are released on all
/// paths.
///
/// Lookups descend under shared latches, releasing each level before taking
/// the next. Mutations latch the directory exclusively for their whole
/// structural phase, which serializes splits and merges per directory.
pub struct ExtendibleHashing<K, V, H> {
    name: String,
    buffer_pool: Arc<BufferPool>,
    hash_builder: H,
    pub header_page_id: PageId,
    directory_max_depth: u8,
    bucket_max_size: u32,
    phantom_data: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashing<K, V, H>
where
    K: Hash + Clone + Debug + Encode + Decode + Eq,
    V: Clone + Debug + Encode + Decode,
    H: BuildHasher,
{
    /// Creates a fresh index rooted at a newly allocated header page. The
    /// depth parameters and bucket capacity are fixed for the index lifetime.
    pub fn new(
        name: &str,
        buffer_pool: Arc<BufferPool>,
        hash_builder: H,
        header_max_depth: u8,
        directory_max_depth: u8,
        bucket_max_size: u32,
    ) -> Result<ExtendibleHashing<K, V, H>, &'static str> {
        if header_max_depth > HEADER_MAX_DEPTH {
            return Err("header depth exceeds what a header page can hold");
        }
        if directory_max_depth > DIRECTORY_MAX_DEPTH {
            return Err("directory depth exceeds what a directory page can hold");
        }
        if bucket_max_size == 0 || bucket_max_size > HashBucketPage::<K, V>::page_capacity() {
            return Err("bucket capacity does not fit in a page");
        }

        let mut header_page_id = INVALID_PAGE_ID;
        let header_guard = buffer_pool.new_page_guarded(&mut header_page_id);
        if header_guard.is_empty() {
            return Err("could not allocate the header page");
        }
        let mut header_guard = header_guard.upgrade_write();
        HashHeaderPage::new_empty(header_max_depth).write_to(header_guard.data_mut());
        drop(header_guard);

        debug!("{}: created with header page {}", name, header_page_id);
        Ok(ExtendibleHashing {
            name: name.to_string(),
            buffer_pool,
            hash_builder,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            phantom_data: PhantomData,
        })
    }

    /// Reattaches to an index persisted behind an existing header page. The
    /// header page id is the only root state; everything else is reachable
    /// from it.
    pub fn from_header_page(
        name: &str,
        buffer_pool: Arc<BufferPool>,
        hash_builder: H,
        header_page_id: PageId,
        directory_max_depth: u8,
        bucket_max_size: u32,
    ) -> Result<ExtendibleHashing<K, V, H>, &'static str> {
        let header_guard = buffer_pool.fetch_page_read(header_page_id);
        if header_guard.is_empty() {
            return Err("could not fetch the header page");
        }
        let header = HashHeaderPage::from_raw_page(header_guard.data());
        drop(header_guard);
        debug!(
            "{}: reopened header page {} at depth {}",
            name,
            header_page_id,
            header.max_depth()
        );

        Ok(ExtendibleHashing {
            name: name.to_string(),
            buffer_pool,
            hash_builder,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            phantom_data: PhantomData,
        })
    }

    fn hash(&self, key: &K) -> u32 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    /// Point lookup. Descends under shared latches, releasing each parent
    /// before fetching the child.
    pub fn get(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);

        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id);
        if header_guard.is_empty() {
            return None;
        }
        let header = HashHeaderPage::from_raw_page(header_guard.data());
        let directory_page_id = header
            .get_directory_page_id(header.hash_to_directory_index(hash))
            .expect("header slot out of range");
        drop(header_guard);
        if directory_page_id == INVALID_PAGE_ID {
            return None;
        }

        let directory_guard = self.buffer_pool.fetch_page_read(directory_page_id);
        if directory_guard.is_empty() {
            return None;
        }
        let directory = HashDirectoryPage::from_raw_page(directory_guard.data());
        let bucket_page_id = directory
            .get_bucket_page_id(directory.hash_to_bucket_index(hash))
            .expect("directory slot out of range");
        drop(directory_guard);
        if bucket_page_id == INVALID_PAGE_ID {
            return None;
        }

        let bucket_guard = self.buffer_pool.fetch_page_read(bucket_page_id);
        if bucket_guard.is_empty() {
            return None;
        }
        let bucket = HashBucketPage::<K, V>::from_raw_page(bucket_guard.data());
        bucket.lookup(key).cloned()
    }

    /// Inserts the entry. False when the key already exists, the directory
    /// cannot grow past its maximum depth, or the buffer pool cannot allocate
    /// a page the operation needs; the structure stays consistent either way.
    pub fn insert(&self, key: &K, value: &V) -> bool {
        let hash = self.hash(key);

        let mut header_guard = self.buffer_pool.fetch_page_write(self.header_page_id);
        if header_guard.is_empty() {
            return false;
        }
        let mut header = HashHeaderPage::from_raw_page(header_guard.data());
        let directory_index = header.hash_to_directory_index(hash);
        let directory_page_id = header
            .get_directory_page_id(directory_index)
            .expect("header slot out of range");
        if directory_page_id == INVALID_PAGE_ID {
            return self.insert_to_new_directory(
                &mut header_guard,
                &mut header,
                directory_index,
                hash,
                key,
                value,
            );
        }
        drop(header_guard);

        let mut directory_guard = self.buffer_pool.fetch_page_write(directory_page_id);
        if directory_guard.is_empty() {
            return false;
        }
        let mut directory = HashDirectoryPage::from_raw_page(directory_guard.data());
        let mut bucket_index = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory
            .get_bucket_page_id(bucket_index)
            .expect("directory slot out of range");
        if bucket_page_id == INVALID_PAGE_ID {
            if !self.insert_to_new_bucket(&mut directory, bucket_index, key, value) {
                return false;
            }
            directory.write_to(directory_guard.data_mut());
            return true;
        }

        let mut bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id);
        if bucket_guard.is_empty() {
            return false;
        }
        let mut bucket = HashBucketPage::<K, V>::from_raw_page(bucket_guard.data());
        if bucket.lookup(key).is_some() {
            return false;
        }
        if bucket.insert(key.clone(), value.clone()) {
            bucket.write_to(bucket_guard.data_mut());
            return true;
        }

        // Split until the key's bucket has room. Each round may double the
        // directory once and always carves one split image off the full
        // bucket; all of a round's entries can land on one side, so the
        // incoming key may need several rounds.
        loop {
            let local_depth = directory
                .get_local_depth(bucket_index)
                .expect("directory slot out of range");
            if local_depth == directory.global_depth() {
                if directory.global_depth() >= self.directory_max_depth {
                    directory.write_to(directory_guard.data_mut());
                    return false;
                }
                directory.incr_global_depth();
                debug!(
                    "{}: directory {} grew to global depth {}",
                    self.name,
                    directory_page_id,
                    directory.global_depth()
                );
            }

            let mut image_page_id = INVALID_PAGE_ID;
            let image_guard = self.buffer_pool.new_page_guarded(&mut image_page_id);
            if image_guard.is_empty() {
                directory.write_to(directory_guard.data_mut());
                return false;
            }
            let mut image_guard = image_guard.upgrade_write();
            let mut image_bucket = HashBucketPage::<K, V>::new_empty(self.bucket_max_size);

            let image_index = bucket_index ^ (1usize << local_depth);
            update_directory_mapping(
                &mut directory,
                image_index,
                image_page_id,
                local_depth,
                local_depth + 1,
            );
            debug!(
                "{}: split bucket {} into image {} at local depth {}",
                self.name,
                bucket_page_id,
                image_page_id,
                local_depth + 1
            );

            // Redistribute: every entry re-dispatches through the updated
            // directory and must land on one of the two halves.
            let entries: Vec<(K, V)> =
                (0..bucket.size()).map(|i| bucket.entry_at(i).clone()).collect();
            bucket.clear();
            for (entry_key, entry_value) in entries {
                let target_index = directory.hash_to_bucket_index(self.hash(&entry_key));
                let target_page_id = directory
                    .get_bucket_page_id(target_index)
                    .expect("directory slot out of range");
                assert!(
                    target_page_id == bucket_page_id || target_page_id == image_page_id,
                    "split must partition entries between the bucket and its image"
                );
                let inserted = if target_page_id == image_page_id {
                    image_bucket.insert(entry_key, entry_value)
                } else {
                    bucket.insert(entry_key, entry_value)
                };
                assert!(inserted, "redistributed entry no longer fits its bucket");
            }

            bucket.write_to(bucket_guard.data_mut());
            image_bucket.write_to(image_guard.data_mut());
            directory.write_to(directory_guard.data_mut());
            drop(image_guard);
            drop(bucket_guard);

            // The key may now belong to either half; re-resolve and retry.
            bucket_index = directory.hash_to_bucket_index(hash);
            bucket_page_id = directory
                .get_bucket_page_id(bucket_index)
                .expect("directory slot out of range");
            bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id);
            if bucket_guard.is_empty() {
                return false;
            }
            bucket = HashBucketPage::<K, V>::from_raw_page(bucket_guard.data());
            if bucket.insert(key.clone(), value.clone()) {
                bucket.write_to(bucket_guard.data_mut());
                return true;
            }
        }
    }

    /// Removes the key. False when it is absent. Emptying a bucket triggers
    /// iterated merging with its split image and, at fixed point, directory
    /// shrinking.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash(key);

        let header_guard = self.buffer_pool.fetch_page_read(self.header_page_id);
        if header_guard.is_empty() {
            return false;
        }
        let header = HashHeaderPage::from_raw_page(header_guard.data());
        let directory_page_id = header
            .get_directory_page_id(header.hash_to_directory_index(hash))
            .expect("header slot out of range");
        drop(header_guard);
        if directory_page_id == INVALID_PAGE_ID {
            return false;
        }

        let mut directory_guard = self.buffer_pool.fetch_page_write(directory_page_id);
        if directory_guard.is_empty() {
            return false;
        }
        let mut directory = HashDirectoryPage::from_raw_page(directory_guard.data());
        let bucket_index = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory
            .get_bucket_page_id(bucket_index)
            .expect("directory slot out of range");
        if bucket_page_id == INVALID_PAGE_ID {
            return false;
        }

        let mut bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id);
        if bucket_guard.is_empty() {
            return false;
        }
        let mut bucket = HashBucketPage::<K, V>::from_raw_page(bucket_guard.data());
        if !bucket.remove(key) {
            return false;
        }
        bucket.write_to(bucket_guard.data_mut());

        if bucket.is_empty() {
            self.merge_and_shrink(
                &mut directory,
                directory_page_id,
                &mut bucket,
                &mut bucket_guard,
                bucket_index,
                bucket_page_id,
            );
            directory.write_to(directory_guard.data_mut());
        }
        true
    }

    /// First insertion under an unoccupied header slot: allocate a directory,
    /// seed it with one bucket, link it into the header. The header guard is
    /// held throughout.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard,
        header: &mut HashHeaderPage,
        directory_index: usize,
        hash: u32,
        key: &K,
        value: &V,
    ) -> bool {
        let mut directory_page_id = INVALID_PAGE_ID;
        let directory_guard = self.buffer_pool.new_page_guarded(&mut directory_page_id);
        if directory_guard.is_empty() {
            return false;
        }
        let mut directory_guard = directory_guard.upgrade_write();
        let mut directory = HashDirectoryPage::new_empty(self.directory_max_depth);
        let bucket_index = directory.hash_to_bucket_index(hash);
        if !self.insert_to_new_bucket(&mut directory, bucket_index, key, value) {
            drop(directory_guard);
            self.buffer_pool.delete_page(directory_page_id);
            return false;
        }
        directory.write_to(directory_guard.data_mut());
        header
            .set_directory_page_id(directory_index, directory_page_id)
            .expect("header slot out of range");
        header.write_to(header_guard.data_mut());
        debug!(
            "{}: allocated directory {} for header slot {}",
            self.name, directory_page_id, directory_index
        );
        true
    }

    /// Links a freshly allocated bucket holding just the new entry into an
    /// unoccupied directory slot, at local depth zero.
    fn insert_to_new_bucket(
        &self,
        directory: &mut HashDirectoryPage,
        bucket_index: usize,
        key: &K,
        value: &V,
    ) -> bool {
        let mut bucket_page_id = INVALID_PAGE_ID;
        let bucket_guard = self.buffer_pool.new_page_guarded(&mut bucket_page_id);
        if bucket_guard.is_empty() {
            return false;
        }
        let mut bucket_guard = bucket_guard.upgrade_write();
        let mut bucket = HashBucketPage::new_empty(self.bucket_max_size);
        let inserted = bucket.insert(key.clone(), value.clone());
        debug_assert!(inserted, "a fresh bucket rejected its first entry");
        bucket.write_to(bucket_guard.data_mut());
        directory
            .set_bucket_page_id(bucket_index, bucket_page_id)
            .expect("directory slot out of range");
        directory
            .set_local_depth(bucket_index, 0)
            .expect("directory slot out of range");
        true
    }

    /// Folds the just-emptied bucket (or its empty split image) into the
    /// surviving page while the pair sits at equal local depth, then shrinks
    /// the directory to fixed point. The caller holds the directory and
    /// bucket write guards and flushes the directory afterwards.
    fn merge_and_shrink(
        &self,
        directory: &mut HashDirectoryPage,
        directory_page_id: PageId,
        bucket: &mut HashBucketPage<K, V>,
        bucket_guard: &mut WritePageGuard,
        bucket_index: usize,
        bucket_page_id: PageId,
    ) {
        loop {
            let local_depth = directory
                .get_local_depth(bucket_index)
                .expect("directory slot out of range");
            if local_depth == 0 {
                break;
            }
            let image_index = directory.split_image_index(bucket_index);
            let image_depth = directory
                .get_local_depth(image_index)
                .expect("directory slot out of range");
            if image_depth != local_depth {
                break;
            }

            let image_page_id = directory
                .get_bucket_page_id(image_index)
                .expect("directory slot out of range");
            let mut image_guard = self.buffer_pool.fetch_page_write(image_page_id);
            if image_guard.is_empty() {
                break;
            }
            let mut image_bucket = HashBucketPage::<K, V>::from_raw_page(image_guard.data());
            if !image_bucket.is_empty() && !bucket.is_empty() {
                break;
            }

            // Pull the image's entries into the surviving bucket so its page
            // id keeps every referencing slot valid.
            for i in 0..image_bucket.size() {
                let (entry_key, entry_value) = image_bucket.entry_at(i).clone();
                let inserted = bucket.insert(entry_key, entry_value);
                assert!(inserted, "merged entries exceed the surviving bucket");
            }
            image_bucket.clear();
            image_bucket.write_to(image_guard.data_mut());
            bucket.write_to(bucket_guard.data_mut());
            drop(image_guard);
            self.buffer_pool.delete_page(image_page_id);

            update_directory_mapping(
                directory,
                bucket_index,
                bucket_page_id,
                local_depth,
                local_depth - 1,
            );
            debug!(
                "{}: merged bucket {} into {} at local depth {}",
                self.name,
                image_page_id,
                bucket_page_id,
                local_depth - 1
            );
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
            debug!(
                "{}: directory {} shrank to global depth {}",
                self.name,
                directory_page_id,
                directory.global_depth()
            );
        }
    }
}

/// Remaps the directory slots touched by a split or merge. Slots congruent to
/// `affected_index` modulo `1 << min(old, new)` take the new local depth;
/// the subset also congruent modulo `1 << new` is retargeted to
/// `new_bucket_page_id`. With `new = old + 1` this wires up a split image,
/// with `new = old - 1` it collapses a merged pair onto the survivor.
fn update_directory_mapping(
    directory: &mut HashDirectoryPage,
    affected_index: usize,
    new_bucket_page_id: PageId,
    old_local_depth: u8,
    new_local_depth: u8,
) {
    let step = 1usize << old_local_depth.min(new_local_depth);
    let new_depth_mask = (1usize << new_local_depth) - 1;
    for i in ((affected_index & (step - 1))..directory.size()).step_by(step) {
        if i & new_depth_mask == affected_index & new_depth_mask {
            directory
                .set_bucket_page_id(i, new_bucket_page_id)
                .expect("remapped slot out of range");
        }
        directory
            .set_local_depth(i, new_local_depth)
            .expect("remapped slot out of range");
    }
}
