use std::fmt::Debug;
use std::mem::size_of;

use bincode::{Decode, Encode};

use crate::disk_management::buffer_pool::{PageData, PAGE_SIZE};

use super::page_codec;

// Room for the capacity field and the entry count in the encoded form.
const BUCKET_HEADER_SIZE: usize = 16;

/// Hash bucket page layout: the capacity, then a dense array of entries.
///
/// Buckets know nothing about hashing; they are a fixed-capacity set of
/// key-value pairs with key-equality semantics. Removal swaps the last entry
/// into the hole, so entry order is not meaningful.
#[derive(Debug, Encode, Decode)]
pub struct HashBucketPage<K, V> {
    max_size: u32,
    key_values: Vec<(K, V)>,
}

impl<K, V> HashBucketPage<K, V>
where
    K: Clone + Debug + Encode + Decode + Eq,
    V: Clone + Debug + Encode + Decode,
{
    /// Largest capacity a page can hold for this entry type.
    pub fn page_capacity() -> u32 {
        ((PAGE_SIZE - BUCKET_HEADER_SIZE) / (size_of::<K>() + size_of::<V>())) as u32
    }

    pub fn new_empty(max_size: u32) -> HashBucketPage<K, V> {
        assert!(
            max_size > 0 && max_size <= Self::page_capacity(),
            "bucket capacity does not fit in a page"
        );
        HashBucketPage {
            max_size,
            key_values: Vec::with_capacity(max_size as usize),
        }
    }

    pub fn from_raw_page(data: &PageData) -> HashBucketPage<K, V> {
        bincode::decode_from_slice(&data[..], page_codec())
            .expect("could not decode the bucket page")
            .0
    }

    pub fn write_to(&self, data: &mut PageData) {
        let bytes =
            bincode::encode_to_vec(self, page_codec()).expect("could not encode the bucket page");
        data[..bytes.len()].copy_from_slice(&bytes);
        data[bytes.len()..].fill(0);
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.key_values
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
    }

    /// False when the bucket is full or the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.is_full() || self.lookup(&key).is_some() {
            return false;
        }
        self.key_values.push((key, value));
        true
    }

    /// True iff an entry with the key existed and was removed.
    pub fn remove(&mut self, key: &K) -> bool {
        match self
            .key_values
            .iter()
            .position(|(entry_key, _)| entry_key == key)
        {
            Some(index) => {
                self.key_values.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) {
        self.key_values.swap_remove(index);
    }

    pub fn entry_at(&self, index: usize) -> &(K, V) {
        &self.key_values[index]
    }

    pub fn key_at(&self, index: usize) -> &K {
        &self.key_values[index].0
    }

    pub fn value_at(&self, index: usize) -> &V {
        &self.key_values[index].1
    }

    pub fn clear(&mut self) {
        self.key_values.clear();
    }

    pub fn size(&self) -> usize {
        self.key_values.len()
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.key_values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.key_values.len() >= self.max_size as usize
    }
}
