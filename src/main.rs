use std::collections::hash_map::RandomState;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use rand::Rng;

use hash_index::common::rid::Rid;
use hash_index::disk_management::{buffer_pool::BufferPool, disk_manager::DiskManager};
use hash_index::extendible_hashing::extendible_hashing::ExtendibleHashing;

fn main() {
    env_logger::init();

    let db_path = std::env::temp_dir().join("hash_index_demo.db");
    let file_manager = Arc::new(Mutex::new(DiskManager::new(&db_path)));
    let buffer_pool = Arc::new(BufferPool::new(file_manager, 64));

    let index = ExtendibleHashing::<u32, Rid, RandomState>::new(
        "demo",
        buffer_pool.clone(),
        RandomState::new(),
        2,
        9,
        64,
    )
    .expect("could not create the demo index");

    let mut rng = rand::thread_rng();
    let mut keys = Vec::new();
    for _ in 0..10_000 {
        let key: u32 = rng.gen();
        if index.insert(&key, &Rid::new(key % 97, key % 13)) {
            keys.push(key);
        }
    }
    info!("inserted {} keys", keys.len());

    let mut found = 0;
    for key in &keys {
        if index.get(key).is_some() {
            found += 1;
        }
    }
    info!("looked up {found} of {} keys", keys.len());

    let mut removed = 0;
    for key in keys.iter().step_by(2) {
        if index.remove(key) {
            removed += 1;
        }
    }
    info!(
        "removed {removed} keys, {} pages pinned",
        buffer_pool.pinned_page_count()
    );

    buffer_pool.flush_all_pages();
    println!(
        "demo complete: {} of {} keys resident in {}",
        keys.len() - removed,
        keys.len(),
        db_path.display()
    );
}
