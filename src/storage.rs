use std::collections::HashMap;

use crate::key::Key;

/// The slice of the key space a node holds. Entries never expire; the last write to a key wins.
#[derive(Debug, Default)]
pub struct Storage {
    data: HashMap<Key, String>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            data: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: Key, value: String) {
        if let Some(previous) = self.data.insert(key, value) {
            debug!("Replaced {:?} (was {})", key, previous);
        }
    }

    pub fn get(&self, key: &Key) -> Option<&String> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
