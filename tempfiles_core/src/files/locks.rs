use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 64;

/// Striped per-id locks. Two ids may share a stripe; one id always maps to
/// the same stripe, so holders of the guard for an id are mutually exclusive.
pub struct IdLocks {
    stripes: Box<[Mutex<()>]>,
}

impl IdLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(id)].lock().await
    }

    fn stripe_of(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for IdLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
