use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{BuildCache, CacheEntry, CacheError, CacheKey};

/// Process-local cache. Outputs are not snapshotted.
#[derive(Debug, Default)]
pub struct MemoryBuildCache {
  entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryBuildCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl BuildCache for MemoryBuildCache {
  fn try_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.get(key).cloned())
  }

  fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn clean(&self) -> Result<(), CacheError> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{Fingerprint, OutputSet};

  #[test]
  fn store_then_get_and_clean() {
    let cache = MemoryBuildCache::new();
    let key = CacheKey::new("debug", "App.hello");
    assert!(cache.try_get(&key).unwrap().is_none());

    let entry = CacheEntry {
      key: key.clone(),
      fingerprint: Fingerprint::Empty,
      outputs: OutputSet::from(["App/hello/main.c".into()]),
    };
    cache.store(&entry).unwrap();
    assert_eq!(cache.try_get(&key).unwrap(), Some(entry));
    assert!(cache.try_get(&CacheKey::new("release", "App.hello")).unwrap().is_none());

    cache.clean().unwrap();
    assert!(cache.is_empty());
  }
}
