use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Typed, namespaced key-value persistence.
///
/// Writes are last-write-wins and each `put_*` stands alone: a sequence of puts
/// interrupted by a power loss can leave a partially updated settings set.
pub trait SettingsStore {
    fn get_u8(&self, key: &str, default: u8) -> Result<u8, StoreError>;
    fn get_i8(&self, key: &str, default: i8) -> Result<i8, StoreError>;
    fn get_u32(&self, key: &str, default: u32) -> Result<u32, StoreError>;

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError>;
    fn put_i8(&mut self, key: &str, value: i8) -> Result<(), StoreError>;
    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    U8(u8),
    I8(i8),
    U32(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryStore {
    values: BTreeMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_json_slice(raw: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(raw).map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self).map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    fn insert(&mut self, key: &str, value: StoredValue) {
        self.values.insert(key.to_string(), value);
    }
}

impl SettingsStore for MemoryStore {
    fn get_u8(&self, key: &str, default: u8) -> Result<u8, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(StoredValue::U8(value)) => Ok(value),
            Some(_) => Err(StoreError::TypeMismatch {
                key: key.to_string(),
            }),
        }
    }

    fn get_i8(&self, key: &str, default: i8) -> Result<i8, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(StoredValue::I8(value)) => Ok(value),
            Some(_) => Err(StoreError::TypeMismatch {
                key: key.to_string(),
            }),
        }
    }

    fn get_u32(&self, key: &str, default: u32) -> Result<u32, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(StoredValue::U32(value)) => Ok(value),
            Some(_) => Err(StoreError::TypeMismatch {
                key: key.to_string(),
            }),
        }
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.insert(key, StoredValue::U8(value));
        Ok(())
    }

    fn put_i8(&mut self, key: &str, value: i8) -> Result<(), StoreError> {
        self.insert(key, StoredValue::I8(value));
        Ok(())
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.insert(key, StoredValue::U32(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_return_default() {
        let store = MemoryStore::new();
        assert_eq!(store.get_u8("brightness", 100).unwrap(), 100);
        assert_eq!(store.get_i8("tz", 1).unwrap(), 1);
        assert_eq!(store.get_u32("timestamp", 0).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut store = MemoryStore::new();
        store.put_u8("tz", 3).unwrap();

        assert_eq!(
            store.get_i8("tz", 1),
            Err(StoreError::TypeMismatch {
                key: "tz".to_string()
            })
        );
    }

    #[test]
    fn json_snapshot_restores_every_value() {
        let mut store = MemoryStore::new();
        store.put_u8("red", 255).unwrap();
        store.put_i8("tz", -5).unwrap();
        store.put_u32("timestamp", 1_711_843_200).unwrap();

        let raw = store.to_json_vec().unwrap();
        let restored = MemoryStore::from_json_slice(&raw).unwrap();

        assert_eq!(restored, store);
        assert_eq!(restored.len(), 3);
    }
}
