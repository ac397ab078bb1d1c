//! Database module: key-value tables backed by SQLite.
//!
//! This module is split into two submodules:
//! - `model`: items, write conditions and the store error type.
//! - `repo`: pool setup and the SQL implementation of [`KvTable`].
//!
//! Callers work against the [`KvTable`] trait so handlers can be exercised with
//! recording fakes; the typed helpers below convert records to and from items.

pub mod model;
pub mod repo;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use model::{Condition, Item, StoreError};
pub use repo::*;

/// A table addressed by a single string primary key attribute.
#[async_trait]
pub trait KvTable: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError>;

    /// Write `item`, replacing any existing item with the same key.
    ///
    /// With a condition the write only happens if the condition holds for the
    /// stored item (or for "no item"). Otherwise it fails with
    /// [`StoreError::ConditionalCheckFailed`] and nothing changes.
    async fn put_item(&self, item: Item, condition: Option<&Condition>) -> Result<(), StoreError>;

    async fn delete_item(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key in order. Not atomic: a failure leaves earlier deletes applied.
    async fn batch_delete(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.delete_item(key).await?;
        }
        Ok(())
    }

    /// Put every item in order, unconditionally. Not atomic.
    async fn batch_put(&self, items: Vec<Item>) -> Result<(), StoreError> {
        for item in items {
            self.put_item(item, None).await?;
        }
        Ok(())
    }
}

/// Serialize a record into an item.
pub fn to_item<T: Serialize>(record: &T) -> Result<Item, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

pub async fn get_record<T: DeserializeOwned>(
    table: &dyn KvTable,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match table.get_item(key).await? {
        Some(item) => Ok(Some(serde_json::from_value(Value::Object(item))?)),
        None => Ok(None),
    }
}

pub async fn put_record<T: Serialize + Sync>(
    table: &dyn KvTable,
    record: &T,
    condition: Option<&Condition>,
) -> Result<(), StoreError> {
    table.put_item(to_item(record)?, condition).await
}
