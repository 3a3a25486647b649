use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use mta_types::RunId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Opaque key/value storage scoped by run id.
///
/// Everything a run needs to survive a restart lives here: the desired
/// state, step records, cursors and operation handles.
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn get(&self, run_id: &RunId, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, run_id: &RunId, key: &str, value: Value) -> StoreResult<()>;

    async fn remove(&self, run_id: &RunId, key: &str) -> StoreResult<()>;

    /// Whether any variable exists for the run
    async fn contains_run(&self, run_id: &RunId) -> StoreResult<bool>;
}

/// In-memory variable store for development and testing
pub struct InMemoryVariableStore {
    values: DashMap<(RunId, String), Value>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
        }
    }
}

impl Default for InMemoryVariableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn get(&self, run_id: &RunId, key: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .values
            .get(&(*run_id, key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set(&self, run_id: &RunId, key: &str, value: Value) -> StoreResult<()> {
        self.values.insert((*run_id, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, run_id: &RunId, key: &str) -> StoreResult<()> {
        self.values.remove(&(*run_id, key.to_string()));
        Ok(())
    }

    async fn contains_run(&self, run_id: &RunId) -> StoreResult<bool> {
        Ok(self.values.iter().any(|e| &e.key().0 == run_id))
    }
}

/// Typed view of the variables of one run.
#[derive(Clone)]
pub struct RunVariables {
    store: Arc<dyn VariableStore>,
    run_id: RunId,
}

impl RunVariables {
    pub fn new(store: Arc<dyn VariableStore>, run_id: RunId) -> Self {
        Self { store, run_id }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(&self.run_id, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.store.set(&self.run_id, key, value).await
    }

    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        self.store.remove(&self.run_id, key).await
    }

    /// A boolean variable, `false` when unset.
    pub async fn flag(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get::<bool>(key).await?.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typed_round_trip_is_scoped_by_run() {
        let store: Arc<dyn VariableStore> = Arc::new(InMemoryVariableStore::new());
        let first = RunVariables::new(store.clone(), RunId::generate());
        let second = RunVariables::new(store.clone(), RunId::generate());

        first.set("cursor", &3usize).await.unwrap();
        assert_eq!(first.get::<usize>("cursor").await.unwrap(), Some(3));
        assert_eq!(second.get::<usize>("cursor").await.unwrap(), None);
        assert!(store.contains_run(&first.run_id()).await.unwrap());

        first.remove("cursor").await.unwrap();
        assert_eq!(first.get::<usize>("cursor").await.unwrap(), None);
        assert!(!first.flag("aborted").await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_serialization_error() {
        let vars = RunVariables::new(Arc::new(InMemoryVariableStore::new()), RunId::generate());
        vars.set("name", "web").await.unwrap();
        assert!(vars.get::<u32>("name").await.is_err());
    }
}
