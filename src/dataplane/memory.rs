use super::{Dataplane, DataplaneError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory dataplane. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryDataplane {
    // (kind, key) -> (insertion sequence, body)
    documents: Mutex<HashMap<(&'static str, String), (u64, Value)>>,
}

impl MemoryDataplane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dataplane for MemoryDataplane {
    async fn insert(
        &self,
        kind: &'static str,
        key: &str,
        body: Value,
    ) -> Result<(), DataplaneError> {
        let mut documents = self.documents.lock().await;
        let id = (kind, key.to_string());
        if documents.contains_key(&id) {
            return Err(DataplaneError::Conflict {
                kind,
                key: key.to_string(),
            });
        }
        let sequence = documents.len() as u64;
        documents.insert(id, (sequence, body));
        Ok(())
    }

    async fn fetch(&self, kind: &'static str, key: &str) -> Result<Option<Value>, DataplaneError> {
        Ok(self
            .documents
            .lock()
            .await
            .get(&(kind, key.to_string()))
            .map(|(_, body)| body.clone()))
    }

    async fn fetch_all(&self, kind: &'static str) -> Result<Vec<Value>, DataplaneError> {
        let documents = self.documents.lock().await;
        let mut matching: Vec<&(u64, Value)> = documents
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|(_, entry)| entry)
            .collect();
        matching.sort_by_key(|(sequence, _)| *sequence);
        Ok(matching.into_iter().map(|(_, body)| body.clone()).collect())
    }

    async fn ping(&self) -> Result<(), DataplaneError> {
        Ok(())
    }
}
