//! Keyed document storage for users and roles.
//!
//! Records are JSON documents addressed by `(kind, key)`. Inserts are
//! conditional: a second insert for the same key fails with `Conflict` and
//! leaves the first document untouched.

mod memory;
mod postgres;

pub use self::memory::MemoryDataplane;
pub use self::postgres::PgDataplane;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DataplaneError {
    #[error("{kind} {key} already exists")]
    Conflict { kind: &'static str, key: String },
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[error("stored {kind} {key} is corrupt: {source}")]
    Decode {
        kind: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// A record type that lives in the dataplane.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    fn key(&self) -> &str;
}

#[async_trait]
pub trait Dataplane: Send + Sync {
    /// Insert unless a document with the same kind and key exists.
    async fn insert(&self, kind: &'static str, key: &str, body: Value)
    -> Result<(), DataplaneError>;

    async fn fetch(&self, kind: &'static str, key: &str) -> Result<Option<Value>, DataplaneError>;

    /// All documents of a kind, oldest first.
    async fn fetch_all(&self, kind: &'static str) -> Result<Vec<Value>, DataplaneError>;

    /// Cheap connectivity check for `/health`.
    async fn ping(&self) -> Result<(), DataplaneError>;
}

/// Store a new document.
///
/// # Errors
/// Returns `Conflict` if the key is taken, or a storage error.
pub async fn add<D: Document>(store: &dyn Dataplane, document: &D) -> Result<(), DataplaneError> {
    let body = serde_json::to_value(document).map_err(|source| DataplaneError::Encode {
        kind: D::KIND,
        source,
    })?;
    store.insert(D::KIND, document.key(), body).await
}

/// Load a document by key.
///
/// # Errors
/// Returns a storage error or `Decode` if the stored JSON no longer matches `D`.
pub async fn get<D: Document>(store: &dyn Dataplane, key: &str) -> Result<Option<D>, DataplaneError> {
    store
        .fetch(D::KIND, key)
        .await?
        .map(|body| decode(key, body))
        .transpose()
}

/// Load every document of a kind.
///
/// # Errors
/// Returns a storage error or `Decode` for the first corrupt document.
pub async fn list<D: Document>(store: &dyn Dataplane) -> Result<Vec<D>, DataplaneError> {
    store
        .fetch_all(D::KIND)
        .await?
        .into_iter()
        .map(|body| decode("*", body))
        .collect()
}

fn decode<D: Document>(key: &str, body: Value) -> Result<D, DataplaneError> {
    serde_json::from_value(body).map_err(|source| DataplaneError::Decode {
        kind: D::KIND,
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    impl Document for Note {
        const KIND: &'static str = "note";

        fn key(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn add_get_list() {
        let store = MemoryDataplane::new();
        add(&store, &note("a", "first")).await.unwrap();
        add(&store, &note("b", "second")).await.unwrap();

        let fetched: Option<Note> = get(&store, "a").await.unwrap();
        assert_eq!(fetched, Some(note("a", "first")));
        assert!(get::<Note>(&store, "missing").await.unwrap().is_none());

        let all: Vec<Note> = list(&store).await.unwrap();
        assert_eq!(all, vec![note("a", "first"), note("b", "second")]);
    }

    #[tokio::test]
    async fn duplicate_add_conflicts_and_keeps_first() {
        let store = MemoryDataplane::new();
        add(&store, &note("a", "first")).await.unwrap();

        let err = add(&store, &note("a", "second")).await.unwrap_err();
        assert!(matches!(err, DataplaneError::Conflict { kind: "note", .. }));
        assert_eq!(err.to_string(), "note a already exists");

        let fetched: Option<Note> = get(&store, "a").await.unwrap();
        assert_eq!(fetched.unwrap().text, "first");
    }

    #[tokio::test]
    async fn corrupt_document_is_a_decode_error() {
        let store = MemoryDataplane::new();
        store
            .insert("note", "a", serde_json::json!({"id": "a"}))
            .await
            .unwrap();
        assert!(matches!(
            get::<Note>(&store, "a").await,
            Err(DataplaneError::Decode { .. })
        ));
    }
}
