//! Document store the signalling and call registry are kept in.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use super::Error;

/// Fields of a single document.
pub type Document = serde_json::Map<String, Value>;

/// Stored document along with its ID.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    /// ID of the document inside its collection.
    pub id: String,

    /// Fields of the document.
    pub data: Document,
}

/// Kind of a [`DocumentChange`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    /// Document appeared in the query results.
    Added,

    /// Document in the query results has been modified.
    Modified,

    /// Document left the query results.
    Removed,
}

/// Single change of a watched [`Query`] results.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    /// Kind of this change.
    pub kind: ChangeKind,

    /// Changed document.
    pub document: DocumentSnapshot,
}

/// Query over a single collection with equality filters.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Path of the queried collection.
    pub collection: String,

    /// Pairs of field name and the value it has to be equal to.
    pub filters: Vec<(String, Value)>,
}

impl Query {
    /// Creates a new [`Query`] returning all the documents of the provided
    /// collection.
    #[inline]
    pub fn collection<S: Into<String>>(path: S) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
        }
    }

    /// Narrows this [`Query`] to documents whose `field` equals `value`.
    #[inline]
    pub fn where_eq<F, V>(mut self, field: F, value: V) -> Self
    where
        F: Into<String>,
        V: Into<Value>,
    {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Checks whether the provided [`Document`] satisfies all the filters of
    /// this [`Query`].
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

/// Cloud document database with push subscriptions.
///
/// Document paths are `/`-separated alternating collection and document IDs,
/// e.g. `calls/c1/signaling/m1`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Appends a new document to the provided collection, returning the ID
    /// generated for it.
    async fn add(&self, collection: &str, data: Document)
        -> Result<String, Error>;

    /// Creates or overwrites the document at the provided path.
    async fn set(&self, path: &str, data: Document) -> Result<(), Error>;

    /// Atomically updates the provided fields of an existing document.
    async fn update(&self, path: &str, fields: Document) -> Result<(), Error>;

    /// Returns the document at the provided path, if any.
    async fn get(&self, path: &str) -> Result<Option<Document>, Error>;

    /// Deletes the document at the provided path.
    async fn delete(&self, path: &str) -> Result<(), Error>;

    /// Returns all the documents matching the provided [`Query`].
    async fn list(&self, query: &Query)
        -> Result<Vec<DocumentSnapshot>, Error>;

    /// Subscribes to the results of the provided [`Query`].
    ///
    /// The first item contains all the currently matching documents as
    /// [`ChangeKind::Added`]. Dropping the returned stream cancels the
    /// subscription.
    fn watch_query(
        &self,
        query: Query,
    ) -> BoxStream<'static, Result<Vec<DocumentChange>, Error>>;

    /// Subscribes to the document at the provided path. [`None`] is yielded
    /// while the document doesn't exist.
    ///
    /// Dropping the returned stream cancels the subscription.
    fn watch_document(
        &self,
        path: &str,
    ) -> BoxStream<'static, Result<Option<Document>, Error>>;
}
