//! Backend factory
//!
//! Resolves a (backend kind, schema type, connection parameters) triple to a
//! storage backend handle. Handles are cached: identical triples share one
//! adapter instance, and concurrent first requests converge on a single
//! cached handle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ConnectionParams;
use crate::error::{EngineResult, QueryError};
use crate::schema::{SchemaDescriptor, SchemaRegistry};
use crate::storage::{StorageBackend, TabularStoreAdapter, VectorStoreAdapter};

/// Which storage engine family serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Vector,
    Tabular,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Vector => write!(f, "vector"),
            BackendKind::Tabular => write!(f, "tabular"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vector" => Ok(BackendKind::Vector),
            "tabular" => Ok(BackendKind::Tabular),
            other => Err(QueryError::UnsupportedBackend {
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKey {
    kind: BackendKind,
    schema: String,
    params: ConnectionParams,
}

/// A cached, shareable backend bound to one schema and collection
#[derive(Clone)]
pub struct BackendHandle {
    pub kind: BackendKind,
    pub schema: Arc<SchemaDescriptor>,
    pub backend: Arc<dyn StorageBackend>,
}

// The trait object rules out deriving Debug
impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("kind", &self.kind)
            .field("schema", &self.schema.name())
            .field("collection", &self.backend.collection())
            .finish()
    }
}

/// Creates and caches backend handles against a schema registry
pub struct BackendFactory {
    registry: Arc<SchemaRegistry>,
    handles: RwLock<HashMap<HandleKey, Arc<BackendHandle>>>,
}

impl BackendFactory {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Resolve or create the backend for the given kind, schema type, and
    /// connection parameters.
    ///
    /// `schema_type` names a registered schema, except `"custom"` which uses
    /// the caller-supplied descriptor instead. Two concurrent calls with the
    /// same inputs may both construct an adapter, but only one lands in the
    /// cache and both callers receive it.
    pub async fn create(
        &self,
        kind: BackendKind,
        schema_type: &str,
        params: &ConnectionParams,
        custom: Option<SchemaDescriptor>,
    ) -> EngineResult<Arc<BackendHandle>> {
        let schema = if schema_type == "custom" {
            match custom {
                Some(descriptor) => Arc::new(descriptor),
                None => {
                    return Err(QueryError::UnknownSchema {
                        name: "custom".to_string(),
                    })
                }
            }
        } else {
            self.registry.get(schema_type)?
        };

        let key = HandleKey {
            kind,
            schema: schema.name().to_string(),
            params: params.clone(),
        };

        {
            let handles = self.handles.read().await;
            if let Some(handle) = handles.get(&key) {
                debug!(%kind, schema = schema.name(), collection = %params.collection, "backend cache hit");
                return Ok(handle.clone());
            }
        }

        // Construct outside the lock; adapters may do real I/O. A racing
        // construction loses to whichever insert wins and is discarded.
        let backend: Arc<dyn StorageBackend> = match kind {
            BackendKind::Vector => {
                Arc::new(VectorStoreAdapter::new(schema.clone(), &params.collection)?)
            }
            BackendKind::Tabular => {
                Arc::new(TabularStoreAdapter::connect(schema.clone(), params).await?)
            }
        };
        let handle = Arc::new(BackendHandle {
            kind,
            schema,
            backend,
        });

        let mut handles = self.handles.write().await;
        let entry = handles.entry(key).or_insert_with(|| handle.clone()).clone();
        info!(%kind, schema = entry.schema.name(), collection = %params.collection, "backend handle ready");
        Ok(entry)
    }

    /// Number of live cached handles
    pub async fn cached_handles(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Close every cached backend and drop the cache
    pub async fn close_all(&self) -> EngineResult<()> {
        let drained: Vec<Arc<BackendHandle>> = {
            let mut handles = self.handles.write().await;
            handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in drained {
            handle.backend.close().await?;
        }
        info!("all backend handles closed");
        Ok(())
    }
}
