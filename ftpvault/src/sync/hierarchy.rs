use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::ledger::DayStamp;
use crate::sink::{Sink, SinkError};

type CacheKey = (Option<String>, String);

/// Resolves container names to ids, creating missing containers.
///
/// The sink does not enforce unique names, so the existence check and the
/// create call run under one lock shared by every resolution.
pub struct HierarchyCache {
    sink: Arc<dyn Sink>,
    resolved: Mutex<HashMap<CacheKey, String>>,
}

impl HierarchyCache {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, name: &str, parent: Option<&str>) -> Result<String, SinkError> {
        let key = (parent.map(str::to_string), name.to_string());
        let mut resolved = self.resolved.lock().await;
        if let Some(id) = resolved.get(&key) {
            return Ok(id.clone());
        }

        let existing = self
            .sink
            .list_containers(parent)
            .await?
            .into_iter()
            .find(|container| container.name == name);
        let id = match existing {
            Some(container) => container.id,
            None => {
                let container = self.sink.create_container(name, parent).await?;
                tracing::debug!(name, parent = ?parent, id = %container.id, "created container");
                container.id
            }
        };
        resolved.insert(key, id.clone());
        Ok(id)
    }

    /// Returns the id of `root/YYYY/MM/DD`.
    pub async fn resolve_day(&self, root: &str, day: &DayStamp) -> Result<String, SinkError> {
        let year = self.resolve(&day.year, Some(root)).await?;
        let month = self.resolve(&day.month, Some(&year)).await?;
        self.resolve(&day.day, Some(&month)).await
    }
}
