use std::sync::Arc;

use super::hierarchy::HierarchyCache;
use super::ledger::ConfirmationLedger;
use super::planner::TransferPlanner;
use crate::notify::Notifier;
use crate::sink::{Sink, SinkError};

/// Everything a transfer task needs, built once per run and shared by `Arc`.
pub struct RunContext {
    pub sink: Arc<dyn Sink>,
    pub root_id: String,
    pub hierarchy: HierarchyCache,
    pub ledger: ConfirmationLedger,
    pub planner: TransferPlanner,
    pub notifier: Notifier,
}

impl RunContext {
    /// Resolves (or creates) the top-level `root_folder` container.
    pub async fn open(
        sink: Arc<dyn Sink>,
        root_folder: &str,
        planner: TransferPlanner,
        notifier: Notifier,
    ) -> Result<Self, SinkError> {
        let hierarchy = HierarchyCache::new(sink.clone());
        let root_id = hierarchy.resolve(root_folder, None).await?;
        tracing::info!(root = root_folder, id = %root_id, "archive root resolved");
        Ok(Self {
            ledger: ConfirmationLedger::new(sink.clone()),
            sink,
            root_id,
            hierarchy,
            planner,
            notifier,
        })
    }
}
