use std::collections::HashSet;

use async_trait::async_trait;
use taskstream_core::domain::{EntityId, HandlerError};
use taskstream_core::ports::TaskHandler;
use tracing::info;

/// Stand-in for real work: succeeds, except for entities listed in `failing`,
/// which fail on every attempt.
pub struct DemoHandler {
    failing: HashSet<EntityId>,
}

impl DemoHandler {
    pub fn new(failing: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            failing: failing.into_iter().collect(),
        }
    }

    #[cfg(feature = "redis")]
    pub fn always_succeeding() -> Self {
        Self {
            failing: HashSet::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, entity_id: EntityId, content: &str) -> Result<(), HandlerError> {
        if self.failing.contains(&entity_id) {
            return Err(HandlerError::new(format!(
                "simulated failure for entity {entity_id}"
            )));
        }
        info!(%entity_id, content_len = content.len(), "handled task");
        Ok(())
    }
}
