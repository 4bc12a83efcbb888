//! Write block held for the duration of a maintenance operation
//!
//! The guard is released explicitly with [`LockGuard::release`]. If it is
//! dropped first (an error unwound past it, or the owning future was
//! cancelled), the unlock is spawned on the current tokio runtime.

use indexsync_storage::SearchEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::Result;

pub(crate) fn write_block_settings(blocked: bool) -> Value {
    json!({"index": {"blocks": {"write": blocked}}})
}

/// Holds the write block on one index
pub struct LockGuard {
    engine: Arc<dyn SearchEngine>,
    index_name: String,
    released: bool,
}

impl LockGuard {
    /// Block writes to `index_name` and return the guard that lifts the block
    pub async fn acquire(engine: Arc<dyn SearchEngine>, index_name: &str) -> Result<Self> {
        info!("Locking {}", index_name);
        engine
            .put_settings(index_name, &write_block_settings(true))
            .await?;
        Ok(Self {
            engine,
            index_name: index_name.to_string(),
            released: false,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Lift the write block, surfacing any error
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        info!("Unlocking {}", self.index_name);
        self.engine
            .put_settings(&self.index_name, &write_block_settings(false))
            .await?;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                "{} left write-blocked: guard dropped outside a runtime",
                self.index_name
            );
            return;
        };

        let engine = self.engine.clone();
        let index_name = self.index_name.clone();
        handle.spawn(async move {
            info!("Unlocking {}", index_name);
            if let Err(e) = engine
                .put_settings(&index_name, &write_block_settings(false))
                .await
            {
                error!("Failed to unlock {}: {}", index_name, e);
            }
        });
    }
}
