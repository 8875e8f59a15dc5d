// src/source/spool.rs

//! On-disk copy of the received payload.
//!
//! Written verbatim before dispatch so a crashed or timed-out run can be
//! inspected afterwards. Nothing in the agent reads it back.

use std::path::Path;

use anyhow::{Context, Result};

use crate::engine::WorkItem;

pub async fn persist_payload(path: &Path, item: &WorkItem) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating dir {:?}", parent))?;
        }
    }
    tokio::fs::write(path, item.body.as_bytes())
        .await
        .with_context(|| format!("writing payload of task '{}' to {:?}", item.id, path))?;
    Ok(())
}
