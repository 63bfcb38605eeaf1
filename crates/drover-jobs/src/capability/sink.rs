//! Storage for retrieved items.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const MAX_STEM_LEN: usize = 100;

/// Receives items a capability retrieved.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    async fn write(&self, capability: &str, query: &str, items: &[Value]) -> io::Result<()>;
}

/// Appends items as JSON lines to `<root>/<capability>/<query>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    root: PathBuf,
}

impl JsonlSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File the items for `query` are appended to.
    pub fn path_for(&self, capability: &str, query: &str) -> PathBuf {
        self.root
            .join(sanitize(capability))
            .join(format!("{}.jsonl", sanitize(query)))
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "query".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl PayloadSink for JsonlSink {
    async fn write(&self, capability: &str, query: &str, items: &[Value]) -> io::Result<()> {
        let path = self.path_for(capability, query);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buffer = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buffer, item).map_err(io::Error::other)?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        debug!(path = %path.display(), items = items.len(), "Items written");
        Ok(())
    }
}
