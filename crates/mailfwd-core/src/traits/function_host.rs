// # Function Host Trait
//
// The mail gateway is a serverless function that forwards each received
// message. The reconciler only produces its configuration blob
// ([`GatewayConfig`]); deploying it is the host's job.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::gateway::GatewayConfig;

/// Trait for hosts that deploy the mail-gateway function
#[async_trait]
pub trait FunctionHost: Send + Sync {
    /// Deploy (or redeploy) the gateway with a resolved configuration
    async fn deploy(&self, config: &GatewayConfig) -> Result<()>;

    /// Get the host name (for logging/debugging)
    fn host_name(&self) -> &'static str;
}

/// Writes the gateway blob as pretty JSON to a file
///
/// Used when packaging is done by an external build step that picks the
/// file up next to the function source.
#[derive(Debug, Clone)]
pub struct FileFunctionHost {
    path: PathBuf,
}

impl FileFunctionHost {
    /// Create a host writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FunctionHost for FileFunctionHost {
    async fn deploy(&self, config: &GatewayConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;

        // Write to a sibling temp file first so readers never see a partial blob
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::info!(
            "Wrote gateway configuration ({} mapping(s)) to {}",
            config.mappings.len(),
            self.path.display()
        );
        Ok(())
    }

    fn host_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use indexmap::IndexMap;

    #[tokio::test]
    async fn writes_blob_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let host = FileFunctionHost::new(&path);

        let mut mappings = IndexMap::new();
        mappings.insert(
            "info@example.com".to_string(),
            vec![Target::email("owner@example.org")],
        );
        let config = GatewayConfig {
            mappings,
            domains: Vec::new(),
            bucket: "mail".into(),
            bucket_prefix: "inbound/".into(),
            region: None,
        };

        host.deploy(&config).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            written["mappings"]["info@example.com"][0]["type"],
            serde_json::json!("email")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }
}
