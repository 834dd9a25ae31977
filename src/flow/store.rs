use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};
use crate::flow::document::FlowDocument;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow document {path} not found")]
    NotFound { path: String },

    #[error("failed to access flow document {path}: {message}")]
    Io { path: String, message: String },

    #[error("flow document {path} is malformed: {message}")]
    Malformed { path: String, message: String },

    #[error("no campaign flow document is configured")]
    CampaignNotConfigured,

    #[error("the merged flow view cannot be written")]
    ReadOnlyView,
}

impl From<FlowError> for AppError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::CampaignNotConfigured | FlowError::ReadOnlyView => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "document".to_string(),
                    reason: err.to_string(),
                }))
            }
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::FlowStorage {
                message: other.to_string(),
            })),
        }
    }
}

/// Which document a caller wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDocumentKind {
    Primary,
    Campaign,
    #[default]
    Merged,
}

/// Flow documents on disk.
///
/// Nothing is cached: the editor may rewrite a file at any moment and every
/// read must see the latest version.
#[derive(Debug, Clone)]
pub struct FlowStore {
    primary_path: PathBuf,
    campaign_path: Option<PathBuf>,
}

impl FlowStore {
    pub fn new(primary_path: impl Into<PathBuf>, campaign_path: Option<PathBuf>) -> Self {
        Self {
            primary_path: primary_path.into(),
            campaign_path,
        }
    }

    pub fn from_config(config: &crate::config::FlowConfig) -> Self {
        Self::new(
            &config.primary_path,
            config.campaign_path.as_ref().map(PathBuf::from),
        )
    }

    pub async fn load_primary(&self) -> Result<FlowDocument, FlowError> {
        read_document(&self.primary_path).await
    }

    /// Missing or unconfigured campaign documents read as empty.
    pub async fn load_campaign(&self) -> Result<FlowDocument, FlowError> {
        let Some(path) = &self.campaign_path else {
            return Ok(FlowDocument::default());
        };

        match read_document(path).await {
            Err(FlowError::NotFound { .. }) => {
                debug!(path = %path.display(), "campaign flow document absent");
                Ok(FlowDocument::default())
            }
            other => other,
        }
    }

    /// Primary document with campaign screens laid over it.
    pub async fn load_merged(&self) -> Result<FlowDocument, FlowError> {
        let primary = self.load_primary().await?;
        let campaign = self.load_campaign().await?;
        Ok(primary.merged_with(&campaign))
    }

    pub async fn load(&self, kind: FlowDocumentKind) -> Result<FlowDocument, FlowError> {
        match kind {
            FlowDocumentKind::Primary => self.load_primary().await,
            FlowDocumentKind::Campaign => self.load_campaign().await,
            FlowDocumentKind::Merged => self.load_merged().await,
        }
    }

    /// Replace a document on disk. The new content is written next to the
    /// target and renamed over it so readers never see a half-written file.
    pub async fn save(&self, kind: FlowDocumentKind, document: &FlowDocument) -> Result<(), FlowError> {
        let path = match kind {
            FlowDocumentKind::Primary => self.primary_path.as_path(),
            FlowDocumentKind::Campaign => self
                .campaign_path
                .as_deref()
                .ok_or(FlowError::CampaignNotConfigured)?,
            FlowDocumentKind::Merged => return Err(FlowError::ReadOnlyView),
        };

        let body = serde_json::to_vec_pretty(document).map_err(|e| FlowError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| io_error(&staging, e))?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(|e| io_error(path, e))?;

        debug!(path = %path.display(), screens = document.screens.len(), "flow document saved");
        Ok(())
    }
}

async fn read_document(path: &Path) -> Result<FlowDocument, FlowError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(FlowError::NotFound {
                path: path.display().to_string(),
            })
        }
        Err(e) => return Err(io_error(path, e)),
    };

    if raw.trim().is_empty() {
        return Ok(FlowDocument::default());
    }

    serde_json::from_str(&raw).map_err(|e| FlowError::Malformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn io_error(path: &Path, err: std::io::Error) -> FlowError {
    FlowError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_campaign_reads_as_empty() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("flow.json");
        tokio::fs::write(&primary, r#"{"screens": {"start": {"text": "Hi"}}}"#)
            .await
            .unwrap();
        let store = FlowStore::new(&primary, Some(dir.path().join("campaign.json")));

        let merged = store.load_merged().await.unwrap();
        assert_eq!(merged.screens.len(), 1);
    }

    #[tokio::test]
    async fn missing_primary_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FlowStore::new(dir.path().join("flow.json"), None);

        assert!(matches!(
            store.load_primary().await,
            Err(FlowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_documents_are_errors() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("flow.json");
        tokio::fs::write(&primary, "{not json").await.unwrap();
        let store = FlowStore::new(&primary, None);

        assert!(matches!(
            store.load_primary().await,
            Err(FlowError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn saved_documents_are_read_back_fresh() {
        let dir = tempdir().unwrap();
        let store = FlowStore::new(
            dir.path().join("flow.json"),
            Some(dir.path().join("nested").join("campaign.json")),
        );
        let document: FlowDocument =
            serde_json::from_str(r#"{"screens": {"promo": {"text": "50% off"}}}"#).unwrap();

        store.save(FlowDocumentKind::Campaign, &document).await.unwrap();
        assert_eq!(store.load_campaign().await.unwrap(), document);

        let edited: FlowDocument =
            serde_json::from_str(r#"{"screens": {"promo": {"text": "60% off"}}}"#).unwrap();
        store.save(FlowDocumentKind::Campaign, &edited).await.unwrap();
        assert_eq!(store.load(FlowDocumentKind::Campaign).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn merged_view_is_read_only() {
        let dir = tempdir().unwrap();
        let store = FlowStore::new(dir.path().join("flow.json"), None);

        assert!(matches!(
            store
                .save(FlowDocumentKind::Merged, &FlowDocument::default())
                .await,
            Err(FlowError::ReadOnlyView)
        ));
        assert!(matches!(
            store
                .save(FlowDocumentKind::Campaign, &FlowDocument::default())
                .await,
            Err(FlowError::CampaignNotConfigured)
        ));
    }
}
