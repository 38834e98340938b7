use crate::config::BridgeConfig;
use crate::error::FinalizeError;
use crate::infrastructure::host::{CompletedDownload, DownloadIndex};
use crate::models::DownloadRequest;
use crate::utils::stream::{copy_bounded, remove_partial};
use crate::utils::validation::{numbered_variant, sanitize_display_name};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};

/// Gives up on finding a free name after this many numbered variants
const MAX_NAME_VARIANTS: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub destination: PathBuf,
    pub size: u64,
    /// False when the OS index rejected the file; the copy is still in place
    pub registered: bool,
}

/// Publishes native-produced files in the downloads area: staging run in reverse.
pub struct DownloadFinalizer {
    downloads_dir: PathBuf,
    buffer_size: usize,
    index: Arc<dyn DownloadIndex>,
}

impl DownloadFinalizer {
    pub fn new(
        downloads_dir: impl Into<PathBuf>,
        buffer_size: usize,
        index: Arc<dyn DownloadIndex>,
    ) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            buffer_size,
            index,
        }
    }

    pub fn from_config(config: &BridgeConfig, index: Arc<dyn DownloadIndex>) -> Self {
        Self::new(
            config.downloads_dir.clone(),
            config.transfer_buffer_size,
            index,
        )
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Opens `name`, or `name (1)`, `name (2)`, ... whichever is free first.
    async fn create_destination(&self, name: &str) -> io::Result<(PathBuf, fs::File)> {
        for n in 0..=MAX_NAME_VARIANTS {
            let candidate = if n == 0 {
                name.to_string()
            } else {
                numbered_variant(name, n)
            };
            let path = self.downloads_dir.join(&candidate);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {}", name),
        ))
    }

    /// Copies the source into the downloads area, registers it, then deletes
    /// the source. A failed copy leaves the source untouched; a failed
    /// registration is logged and does not stop the source being deleted.
    pub async fn finalize(
        &self,
        request: &DownloadRequest,
    ) -> Result<FinalizeReport, FinalizeError> {
        let source_path = request.source_path.clone();
        let fail = |destination: Option<PathBuf>, cause: io::Error| {
            tracing::error!(
                "❌ Download finalization failed for {}: {}",
                source_path.display(),
                cause
            );
            FinalizeError::new(source_path.clone(), destination, cause)
        };

        let name = sanitize_display_name(&request.display_name);

        fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|e| fail(None, e))?;
        let mut source = fs::File::open(&request.source_path)
            .await
            .map_err(|e| fail(None, e))?;
        let (destination, mut out) = self
            .create_destination(&name)
            .await
            .map_err(|e| fail(None, e))?;

        let copied = match copy_bounded(&mut source, &mut out, self.buffer_size).await {
            Ok(copied) => copied,
            Err(e) => {
                drop(out);
                remove_partial(&destination).await;
                return Err(fail(Some(destination), e));
            }
        };
        drop(out);
        drop(source);

        if copied.bytes != request.size {
            tracing::debug!(
                "Declared size {} differs from copied size {}",
                request.size,
                copied.bytes
            );
        }

        let mime_type = if request.mime_type.trim().is_empty() {
            copied
                .sniffed_mime
                .clone()
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string())
        } else {
            request.mime_type.clone()
        };

        let download = CompletedDownload {
            name: destination
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&name)
                .to_string(),
            mime_type,
            path: destination.clone(),
            size: copied.bytes,
        };
        let registered = match self.index.register_completed(&download).await {
            Ok(record) => {
                tracing::info!(
                    "📦 Registered {} with the download index ({})",
                    download.name,
                    record
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Download index rejected {}; file kept at {}: {}",
                    download.name,
                    destination.display(),
                    e
                );
                false
            }
        };

        if let Err(e) = fs::remove_file(&request.source_path).await {
            tracing::warn!(
                "Could not delete source {} after publishing: {}",
                request.source_path.display(),
                e
            );
        }

        Ok(FinalizeReport {
            destination,
            size: copied.bytes,
            registered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::SimulatedHost;

    #[tokio::test]
    async fn test_name_collision_gets_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("report.pdf"), b"existing").unwrap();

        let source = dir.path().join("incoming");
        std::fs::write(&source, b"fresh").unwrap();

        let host = SimulatedHost::new().unwrap();
        let finalizer = DownloadFinalizer::new(&downloads, 1024, Arc::new(host.clone()));
        let report = finalizer
            .finalize(&DownloadRequest::new(&source, "report.pdf", "application/pdf", 5))
            .await
            .unwrap();

        assert_eq!(report.destination, downloads.join("report (1).pdf"));
        assert_eq!(std::fs::read(downloads.join("report.pdf")).unwrap(), b"existing");
        assert_eq!(std::fs::read(&report.destination).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_missing_source_is_a_finalize_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = SimulatedHost::new().unwrap();
        let finalizer = DownloadFinalizer::new(dir.path(), 1024, Arc::new(host.clone()));

        let err = finalizer
            .finalize(&DownloadRequest::new(dir.path().join("gone"), "x.txt", "", 1))
            .await
            .unwrap_err();
        assert_eq!(err.cause.kind(), io::ErrorKind::NotFound);
        assert!(host.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_blank_mime_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blob");
        std::fs::write(&source, b"plain bytes").unwrap();

        let host = SimulatedHost::new().unwrap();
        let finalizer =
            DownloadFinalizer::new(dir.path().join("dl"), 1024, Arc::new(host.clone()));
        finalizer
            .finalize(&DownloadRequest::new(&source, "blob", " ", 11))
            .await
            .unwrap();

        let registrations = host.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].mime_type, "application/octet-stream");
    }
}
