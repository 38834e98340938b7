use crate::config::BridgeConfig;
use crate::error::StagingError;
use crate::infrastructure::host::{ContentResolver, ContentStream};
use crate::models::{ContentRef, StagedFile};
use crate::utils::stream::{copy_bounded, remove_partial};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};

/// Attempts at finding a free cache name before giving up
const MAX_NAME_ATTEMPTS: u32 = 8;

/// A byte source plus whatever metadata the platform reported for it.
pub struct StageSource {
    pub reader: ContentStream,
    /// Advisory only; the staged size is what was actually read
    pub size_hint: Option<u64>,
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
}

impl StageSource {
    pub fn new(reader: ContentStream) -> Self {
        Self {
            reader,
            size_hint: None,
            display_name: None,
            mime_type: None,
        }
    }
}

/// Copies external content into privately owned cache files named
/// `<unix-millis>-<seq>`.
pub struct StagingStore {
    cache_dir: PathBuf,
    buffer_size: usize,
    seq: AtomicU64,
}

impl StagingStore {
    pub fn new(cache_dir: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            buffer_size,
            seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.cache_dir.clone(), config.transfer_buffer_size)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn next_destination(&self) -> PathBuf {
        let token = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        self.cache_dir.join(token)
    }

    async fn create_destination(&self) -> Result<(PathBuf, fs::File), StagingError> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| StagingError::new(None, e))?;

        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let destination = self.next_destination();
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&destination)
                .await
            {
                Ok(file) => return Ok((destination, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!("Cache name {} already taken", destination.display());
                    last_err = Some(e);
                }
                Err(e) => return Err(StagingError::new(None, e)),
            }
        }

        Err(StagingError::new(
            None,
            last_err.unwrap_or_else(|| io::Error::other("no free cache name")),
        ))
    }

    /// Streams `source` into a fresh cache file.
    ///
    /// On failure the partial destination is removed before returning, so a
    /// caller that only checks for existence never observes it.
    pub async fn stage(&self, source: StageSource) -> Result<StagedFile, StagingError> {
        let StageSource {
            mut reader,
            size_hint,
            display_name,
            mime_type,
        } = source;

        let (destination, mut file) = self.create_destination().await?;

        match copy_bounded(&mut reader, &mut file, self.buffer_size).await {
            Ok(copied) => {
                drop(file);
                drop(reader);

                if let Some(hint) = size_hint {
                    if hint != copied.bytes {
                        tracing::debug!(
                            "Size hint {} differs from staged size {} for {}",
                            hint,
                            copied.bytes,
                            destination.display()
                        );
                    }
                }
                tracing::info!(
                    "📥 Staged {} bytes into {}",
                    copied.bytes,
                    destination.display()
                );

                Ok(StagedFile {
                    local_path: destination,
                    original_name: display_name,
                    size: copied.bytes,
                    mime_type: mime_type.or(copied.sniffed_mime),
                })
            }
            Err(e) => {
                drop(file);
                drop(reader);
                tracing::error!("Staging into {} failed: {}", destination.display(), e);
                remove_partial(&destination).await;
                Err(StagingError::new(Some(destination), e))
            }
        }
    }

    /// Resolves `reference` through the content service and stages it.
    /// Display name, MIME type and size are best-effort.
    pub async fn stage_reference(
        &self,
        resolver: &dyn ContentResolver,
        reference: &ContentRef,
    ) -> Result<StagedFile, StagingError> {
        let display_name = resolver.display_name(reference).await;
        if display_name.is_none() {
            tracing::debug!("No display name reported for {}", reference);
        }
        let mime_type = resolver.mime_type(reference).await;
        let size_hint = resolver.size(reference).await;

        let reader = resolver.open(reference).await.map_err(|e| {
            tracing::error!("Failed to open {}: {}", reference, e);
            StagingError::new(None, e)
        })?;

        self.stage(StageSource {
            reader,
            size_hint,
            display_name,
            mime_type,
        })
        .await
    }

    /// Deletes staged files older than `max_age`; returns how many were removed.
    pub async fn purge_older_than(&self, max_age: Duration) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= max_age {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(
                        "Could not purge {}: {}",
                        entry.path().display(),
                        e
                    ),
                }
            }
        }

        if removed > 0 {
            tracing::info!("🧹 Purged {} stale staged files", removed);
        }
        Ok(removed)
    }
}
