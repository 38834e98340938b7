use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes kept from the start of a stream for content sniffing
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub bytes: u64,
    /// MIME type recognised from the leading bytes, if any
    pub sniffed_mime: Option<String>,
}

/// Streams `reader` into `writer` through one fixed-size buffer and flushes the writer.
pub async fn copy_bounded<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
) -> io::Result<CopyOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        if head.len() < SNIFF_LEN {
            let take = n.min(SNIFF_LEN - head.len());
            head.extend_from_slice(&buffer[..take]);
        }
        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;

    Ok(CopyOutcome {
        bytes: total,
        sniffed_mime: sniff_mime(&head),
    })
}

pub fn sniff_mime(head: &[u8]) -> Option<String> {
    infer::get(head).map(|kind| kind.mime_type().to_string())
}

/// Removes a partially written file. A missing file is not an error.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Failed to remove partial file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_bounded_copies_everything() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = &data[..];
        let mut out = Vec::new();
        let outcome = copy_bounded(&mut reader, &mut out, 1024).await.unwrap();
        assert_eq!(outcome.bytes, 10_000);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_copy_bounded_sniffs_pdf() {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.extend(std::iter::repeat_n(b'x', 2000));
        let mut reader = &data[..];
        let mut out = Vec::new();
        // a tiny buffer makes the header arrive across several reads
        let outcome = copy_bounded(&mut reader, &mut out, 3).await.unwrap();
        assert_eq!(outcome.sniffed_mime.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_copy_bounded_empty_stream() {
        let mut reader: &[u8] = &[];
        let mut out = Vec::new();
        let outcome = copy_bounded(&mut reader, &mut out, 64).await.unwrap();
        assert_eq!(outcome.bytes, 0);
        assert!(outcome.sniffed_mime.is_none());
    }

    #[tokio::test]
    async fn test_remove_partial_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written");
        remove_partial(&path).await;
        assert!(!path.exists());
    }
}
