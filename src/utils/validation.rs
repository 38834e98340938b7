use std::path::Path;

/// Used when a display name sanitises down to nothing
pub const FALLBACK_NAME: &str = "download";

/// Reduces a display name to a single safe path component for the downloads area.
pub fn sanitize_display_name(display_name: &str) -> String {
    // Only the last component survives; "a/../b.txt" becomes "b.txt"
    let name = display_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();

    if name != display_name.trim() {
        tracing::warn!("Path components stripped from display name: {}", display_name);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').trim();
    if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized.to_string()
    }
}

/// `report.pdf` -> `report (n).pdf`
pub fn numbered_variant(name: &str, n: u32) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_name() {
        assert_eq!(sanitize_display_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_display_name("photo 2024.jpg"), "photo 2024.jpg");
    }

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_display_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_display_name("C:\\Users\\me\\a.txt"), "a.txt");
        assert_eq!(sanitize_display_name("dir/"), FALLBACK_NAME);
    }

    #[test]
    fn test_sanitize_reserved_characters() {
        assert_eq!(sanitize_display_name("a:b*c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_display_name("..hidden"), "hidden");
        assert_eq!(sanitize_display_name("   "), FALLBACK_NAME);
    }

    #[test]
    fn test_numbered_variant() {
        assert_eq!(numbered_variant("report.pdf", 1), "report (1).pdf");
        assert_eq!(numbered_variant("archive.tar.gz", 2), "archive.tar (2).gz");
        assert_eq!(numbered_variant("README", 3), "README (3)");
    }
}
