//! Extension-based content types.

use std::path::Path;

/// Content type for files with unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions worth compressing on the fly.
const COMPRESSIBLE: [&str; 7] = ["js", "css", "html", "json", "svg", "txt", "xml"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Content type for `path`, from a fixed extension table.
pub fn content_type_for(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("js") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml; charset=utf-8",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        Some("xml") => "application/xml; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Whether responses for `path` may be gzip-encoded.
pub fn is_compressible(path: &Path) -> bool {
    extension(path).is_some_and(|e| COMPRESSIBLE.contains(&e.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types() {
        assert_eq!(
            content_type_for(Path::new("a/b.JS")),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(content_type_for(Path::new("x.woff2")), "font/woff2");
        assert_eq!(content_type_for(Path::new("x.ico")), "image/x-icon");
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(content_type_for(Path::new("archive.bin")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("Makefile")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_compressible() {
        assert!(is_compressible(Path::new("index.html")));
        assert!(is_compressible(Path::new("data/x.json")));
        assert!(!is_compressible(Path::new("img.png")));
        assert!(!is_compressible(Path::new("noext")));
    }
}
