//! Extension-to-content-type table.

const DEFAULT_TYPE: &str = "text/plain";

const TABLE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/nsword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
];

/// Resolves a path's content type from its extension, falling back to
/// `text/plain` for unknown or missing extensions.
pub fn content_type_for(path: &str) -> &'static str {
    let Some(dot) = path.rfind('.') else {
        return DEFAULT_TYPE;
    };
    let ext = &path[dot..];
    TABLE
        .iter()
        .find(|(k, _)| *k == ext)
        .map(|(_, v)| *v)
        .unwrap_or(DEFAULT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extension_resolves() {
        assert_eq!(content_type_for("/index.html"), "text/html");
        assert_eq!(content_type_for("/logo.png"), "image/png");
    }

    #[test]
    fn unknown_extension_falls_back() {
        assert_eq!(content_type_for("/data.bin"), "text/plain");
        assert_eq!(content_type_for("/noext"), "text/plain");
    }
}
