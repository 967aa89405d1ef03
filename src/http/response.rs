//! Status-line/header/body response construction with a zero-copy file
//! body via `mmap`.

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use memmap2::Mmap;

use super::mime::content_type_for;
use crate::logging::Logger;
use crate::{log_debug, log_error};

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Bad Request",
    }
}

fn error_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

/// A fully built response: header bytes plus an optional memory-mapped
/// file body, meant to be written out as a gather/vectored write.
pub struct Response {
    pub code: u16,
    pub header: Vec<u8>,
    pub body: Option<Mmap>,
}

impl Response {
    /// Total bytes still to be written: `header.len() + body.len()`, used
    /// by the edge-triggered write loop's high-water-mark check.
    pub fn remaining_len(&self, header_sent: usize, body_sent: usize) -> usize {
        let header_left = self.header.len().saturating_sub(header_sent);
        let body_left = self
            .body
            .as_ref()
            .map(|m| m.len().saturating_sub(body_sent))
            .unwrap_or(0);
        header_left + body_left
    }
}

/// Builds the response for `path` under `resource_dir`. Never fails: I/O
/// errors degrade to a 404/403 body, matching the original's
/// stat-then-serve flow.
pub fn build(resource_dir: &Path, path: &str, keep_alive: bool, logger: &Logger) -> Response {
    let mut path = path.to_string();
    let mut full = resource_dir.join(path.trim_start_matches('/'));
    let mut code = match std::fs::metadata(&full) {
        Ok(meta) if meta.is_dir() => 404,
        Ok(meta) if meta.permissions().mode() & 0o004 == 0 => 403,
        Ok(_) => 200,
        Err(_) => 404,
    };

    if let Some(err_path) = error_path(code) {
        path = err_path.to_string();
        full = resource_dir.join(path.trim_start_matches('/'));
    }

    if !matches!(code, 200 | 400 | 403 | 404) {
        code = 400;
    }
    let mut header = Vec::with_capacity(256);
    header.extend_from_slice(format!("HTTP/1.1 {code} {}\r\n", status_text(code)).as_bytes());
    header.extend_from_slice(b"Connection: ");
    if keep_alive {
        header.extend_from_slice(b"keep-alive\r\n");
        header.extend_from_slice(b"keep-alive: max=10, timeout=120\r\n");
    } else {
        header.extend_from_slice(b"close\r\n");
    }
    header.extend_from_slice(format!("Content-type: {}\r\n", content_type_for(&path)).as_bytes());

    let body = match File::open(&full) {
        Ok(file) => {
            log_debug!(logger, "mmap file path: {}", full.display());
            // SAFETY: the file is opened read-only for the lifetime of this
            // mapping and not concurrently truncated by this process.
            match unsafe { Mmap::map(&file) } {
                Ok(map) => {
                    header.extend_from_slice(
                        format!("Content-length: {}\r\n\r\n", map.len()).as_bytes(),
                    );
                    Some(map)
                }
                Err(e) => {
                    log_error!(logger, "mmap failed: {e}");
                    append_error_content(&mut header, code, "File NotFound!");
                    None
                }
            }
        }
        Err(e) => {
            log_error!(logger, "open file failed: {e}");
            append_error_content(&mut header, code, "File NotFound!");
            None
        }
    };

    Response { code, header, body }
}

fn append_error_content(header: &mut Vec<u8>, code: u16, message: &str) {
    let status = status_text(code);
    let body = format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{code} : {status}\n<p>{message}</p><hr><em>edgeweb</em></body></html>"
    );
    header.extend_from_slice(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
    header.extend_from_slice(body.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn logger() -> std::sync::Arc<Logger> {
        Logger::discard()
    }

    #[test]
    fn missing_file_produces_404() {
        let dir = tempdir();
        let resp = build(&dir, "/nope.html", false, &logger());
        assert_eq!(resp.code, 404);
        assert!(resp.header.starts_with(b"HTTP/1.1 404"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn existing_readable_file_produces_200_with_mapped_body() {
        let dir = tempdir();
        let mut f = File::create(dir.join("index.html")).unwrap();
        f.write_all(b"<html>hi</html>").unwrap();
        drop(f);
        let resp = build(&dir, "/index.html", true, &logger());
        assert_eq!(resp.code, 200);
        assert!(resp.header.starts_with(b"HTTP/1.1 200 OK"));
        assert_eq!(resp.body.as_deref(), Some(&b"<html>hi</html>"[..]));
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "edgeweb-response-test-{}-{}",
            std::process::id(),
            rand_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos() as u64
    }
}
