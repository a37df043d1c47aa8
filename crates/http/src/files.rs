//! File-serving helper.
//!
//! A thin composition over [`ResponseWriter`]: read the file, guess a
//! Content-Type from the extension, send it. The core does no path
//! traversal or caching; callers decide what is servable.

use std::path::Path;

use braid_async::{Promise, Rejection};
use http::{HeaderValue, StatusCode};
use tracing::debug;

use crate::connection::ResponseWriter;
use crate::protocol::SendError;

/// Sends the file at `path` as the response, resolving with the total
/// bytes sent or rejecting on I/O error.
///
/// Reads synchronously: handlers already run on the blocking pool.
pub fn serve_file(mut writer: ResponseWriter, path: impl AsRef<Path>) -> Promise<usize> {
    let path = path.as_ref();
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), cause = %e, "file read failed");
            return Promise::rejected(Rejection::new(SendError::io(e)));
        }
    };

    let mime = guess_mime(path);
    if let Ok(content_type) = HeaderValue::from_str(mime.as_ref()) {
        writer.headers_mut().insert(http::header::CONTENT_TYPE, content_type);
    }

    writer.send(StatusCode::OK, contents)
}

fn guess_mime(path: &Path) -> mime::Mime {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => mime::TEXT_HTML_UTF_8,
        Some("css") => mime::TEXT_CSS,
        Some("js") => mime::TEXT_JAVASCRIPT,
        Some("json") => mime::APPLICATION_JSON,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("svg") => mime::IMAGE_SVG,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("pdf") => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
