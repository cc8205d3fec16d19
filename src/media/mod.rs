//! Raster payload helpers: `data:` URI codec and the watermark processor.

pub mod watermark;

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Splits a `data:` URI into its mime type and base64 payload. Inputs
/// without a header are treated as a bare payload with the default mime,
/// mirroring how the upload path has always handled them.
pub fn split_data_uri(uri: &str) -> (&str, &str) {
    match uri.split_once(',') {
        Some((header, payload)) => {
            let mime = header
                .strip_prefix("data:")
                .and_then(|h| h.split(';').next())
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_IMAGE_MIME);
            (mime, payload)
        }
        None => (DEFAULT_IMAGE_MIME, uri),
    }
}

/// Decodes the base64 payload of a `data:` URI.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (_, payload) = split_data_uri(uri);
    BASE64.decode(payload.as_bytes()).ok()
}

pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_round_trip() {
        let bytes = [0u8, 1, 2, 254, 255];
        let uri = encode_data_uri("image/png", &bytes);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_uri(&uri).unwrap(), bytes);
    }

    #[test]
    fn split_reads_mime_from_header() {
        let (mime, payload) = split_data_uri("data:image/png;base64,AAAA");
        assert_eq!(mime, "image/png");
        assert_eq!(payload, "AAAA");
    }

    #[test]
    fn bare_payload_defaults_to_jpeg() {
        let (mime, payload) = split_data_uri("AAAA");
        assert_eq!(mime, "image/jpeg");
        assert_eq!(payload, "AAAA");
    }

    #[test]
    fn invalid_payload_decodes_to_none() {
        assert!(decode_data_uri("data:image/png;base64,not base64!").is_none());
    }

    #[test]
    fn mime_for_path_matches_extension() {
        assert_eq!(mime_for_path(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("noext")), "image/jpeg");
    }
}
