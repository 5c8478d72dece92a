//! Image attachments carried by user messages.
//!
//! An attachment is either inline (a base64 `data:` URL, as produced by a
//! browser file reader) or a reference to an `http(s)` URL. Inline payloads
//! are limited to images of at most 5 MiB once decoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::AttachmentError;

/// Largest accepted decoded inline payload.
pub const MAX_INLINE_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// Base64-encoded image bytes.
    Inline { media_type: String, data: String },
    /// Remote image location.
    Reference { url: String },
}

impl Attachment {
    /// Parse a `data:` URL or an `http(s)` URL into a validated attachment.
    pub fn parse(uri: &str) -> Result<Self, AttachmentError> {
        let uri = uri.trim();
        if let Some(rest) = uri.strip_prefix("data:") {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| AttachmentError::InvalidEncoding("missing ',' in data URL".to_string()))?;
            let media_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| AttachmentError::InvalidEncoding("data URL is not base64".to_string()))?;
            let decoded = STANDARD
                .decode(data)
                .map_err(|e| AttachmentError::InvalidEncoding(e.to_string()))?;
            return Self::inline(media_type, &decoded);
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Attachment::Reference {
                url: uri.to_string(),
            });
        }

        Err(AttachmentError::UnsupportedScheme(
            uri.split(':').next().unwrap_or_default().to_string(),
        ))
    }

    /// Build an inline attachment from raw image bytes.
    pub fn inline(media_type: &str, bytes: &[u8]) -> Result<Self, AttachmentError> {
        if !media_type.starts_with("image/") {
            return Err(AttachmentError::NotAnImage(media_type.to_string()));
        }
        if bytes.len() > MAX_INLINE_ATTACHMENT_BYTES {
            return Err(AttachmentError::TooLarge {
                size: bytes.len(),
                max: MAX_INLINE_ATTACHMENT_BYTES,
            });
        }
        Ok(Attachment::Inline {
            media_type: media_type.to_string(),
            data: STANDARD.encode(bytes),
        })
    }

    /// Render back to the URI form stored by the persistence layer.
    pub fn to_uri(&self) -> String {
        match self {
            Attachment::Inline { media_type, data } => format!("data:{media_type};base64,{data}"),
            Attachment::Reference { url } => url.clone(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Attachment::Inline { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_url() {
        let attachment = Attachment::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        match &attachment {
            Attachment::Inline { media_type, .. } => assert_eq!(media_type, "image/png"),
            other => panic!("expected inline attachment, got {other:?}"),
        }
        assert_eq!(attachment.to_uri(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn test_parse_reference() {
        let attachment = Attachment::parse("https://example.com/look.jpg").unwrap();
        assert_eq!(
            attachment,
            Attachment::Reference {
                url: "https://example.com/look.jpg".to_string()
            }
        );
        assert!(!attachment.is_inline());
    }

    #[test]
    fn test_rejects_non_image() {
        let err = Attachment::parse("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, AttachmentError::NotAnImage(mt) if mt == "text/plain"));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let bytes = vec![0u8; MAX_INLINE_ATTACHMENT_BYTES + 1];
        let err = Attachment::inline("image/jpeg", &bytes).unwrap_err();
        assert!(matches!(err, AttachmentError::TooLarge { .. }));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = Attachment::parse("file:///tmp/a.png").unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedScheme(s) if s == "file"));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let err = Attachment::parse("data:image/png;base64,@@@").unwrap_err();
        assert!(matches!(err, AttachmentError::InvalidEncoding(_)));
    }
}
