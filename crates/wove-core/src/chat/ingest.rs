//! Conversion of a raw response byte stream into ordered content deltas.
//!
//! Chunk boundaries from the transport do not respect UTF-8 character
//! boundaries, so an incomplete trailing sequence is carried over to the next
//! chunk. Bytes that can never form valid UTF-8 are replaced with U+FFFD. A
//! read failure ends the sequence with an explicit [`IngestError`].

use std::fmt::Display;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};

/// One incremental text fragment, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDelta {
    /// Zero-based position of this delta within its stream.
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("response stream failed: {0}")]
    Transport(String),
}

/// Incremental UTF-8 decoder with carry-over of split sequences.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode as much of `pending ++ bytes` as possible.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut buf = std::mem::take(&mut self.pending);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&buf) {
                Ok(s) => {
                    out.push_str(s);
                    buf.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            buf.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            buf.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        self.pending = buf;
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }
}

/// Turn a byte stream into a finite, ordered stream of content deltas.
///
/// Empty fragments are skipped. A source error is yielded as the final item.
pub fn ingest<S, B, E>(source: S) -> impl Stream<Item = Result<ContentDelta, IngestError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    try_stream! {
        let mut carry = Utf8Carry::default();
        let mut index = 0usize;
        let source = source;
        futures_util::pin_mut!(source);

        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(|e| IngestError::Transport(e.to_string()))?;
            let text = carry.push(chunk.as_ref());
            if !text.is_empty() {
                yield ContentDelta { index, text };
                index += 1;
            }
        }

        let tail = carry.finish();
        if !tail.is_empty() {
            yield ContentDelta { index, text: tail };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect(
        chunks: Vec<Result<Vec<u8>, String>>,
    ) -> Vec<Result<ContentDelta, IngestError>> {
        ingest(stream::iter(chunks)).collect().await
    }

    #[tokio::test]
    async fn test_deltas_arrive_in_order() {
        let out = collect(vec![Ok(b"Linen ".to_vec()), Ok(b"suit".to_vec())]).await;
        let texts: Vec<_> = out.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], ContentDelta { index: 0, text: "Linen ".into() });
        assert_eq!(texts[1], ContentDelta { index: 1, text: "suit".into() });
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let bytes = "tie 👔".as_bytes().to_vec();
        let (a, b) = bytes.split_at(bytes.len() - 2);
        let out = collect(vec![Ok(a.to_vec()), Ok(b.to_vec())]).await;

        let joined: String = out.into_iter().map(|d| d.unwrap().text).collect();
        assert_eq!(joined, "tie 👔");
    }

    #[tokio::test]
    async fn test_transport_error_terminates_explicitly() {
        let out = collect(vec![Ok(b"partial".to_vec()), Err("connection reset".to_string())]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().text, "partial");
        assert_eq!(
            out[1].as_ref().unwrap_err(),
            &IngestError::Transport("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_chunks_are_skipped() {
        let out = collect(vec![Ok(Vec::new()), Ok(b"a".to_vec()), Ok(Vec::new())]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().index, 0);
    }

    #[test]
    fn test_invalid_bytes_become_replacement_chars() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[b'o', 0xFF, b'k']), "o\u{FFFD}k");
        assert!(carry.finish().is_empty());
    }

    #[test]
    fn test_truncated_tail_is_flushed_lossily() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[b'a', 0xF0, 0x9F]), "a");
        assert_eq!(carry.finish(), "\u{FFFD}");
    }
}
