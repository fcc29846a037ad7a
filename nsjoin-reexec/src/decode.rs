//! Incremental decoding of the child's result from its stdout
//!
//! The result is decoded while output streams in, so a value is available
//! as soon as it is complete, even if the child keeps running.

use std::io;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 4096;

/// State of decoding a buffer
#[derive(Debug)]
pub(crate) enum Decoded<R> {
    /// A complete value
    Complete(R),
    /// More input is needed
    Incomplete,
    /// The input can never become a valid value
    Invalid(serde_json::Error),
}

/// Try to decode one JSON value from the start of `buf`
///
/// Strings, objects and arrays are complete at their closing character.
/// Numbers and literals need a following byte or the end of input, since
/// `12` might continue as `123`. At `eof`, the result is never
/// [`Decoded::Incomplete`].
pub(crate) fn try_decode<R: DeserializeOwned>(buf: &[u8], eof: bool) -> Decoded<R> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<R>();
    match stream.next() {
        Some(Ok(value)) => {
            let end = stream.byte_offset();
            let delimited = end < buf.len()
                || matches!(end.checked_sub(1).and_then(|i| buf.get(i)), Some(b'"' | b'}' | b']'));
            if eof || delimited {
                Decoded::Complete(value)
            } else {
                Decoded::Incomplete
            }
        }
        Some(Err(e)) if e.is_eof() && !eof => Decoded::Incomplete,
        Some(Err(e)) => Decoded::Invalid(e),
        None if !eof => Decoded::Incomplete,
        // Only whitespace before the end: let serde report the missing value
        None => match serde_json::from_slice::<R>(buf) {
            Ok(value) => Decoded::Complete(value),
            Err(e) => Decoded::Invalid(e),
        },
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Scan {
    #[default]
    Leading,
    Scalar,
    Container,
    String,
    Escape,
    Done,
}

/// Finds where the first JSON value of a stream ends, without parsing it
///
/// Bytes are fed once, as they arrive. Only the bracket and string
/// structure is followed; whether the value is valid is left to serde.
#[derive(Debug, Default)]
pub(crate) struct ValueScanner {
    state: Scan,
    depth: usize,
}

impl ValueScanner {
    /// Feed the next bytes, returning whether the first value has ended
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> bool {
        for &byte in bytes {
            if self.state == Scan::Done {
                break;
            }
            self.state = match (self.state, byte) {
                (Scan::Leading, b' ' | b'\t' | b'\n' | b'\r') => Scan::Leading,
                (Scan::Leading | Scan::Container, b'"') => Scan::String,
                (Scan::Leading | Scan::Container, b'{' | b'[') => {
                    self.depth += 1;
                    Scan::Container
                }
                (Scan::Leading, b'}' | b']') => Scan::Done,
                (Scan::Leading, _) => Scan::Scalar,
                (Scan::Container, b'}' | b']') => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        Scan::Done
                    } else {
                        Scan::Container
                    }
                }
                (Scan::Container, _) => Scan::Container,
                (Scan::Scalar, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'+' | b'-' | b'.') => {
                    Scan::Scalar
                }
                (Scan::Scalar, _) => Scan::Done,
                (Scan::String, b'\\') => Scan::Escape,
                (Scan::String, b'"') if self.depth == 0 => Scan::Done,
                (Scan::String, b'"') => Scan::Container,
                (Scan::String | Scan::Escape, _) => Scan::String,
                (Scan::Done, _) => Scan::Done,
            };
        }
        self.state == Scan::Done
    }
}

/// Read from `reader` until one value is complete or cannot be decoded
///
/// Bytes after the value are left unread in the stream or discarded.
/// The buffer is parsed when the value ends, and otherwise only each time
/// it doubled, so malformed input is still noticed while the child runs.
///
/// # Errors
/// Returns error if reading fails. Undecodable input is the inner error.
pub(crate) async fn decode_result<R, S>(reader: &mut S) -> io::Result<Result<R, serde_json::Error>>
where
    R: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut scanner = ValueScanner::default();
    let mut parsed_len = 0;
    loop {
        buf.reserve(READ_CHUNK);
        let start = buf.len();
        let eof = reader.read_buf(&mut buf).await? == 0;
        let ended = scanner.feed(&buf[start..]);

        if !eof && !ended && buf.len() < parsed_len * 2 {
            continue;
        }
        parsed_len = buf.len();

        match try_decode(&buf, eof) {
            Decoded::Complete(value) => return Ok(Ok(value)),
            Decoded::Invalid(e) => return Ok(Err(e)),
            Decoded::Incomplete => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Reply {
        id: u32,
        name: String,
    }

    fn complete<R: DeserializeOwned>(buf: &str, eof: bool) -> Option<R> {
        match try_decode(buf.as_bytes(), eof) {
            Decoded::Complete(value) => Some(value),
            _ => None,
        }
    }

    #[test]
    fn test_string_complete_at_quote() {
        assert_eq!(complete::<String>("\"done\"", false).as_deref(), Some("done"));
        assert!(matches!(try_decode::<String>(b"\"do", false), Decoded::Incomplete));
    }

    #[test]
    fn test_number_waits_for_delimiter() {
        assert!(matches!(try_decode::<u32>(b"12", false), Decoded::Incomplete));
        assert_eq!(complete::<u32>("123\n", false), Some(123));
        assert_eq!(complete::<u32>("123", true), Some(123));
    }

    #[test]
    fn test_struct_in_pieces() {
        let text = "{\"id\": 7, \"name\": \"net\"}\n";
        for cut in 1..text.len() - 1 {
            assert!(
                matches!(try_decode::<Reply>(&text.as_bytes()[..cut], false), Decoded::Incomplete),
                "cut at {cut}"
            );
        }
        assert_eq!(
            complete::<Reply>(text, false),
            Some(Reply {
                id: 7,
                name: "net".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_type_is_invalid_early() {
        assert!(matches!(try_decode::<String>(b"42\n", false), Decoded::Invalid(_)));
        assert!(matches!(try_decode::<String>(b"nope", false), Decoded::Invalid(_)));
    }

    #[test]
    fn test_eof_without_value() {
        match try_decode::<String>(b"  \n", true) {
            Decoded::Invalid(e) => assert!(e.is_eof()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(try_decode::<String>(b"\"trunc", true), Decoded::Invalid(_)));
    }

    #[tokio::test]
    async fn test_decode_result_from_stream() {
        let mut reader: &[u8] = b"\"xxabcd\"\ntrailing output";
        let value: String = decode_result(&mut reader).await.unwrap().unwrap();
        assert_eq!(value, "xxabcd");
    }

    #[tokio::test]
    async fn test_decode_result_empty_stream() {
        let mut reader: &[u8] = b"";
        let err = decode_result::<String, _>(&mut reader).await.unwrap().unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_decode_result_across_reads() {
        let (mut writer, mut reader) = tokio::io::duplex(8);
        let feeder = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in ["{\"id\"", ": 1, \"na", "me\": \"pid\"", "}"] {
                writer.write_all(piece.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
            writer
        });

        let value: Reply = decode_result(&mut reader).await.unwrap().unwrap();
        assert_eq!(value.name, "pid");
        drop(feeder.await.unwrap());
    }

    fn ends_at(text: &str) -> Option<usize> {
        let mut scanner = ValueScanner::default();
        (1..=text.len()).find(|&i| scanner.feed(&text.as_bytes()[i - 1..i]))
    }

    #[test]
    fn test_scanner_value_ends() {
        assert_eq!(ends_at("  \"done\" more"), Some(8));
        assert_eq!(ends_at("[1, [2], {\"a\": 3}] more"), Some(18));
        assert_eq!(ends_at("123\n"), Some(4));
        assert_eq!(ends_at("123"), None);
        assert_eq!(ends_at("{\"a\": 1"), None);
    }

    #[test]
    fn test_scanner_skips_string_contents() {
        assert_eq!(ends_at(r#""say \"hi\"" tail"#), Some(12));
        assert_eq!(ends_at(r#"{"k": "]}\\"} tail"#), Some(13));
        assert_eq!(ends_at(r#"["[", "{"] tail"#), Some(10));
    }

    #[test]
    fn test_scanner_fed_in_pieces() {
        let mut scanner = ValueScanner::default();
        assert!(!scanner.feed(b"{\"name\": \"a\\"));
        assert!(!scanner.feed(b"\"}\""));
        assert!(scanner.feed(b"}\n"));
        assert!(scanner.feed(b"ignored"));
    }

    #[tokio::test]
    async fn test_decode_large_result() {
        let text = "0123456789abcdef".repeat(512 * 1024);
        let encoded = serde_json::to_vec(&text).unwrap();

        let (mut writer, mut reader) = tokio::io::duplex(64 * 1024);
        let feeder = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(&encoded).await.unwrap();
            writer
        });

        let value: String = decode_result(&mut reader).await.unwrap().unwrap();
        assert_eq!(value.len(), text.len());
        assert!(value == text);
        drop(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn test_decode_result_malformed_while_open() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, mut reader) = tokio::io::duplex(64);
        writer.write_all(b"{\"id\": nope").await.unwrap();

        // The writer stays open, the error shows anyway
        let err = decode_result::<Reply, _>(&mut reader).await.unwrap().unwrap_err();
        assert!(err.is_syntax());
        drop(writer);
    }
}
