//! Splits a chunked HTTP body into text lines.

use std::fmt::Display;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::warn;

use quill_core::errors::CompletionError;

/// Longest line accepted before the stream is abandoned.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Yield complete lines from a byte stream, `\n` or `\r\n` terminated.
///
/// A chunk read error or `idle_timeout` of silence yields one
/// [`CompletionError::Transport`] and ends the stream. A trailing line without
/// a newline is yielded when the body ends. Lines that are not valid UTF-8
/// are skipped. A line longer than 1 MiB ends the stream with a
/// [`CompletionError::Transport`].
pub fn byte_lines<S, E>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<String, CompletionError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Display + Send,
{
    split_lines(byte_stream, idle_timeout, MAX_LINE_BYTES)
}

fn split_lines<S, E>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
    max_line: usize,
) -> impl Stream<Item = Result<String, CompletionError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Display + Send,
{
    // `scanned` bytes at the front of the buffer are known to hold no newline.
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), 0usize, false),
        move |(mut stream, mut buffer, mut scanned, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(offset) = buffer[scanned..].iter().position(|&b| b == b'\n') {
                    let newline_pos = scanned + offset;
                    scanned = 0;
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }
                    match std::str::from_utf8(&line_bytes) {
                        Ok(line) => {
                            return Some((Ok(line.to_string()), (stream, buffer, scanned, false)));
                        }
                        Err(_) => {
                            warn!(len = line_bytes.len(), "skipping non-UTF-8 stream line");
                            continue;
                        }
                    }
                }

                scanned = buffer.len();
                if scanned > max_line {
                    let error = CompletionError::Transport(format!("stream line exceeds {max_line} bytes"));
                    return Some((Err(error), (stream, buffer, scanned, true)));
                }

                let next = match idle_timeout {
                    Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            let error = CompletionError::Transport(format!(
                                "idle timeout after {}s",
                                limit.as_secs()
                            ));
                            return Some((Err(error), (stream, buffer, scanned, true)));
                        }
                    },
                    None => stream.next().await,
                };

                match next {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let error = CompletionError::Transport(e.to_string());
                        return Some((Err(error), (stream, buffer, scanned, true)));
                    }
                    None => {
                        if buffer.is_empty() {
                            return None;
                        }
                        let rest = buffer.split();
                        return match std::str::from_utf8(&rest) {
                            Ok(line) => Some((Ok(line.to_string()), (stream, buffer, scanned, true))),
                            Err(_) => None,
                        };
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    type Chunk = Result<Bytes, std::io::Error>;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Chunk> + Send + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<Chunk>>(),
        )
    }

    async fn collect_lines(parts: &[&'static str]) -> Vec<Result<String, CompletionError>> {
        byte_lines(chunks(parts), None).collect().await
    }

    #[tokio::test]
    async fn splits_lines_across_chunks() {
        let lines = collect_lines(&["data: a\nda", "ta: b\n\ndata: ", "c\n"]).await;
        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["data: a", "data: b", "", "data: c"]);
    }

    #[tokio::test]
    async fn strips_carriage_returns() {
        let lines = collect_lines(&["data: a\r\n\r\n"]).await;
        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["data: a", ""]);
    }

    #[tokio::test]
    async fn yields_trailing_partial_line() {
        let lines = collect_lines(&["data: a\ndata: [DONE]"]).await;
        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["data: a", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks() {
        let bytes = "data: café\n".as_bytes();
        let (head, tail) = bytes.split_at(10);
        let source = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ]);
        let lines: Vec<_> = byte_lines(source, None).collect().await;
        assert_eq!(lines, vec![Ok("data: café".to_string())]);
    }

    #[tokio::test]
    async fn overlong_line_ends_stream() {
        let source = chunks(&["data: ok\n", "0123456789", "0123456789", "\n"]);
        let lines: Vec<_> = split_lines(source, None, 16).collect().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], Ok("data: ok".to_string()));
        assert!(matches!(&lines[1], Err(CompletionError::Transport(msg)) if msg.contains("exceeds 16 bytes")));
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let source = chunks(&["0123456789", "01234\n"]);
        let lines: Vec<_> = split_lines(source, None, 16).collect().await;
        assert_eq!(lines, vec![Ok("012345678901234".to_string())]);
    }

    #[tokio::test]
    async fn read_error_becomes_transport_error() {
        let source = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"data: b\n")),
        ]);
        let lines: Vec<_> = byte_lines(source, None).collect().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], Ok("data: a".to_string()));
        assert!(matches!(&lines[1], Err(CompletionError::Transport(msg)) if msg.contains("reset")));
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();
        let source = futures::stream::pending::<Chunk>();
        let mut lines = Box::pin(byte_lines(source, Some(Duration::from_secs(5))));

        let next = lines.next().await;
        assert!(
            matches!(&next, Some(Err(CompletionError::Transport(msg))) if msg.contains("idle timeout")),
            "expected idle timeout, got: {next:?}"
        );
        assert!(lines.next().await.is_none());
    }
}
