//! Delta stream decoder.
//!
//! Turns the line-oriented event stream of a chat-completions endpoint into
//! ordered text fragments:
//! - blank lines and lines without the `data: ` prefix are skipped
//! - `data: [DONE]` ends the sequence
//! - `choices[0].delta.content` is emitted when present and non-empty
//! - a payload that fails to parse is logged and dropped; the stream goes on

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use quill_core::errors::CompletionError;
use quill_core::stream::StreamFragment;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_TOKEN: &str = "[DONE]";

/// What a single line contributes to the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Skip,
    Fragment(String),
    Done,
    Malformed(CompletionError),
}

/// Classify one raw line. Pure; never fails.
pub fn decode_line(line: &str) -> LineOutcome {
    if line.trim().is_empty() {
        return LineOutcome::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_TOKEN {
        return LineOutcome::Done;
    }

    let chunk: ChunkPayload = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => return LineOutcome::Malformed(CompletionError::ChunkParse(e.to_string())),
    };

    // Role-only and finish chunks carry no content; they are not failures.
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
    {
        Some(content) if !content.is_empty() => LineOutcome::Fragment(content),
        _ => LineOutcome::Skip,
    }
}

/// Per-stream decode state: the done flag plus counters for logging.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    done: bool,
    emitted: usize,
    malformed: usize,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the fragment it produced, if any.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if self.done {
            return None;
        }
        match decode_line(line) {
            LineOutcome::Fragment(text) => {
                self.emitted += 1;
                Some(text)
            }
            LineOutcome::Done => {
                self.done = true;
                debug!(fragments = self.emitted, malformed = self.malformed, "stream terminator received");
                None
            }
            LineOutcome::Malformed(error) => {
                self.malformed += 1;
                warn!(
                    error = %error,
                    line_preview = preview(line),
                    "dropping malformed stream chunk"
                );
                None
            }
            LineOutcome::Skip => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

/// Decode an async line source into a lazy fragment stream.
///
/// A line-source error before any fragment was emitted becomes a single
/// [`StreamFragment::Error`]; after that it just ends the stream. Dropping the
/// returned stream drops `lines` and whatever transport handle it owns.
pub fn decode_stream<S>(lines: S) -> impl Stream<Item = StreamFragment> + Send
where
    S: Stream<Item = Result<String, CompletionError>> + Send + Unpin,
{
    futures::stream::unfold(
        (lines, DeltaDecoder::new(), false),
        |(mut lines, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if decoder.is_done() {
                    return None;
                }
                match lines.next().await {
                    Some(Ok(line)) => {
                        if let Some(text) = decoder.push_line(&line) {
                            return Some((StreamFragment::Text(text), (lines, decoder, false)));
                        }
                    }
                    Some(Err(error)) => {
                        if decoder.emitted() == 0 {
                            warn!(error = %error, "stream failed before any data");
                            return Some((StreamFragment::Error(error), (lines, decoder, true)));
                        }
                        warn!(error = %error, fragments = decoder.emitted(), "stream interrupted");
                        return None;
                    }
                    None => return None,
                }
            }
        },
    )
}

/// Blocking counterpart of [`decode_stream`] for already-available lines.
pub fn decode_lines<I>(lines: I) -> DecodeIter<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    DecodeIter {
        lines: lines.into_iter(),
        decoder: DeltaDecoder::new(),
    }
}

pub struct DecodeIter<I> {
    lines: I,
    decoder: DeltaDecoder,
}

impl<I> Iterator for DecodeIter<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.decoder.is_done() {
            let line = self.lines.next()?;
            if let Some(text) = self.decoder.push_line(line.as_ref()) {
                return Some(text);
            }
        }
        None
    }
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(100) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

// --- Deserialization types for streamed chunks ---

#[derive(Deserialize)]
struct ChunkPayload {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
