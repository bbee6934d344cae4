//! Frame sources: whitespace-delimited replay files and line-delimited live
//! streams.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Meaning of the reference value leading each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Samples since the reference event, used verbatim.
    #[default]
    SinceBoot,
    /// Samples since the previous frame's reference; accumulated.
    SincePrevious,
}

/// Resolves raw reference values to an absolute samples-since-boot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClock {
    mode: ReferenceMode,
    elapsed: i64,
}

impl ReferenceClock {
    pub fn new(mode: ReferenceMode) -> Self {
        Self { mode, elapsed: 0 }
    }

    pub fn resolve(&mut self, raw: i64) -> i64 {
        match self.mode {
            ReferenceMode::SinceBoot => raw,
            ReferenceMode::SincePrevious => {
                self.elapsed += raw;
                self.elapsed
            }
        }
    }
}

/// Errors while reading frames.
#[derive(Debug)]
pub enum StreamError {
    Io(std::io::Error),
    /// A value is not a non-negative integer of the expected width.
    InvalidValue {
        /// 1-based input line.
        line: usize,
        token: String,
    },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "read error: {}", e),
            Self::InvalidValue { line, token } => {
                write!(f, "line {}: invalid value {:?}", line, token)
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Parse a non-negative integral value no larger than `max`.
///
/// Integral floats such as `512.0` are accepted.
fn parse_count(token: &str, max: f64) -> Option<f64> {
    let v = match token.parse::<u64>() {
        Ok(v) => v as f64,
        Err(_) => token.parse::<f64>().ok()?,
    };
    (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= max).then_some(v)
}

fn parse_sample(token: &str, line: usize) -> Result<u16, StreamError> {
    parse_count(token, f64::from(u16::MAX))
        .map(|v| v as u16)
        .ok_or_else(|| StreamError::InvalidValue {
            line,
            token: token.to_string(),
        })
}

fn parse_reference(token: &str, line: usize) -> Result<i64, StreamError> {
    parse_count(token, i64::MAX as f64)
        .map(|v| v as i64)
        .ok_or_else(|| StreamError::InvalidValue {
            line,
            token: token.to_string(),
        })
}

/// Replay file: whitespace-delimited values consumed in batches of
/// `1 + n_samples` (reference, then samples), regardless of line breaks.
///
/// A trailing partial batch is dropped with a warning. An invalid value
/// discards the batch it belongs to.
pub struct ReplayReader<R> {
    input: R,
    n_samples: usize,
    clock: ReferenceClock,
    line_no: usize,
    /// Tokens of the current line not yet consumed.
    pending: std::vec::IntoIter<String>,
    done: bool,
}

impl<R: BufRead> ReplayReader<R> {
    pub fn new(input: R, n_samples: usize, mode: ReferenceMode) -> Self {
        Self {
            input,
            n_samples,
            clock: ReferenceClock::new(mode),
            line_no: 0,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }

    fn next_token(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            if let Some(t) = self.pending.next() {
                return Ok(Some(t));
            }
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            self.pending = line
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter();
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        let Some(first) = self.next_token()? else {
            return Ok(None);
        };
        let mut first_error = None;
        let reference = match parse_reference(&first, self.line_no) {
            Ok(r) => r,
            Err(e) => {
                first_error = Some(e);
                0
            }
        };
        let mut samples = Vec::with_capacity(self.n_samples);
        while samples.len() < self.n_samples {
            let Some(token) = self.next_token()? else {
                tracing::warn!(
                    "replay ended inside a frame: {} of {} samples, dropped",
                    samples.len(),
                    self.n_samples
                );
                return Ok(None);
            };
            match parse_sample(&token, self.line_no) {
                Ok(v) => samples.push(v),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    // Keep the batch aligned.
                    samples.push(0);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(Some(Frame::new(self.clock.resolve(reference), samples)))
    }
}

impl<R: BufRead> Iterator for ReplayReader<R> {
    type Item = Result<Frame, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(StreamError::Io(e)) => {
                self.done = true;
                Some(Err(StreamError::Io(e)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Live stream: one frame per line, reference then samples, separated by
/// whitespace or commas.
///
/// The sample count is not checked here; a short or long line still yields a
/// frame so the consumer can report it and resynchronize on the next line.
pub struct LiveReader<R> {
    input: R,
    clock: ReferenceClock,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> LiveReader<R> {
    pub fn new(input: R, mode: ReferenceMode) -> Self {
        Self {
            input,
            clock: ReferenceClock::new(mode),
            line_no: 0,
            done: false,
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<Frame, StreamError> {
        let mut tokens = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty());
        let first = tokens.next().unwrap_or_default();
        let reference = parse_reference(first, self.line_no)?;
        let samples = tokens
            .map(|t| parse_sample(t, self.line_no))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame::new(self.clock.resolve(reference), samples))
    }
}

impl<R: BufRead> Iterator for LiveReader<R> {
    type Item = Result<Frame, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(self.parse_line(&line));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(text: &str, n: usize, mode: ReferenceMode) -> Vec<Result<Frame, StreamError>> {
        ReplayReader::new(text.as_bytes(), n, mode).collect()
    }

    #[test]
    fn replay_batches_ignore_line_breaks() {
        let frames: Vec<Frame> = replay("10 1 2\n3 20\n4 5 6\n", 3, ReferenceMode::SinceBoot)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            frames,
            vec![Frame::new(10, vec![1, 2, 3]), Frame::new(20, vec![4, 5, 6])]
        );
    }

    #[test]
    fn replay_drops_partial_batch() {
        let frames = replay("10 1 2 3\n20 4", 3, ReferenceMode::SinceBoot);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().samples, vec![1, 2, 3]);
    }

    #[test]
    fn replay_invalid_value_discards_batch() {
        let frames = replay("10 1 -2 3\n20 4 5 6\n", 3, ReferenceMode::SinceBoot);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(StreamError::InvalidValue { .. })));
        assert_eq!(frames[1].as_ref().unwrap(), &Frame::new(20, vec![4, 5, 6]));
    }

    #[test]
    fn replay_accumulates_since_previous() {
        let frames: Vec<i64> = replay("100 1 200 2 50 3", 1, ReferenceMode::SincePrevious)
            .into_iter()
            .map(|f| f.unwrap().samples_since_boot)
            .collect();
        assert_eq!(frames, vec![100, 300, 350]);
    }

    #[test]
    fn live_lines_resynchronize() {
        let text = "5, 1, 2, 3\n\n6 1 2\n7 4 5 6.0\n";
        let frames: Vec<Frame> = LiveReader::new(text.as_bytes(), ReferenceMode::SinceBoot)
            .map(Result::unwrap)
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::new(5, vec![1, 2, 3]));
        // Short line still yields a frame for the tracker to reject.
        assert_eq!(frames[1].len(), 2);
        assert_eq!(frames[2], Frame::new(7, vec![4, 5, 6]));
    }

    #[test]
    fn live_rejects_out_of_range_sample() {
        let text = "5 1 70000 3\n6 1 2 3\n";
        let out: Vec<_> = LiveReader::new(text.as_bytes(), ReferenceMode::SinceBoot).collect();
        assert!(matches!(
            &out[0],
            Err(StreamError::InvalidValue { line: 1, token }) if token == "70000"
        ));
        assert_eq!(out[1].as_ref().unwrap(), &Frame::new(6, vec![1, 2, 3]));
    }
}
