//! Line codec for the model command stream
//!
//! Model output is line oriented:
//! ```text
//! [COMMANDS id=<positive integer>]
//! >NAME arg arg ...
//! ```
//! Everything else is free text. Results travel back to the model as:
//! ```text
//! [EXEC_RESULT id=<batch id>]
//! STATUS: OK|INTERRUPTED|FAILED|IGNORED
//! REASON: <omitted when NONE>
//! ```

use regex::Regex;
use std::str::FromStr;
use thiserror::Error;

use crate::{BatchId, BatchReason, BatchResult, BatchStatus, CommandSpec};

/// Prefix that marks a command line
pub const COMMAND_PREFIX: char = '>';

const HEADER_PATTERN: &str = r"(?i)^\[COMMANDS\s+id\s*=\s*([^\]]*?)\s*\]";
const RESULT_PATTERN: &str = r"^\[EXEC_RESULT\s+id=(\d+)\]$";

/// Errors that can occur while encoding/decoding protocol lines
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid batch id: {0:?}")]
    InvalidBatchId(String),

    #[error("Unknown status: {0:?}")]
    UnknownStatus(String),

    #[error("Unknown reason: {0:?}")]
    UnknownReason(String),

    #[error("Malformed result message: {0}")]
    MalformedResult(&'static str),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Classification of one complete, trimmed line
#[derive(Debug)]
pub enum Line<'a> {
    /// Empty after trimming
    Blank,
    /// `[COMMANDS id=..]`; the id failed to parse if `Err`
    Header(Result<BatchId, CodecError>),
    /// `>NAME args...`
    Command(CommandSpec),
    /// Anything else, including a bare `>`
    Text(&'a str),
}

/// Recognizes batch headers and command lines
#[derive(Debug, Clone)]
pub struct LineClassifier {
    header: Regex,
}

impl LineClassifier {
    /// Create a classifier with the compiled header pattern
    pub fn new() -> Result<Self, CodecError> {
        Ok(Self {
            header: Regex::new(HEADER_PATTERN)?,
        })
    }

    /// Classify a raw line; surrounding whitespace is ignored
    pub fn classify<'a>(&self, raw: &'a str) -> Line<'a> {
        let line = raw.trim();
        if line.is_empty() {
            return Line::Blank;
        }

        if let Some(captures) = self.header.captures(line) {
            let id = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Line::Header(parse_batch_id(id));
        }

        if let Some(rest) = line.strip_prefix(COMMAND_PREFIX) {
            let mut tokens = rest.split_whitespace();
            if let Some(name) = tokens.next() {
                let args = tokens.map(str::to_string).collect();
                return Line::Command(CommandSpec::new(name, args));
            }
        }

        Line::Text(line)
    }
}

/// Parse a batch id; ids are positive integers
pub fn parse_batch_id(text: &str) -> Result<BatchId, CodecError> {
    match text.parse::<BatchId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(CodecError::InvalidBatchId(text.to_string())),
    }
}

/// Reassembles arbitrarily chunked text into complete lines
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Text after the last newline seen so far
    buffer: String,
}

impl LineAssembler {
    /// Create a new line assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of text
    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Take the next complete line (without its newline)
    ///
    /// Call this repeatedly until it returns `None` to drain all complete lines
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.find('\n')?;
        let mut line: String = self.buffer.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    /// Take whatever partial line is still buffered
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encode a batch result as the message sent to the model
pub fn encode_result(result: &BatchResult) -> String {
    let mut message = format!(
        "[EXEC_RESULT id={}]\nSTATUS: {}",
        result.batch_id, result.status
    );
    if result.reason != BatchReason::None {
        message.push_str("\nREASON: ");
        message.push_str(result.reason.as_str());
    }
    message
}

/// Decodes messages produced by [`encode_result`]
#[derive(Debug, Clone)]
pub struct ResultDecoder {
    header: Regex,
}

impl ResultDecoder {
    /// Create a decoder with the compiled result header pattern
    pub fn new() -> Result<Self, CodecError> {
        Ok(Self {
            header: Regex::new(RESULT_PATTERN)?,
        })
    }

    pub fn decode(&self, message: &str) -> Result<BatchResult, CodecError> {
        let mut lines = message.lines().map(str::trim).filter(|l| !l.is_empty());

        let first = lines
            .next()
            .ok_or(CodecError::MalformedResult("empty message"))?;
        let captures = self
            .header
            .captures(first)
            .ok_or(CodecError::MalformedResult("missing EXEC_RESULT header"))?;
        let batch_id = parse_batch_id(&captures[1])?;

        let status = lines
            .next()
            .and_then(|l| l.strip_prefix("STATUS:"))
            .ok_or(CodecError::MalformedResult("missing STATUS line"))?
            .trim()
            .parse()?;

        let reason = match lines.next() {
            Some(line) => line
                .strip_prefix("REASON:")
                .ok_or(CodecError::MalformedResult("expected REASON line"))?
                .trim()
                .parse()?,
            None => BatchReason::None,
        };

        Ok(BatchResult {
            batch_id,
            status,
            reason,
        })
    }
}

impl FromStr for BatchStatus {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(BatchStatus::Ok),
            "INTERRUPTED" => Ok(BatchStatus::Interrupted),
            "FAILED" => Ok(BatchStatus::Failed),
            "IGNORED" => Ok(BatchStatus::Ignored),
            other => Err(CodecError::UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for BatchReason {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(BatchReason::None),
            "OBSTACLE" => Ok(BatchReason::Obstacle),
            "USER_STOP" => Ok(BatchReason::UserStop),
            "SAFETY" => Ok(BatchReason::Safety),
            "PARSE_ERROR" => Ok(BatchReason::ParseError),
            "INTERNAL_ERROR" => Ok(BatchReason::InternalError),
            other => Err(CodecError::UnknownReason(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> LineClassifier {
        LineClassifier::new().unwrap()
    }

    #[test]
    fn test_assembler_keeps_partial_line() {
        let mut lines = LineAssembler::new();

        lines.push("[COMMANDS id=");
        assert!(lines.next_line().is_none());

        lines.push("7]\n>FORW");
        assert_eq!(lines.next_line().as_deref(), Some("[COMMANDS id=7]"));
        assert!(lines.next_line().is_none());
        assert_eq!(lines.buffer_len(), 5);

        lines.push("ARD 50\n\n");
        assert_eq!(lines.next_line().as_deref(), Some(">FORWARD 50"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert!(lines.next_line().is_none());
        assert!(lines.take_remainder().is_none());
    }

    #[test]
    fn test_assembler_remainder() {
        let mut lines = LineAssembler::new();
        lines.push(">CAMERA 0 30");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.take_remainder().as_deref(), Some(">CAMERA 0 30"));
        assert_eq!(lines.buffer_len(), 0);
    }

    #[test]
    fn test_header_lines() {
        let c = classifier();

        assert!(matches!(c.classify("[COMMANDS id=7]"), Line::Header(Ok(7))));
        assert!(matches!(c.classify("  [commands id=12]\r"), Line::Header(Ok(12))));
        assert!(matches!(c.classify("[COMMANDS id=3] go"), Line::Header(Ok(3))));
        assert!(matches!(c.classify("[COMMANDS id=abc]"), Line::Header(Err(_))));
        assert!(matches!(c.classify("[COMMANDS id=0]"), Line::Header(Err(_))));
        assert!(matches!(c.classify("[COMMANDS id=-4]"), Line::Header(Err(_))));
        assert!(matches!(c.classify("see [COMMANDS id=4]"), Line::Text(_)));
    }

    #[test]
    fn test_command_lines() {
        let c = classifier();

        match c.classify(">camera  -30   10 ") {
            Line::Command(spec) => {
                assert_eq!(spec.name, "CAMERA");
                assert_eq!(spec.args, vec!["-30", "10"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(c.classify(">"), Line::Text(">")));
        assert!(matches!(c.classify("   "), Line::Blank));
        assert!(matches!(c.classify("Hello there!"), Line::Text("Hello there!")));
    }

    #[test]
    fn test_encode_result() {
        let ok = BatchResult::ok(7);
        assert_eq!(encode_result(&ok), "[EXEC_RESULT id=7]\nSTATUS: OK");

        let failed = BatchResult {
            batch_id: 5,
            status: BatchStatus::Failed,
            reason: BatchReason::ParseError,
        };
        assert_eq!(
            encode_result(&failed),
            "[EXEC_RESULT id=5]\nSTATUS: FAILED\nREASON: PARSE_ERROR"
        );
    }

    #[test]
    fn test_decode_result() {
        let decoder = ResultDecoder::new().unwrap();
        let result = decoder
            .decode("[EXEC_RESULT id=9]\nSTATUS: INTERRUPTED\nREASON: OBSTACLE\n")
            .unwrap();
        assert_eq!(result.batch_id, 9);
        assert_eq!(result.status, BatchStatus::Interrupted);
        assert_eq!(result.reason, BatchReason::Obstacle);

        assert!(matches!(
            decoder.decode("[EXEC_RESULT id=9]\nSTATUS: DONE"),
            Err(CodecError::UnknownStatus(_))
        ));
        assert!(matches!(
            decoder.decode("STATUS: OK"),
            Err(CodecError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_decoder_is_reusable() {
        let decoder = ResultDecoder::new().unwrap();
        for id in 1..=3 {
            let message = encode_result(&BatchResult::ok(id));
            assert_eq!(decoder.decode(&message).unwrap(), BatchResult::ok(id));
        }
        assert!(matches!(
            decoder.decode("[EXEC_RESULT id=0]\nSTATUS: OK"),
            Err(CodecError::InvalidBatchId(_))
        ));
    }
}
