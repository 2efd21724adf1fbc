//! Inbound message log
//!
//! Every inbound message is appended here for inspection: structured
//! messages verbatim, binary audio frames as a short byte preview.

use chrono::{DateTime, Utc};

/// Number of leading bytes shown for a binary frame
pub const BINARY_PREVIEW_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum LogBody {
    /// A JSON message as received
    Structured(String),
    /// An audio frame, reduced to its length and first bytes
    Binary { len: usize, preview: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub received_at: DateTime<Utc>,
    pub body: LogBody,
}

impl LogEntry {
    pub fn structured(text: &str) -> Self {
        Self {
            received_at: Utc::now(),
            body: LogBody::Structured(text.to_string()),
        }
    }

    pub fn binary(bytes: &[u8]) -> Self {
        let end = bytes.len().min(BINARY_PREVIEW_BYTES);
        Self {
            received_at: Utc::now(),
            body: LogBody::Binary {
                len: bytes.len(),
                preview: bytes[..end].to_vec(),
            },
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.body, LogBody::Binary { .. })
    }
}

impl std::fmt::Display for LogBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogBody::Structured(text) => write!(f, "{}", text),
            LogBody::Binary { preview, .. } => {
                let bytes: Vec<String> = preview.iter().map(|b| b.to_string()).collect();
                write!(f, "[Binary message received] First bytes: {}", bytes.join(", "))
            }
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.received_at.format("%H:%M:%S%.3f"), self.body)
    }
}

/// Append-only log of inbound messages, cleared only on request
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) -> &LogEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        log::debug!("MessageLog: cleared {} entries", self.entries.len());
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_preview_format() {
        let entry = LogEntry::binary(&[0, 1, 255, 16]);
        assert_eq!(
            entry.body.to_string(),
            "[Binary message received] First bytes: 0, 1, 255, 16"
        );
        assert!(entry.is_binary());
    }

    #[test]
    fn test_binary_preview_truncated_to_16_bytes() {
        let bytes: Vec<u8> = (0..100).collect();
        let entry = LogEntry::binary(&bytes);
        match &entry.body {
            LogBody::Binary { len, preview } => {
                assert_eq!(*len, 100);
                assert_eq!(preview.len(), BINARY_PREVIEW_BYTES);
                assert_eq!(preview[15], 15);
            }
            other => panic!("Expected binary entry, got {:?}", other),
        }
    }

    #[test]
    fn test_structured_entry_is_verbatim() {
        let entry = LogEntry::structured(r#"{"message":"Info"}"#);
        assert_eq!(entry.body.to_string(), r#"{"message":"Info"}"#);
        assert!(entry.to_string().ends_with(r#"{"message":"Info"}"#));
    }

    #[test]
    fn test_log_append_and_clear() {
        let mut log = MessageLog::new();
        log.push(LogEntry::structured("{}"));
        log.push(LogEntry::binary(&[1, 2]));
        assert_eq!(log.len(), 2);
        assert!(log.entries()[1].is_binary());

        log.clear();
        assert!(log.is_empty());
    }
}
