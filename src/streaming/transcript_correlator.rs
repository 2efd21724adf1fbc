//! Prompt/response correlation
//!
//! Pairs the user's recognised prompt with the assistant's completed
//! response for display.
//!
//! # Correlation Strategy
//!
//! - **Prompt**: Stored in a single pending slot; every prompt overwrites it.
//!   An empty prompt leaves the slot empty
//! - **ResponseCompleted**: Paired with the pending prompt, which is consumed.
//!   With nothing pending the response is dropped
//!
//! The pair log is append-only and keeps true values. The display view blanks
//! a prompt that already appeared in an earlier pair, so a prompt that is
//! answered by several responses is shown once.

use std::collections::HashSet;

use super::protocol::{InboundText, ServerMessage};

/// Structured inbound event, as far as correlation is concerned
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Prompt(String),
    ResponseCompleted(String),
    Other(serde_json::Value),
}

impl From<InboundText> for TranscriptEvent {
    fn from(inbound: InboundText) -> Self {
        match inbound.message {
            ServerMessage::Prompt { prompt } => TranscriptEvent::Prompt(prompt.prompt),
            ServerMessage::ResponseCompleted { content } => {
                TranscriptEvent::ResponseCompleted(content)
            }
            _ => TranscriptEvent::Other(inbound.raw),
        }
    }
}

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptResponsePair {
    pub prompt: String,
    pub response: String,
}

/// Correlates prompts with completed responses
#[derive(Debug, Clone, Default)]
pub struct TranscriptCorrelator {
    pending_prompt: Option<String>,
    pairs: Vec<PromptResponsePair>,
    dropped_responses: u64,
}

impl TranscriptCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one structured event
    ///
    /// Returns the new pair when a response completes a pending prompt.
    pub fn on_event(&mut self, event: TranscriptEvent) -> Option<PromptResponsePair> {
        match event {
            TranscriptEvent::Prompt(text) => {
                if self.pending_prompt.is_some() {
                    log::debug!("TranscriptCorrelator: prompt replaced before a response");
                }
                self.pending_prompt = if text.is_empty() { None } else { Some(text) };
                None
            }
            TranscriptEvent::ResponseCompleted(response) => match self.pending_prompt.take() {
                Some(prompt) => {
                    let pair = PromptResponsePair { prompt, response };
                    self.pairs.push(pair.clone());
                    log::info!("TranscriptCorrelator: {} pairs", self.pairs.len());
                    Some(pair)
                }
                None => {
                    self.dropped_responses += 1;
                    log::debug!("TranscriptCorrelator: dropping response with no pending prompt");
                    None
                }
            },
            TranscriptEvent::Other(_) => None,
        }
    }

    /// The prompt waiting for a response, if any
    pub fn pending_prompt(&self) -> Option<&str> {
        self.pending_prompt.as_deref()
    }

    /// The full pair log with true values
    pub fn pairs(&self) -> &[PromptResponsePair] {
        &self.pairs
    }

    /// Display form of the pair at `index`: the prompt is blank when an
    /// earlier pair already showed it
    pub fn display_pair(&self, index: usize) -> Option<PromptResponsePair> {
        let pair = self.pairs.get(index)?;
        let seen = self.pairs[..index].iter().any(|p| p.prompt == pair.prompt);
        Some(PromptResponsePair {
            prompt: if seen {
                String::new()
            } else {
                pair.prompt.clone()
            },
            response: pair.response.clone(),
        })
    }

    /// Display view of the whole log
    pub fn display_pairs(&self) -> Vec<PromptResponsePair> {
        let mut seen = HashSet::new();
        self.pairs
            .iter()
            .map(|pair| PromptResponsePair {
                prompt: if seen.insert(pair.prompt.as_str()) {
                    pair.prompt.clone()
                } else {
                    String::new()
                },
                response: pair.response.clone(),
            })
            .collect()
    }

    /// Responses dropped because nothing was pending
    pub fn dropped_responses(&self) -> u64 {
        self.dropped_responses
    }

    /// Forget the pending prompt (session teardown). The pair log is kept.
    pub fn reset_pending(&mut self) {
        self.pending_prompt = None;
    }
}
