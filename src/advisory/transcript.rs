use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Analysis;
use crate::error::AdvisoryError;

pub const ASSISTANT: &str = "AI Assistant";
pub const CALLER: &str = "You";

const THINKING: &str = "Analyzing your image...\nThis may take a few moments.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    pub is_from_caller: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn from_caller(text: impl Into<String>) -> Self {
        Self::new(CALLER, text, true)
    }

    pub fn from_assistant(text: impl Into<String>) -> Self {
        Self::new(ASSISTANT, text, false)
    }

    fn new(sender: &str, text: impl Into<String>, is_from_caller: bool) -> Self {
        Self {
            sender: sender.to_owned(),
            text: text.into(),
            is_from_caller,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation. The only entry ever removed is the transient
/// "thinking" placeholder, and it is removed before the answer is appended.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<ChatEntry>,
    /// Index of the placeholder while an analysis is in flight.
    #[serde(skip)]
    thinking: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript opened with the assistant's greeting.
    pub fn with_greeting() -> Self {
        let mut t = Self::new();
        t.push(ChatEntry::from_assistant(
            "Hello! Send me a photo of your growing area and I'll analyze it.",
        ));
        t
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking.is_some()
    }

    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    /// Record the caller's photo and show the placeholder. Ignored while a
    /// previous analysis is still in flight.
    pub fn begin_analysis(&mut self) -> bool {
        if self.thinking.is_some() {
            return false;
        }
        self.push(ChatEntry::from_caller("Image sent for analysis"));
        self.thinking = Some(self.entries.len());
        self.push(ChatEntry::from_assistant(THINKING));
        true
    }

    /// Replace the placeholder with the outcome.
    pub fn finish_analysis(&mut self, result: &Result<Analysis, AdvisoryError>) {
        if let Some(index) = self.thinking.take() {
            if index < self.entries.len() {
                self.entries.remove(index);
            }
        }

        let text = match result {
            Ok(analysis) if analysis.is_placeholder => analysis.text.clone(),
            Ok(analysis) => format!("Analysis Complete!\n\n{}", analysis.text),
            Err(e) => format!("Analysis failed: {}", e.user_message()),
        };
        self.push(ChatEntry::from_assistant(text));
    }
}
