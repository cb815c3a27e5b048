// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-thread assembly in `ChatML` format.
//!
//! Attention attribution needs the exact prompt the model saw. [`ChatThread`]
//! builds one from a system prompt, the retrieved documents, the user query
//! and the assistant answer, keeping every piece verbatim so it can be
//! located again in the thread's tokens.
//!
//! ```
//! use candle_attrib::ChatThread;
//!
//! let thread = ChatThread::new("Capital of France?", "Paris.")
//!     .with_system("Answer from the documents.")
//!     .with_document("Paris is the capital of France.");
//! let text = thread.render();
//! assert!(text.starts_with("<|im_start|>system\n"));
//! assert!(text.contains("Paris is the capital of France."));
//! assert!(text.ends_with("<|im_start|>assistant\nParis.<|im_end|>\n"));
//! ```

/// Opening marker of a `ChatML` turn.
const IM_START: &str = "<|im_start|>";
/// Closing marker of a `ChatML` turn.
const IM_END: &str = "<|im_end|>";
/// Separator between blocks inside the system turn.
const BLOCK_SEPARATOR: &str = "\n\n";

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    /// Role: `"system"`, `"user"` or `"assistant"`.
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an arbitrary role.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A retrieval-augmented exchange: documents, query and answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatThread {
    /// Instructions placed before the documents in the system turn.
    system: Option<String>,
    /// Retrieved documents, in retrieval order.
    documents: Vec<String>,
    /// The user's question.
    query: String,
    /// The model's answer.
    answer: String,
}

impl ChatThread {
    /// Start a thread from the query and the answer.
    #[must_use]
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            system: None,
            documents: Vec::new(),
            query: query.into(),
            answer: answer.into(),
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Append one document.
    #[must_use]
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.documents.push(document.into());
        self
    }

    /// Append several documents, preserving their order.
    #[must_use]
    pub fn with_documents<I, D>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.documents.extend(documents.into_iter().map(Into::into));
        self
    }

    /// The retrieved documents.
    #[must_use]
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    /// The user query.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The assistant answer.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// The thread as turns. The system turn is omitted when there is
    /// neither a system prompt nor any document.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(3);

        let blocks: Vec<&str> = self
            .system
            .iter()
            .map(String::as_str)
            .chain(self.documents.iter().map(String::as_str))
            .collect();
        if !blocks.is_empty() {
            messages.push(ChatMessage::new("system", blocks.join(BLOCK_SEPARATOR)));
        }

        messages.push(ChatMessage::new("user", self.query.clone()));
        messages.push(ChatMessage::new("assistant", self.answer.clone()));
        messages
    }

    /// Render the full thread: `<|im_start|>{role}\n{content}<|im_end|>\n`
    /// per turn, ending with the completed assistant turn.
    #[must_use]
    pub fn render(&self) -> String {
        self.messages()
            .iter()
            .map(|msg| format!("{IM_START}{}\n{}{IM_END}\n", msg.role, msg.content))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
