//! Transcript reconciliation for host text surfaces.
//!
//! Two host shapes exist: free-text editors with a cursor (the keyboard
//! case), driven through composing-text primitives, and chat-style hosts
//! that only ever append. Both maintain the invariant that at most one
//! provisional region is visible at a time.

use crate::session::controller::SessionEvent;

/// Host text-insertion surface (platform input connection, DOM control).
/// Consumed, never implemented, by the core.
pub trait TextHost {
    /// Insert committed text at the cursor; `cursor_offset` of 1 places the
    /// cursor after the inserted text, Android-style.
    fn commit_text(&mut self, text: &str, cursor_offset: i32);
    /// Replace the current composing (provisional) region.
    fn set_composing_text(&mut self, text: &str);
    /// Accept the current composing region as ordinary text.
    fn finish_composing_text(&mut self);
    /// Delete `before` characters ahead of the cursor and `after` characters
    /// behind it. Counts are characters, not bytes.
    fn delete_surrounding_text(&mut self, before: usize, after: usize);
}

/// Reconciler for cursor-aware hosts.
///
/// Final text is inserted at the host cursor; provisional text rides in the
/// composing region. The host must reflect the advanced cursor before the
/// next insertion, so all writes go through the host immediately rather
/// than being batched.
pub struct CursorReconciler<H: TextHost> {
    host: H,
}

impl<H: TextHost> CursorReconciler<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn on_final_words(&mut self, text: &str) {
        self.host.commit_text(text, 1);
    }

    pub fn on_provisional_words(&mut self, text: &str) {
        self.host.set_composing_text(text);
    }

    /// Graceful stop: accept any outstanding provisional text and add the
    /// separator so the next utterance does not merge with this one.
    pub fn finalize(&mut self) {
        self.host.finish_composing_text();
        self.host.commit_text(" ", 1);
    }

    /// Error teardown: drop the provisional region without a separator.
    pub fn abort(&mut self) {
        self.host.set_composing_text("");
        self.host.finish_composing_text();
    }

    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::FinalWords(text) => self.on_final_words(text),
            SessionEvent::ProvisionalWords(text) => self.on_provisional_words(text),
            SessionEvent::Finalized => self.finalize(),
            SessionEvent::Error(_) => self.abort(),
            _ => {}
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

/// Append-only transcript for chat-style hosts: accumulated final text plus
/// a single provisional suffix.
#[derive(Debug, Default, Clone)]
pub struct AppendTranscript {
    committed: String,
    provisional: String,
}

impl AppendTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_final_words(&mut self, text: &str) {
        self.committed.push_str(text);
    }

    pub fn on_provisional_words(&mut self, text: &str) {
        self.provisional = text.to_string();
    }

    /// Graceful stop: promote the provisional suffix and append the
    /// utterance separator.
    pub fn finalize(&mut self) {
        if !self.provisional.is_empty() {
            self.committed.push_str(&self.provisional);
            self.provisional.clear();
        }
        if !self.committed.is_empty() && !self.committed.ends_with(' ') {
            self.committed.push(' ');
        }
    }

    pub fn abort(&mut self) {
        self.provisional.clear();
    }

    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::FinalWords(text) => self.on_final_words(text),
            SessionEvent::ProvisionalWords(text) => self.on_provisional_words(text),
            SessionEvent::Finalized => self.finalize(),
            SessionEvent::Error(_) => self.abort(),
            _ => {}
        }
    }

    pub fn committed(&self) -> &str {
        &self.committed
    }

    pub fn provisional(&self) -> &str {
        &self.provisional
    }

    /// The transcript as currently displayable: committed text followed by
    /// the provisional tail.
    pub fn display(&self) -> String {
        format!("{}{}", self.committed, self.provisional)
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.provisional.clear();
    }
}

/// In-memory `TextHost` over a string and cursor. Used by tests and by
/// hosts that buffer text themselves before flushing to a real surface.
#[derive(Debug, Default, Clone)]
pub struct BufferHost {
    text: String,
    cursor: usize,
    composing: String,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str, cursor: usize) -> Self {
        let mut cursor = cursor.min(text.len());
        while !text.is_char_boundary(cursor) {
            cursor -= 1;
        }
        Self {
            text: text.to_string(),
            cursor,
            composing: String::new(),
        }
    }

    /// Committed text only, excluding the composing region.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn composing(&self) -> &str {
        &self.composing
    }

    /// What the user would see: committed text with the composing region
    /// rendered at the cursor.
    pub fn display(&self) -> String {
        let mut out = String::with_capacity(self.text.len() + self.composing.len());
        out.push_str(&self.text[..self.cursor]);
        out.push_str(&self.composing);
        out.push_str(&self.text[self.cursor..]);
        out
    }
}

impl TextHost for BufferHost {
    fn commit_text(&mut self, text: &str, cursor_offset: i32) {
        self.text.insert_str(self.cursor, text);
        if cursor_offset > 0 {
            self.cursor += text.len();
        }
    }

    fn set_composing_text(&mut self, text: &str) {
        self.composing = text.to_string();
    }

    fn finish_composing_text(&mut self) {
        if !self.composing.is_empty() {
            let composing = std::mem::take(&mut self.composing);
            self.commit_text(&composing, 1);
        }
    }

    fn delete_surrounding_text(&mut self, before: usize, after: usize) {
        // Counts are characters; walk char boundaries so multi-byte text
        // never splits mid-character.
        let start = self.text[..self.cursor]
            .char_indices()
            .rev()
            .take(before)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(self.cursor);
        self.text.replace_range(start..self.cursor, "");
        self.cursor = start;

        let end = self.text[self.cursor..]
            .char_indices()
            .nth(after)
            .map(|(i, _)| self.cursor + i)
            .unwrap_or(self.text.len());
        self.text.replace_range(self.cursor..end, "");
    }
}
