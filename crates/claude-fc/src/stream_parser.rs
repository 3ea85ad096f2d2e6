use crate::markup::{self, FUNCTION_CALLS_CLOSE, FUNCTION_CALLS_OPEN, INVOKE_CLOSE, INVOKE_OPEN};
use crate::models::tool::ToolCall;

/// Opening of an invocation as it shows up mid-stream, before the `>` arrives
const INVOKE_PREFIX: &str = "<invoke";
/// The token models emit when starting a `<function_calls>` block
const FUNCTION_PREFIX: &str = "<function";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    /// Prose, forwarded to the caller
    #[default]
    Plain,
    /// Between `<function` and the `>` that ends the tag
    InTagName,
    /// Between an `<invoke` and the `</invoke>` balancing it
    InInvocation,
    /// Counts just balanced and the delta ended on what may be another tag
    ClosingGrace,
}

/// Decides, one delta at a time, which parts of a streamed completion are
/// prose and which are tool-call markup.
///
/// Every delta is appended to the accumulated text whether or not it is
/// shown, so the full completion can be parsed once the stream ends.
#[derive(Debug, Default)]
pub struct StreamParser {
    text: String,
    opened: usize,
    closed: usize,
    invocations: usize,
    state: ParseState,
    /// Text after a closing tag that may start another tag
    held: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next delta. Returns the text that should reach the caller, if any.
    pub fn accept(&mut self, delta: &str) -> Option<String> {
        let previous_len = self.text.len();
        self.text.push_str(delta);
        let new_opens = count_new(&self.text, previous_len, INVOKE_PREFIX);
        self.opened += new_opens;
        self.closed += count_new(&self.text, previous_len, INVOKE_CLOSE);

        let (next, visible) = match self.state {
            ParseState::Plain if delta == FUNCTION_PREFIX => (ParseState::InTagName, None),
            ParseState::Plain if new_opens > 0 => {
                self.invocations += new_opens;
                self.after_invocation_delta(delta, previous_len)
            }
            ParseState::Plain => (ParseState::Plain, Some(delta.to_string())),
            ParseState::InTagName if delta.trim() == ">" => (ParseState::Plain, None),
            ParseState::InTagName => (ParseState::InTagName, None),
            ParseState::InInvocation => self.after_invocation_delta(delta, previous_len),
            ParseState::ClosingGrace if new_opens > 0 => {
                self.held.clear();
                self.invocations += new_opens;
                self.after_invocation_delta(delta, previous_len)
            }
            ParseState::ClosingGrace if ends_on_tag(delta) => {
                self.held.clear();
                (ParseState::Plain, None)
            }
            ParseState::ClosingGrace => {
                let mut visible = std::mem::take(&mut self.held);
                visible.push_str(delta);
                (ParseState::Plain, Some(visible))
            }
        };

        if next != self.state {
            tracing::trace!("Stream parser {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        visible
    }

    /// Where a delta inside an invocation leaves the parser.
    ///
    /// Once the counts balance, prose after the last `</invoke>` is shown
    /// straight away. A tail that may open another tag is held until the
    /// next delta tells which it is.
    fn after_invocation_delta(&mut self, delta: &str, previous_len: usize) -> (ParseState, Option<String>) {
        if self.opened != self.closed {
            return (ParseState::InInvocation, None);
        }
        if ends_on_tag(delta) {
            return (ParseState::Plain, None);
        }

        let tail_start = self
            .text
            .rfind(INVOKE_CLOSE)
            .map(|pos| pos + INVOKE_CLOSE.len())
            .unwrap_or(self.text.len())
            .max(previous_len);
        let tail = &self.text[tail_start..];
        if tail.contains('<') {
            self.held = tail.to_string();
            (ParseState::ClosingGrace, None)
        } else if tail.is_empty() {
            (ParseState::Plain, None)
        } else {
            (ParseState::Plain, Some(tail.to_string()))
        }
    }

    /// Close a dangling `<function_calls>` block once the feed has ended.
    ///
    /// Generation stops on `</function_calls>`, so the closing tag itself
    /// never arrives through the stream.
    pub fn finish(&mut self) {
        if self.text.matches(FUNCTION_CALLS_OPEN).count() == 1 {
            self.text.push_str(FUNCTION_CALLS_CLOSE);
        }
    }

    /// Tool calls found in the accumulated text
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        if self.invocations == 0
            || !self.text.contains(INVOKE_OPEN)
            || !self.text.contains(INVOKE_CLOSE)
        {
            return Vec::new();
        }
        markup::tool_calls_from_stream(&self.text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Number of `<invoke` openings seen so far
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Number of `</invoke>` closings seen so far
    pub fn closed(&self) -> usize {
        self.closed
    }

    /// Invocations entered while parsing
    pub fn invocations(&self) -> usize {
        self.invocations
    }
}

fn ends_on_tag(delta: &str) -> bool {
    delta.trim_end().ends_with('>')
}

/// Occurrences of `pattern` that end inside the bytes appended after `previous_len`.
///
/// Only the new tail is scanned, starting far enough back to catch a match
/// split across two deltas.
fn count_new(text: &str, previous_len: usize, pattern: &str) -> usize {
    let mut start = previous_len.saturating_sub(pattern.len() - 1);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    text[start..]
        .match_indices(pattern)
        .filter(|(offset, _)| start + offset + pattern.len() > previous_len)
        .count()
}
