//! Tool-call JSON suppression for streamed transcript deltas.
//!
//! Some responses arrive as a raw tool-call JSON object streamed through the
//! transcript channel instead of prose. The suppressor classifies a turn from
//! its first non-whitespace bytes and, when it sees a tool-call envelope,
//! withholds the JSON from display while tracking brace depth across
//! fragments so any trailing prose after the object still shows.
//!
//! Classification is stateful because the signature can be split across
//! deltas; nothing is shown for a turn until its opening bytes are known to
//! be prose.

/// Opening byte sequences that mark a tool-call envelope.
const TOOL_CALL_SIGNATURES: &[&str] = &["{\"tool_uses\":", "{\"recipient_name\":"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not yet enough bytes to classify the turn
    Sniffing,
    /// Classified as prose; everything passes through
    Plain,
    /// Inside a tool-call object; scanning for its closing brace
    Suppressing,
    /// Tool-call object closed; remaining text passes through
    Trailing,
}

/// Per-turn streaming filter for tool-call JSON.
#[derive(Debug)]
pub struct ToolCallSuppressor {
    phase: Phase,
    /// Bytes withheld while classification is pending
    pending: String,
    depth: i32,
    in_string: bool,
    escaped: bool,
}

impl Default for ToolCallSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallSuppressor {
    pub fn new() -> Self {
        Self {
            phase: Phase::Sniffing,
            pending: String::new(),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Whether the suppressor has classified the turn as a tool call and is
    /// still inside (or just past) the JSON object.
    pub fn is_suppressing(&self) -> bool {
        matches!(self.phase, Phase::Suppressing | Phase::Trailing)
    }

    /// Feed one streamed fragment; returns the part safe to display now.
    pub fn push(&mut self, delta: &str) -> String {
        match self.phase {
            Phase::Plain => delta.to_string(),
            Phase::Trailing => delta.to_string(),
            Phase::Suppressing => self.consume_json(delta),
            Phase::Sniffing => {
                self.pending.push_str(delta);
                let lead = self.pending.trim_start();
                if lead.is_empty() {
                    return String::new();
                }
                if TOOL_CALL_SIGNATURES.iter().any(|s| lead.starts_with(*s)) {
                    self.phase = Phase::Suppressing;
                    let buffered = std::mem::take(&mut self.pending);
                    return self.consume_json(&buffered);
                }
                if TOOL_CALL_SIGNATURES.iter().any(|s| s.starts_with(lead)) {
                    // Still a possible signature prefix; keep withholding.
                    return String::new();
                }
                self.phase = Phase::Plain;
                std::mem::take(&mut self.pending)
            }
        }
    }

    /// Scan `text` for the end of the tool-call object, string-aware so
    /// braces inside JSON string values do not unbalance the count.
    fn consume_json(&mut self, text: &str) -> String {
        for (pos, ch) in text.char_indices() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.phase = Phase::Trailing;
                        return text[pos + ch.len_utf8()..].to_string();
                    }
                }
                _ => {}
            }
        }
        String::new()
    }
}

/// Strip a tool-call envelope from a complete final transcript.
///
/// Three outcomes: text that is not a tool call is returned unchanged; a
/// balanced envelope yields whatever trails its closing brace; an unbalanced
/// envelope (truncated stream) yields the empty string.
pub fn strip_tool_call_envelope(text: &str) -> String {
    let lead = text.trim_start();
    if !TOOL_CALL_SIGNATURES.iter().any(|s| lead.starts_with(*s)) {
        return text.to_string();
    }
    let mut scanner = ToolCallSuppressor {
        phase: Phase::Suppressing,
        pending: String::new(),
        depth: 0,
        in_string: false,
        escaped: false,
    };
    scanner.consume_json(lead)
}
