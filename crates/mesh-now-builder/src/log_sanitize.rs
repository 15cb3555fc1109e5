use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

const MAX_LINE_CHARS: usize = 2048;

// CSI, OSC (BEL or ST terminated), DCS/SOS/PM/APC strings, then lone two-byte escapes.
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[PX^_][^\x1b]*\x1b\\",
        r"|\x1b[@-Z\\-_]",
    ))
    .unwrap_or_else(|e| panic!("escape pattern is a constant: {e}"))
});

/// Strip terminal escape sequences and control characters from one line of
/// tool output, and clamp its length.
pub fn clean_line(input: &str) -> String {
    let stripped = ESCAPES.replace_all(input, "");
    let mut out = String::with_capacity(stripped.len().min(MAX_LINE_CHARS));
    let mut count = 0usize;
    for c in stripped.chars() {
        let c = match c {
            '\t' => ' ',
            '\r' | '\n' => continue,
            c if c.is_control() || is_bidi_control(c) => continue,
            c => c,
        };
        if count == MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        out.push(c);
        count += 1;
    }
    out.trim_end().to_string()
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// Last `capacity` lines of a command's output, kept as failure diagnostics.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(&format!("... ({} earlier lines omitted)\n", self.dropped));
        }
        for (i, l) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(l);
        }
        out
    }
}
