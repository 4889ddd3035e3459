//! Line oriented response scanner
//!
//! Accumulates module output into a bounded buffer, detects terminal result lines and extracts
//! structured fields from response lines.
use core::str::FromStr;
use heapless::Vec;

/// Max. number of fields captured by a single pattern
pub const MAX_FIELDS: usize = 8;

/// Placeholder marking a captured field in a pattern
const PLACEHOLDER: &str = "{}";

/// End-of-response marker reported by the module
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TerminalCode {
    Ok,
    Connect,
    Ring,
    NoCarrier,
    Error,
    NoDialtone,
    Busy,
    NoAnswer,
}

/// Terminal markers in matching order
const TERMINAL_CODES: [(&str, TerminalCode); 8] = [
    ("OK", TerminalCode::Ok),
    ("CONNECT", TerminalCode::Connect),
    ("RING", TerminalCode::Ring),
    ("NO CARRIER", TerminalCode::NoCarrier),
    ("ERROR", TerminalCode::Error),
    ("NO DIALTONE", TerminalCode::NoDialtone),
    ("BUSY", TerminalCode::Busy),
    ("NO ANSWER", TerminalCode::NoAnswer),
];

impl TerminalCode {
    /// Classifies a single response line (without line ending)
    pub fn classify(line: &str) -> Option<Self> {
        TERMINAL_CODES
            .iter()
            .find(|(marker, _)| line == *marker)
            .map(|(_, code)| *code)
    }
}

/// Scanner failures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanError {
    /// Line buffer was exhausted before a terminal line was received
    BufferOverflow,
}

/// Bounded response buffer with terminal line detection and field extraction
pub struct ResponseScanner<const LEN: usize> {
    buffer: Vec<u8, LEN>,

    /// Start of the line currently being received
    line_start: usize,

    /// Registered structured field pattern
    pattern: Option<&'static str>,

    /// Byte ranges of the captured fields, filled by the first line matching the pattern
    fields: Vec<(usize, usize), MAX_FIELDS>,

    /// True if the pattern has been matched
    matched: bool,
}

impl<const LEN: usize> Default for ResponseScanner<LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LEN: usize> ResponseScanner<LEN> {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            line_start: 0,
            pattern: None,
            fields: Vec::new(),
            matched: false,
        }
    }

    /// Clears the buffer and any registered pattern
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.line_start = 0;
        self.pattern = None;
        self.fields.clear();
        self.matched = false;
    }

    /// Registers a structured field pattern for the next response, e.g. `recv={} sent={}`
    ///
    /// The literal text in front of the first placeholder is matched as line prefix.
    pub fn expect(&mut self, pattern: &'static str) {
        self.pattern = Some(pattern);
        self.fields.clear();
        self.matched = false;
    }

    /// Appends a received byte. Returns the terminal code once a terminal line is complete.
    pub fn feed(&mut self, byte: u8) -> Result<Option<TerminalCode>, ScanError> {
        if self.buffer.push(byte).is_err() {
            return Err(ScanError::BufferOverflow);
        }

        if byte != b'\n' {
            return Ok(None);
        }

        let start = self.line_start;
        let end = trim_line_end(&self.buffer, start, self.buffer.len());
        self.line_start = self.buffer.len();

        let line = match core::str::from_utf8(&self.buffer[start..end]) {
            Ok(line) => line,
            Err(_) => return Ok(None),
        };

        if line.is_empty() {
            return Ok(None);
        }

        if let Some(code) = TerminalCode::classify(line) {
            return Ok(Some(code));
        }

        if !self.matched {
            if let Some(pattern) = self.pattern {
                if let Some(fields) = match_pattern(pattern, line, start) {
                    self.fields = fields;
                    self.matched = true;
                }
            }
        }

        Ok(None)
    }

    /// True if the registered pattern was matched by a response line
    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Returns the captured field as string
    pub fn field_str(&self, index: usize) -> Option<&str> {
        let (start, end) = *self.fields.get(index)?;
        core::str::from_utf8(&self.buffer[start..end]).ok().map(str::trim)
    }

    /// Parses the captured field
    pub fn field<T: FromStr>(&self, index: usize) -> Option<T> {
        self.field_str(index)?.parse().ok()
    }

    /// Iterates all complete, non-empty response lines, including terminal lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.buffer[..self.line_start]
            .split(|byte| *byte == b'\n')
            .filter_map(|line| core::str::from_utf8(line).ok())
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
    }
}

/// Returns the end index of a line without the trailing CR/LF
fn trim_line_end(buffer: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && matches!(buffer[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    end
}

/// Matches the line against the pattern and returns the absolute field ranges
fn match_pattern(pattern: &str, line: &str, offset: usize) -> Option<Vec<(usize, usize), MAX_FIELDS>> {
    let mut literals = pattern.split(PLACEHOLDER);
    let prefix = literals.next()?;
    if !line.starts_with(prefix) {
        return None;
    }

    let mut fields = Vec::new();
    let mut position = prefix.len();

    for literal in literals {
        let rest = &line[position..];
        let length = if literal.is_empty() {
            rest.len()
        } else {
            rest.find(literal)?
        };

        fields.push((offset + position, offset + position + length)).ok()?;
        position += length + literal.len();
    }

    Some(fields)
}
