use std::collections::VecDeque;

/// Upper bound on physical lines joined into one logical record.
pub const MAX_JOINED_LINES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// Physical line number (1-based) where this record starts.
    pub line: usize,
    pub text: String,
}

/// Joins physical lines into logical records when a quoted field spans a
/// newline. A line with an odd number of double quotes leaves a quote open;
/// subsequent lines are appended (with the newline restored) until parity
/// closes again.
///
/// Joins are bounded so one stray quote cannot swallow the rest of the file:
/// once the buffer reaches `MAX_JOINED_LINES`, or its field count exceeds
/// the header's column count, the first buffered line is flushed as a
/// best-effort literal record and the rest are reassembled on their own.
pub struct LineAssembler {
    delimiter: char,
    max_fields: Option<usize>,
    pending: Vec<(usize, String)>,
    pending_quotes: usize,
    next_line: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(',')
    }
}

impl LineAssembler {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            max_fields: None,
            pending: Vec::new(),
            pending_quotes: 0,
            next_line: 1,
        }
    }

    /// Column count of the header, once known. Tightens the join bound.
    pub fn set_max_fields(&mut self, n: usize) {
        self.max_fields = Some(n);
    }

    /// Feed one physical line; returns every logical record completed by it.
    pub fn push(&mut self, line: &str) -> Vec<LogicalLine> {
        let line_no = self.next_line;
        self.next_line += 1;
        let mut out = Vec::new();
        self.feed(line_no, line.to_string(), &mut out);
        out
    }

    /// Flush whatever is buffered at end of input. Unterminated quotes are
    /// handed through literally, one buffered line leading and the rest
    /// reassembled; the parser treats the remainders as literal.
    pub fn finish(&mut self) -> Vec<LogicalLine> {
        let mut out = Vec::new();
        while !self.pending.is_empty() {
            let mut drained = std::mem::take(&mut self.pending);
            self.pending_quotes = 0;
            let (no, text) = drained.remove(0);
            out.push(LogicalLine { line: no, text });
            for (no, text) in drained {
                self.feed(no, text, &mut out);
            }
        }
        out
    }

    fn feed(&mut self, line_no: usize, text: String, out: &mut Vec<LogicalLine>) {
        let mut queue: VecDeque<(usize, String)> = VecDeque::new();
        queue.push_back((line_no, text));
        while let Some((no, text)) = queue.pop_front() {
            let quotes = text.matches('"').count();
            if self.pending.is_empty() {
                if quotes % 2 == 0 {
                    out.push(LogicalLine { line: no, text });
                } else {
                    self.pending.push((no, text));
                    self.pending_quotes = quotes;
                }
                continue;
            }
            self.pending.push((no, text));
            self.pending_quotes += quotes;
            if self.pending_quotes % 2 == 0 {
                out.push(self.take_pending());
                continue;
            }
            if self.pending.len() >= MAX_JOINED_LINES || self.fields_exceeded() {
                // abandon the join: first buffered line goes out literal,
                // the rest re-enter assembly in order
                let mut drained = std::mem::take(&mut self.pending);
                self.pending_quotes = 0;
                let (first_no, first_text) = drained.remove(0);
                out.push(LogicalLine { line: first_no, text: first_text });
                for item in drained.into_iter().rev() {
                    queue.push_front(item);
                }
            }
        }
    }

    fn take_pending(&mut self) -> LogicalLine {
        let drained = std::mem::take(&mut self.pending);
        self.pending_quotes = 0;
        let line = drained.first().map(|(n, _)| *n).unwrap_or(0);
        let text = drained.into_iter().map(|(_, t)| t).collect::<Vec<_>>().join("\n");
        LogicalLine { line, text }
    }

    /// Field count of the buffered join, with quotes toggling as the parser
    /// would see them. A legitimately open quoted field hides its
    /// delimiters, so this never trips on well-formed multi-line records.
    fn fields_exceeded(&self) -> bool {
        let Some(max) = self.max_fields else {
            return false;
        };
        let mut in_quotes = false;
        let mut fields = 1usize;
        for (_, text) in &self.pending {
            for c in text.chars() {
                if c == '"' {
                    in_quotes = !in_quotes;
                } else if c == self.delimiter && !in_quotes {
                    fields += 1;
                }
            }
        }
        fields > max
    }
}
