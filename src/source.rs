//! JSON-lines event reader.
//!
//! One [`Event`] per line. Blank lines and lines starting with `#` are
//! skipped. Timestamps must not go backwards; the automaton does not re-sort.

use std::io::BufRead;

use crate::error::{Error, Result};
use crate::event::Event;

pub struct JsonLinesSource<R> {
    reader: R,
    line: usize,
    last_ts: Option<u64>,
    buf: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            last_ts: None,
            buf: String::new(),
        }
    }

    /// Line number of the last event returned.
    pub fn line(&self) -> usize {
        self.line
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = self.buf.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let event: Event = serde_json::from_str(trimmed).map_err(|source| Error::Json {
                line: self.line,
                source,
            })?;
            if let Some(prev) = self.last_ts {
                if event.timestamp < prev {
                    return Err(Error::OutOfOrder {
                        line: self.line,
                        prev,
                        ts: event.timestamp,
                    });
                }
            }
            self.last_ts = Some(event.timestamp);
            return Ok(Some(event));
        }
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
