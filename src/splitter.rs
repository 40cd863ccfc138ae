//! Incremental line splitting for child process streams.
//!
//! Chunks arrive with arbitrary boundaries. [`LineSplitter`] buffers bytes
//! until a newline is seen and hands each complete line, without its
//! terminating `\n`, to the registered listeners in registration order.
//! Lines are decoded lossily so a multi-byte character split across two
//! chunks is reassembled before decoding.

type LineListener = Box<dyn FnMut(&str) + Send>;
type DoneListener = Box<dyn FnMut(Option<&str>) + Send>;

#[derive(Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known not to contain a newline.
    scanned: usize,
    closed: bool,
    line_listeners: Vec<LineListener>,
    done_listeners: Vec<DoneListener>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked once per complete line.
    pub fn on_line<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.line_listeners.push(Box::new(listener));
        self
    }

    /// Register a listener invoked once when the stream closes. It receives
    /// the unterminated remainder, or `None` when the stream ended on a
    /// newline.
    pub fn on_done<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(Option<&str>) + Send + 'static,
    {
        self.done_listeners.push(Box::new(listener));
        self
    }

    pub fn append(&mut self, chunk: &str) {
        self.append_bytes(chunk.as_bytes());
    }

    pub fn append_bytes(&mut self, chunk: &[u8]) {
        if self.closed {
            log::warn!("dropping {} bytes appended after close", chunk.len());
            return;
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            self.emit_line(&line);
            start = end + 1;
            search_from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
    }

    /// Flush the trailing partial line, if any, and notify done listeners.
    /// Subsequent calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.is_empty() {
            for listener in &mut self.done_listeners {
                listener(None);
            }
        } else {
            let rest = String::from_utf8_lossy(&rest).into_owned();
            self.emit_line(&rest);
            for listener in &mut self.done_listeners {
                listener(Some(&rest));
            }
        }
    }

    fn emit_line(&mut self, line: &str) {
        for listener in &mut self.line_listeners {
            listener(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    type Recorded = Arc<Mutex<Vec<String>>>;

    fn recording_splitter() -> (LineSplitter, Recorded, Recorded) {
        let lines: Recorded = Arc::default();
        let done: Recorded = Arc::default();
        let mut splitter = LineSplitter::new();
        let sink = Arc::clone(&lines);
        splitter.on_line(move |line| sink.lock().unwrap().push(line.to_string()));
        let sink = Arc::clone(&done);
        splitter.on_done(move |rest| {
            sink.lock()
                .unwrap()
                .push(rest.map_or_else(|| "<none>".to_string(), str::to_string));
        });
        (splitter, lines, done)
    }

    const TEXT: &str = "# Specification\n## Scenario one\n* step ✓ passed\n\nSuccessfully generated html-report to => /tmp/r/index.html\n";

    fn expected_lines() -> Vec<String> {
        TEXT.lines().map(str::to_string).collect()
    }

    #[test]
    fn emits_lines_from_a_single_chunk() {
        let (mut splitter, lines, done) = recording_splitter();
        splitter.append(TEXT);
        splitter.close();
        assert_eq!(*lines.lock().unwrap(), expected_lines());
        assert_eq!(*done.lock().unwrap(), vec!["<none>"]);
    }

    #[test]
    fn one_byte_at_a_time_yields_identical_lines() {
        let (mut splitter, lines, _) = recording_splitter();
        for byte in TEXT.as_bytes() {
            splitter.append_bytes(std::slice::from_ref(byte));
        }
        splitter.close();
        assert_eq!(*lines.lock().unwrap(), expected_lines());
    }

    #[test]
    fn every_two_way_split_yields_identical_lines() {
        let bytes = TEXT.as_bytes();
        for split in 0..=bytes.len() {
            let (mut splitter, lines, _) = recording_splitter();
            splitter.append_bytes(&bytes[..split]);
            splitter.append_bytes(&bytes[split..]);
            splitter.close();
            assert_eq!(*lines.lock().unwrap(), expected_lines(), "split at {split}");
        }
    }

    #[test]
    fn trailing_text_without_newline_is_flushed_on_close() {
        let (mut splitter, lines, done) = recording_splitter();
        splitter.append("first\nsec");
        splitter.append("ond");
        assert_eq!(*lines.lock().unwrap(), vec!["first"]);
        splitter.close();
        assert_eq!(*lines.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(*done.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn text_ending_on_newline_does_not_reemit_last_line() {
        let (mut splitter, lines, done) = recording_splitter();
        splitter.append("only line\n");
        splitter.close();
        splitter.close();
        assert_eq!(*lines.lock().unwrap(), vec!["only line"]);
        assert_eq!(*done.lock().unwrap(), vec!["<none>"]);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let order: Recorded = Arc::default();
        let mut splitter = LineSplitter::new();
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        splitter
            .on_line(move |line| first.lock().unwrap().push(format!("a:{line}")))
            .on_line(move |line| second.lock().unwrap().push(format!("b:{line}")));
        splitter.append("x\n");
        assert_eq!(*order.lock().unwrap(), vec!["a:x", "b:x"]);
    }
}
