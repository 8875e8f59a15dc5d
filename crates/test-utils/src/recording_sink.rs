use std::sync::Mutex;

use tasque::exec::{OutputSink, OutputStream};

/// Output sink that keeps every line for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(String, OutputStream, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(task_id, stream, line)` in arrival order.
    pub fn lines(&self) -> Vec<(String, OutputStream, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Text of the lines from `stream`.
    pub fn text(&self, stream: OutputStream) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(_, s, _)| *s == stream)
            .map(|(_, _, line)| line)
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn line(&self, task_id: &str, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((task_id.to_string(), stream, line.to_string()));
    }
}
