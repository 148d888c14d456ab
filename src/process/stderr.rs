//! Transcoder stderr capture
//!
//! Every line is logged at debug level; the last few are kept so a crash can
//! be reported with the transcoder's own last words.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Bounded ring of the most recent stderr lines
#[derive(Debug)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Read `reader` to EOF, logging each line and feeding the tail
pub async fn collect<R>(reader: R, tail: Arc<Mutex<StderrTail>>, label: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                tracing::debug!("transcoder ({}): {}", label, line);
                tail.lock().push(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("transcoder ({}): stderr read failed: {}", label, e);
                break;
            }
        }
    }
}
