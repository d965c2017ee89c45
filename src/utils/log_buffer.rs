use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// What a log record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    DirectoryStarted,
    DirectoryFailed,
    FileSkipped,
    FileCopying,
    FileCopied,
    FileFailed,
    MemoryWait,
    BackupComplete,
}

impl LogKind {
    pub fn level(self) -> &'static str {
        match self {
            LogKind::DirectoryFailed | LogKind::FileFailed => "error",
            LogKind::MemoryWait => "debug",
            _ => "info",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, LogKind::DirectoryFailed | LogKind::FileFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub kind: LogKind,
    pub message: String,
    pub path: Option<String>,
}

/// Bounded in-memory copy of the run's log records.
///
/// Embedding callers attach one to a runner when they want to inspect
/// failures programmatically instead of scanning log output.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries.min(4096)))),
            max_entries,
        }
    }

    pub fn add_log(&self, kind: LogKind, message: String, path: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now().timestamp(),
            level: kind.level().to_string(),
            kind,
            message,
            path,
        };

        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        match limit {
            Some(n) => buffer.iter().skip(buffer.len().saturating_sub(n)).cloned().collect(),
            None => buffer.iter().cloned().collect(),
        }
    }

    /// Records of one kind, oldest first.
    pub fn entries_of(&self, kind: LogKind) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind)
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|entry| entry.kind.is_failure())
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}
