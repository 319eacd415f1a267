use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sequence::SequenceId;

const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Settings,
    Store,
    Submission,
    Warning,
}

/// One line of settings/submission activity, optionally tied to a sequence.
#[derive(Debug, Clone)]
pub struct Entry {
    pub text: String,
    pub kind: Kind,
    pub sequence_id: Option<SequenceId>,
}

/// Bounded buffer of entries; the oldest line is dropped once full.
#[derive(Debug)]
struct ActivityLog {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl ActivityLog {
    fn with_capacity(capacity: usize) -> Self {
        ActivityLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, entry: Entry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest `n` entries matching `keep`, oldest first.
    fn newest_matching(&self, n: usize, keep: impl Fn(&Entry) -> bool) -> Vec<Entry> {
        let mut matching: Vec<Entry> = self.entries.iter().rev().filter(|e| keep(e)).take(n).cloned().collect();
        matching.reverse();
        matching
    }
}

static ACTIVITY_LOG: Lazy<Mutex<ActivityLog>> = Lazy::new(|| Mutex::new(ActivityLog::with_capacity(MAX_LOG_LINES)));

pub fn log<T: Into<String>>(line: T) {
    record(Kind::Info, None, line.into());
}

pub fn log_with<T: Into<String>>(kind: Kind, line: T) {
    record(kind, None, line.into());
}

/// Log a line about one sequence so its history can be pulled out later.
pub fn log_for<T: Into<String>>(kind: Kind, sequence_id: Option<SequenceId>, line: T) {
    record(kind, sequence_id, line.into());
}

fn record(kind: Kind, sequence_id: Option<SequenceId>, text: String) {
    match sequence_id {
        Some(id) => debug_eprintln!("[{:?}] #{} {}", kind, id, text),
        None => debug_eprintln!("[{:?}] {}", kind, text),
    }
    if let Ok(mut log) = ACTIVITY_LOG.lock() {
        log.push(Entry {
            text,
            kind,
            sequence_id,
        });
    }
}

fn newest_matching(n: usize, keep: impl Fn(&Entry) -> bool) -> Vec<Entry> {
    match ACTIVITY_LOG.lock() {
        Ok(log) => log.newest_matching(n, keep),
        Err(_) => Vec::new(),
    }
}

pub fn recent(n: usize) -> Vec<Entry> {
    newest_matching(n, |_| true)
}

pub fn recent_of(kind: Kind, n: usize) -> Vec<Entry> {
    newest_matching(n, |e| e.kind == kind)
}

/// What happened to one sequence: saves, registrations, submissions, failures.
pub fn recent_for_sequence(sequence_id: SequenceId, n: usize) -> Vec<Entry> {
    newest_matching(n, |e| e.sequence_id == Some(sequence_id))
}

pub fn clear() {
    if let Ok(mut log) = ACTIVITY_LOG.lock() {
        log.entries.clear();
    }
}
