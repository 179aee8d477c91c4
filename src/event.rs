//! Audit events and the sinks that receive them

use serde::Serialize;
use std::{
    io::Write,
    sync::Mutex,
    time::SystemTime,
};

/// Something a session did that's worth recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SessionStart {
        session: u64,
        user: String,
        time: SystemTime,
    },
    SessionEnd {
        session: u64,
        time: SystemTime,
    },
    ProcessStart {
        session: u64,
        pid: u32,
        ppid: u32,
        path: String,
        argv: Vec<String>,
        cwd: String,
    },
    ProcessExit {
        session: u64,
        pid: u32,
        status: i32,
    },
    Chdir {
        session: u64,
        pid: u32,
        dir: String,
    },
    FileWrite {
        session: u64,
        pid: u32,
        path: String,
    },
    FileRemove {
        session: u64,
        pid: u32,
        path: String,
    },
}

/// Per-session destination for [Event]s
pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes every event to the `log` facade at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: Event) {
        log::info!("{:?}", event);
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Default::default()
    }

    /// Copy of everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Serializes events as JSON, one per line
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn record(&self, event: Event) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = serde_json::to_writer(&mut *out, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(err) = result {
            log::warn!("failed to record event {:?}, {}", event, err);
        }
    }
}
