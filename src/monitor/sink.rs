//! Destinations for finalized session records.
//!
//! Publishing is fire-and-forget from the tracker's side. A sink that cannot
//! deliver logs the failure and drops the record; buffering and retry belong
//! to whatever pipeline sits behind it.

use super::types::SessionRecord;
use crossbeam_channel::Sender;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Consumes finalized sessions.
pub trait EventSink: Send {
    fn publish(&mut self, record: SessionRecord);
}

impl<F> EventSink for F
where
    F: FnMut(SessionRecord) + Send,
{
    fn publish(&mut self, record: SessionRecord) {
        self(record)
    }
}

/// Forwards records into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<SessionRecord>,
}

impl ChannelSink {
    pub fn new(sender: Sender<SessionRecord>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn publish(&mut self, record: SessionRecord) {
        if let Err(e) = self.sender.send(record) {
            tracing::warn!("Session receiver disconnected, dropping {}", e.0.kind);
        }
    }
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SessionRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far.
    pub fn records(&self) -> Vec<SessionRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove and return everything published so far.
    pub fn take(&self) -> Vec<SessionRecord> {
        match self.records.lock() {
            Ok(mut records) => std::mem::take(&mut *records),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn publish(&mut self, record: SessionRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn publish(&mut self, record: SessionRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize session record: {}", e);
                return;
            }
        };

        if let Err(e) = writeln!(self.writer, "{line}").and_then(|()| self.writer.flush()) {
            tracing::warn!("Failed to write session record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::GPS_SESSION_KIND;

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.publish(SessionRecord::new(GPS_SESSION_KIND, 1, 2));
        assert_eq!(sink.len(), 1);

        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_json_lines_sink_writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(SessionRecord::new(GPS_SESSION_KIND, 100, 200));
        sink.publish(SessionRecord::new(GPS_SESSION_KIND, 300, 450));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: SessionRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.duration_ms(), 150);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.publish(SessionRecord::new(GPS_SESSION_KIND, 0, 5));
        assert_eq!(rx.try_recv().map(|r| r.end_time), Ok(5));

        drop(rx);
        sink.publish(SessionRecord::new(GPS_SESSION_KIND, 5, 9));
    }

    #[test]
    fn test_closure_is_a_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |record: SessionRecord| seen.push(record.start_time);
            sink.publish(SessionRecord::new(GPS_SESSION_KIND, 7, 8));
        }
        assert_eq!(seen, vec![7]);
    }
}
