//! Recording fake transport shared by the integration tests

#![allow(dead_code)]

use pickup_winder::Transport;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write(Vec<u8>),
    Read(String),
    Close,
}

#[derive(Debug, Default)]
pub struct Recording {
    pub events: Vec<(Event, Instant)>,
    /// Bytes of one command written before the previous reply was read
    pub violations: Vec<String>,
}

impl Recording {
    pub fn events(&self) -> Vec<Event> {
        self.events.iter().map(|(e, _)| e.clone()).collect()
    }
}

/// Answers like the firmware and flags any overlapping round-trips.
pub struct RecordingTransport {
    pub recording: Arc<Mutex<Recording>>,
    in_flight: Option<Vec<u8>>,
    delay: Duration,
    count_reply: String,
}

impl RecordingTransport {
    pub fn new(delay: Duration) -> (Self, Arc<Mutex<Recording>>) {
        let recording = Arc::new(Mutex::new(Recording::default()));
        let transport = Self {
            recording: Arc::clone(&recording),
            in_flight: None,
            delay,
            count_reply: "5".to_string(),
        };
        (transport, recording)
    }

    pub fn with_count_reply(mut self, reply: &str) -> Self {
        self.count_reply = reply.to_string();
        self
    }

    fn record(&self, event: Event) {
        self.recording.lock().unwrap().events.push((event, Instant::now()));
    }
}

impl Transport for RecordingTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(prev) = &self.in_flight {
            self.recording
                .lock()
                .unwrap()
                .violations
                .push(format!("{:?} written while {:?} awaited its reply", bytes, prev));
        }
        self.in_flight = Some(bytes.to_vec());
        self.record(Event::Write(bytes.to_vec()));
        // Widen the window for another caller to sneak in
        thread::sleep(self.delay);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Option<Duration>) -> io::Result<String> {
        thread::sleep(self.delay);
        let sent = match self.in_flight.take() {
            Some(sent) => sent,
            None => {
                self.recording.lock().unwrap().violations.push("read without a command".to_string());
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "nothing sent"));
            }
        };
        let reply = if sent.last() == Some(&b'>') {
            "ok".to_string()
        } else {
            self.count_reply.clone()
        };
        self.record(Event::Read(reply.clone()));
        Ok(reply)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.record(Event::Close);
        Ok(())
    }
}

/// Group the event stream into (write, read) pairs, failing on anything else.
pub fn round_trips(events: &[Event]) -> Vec<(Vec<u8>, String)> {
    let mut trips = Vec::new();
    let mut iter = events.iter().filter(|e| **e != Event::Close);
    while let Some(first) = iter.next() {
        match (first, iter.next()) {
            (Event::Write(bytes), Some(Event::Read(reply))) => trips.push((bytes.clone(), reply.clone())),
            (a, b) => panic!("interleaved round-trip: {:?} then {:?}", a, b),
        }
    }
    trips
}
