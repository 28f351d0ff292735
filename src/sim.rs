//! Simulated winder firmware
//!
//! Stands in for the Arduino when no hardware is attached. Bytes are parsed
//! one at a time like the firmware's serial reader: a command char, the value
//! byte after `S`, and `>` answered with `ok`.

use log::debug;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use crate::commands::Command;
use crate::transport::Transport;

pub const ACK_REPLY: &str = "ok";

#[derive(Debug)]
pub struct SimulatedFirmware {
    enabled: bool,
    speed_rps: u8,
    revs: f64,
    last_tick: Instant,
    awaiting_speed: bool,
    replies: VecDeque<String>,
    closed: bool,
}

impl Default for SimulatedFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFirmware {
    pub fn new() -> Self {
        Self {
            enabled: false,
            speed_rps: 0,
            revs: 0.0,
            last_tick: Instant::now(),
            awaiting_speed: false,
            replies: VecDeque::new(),
            closed: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn speed(&self) -> u8 {
        self.speed_rps
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Turn the spindle by `revs` full revolutions.
    pub fn advance(&mut self, revs: u32) {
        self.revs += f64::from(revs);
    }

    pub fn rev_count(&mut self) -> i64 {
        self.tick();
        self.revs.floor() as i64
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        if self.enabled && self.speed_rps > 0 {
            self.revs += dt * f64::from(self.speed_rps);
        }
    }

    fn receive(&mut self, byte: u8) {
        if self.awaiting_speed {
            self.tick();
            self.awaiting_speed = false;
            self.speed_rps = byte;
            return;
        }
        match Command::from_code(byte) {
            Some(Command::EnableMotor) => {
                self.tick();
                self.enabled = true;
            }
            Some(Command::DisableMotor) => {
                self.tick();
                self.enabled = false;
            }
            Some(Command::SetSpeed) => self.awaiting_speed = true,
            Some(Command::GetRevCount) => {
                let count = self.rev_count();
                self.replies.push_back(count.to_string());
            }
            Some(Command::ResetRevCounter) => {
                self.tick();
                self.revs = 0.0;
            }
            Some(Command::SendOk) => self.replies.push_back(ACK_REPLY.to_string()),
            None => debug!("Simulator ignoring byte {:#04x}", byte),
        }
    }
}

impl Transport for SimulatedFirmware {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "Simulator closed"));
        }
        for &b in bytes {
            self.receive(b);
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Option<Duration>) -> io::Result<String> {
        match self.replies.pop_front() {
            Some(line) => Ok(line),
            None => match timeout {
                Some(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "No reply queued")),
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "No reply queued")),
            },
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.replies.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ack_and_state() {
        let mut fw = SimulatedFirmware::new();
        fw.write_bytes(b"E>").unwrap();
        assert!(fw.is_enabled());
        assert_eq!(fw.read_line(None).unwrap(), "ok");
        fw.write_bytes(&[b'S', 12, b'>']).unwrap();
        assert_eq!(fw.speed(), 12);
        assert_eq!(fw.read_line(None).unwrap(), "ok");
        fw.write_bytes(b"D>").unwrap();
        assert!(!fw.is_enabled());
    }

    #[test]
    fn test_speed_byte_is_not_a_command() {
        let mut fw = SimulatedFirmware::new();
        // 'E' as a speed value must not enable the motor
        fw.write_bytes(&[b'S', b'E']).unwrap();
        assert_eq!(fw.speed(), b'E');
        assert!(!fw.is_enabled());
        assert!(fw.read_line(None).is_err());
    }

    #[test]
    fn test_count_without_ack() {
        let mut fw = SimulatedFirmware::new();
        fw.advance(42);
        fw.write_bytes(b"C").unwrap();
        assert_eq!(fw.read_line(None).unwrap(), "42");
        assert!(fw.read_line(Some(Duration::from_millis(1))).is_err());
    }

    #[test]
    fn test_reset() {
        let mut fw = SimulatedFirmware::new();
        fw.advance(9);
        fw.write_bytes(b"R>").unwrap();
        assert_eq!(fw.rev_count(), 0);
    }

    #[test]
    fn test_closed_rejects_writes() {
        let mut fw = SimulatedFirmware::new();
        fw.close().unwrap();
        assert!(fw.is_closed());
        assert!(fw.write_bytes(b"E>").is_err());
    }
}
