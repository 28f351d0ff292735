//! Command codes and wire encoding
//!
//! The firmware reads one command char at a time. `S` is followed by a raw
//! value byte, and any command may be followed by `>` to request an `ok`.

use crate::error::{Result, WinderError};

/// Command chars expected by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    EnableMotor,
    DisableMotor,
    SetSpeed,
    GetRevCount,
    ResetRevCounter,
    SendOk,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::EnableMotor,
        Command::DisableMotor,
        Command::SetSpeed,
        Command::GetRevCount,
        Command::ResetRevCounter,
        Command::SendOk,
    ];

    pub const fn code(self) -> u8 {
        match self {
            Command::EnableMotor => b'E',
            Command::DisableMotor => b'D',
            Command::SetSpeed => b'S',
            Command::GetRevCount => b'C',
            Command::ResetRevCounter => b'R',
            Command::SendOk => b'>',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Name used in log output
    pub fn name(self) -> &'static str {
        match self {
            Command::EnableMotor => "enable motor",
            Command::DisableMotor => "disable motor",
            Command::SetSpeed => "set speed",
            Command::GetRevCount => "get rev count",
            Command::ResetRevCounter => "reset counter",
            Command::SendOk => "send ok",
        }
    }
}

/// Motor speed in revolutions per second, encoded as one raw byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Speed(u8);

impl Speed {
    pub const ZERO: Speed = Speed(0);
    /// Upper bound of the operator speed control
    pub const MAX_OPERATING: u8 = 50;

    /// Rejects anything that would not survive the single-byte encoding.
    pub fn new(revs_per_sec: u32) -> Result<Self> {
        u8::try_from(revs_per_sec)
            .map(Speed)
            .map_err(|_| WinderError::SpeedOutOfRange(revs_per_sec))
    }

    pub fn revs_per_sec(self) -> u8 {
        self.0
    }
}

/// One outgoing message: `<code>[<value>]['>']`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub value: Option<u8>,
    pub request_ack: bool,
}

impl Message {
    pub fn enable_motor(enabled: bool) -> Self {
        let command = if enabled { Command::EnableMotor } else { Command::DisableMotor };
        Self { command, value: None, request_ack: true }
    }

    pub fn set_speed(speed: Speed) -> Self {
        Self { command: Command::SetSpeed, value: Some(speed.revs_per_sec()), request_ack: true }
    }

    /// The count reply is the value itself, so no ack is requested.
    pub fn get_rev_count() -> Self {
        Self { command: Command::GetRevCount, value: None, request_ack: false }
    }

    pub fn reset_rev_counter() -> Self {
        Self { command: Command::ResetRevCounter, value: None, request_ack: true }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3);
        buf.push(self.command.code());
        if let Some(v) = self.value {
            buf.push(v);
        }
        if self.request_ack {
            buf.push(Command::SendOk.code());
        }
        buf
    }
}

/// Parse the reply to `C` as a base-10 integer.
pub fn parse_rev_count(reply: &str) -> Result<i64> {
    reply
        .trim()
        .parse::<i64>()
        .map_err(|_| WinderError::Parse { reply: reply.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_distinct() {
        let codes: HashSet<u8> = Command::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), Command::ALL.len());
        for c in Command::ALL {
            assert!(c.code().is_ascii_graphic());
            assert_eq!(Command::from_code(c.code()), Some(c));
        }
        assert_eq!(Command::from_code(b'x'), None);
    }

    #[test]
    fn test_wire_bytes() {
        assert_eq!(Message::enable_motor(true).encode(), b"E>".to_vec());
        assert_eq!(Message::enable_motor(false).encode(), b"D>".to_vec());
        assert_eq!(Message::set_speed(Speed::new(25).unwrap()).encode(), vec![b'S', 25, b'>']);
        assert_eq!(Message::get_rev_count().encode(), b"C".to_vec());
        assert_eq!(Message::reset_rev_counter().encode(), b"R>".to_vec());
    }

    #[test]
    fn test_speed_value_is_raw_byte() {
        // 48 would be ASCII '0' if digit-encoded
        let bytes = Message::set_speed(Speed::new(48).unwrap()).encode();
        assert_eq!(bytes, vec![b'S', 48, b'>']);
        let bytes = Message::set_speed(Speed::ZERO).encode();
        assert_eq!(bytes, vec![b'S', 0, b'>']);
    }

    #[test]
    fn test_speed_range() {
        assert_eq!(Speed::new(255).unwrap().revs_per_sec(), 255);
        assert!(matches!(Speed::new(256), Err(WinderError::SpeedOutOfRange(256))));
        assert!(matches!(Speed::new(u32::MAX), Err(WinderError::SpeedOutOfRange(_))));
    }

    #[test]
    fn test_parse_rev_count() {
        assert_eq!(parse_rev_count("1423").unwrap(), 1423);
        assert_eq!(parse_rev_count(" 7 ").unwrap(), 7);
        assert_eq!(parse_rev_count("-3").unwrap(), -3);
        match parse_rev_count("abc") {
            Err(WinderError::Parse { reply }) => assert_eq!(reply, "abc"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_rev_count("").is_err());
        assert!(parse_rev_count("14x").is_err());
    }
}
