//! Winder connection manager
//!
//! One `Winder` owns one link to the firmware. Every command is a full
//! write-then-read round-trip performed while holding the link's mutex, so
//! callers on different threads never interleave bytes or steal replies.

use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::commands::{parse_rev_count, Message, Speed};
use crate::error::{Result, WinderError};
use crate::transport::Transport;

pub const DEFAULT_CLOSE_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WinderConfig {
    /// Pause after the final disable so the firmware can read its buffer
    pub drain_delay: Duration,
    /// `None` waits for a reply indefinitely
    pub reply_timeout: Option<Duration>,
}

impl Default for WinderConfig {
    fn default() -> Self {
        Self {
            drain_delay: DEFAULT_DRAIN_DELAY,
            reply_timeout: None,
        }
    }
}

#[derive(Debug)]
struct Link<T> {
    transport: T,
    open: bool,
    // Set after a timeout or a panicked round-trip; stale input is dropped
    // before the next write.
    desynced: bool,
}

#[derive(Debug)]
pub struct Winder<T: Transport> {
    link: Mutex<Link<T>>,
    config: WinderConfig,
}

impl<T: Transport> Winder<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, WinderConfig::default())
    }

    pub fn with_config(transport: T, config: WinderConfig) -> Self {
        Self {
            link: Mutex::new(Link { transport, open: true, desynced: false }),
            config,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Take back the transport, e.g. to inspect it after `close`.
    pub fn into_inner(self) -> T {
        match self.link.into_inner() {
            Ok(link) => link.transport,
            Err(poisoned) => poisoned.into_inner().transport,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link<T>> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Winder link lock poisoned; resynchronizing");
                self.link.clear_poison();
                let mut guard = poisoned.into_inner();
                guard.desynced = true;
                guard
            }
        }
    }

    /// Send a message and wait for its single reply line.
    fn send_with_reply(&self, message: Message) -> Result<String> {
        let mut link = self.lock();
        if !link.open {
            return Err(WinderError::Closed);
        }
        if link.desynced {
            warn!("Discarding stale input before {}", message.command.name());
            link.transport.discard_input()?;
            link.desynced = false;
        }

        let bytes = message.encode();
        debug!("-> {} {:?}", message.command.name(), bytes);
        if let Err(e) = link.transport.write_bytes(&bytes) {
            // Part of the message may be on the wire already
            warn!("Writing {} failed: {}", message.command.name(), e);
            link.desynced = true;
            return Err(e.into());
        }

        match link.transport.read_line(self.config.reply_timeout) {
            Ok(reply) => {
                debug!("<- {:?}", reply);
                Ok(reply)
            }
            Err(e) => {
                // A late reply or a partial line may still arrive
                link.desynced = true;
                if e.kind() == std::io::ErrorKind::TimedOut {
                    warn!("No reply to {} within {:?}", message.command.name(), self.config.reply_timeout);
                    Err(WinderError::Timeout)
                } else {
                    warn!("Reading reply to {} failed: {}", message.command.name(), e);
                    Err(e.into())
                }
            }
        }
    }

    /// Enable (motor holds position) or disable (free to turn by hand).
    pub fn enable_motor(&self, enabled: bool) -> Result<String> {
        let reply = self.send_with_reply(Message::enable_motor(enabled))?;
        info!("{} motor ... {}", if enabled { "Enable" } else { "Disable" }, reply);
        Ok(reply)
    }

    pub fn set_speed(&self, revs_per_sec: u32) -> Result<String> {
        let speed = Speed::new(revs_per_sec)?;
        let reply = self.send_with_reply(Message::set_speed(speed))?;
        info!("Set speed [rps]: {} ... {}", revs_per_sec, reply);
        Ok(reply)
    }

    /// Full revolutions since start or last reset.
    ///
    /// Querying briefly pauses the stepper on the firmware side.
    pub fn get_rev_count(&self) -> Result<i64> {
        let reply = self.send_with_reply(Message::get_rev_count())?;
        parse_rev_count(&reply)
    }

    pub fn reset_rev_counter(&self) -> Result<String> {
        let reply = self.send_with_reply(Message::reset_rev_counter())?;
        info!("Reset counter ... {}", reply);
        Ok(reply)
    }

    /// Stop and disable the motor, then close the link.
    ///
    /// Must not run concurrently with other commands. Every step runs even if
    /// an earlier one failed; the first error is returned.
    pub fn close(&self, wait: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(WinderError::Closed);
        }
        std::thread::sleep(wait);
        info!("Closing connection");

        let mut first_err: Option<WinderError> = None;
        if let Err(e) = self.set_speed(0) {
            warn!("Stopping motor failed: {}", e);
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.enable_motor(false) {
            warn!("Disabling motor failed: {}", e);
            first_err.get_or_insert(e);
        }

        // Wait for the firmware to read its buffer
        std::thread::sleep(self.config.drain_delay);

        let mut link = self.lock();
        if link.open {
            link.open = false;
            if let Err(e) = link.transport.close() {
                warn!("Closing transport failed: {}", e);
                first_err.get_or_insert(e.into());
            }
        }
        drop(link);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
