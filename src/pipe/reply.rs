//! Reply assembly
//!
//! The host answers every command with any number of body lines followed by
//! a single status line starting with [`SENTINEL_PREFIX`]. Replies carry no
//! request id; they are matched to commands purely by order.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// Prefix of the line that terminates every reply
pub const SENTINEL_PREFIX: &str = "BatchCommand finished:";

/// A complete reply from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Body lines in receipt order, each with its line terminator
    pub body: String,
    /// The sentinel line, verbatim
    pub status: String,
    /// Time from sending the command to receiving the sentinel, when requested
    pub elapsed: Option<Duration>,
}

impl Reply {
    /// Whether the host reported success
    pub fn is_ok(&self) -> bool {
        self.status.trim_end().ends_with("OK")
    }

    /// `Execution time: 1.23ms` annotation for timed commands
    pub fn timing(&self) -> Option<String> {
        self.elapsed
            .map(|d| format!("Execution time: {:.2}ms", d.as_secs_f64() * 1000.0))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.body, self.status)?;
        if let Some(timing) = self.timing() {
            write!(f, "{}", timing)?;
        }
        Ok(())
    }
}

/// How the read loop treats a single line
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// Nothing but a line terminator; dropped
    Blank,
    /// End of the current reply
    Sentinel(&'a str),
    /// Part of the current reply body
    Body(&'a str),
}

/// Classify a line as read from the pipe, terminator included
pub fn classify(line: &str) -> Line<'_> {
    if line == "\n" || line == "\r\n" {
        Line::Blank
    } else if line.starts_with(SENTINEL_PREFIX) {
        Line::Sentinel(line)
    } else {
        Line::Body(line)
    }
}

/// The command currently waiting for its reply
struct InFlight {
    reply_tx: oneshot::Sender<Reply>,
    timer: bool,
    /// Set once the command has been flushed to the host
    started: Option<Instant>,
}

/// Pending reply accumulator plus the single in-flight slot
///
/// The read loop feeds lines in, the command gate resets it before each
/// command. The finished reply is handed over through the oneshot channel
/// so the signal and the data arrive together.
#[derive(Default)]
pub(crate) struct ReplySlot {
    body: String,
    in_flight: Option<InFlight>,
    last: Option<Reply>,
}

impl ReplySlot {
    /// Start a new command: clear leftovers and install the reply channel
    pub fn begin(&mut self, timer: bool) -> oneshot::Receiver<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.body.clear();
        self.last = None;
        self.in_flight = Some(InFlight {
            reply_tx,
            timer,
            started: None,
        });
        reply_rx
    }

    /// Start the clock for a timed command, once it has been sent
    pub fn mark_sent(&mut self) {
        if let Some(in_flight) = self.in_flight.as_mut().filter(|f| f.timer) {
            in_flight.started = Some(Instant::now());
        }
    }

    /// Give up on the in-flight command (timeout or cancellation)
    pub fn abandon(&mut self) {
        self.in_flight = None;
    }

    /// Drop the in-flight command so its waiter sees the disconnect
    pub fn disconnect(&mut self) {
        if self.in_flight.take().is_some() {
            tracing::debug!("Releasing command still waiting for a reply");
        }
    }

    /// Feed one line; returns true when it completed a reply
    pub fn accept(&mut self, line: &str) -> bool {
        match classify(line) {
            Line::Blank => false,
            Line::Body(text) => {
                self.body.push_str(text);
                false
            }
            Line::Sentinel(status) => {
                let in_flight = self.in_flight.take();
                let reply = Reply {
                    body: std::mem::take(&mut self.body),
                    status: status.to_string(),
                    // A sentinel can beat `mark_sent` on a fast host
                    elapsed: in_flight.as_ref().filter(|f| f.timer).map(|f| {
                        f.started
                            .map(|started| started.elapsed())
                            .unwrap_or(Duration::ZERO)
                    }),
                };
                self.last = Some(reply.clone());
                if let Some(in_flight) = in_flight {
                    // The waiter may have timed out in the meantime
                    let _ = in_flight.reply_tx.send(reply);
                }
                true
            }
        }
    }

    /// The last complete reply, unless a command is still in flight
    pub fn latest(&self) -> Option<Reply> {
        if self.in_flight.is_some() {
            return None;
        }
        self.last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("\n"), Line::Blank);
        assert_eq!(classify("\r\n"), Line::Blank);
        assert_eq!(classify("  \n"), Line::Body("  \n"));
        assert_eq!(
            classify("BatchCommand finished: OK\n"),
            Line::Sentinel("BatchCommand finished: OK\n")
        );
        assert_eq!(classify("line1\n"), Line::Body("line1\n"));
    }

    #[test]
    fn test_reply_collects_body_until_sentinel() {
        let mut slot = ReplySlot::default();
        let mut rx = slot.begin(false);

        assert!(!slot.accept("line1\n"));
        assert!(!slot.accept("\n"));
        assert!(!slot.accept("line2\n"));
        assert!(slot.latest().is_none());
        assert!(slot.accept("BatchCommand finished: OK\n"));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.body, "line1\nline2\n");
        assert_eq!(reply.status, "BatchCommand finished: OK\n");
        assert!(reply.elapsed.is_none());
        assert!(reply.is_ok());
        assert_eq!(slot.latest(), Some(reply));
    }

    #[test]
    fn test_sentinel_without_command_still_finalizes() {
        let mut slot = ReplySlot::default();
        assert!(!slot.accept("stray\n"));
        assert!(slot.accept("BatchCommand finished: Failed!\n"));

        let reply = slot.latest().unwrap();
        assert_eq!(reply.body, "stray\n");
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_begin_discards_leftovers() {
        let mut slot = ReplySlot::default();
        slot.accept("unsolicited\n");
        slot.accept("BatchCommand finished: OK\n");
        slot.accept("more noise\n");

        let mut rx = slot.begin(true);
        assert!(slot.latest().is_none());
        slot.accept("BatchCommand finished: OK\n");

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.body, "");
        assert!(reply.elapsed.is_some());
        assert!(reply.timing().unwrap().starts_with("Execution time: "));
        assert!(reply.to_string().ends_with("ms"));
    }

    #[test]
    fn test_timer_starts_when_command_is_sent() {
        let mut slot = ReplySlot::default();
        let mut rx = slot.begin(true);
        std::thread::sleep(Duration::from_millis(50));
        slot.mark_sent();
        slot.accept("BatchCommand finished: OK\n");

        let elapsed = rx.try_recv().unwrap().elapsed.unwrap();
        assert!(elapsed < Duration::from_millis(50));

        let mut rx = slot.begin(true);
        slot.mark_sent();
        std::thread::sleep(Duration::from_millis(20));
        slot.accept("BatchCommand finished: OK\n");
        assert!(rx.try_recv().unwrap().elapsed.unwrap() >= Duration::from_millis(20));
    }

    #[test]
    fn test_untimed_command_has_no_elapsed() {
        let mut slot = ReplySlot::default();
        let mut rx = slot.begin(false);
        slot.mark_sent();
        slot.accept("BatchCommand finished: OK\n");
        assert!(rx.try_recv().unwrap().elapsed.is_none());
    }

    #[test]
    fn test_disconnect_releases_waiter() {
        let mut slot = ReplySlot::default();
        let mut rx = slot.begin(false);
        slot.disconnect();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_late_reply_after_abandon_only_updates_latest() {
        let mut slot = ReplySlot::default();
        let rx = slot.begin(false);
        slot.abandon();
        drop(rx);

        slot.accept("late\n");
        slot.accept("BatchCommand finished: OK\n");
        assert_eq!(slot.latest().unwrap().body, "late\n");
    }
}
