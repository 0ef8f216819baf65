//! Single in-flight command execution.
//!
//! The firmware answers at most one request at a time, so the channel keeps
//! exactly one exchange slot: a submission lock serializes callers, the
//! reader thread resolves the slot, and a condition variable wakes the
//! waiting caller. Timed-out requests are written again up to the configured
//! retry budget; `ERR` replies resolve immediately and are never retried.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aclock_protocol::{Command, Frame, LineCodec, Notification, ProtocolError, Reply};
use parking_lot::{Condvar, Mutex};

use crate::config::{ClientConfig, CommandOptions};
use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;

/// Predicate deciding which inbound frame completes a command.
pub type ReplyMatcher = Arc<dyn Fn(&Frame) -> bool + Send + Sync + 'static>;

/// The matcher used for ordinary commands: any `OK`/`ERR` frame.
pub fn standard_matcher() -> ReplyMatcher {
    Arc::new(Reply::is_reply)
}

/// Why the client stopped working.
#[derive(Debug, Clone)]
pub(crate) struct FailureReason {
    kind: io::ErrorKind,
    message: String,
}

impl FailureReason {
    pub(crate) fn from_io(err: &io::Error) -> Self {
        FailureReason {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn to_io_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

#[derive(Debug, Clone)]
enum Lifecycle {
    Running,
    Failed(FailureReason),
    Closed,
}

/// How a pending exchange ended.
enum Outcome {
    /// A frame satisfied the command's matcher.
    Matched(Frame),
    /// The device answered `ERR`.
    DeviceError(Frame),
    /// The transport died while the exchange was pending.
    Failed(FailureReason),
    /// The client was closed while the exchange was pending.
    Cancelled,
}

struct PendingExchange {
    matcher: ReplyMatcher,
    outcome: Option<Outcome>,
}

struct Inner {
    lifecycle: Lifecycle,
    pending: Option<PendingExchange>,
}

/// Where the reader routed a frame.
pub(crate) enum RoutedFrame {
    /// The frame resolved the pending exchange.
    Completed,
    /// Reply-like frame with no exchange waiting for it; dropped.
    StaleReply(Frame),
    /// Unsolicited notification for the event dispatcher.
    Event(Notification),
}

/// State shared between the reader thread and command submitters.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    exchange_cv: Condvar,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Shared {
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Running,
                pending: None,
            }),
            exchange_cv: Condvar::new(),
        }
    }

    /// Classify one inbound frame, in arrival order.
    ///
    /// A pending command gets first pick: its matcher, then any `ERR` frame
    /// (a device-reported failure always resolves the pending command, no
    /// matter what the matcher says). Everything else is a notification,
    /// except reply-like frames nobody is waiting for.
    pub(crate) fn route(&self, frame: Frame) -> RoutedFrame {
        {
            let mut inner = self.inner.lock();
            if let Some(pending) = inner.pending.as_mut() {
                if pending.outcome.is_none() {
                    if (pending.matcher)(&frame) {
                        pending.outcome = Some(Outcome::Matched(frame));
                        self.exchange_cv.notify_all();
                        return RoutedFrame::Completed;
                    }
                    if frame.verb() == "ERR" {
                        pending.outcome = Some(Outcome::DeviceError(frame));
                        self.exchange_cv.notify_all();
                        return RoutedFrame::Completed;
                    }
                }
            }
        }
        if Reply::is_reply(&frame) {
            return RoutedFrame::StaleReply(frame);
        }
        RoutedFrame::Event(Notification::parse(&frame))
    }

    /// Mark the client failed and wake a pending exchange with the reason.
    pub(crate) fn fail(&self, reason: FailureReason) {
        let mut inner = self.inner.lock();
        if !matches!(inner.lifecycle, Lifecycle::Closed) {
            inner.lifecycle = Lifecycle::Failed(reason.clone());
        }
        if let Some(pending) = inner.pending.as_mut() {
            if pending.outcome.is_none() {
                pending.outcome = Some(Outcome::Failed(reason));
            }
        }
        self.exchange_cv.notify_all();
    }

    /// Mark the client closed and cancel a pending exchange.
    ///
    /// Returns false when the client was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if matches!(inner.lifecycle, Lifecycle::Closed) {
            return false;
        }
        inner.lifecycle = Lifecycle::Closed;
        if let Some(pending) = inner.pending.as_mut() {
            if pending.outcome.is_none() {
                pending.outcome = Some(Outcome::Cancelled);
            }
        }
        self.exchange_cv.notify_all();
        true
    }
}

/// Sends commands and hands back their replies.
///
/// One command is in flight at a time; concurrent callers are served in
/// submission order.
pub struct CommandChannel {
    shared: Arc<Shared>,
    writer: Mutex<Box<dyn Transport>>,
    submit_lock: Mutex<()>,
    default_timeout: Duration,
    default_max_retries: u32,
}

impl CommandChannel {
    pub(crate) fn new(
        shared: Arc<Shared>,
        writer: Box<dyn Transport>,
        config: &ClientConfig,
    ) -> Self {
        CommandChannel {
            shared,
            writer: Mutex::new(writer),
            submit_lock: Mutex::new(()),
            default_timeout: config.timeout,
            default_max_retries: config.max_retries,
        }
    }

    /// Execute a command and return the `OK` reply's argument tokens.
    ///
    /// `ERR` replies come back as [`ClientError::Device`].
    pub fn execute(
        &self,
        command: &Command,
        options: &CommandOptions,
    ) -> ClientResult<Vec<String>> {
        let frame = self.execute_matched(command, standard_matcher(), options)?;
        match Reply::parse(&frame)? {
            Reply::Ok(args) => Ok(args),
            Reply::Err { code, message } => Err(ClientError::device(code, message)),
        }
    }

    /// Execute a command with a custom reply matcher and return the raw
    /// frame that satisfied it.
    ///
    /// An `ERR` reply still resolves the call as [`ClientError::Device`]
    /// even when the matcher would not have accepted it.
    pub fn execute_matched(
        &self,
        command: &Command,
        matcher: ReplyMatcher,
        options: &CommandOptions,
    ) -> ClientResult<Frame> {
        let line = command.to_line();
        let bytes = LineCodec::encode_command(&line);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries);

        // One command in flight; later callers queue here in order.
        let _submission = self.submit_lock.lock();

        let mut attempts: u32 = 0;
        loop {
            self.install_pending(matcher.clone(), options.deadline)?;

            attempts += 1;
            tracing::debug!(verb = command.verb(), attempt = attempts, "writing request");
            tracing::trace!(line = %line, "request line");
            if let Err(err) = self.write_request(&bytes) {
                return Err(ClientError::Transport(err));
            }

            let attempt_deadline = Instant::now() + timeout;
            let wait_until = match options.deadline {
                Some(deadline) => deadline.min(attempt_deadline),
                None => attempt_deadline,
            };

            if let Some(outcome) = self.wait_for_outcome(wait_until) {
                return finish(outcome);
            }

            // Attempt timed out. The slot is already vacated, so a late
            // reply to this attempt gets dropped instead of leaking into
            // the next command.
            if let Some(deadline) = options.deadline {
                if Instant::now() >= deadline {
                    tracing::debug!(verb = command.verb(), "deadline passed, giving up");
                    return Err(ClientError::Cancelled);
                }
            }
            if attempts > max_retries {
                tracing::warn!(verb = command.verb(), attempts, "no reply, retries exhausted");
                return Err(ClientError::Timeout { attempts });
            }
            tracing::debug!(verb = command.verb(), "no reply, retrying");
        }
    }

    /// Check lifecycle and deadline, then claim the exchange slot.
    fn install_pending(
        &self,
        matcher: ReplyMatcher,
        deadline: Option<Instant>,
    ) -> ClientResult<()> {
        let mut inner = self.shared.inner.lock();
        match &inner.lifecycle {
            Lifecycle::Closed => return Err(ClientError::Closed),
            Lifecycle::Failed(reason) => {
                return Err(ClientError::Transport(reason.to_io_error()));
            }
            Lifecycle::Running => {}
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(ClientError::Cancelled);
            }
        }
        inner.pending = Some(PendingExchange {
            matcher,
            outcome: None,
        });
        Ok(())
    }

    fn write_request(&self, bytes: &[u8]) -> io::Result<()> {
        let result = {
            let mut writer = self.writer.lock();
            writer.write_all(bytes)
        };
        if let Err(ref err) = result {
            tracing::error!(error = %err, "transport write failed");
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.lifecycle, Lifecycle::Closed) {
                inner.lifecycle = Lifecycle::Failed(FailureReason::from_io(err));
            }
            inner.pending = None;
        }
        result
    }

    /// Wait until the pending exchange resolves or `wait_until` passes.
    /// Either way the slot is vacated before returning.
    fn wait_for_outcome(&self, wait_until: Instant) -> Option<Outcome> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.pending.as_mut().and_then(|p| p.outcome.take()) {
                inner.pending = None;
                return Some(outcome);
            }
            if self
                .shared
                .exchange_cv
                .wait_until(&mut inner, wait_until)
                .timed_out()
            {
                let outcome = inner.pending.as_mut().and_then(|p| p.outcome.take());
                inner.pending = None;
                return outcome;
            }
        }
    }
}

fn finish(outcome: Outcome) -> ClientResult<Frame> {
    match outcome {
        Outcome::Matched(frame) => Ok(frame),
        Outcome::DeviceError(frame) => match Reply::parse(&frame)? {
            Reply::Err { code, message } => Err(ClientError::device(code, message)),
            Reply::Ok(_) => Err(ClientError::Protocol(ProtocolError::ParseError(format!(
                "unexpected reply routed as device error: {}",
                frame
            )))),
        },
        Outcome::Failed(reason) => Err(ClientError::Transport(reason.to_io_error())),
        Outcome::Cancelled => Err(ClientError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(line: &str) -> Frame {
        Frame::new(0, line)
    }

    fn install(shared: &Shared, matcher: ReplyMatcher) {
        let mut inner = shared.inner.lock();
        inner.pending = Some(PendingExchange {
            matcher,
            outcome: None,
        });
    }

    fn pending_outcome(shared: &Shared) -> Option<&'static str> {
        let mut inner = shared.inner.lock();
        let outcome = inner.pending.as_mut()?.outcome.take()?;
        Some(match outcome {
            Outcome::Matched(_) => "matched",
            Outcome::DeviceError(_) => "device_error",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        })
    }

    #[test]
    fn test_route_without_pending() {
        let shared = Shared::new();
        assert!(matches!(
            shared.route(frame("OK 1 2 3")),
            RoutedFrame::StaleReply(_)
        ));
        assert!(matches!(
            shared.route(frame("ALARM_FIRED 2")),
            RoutedFrame::Event(Notification::AlarmFired { index: 2 })
        ));
    }

    #[test]
    fn test_route_matching_reply_completes_exchange() {
        let shared = Shared::new();
        install(&shared, standard_matcher());

        assert!(matches!(
            shared.route(frame("OK 1 2 3")),
            RoutedFrame::Completed
        ));
        assert_eq!(pending_outcome(&shared), Some("matched"));
    }

    #[test]
    fn test_route_err_overrides_matcher() {
        let shared = Shared::new();
        // Matcher only accepts OK, but ERR must still resolve the exchange.
        install(&shared, Arc::new(|f: &Frame| f.verb() == "OK"));

        assert!(matches!(
            shared.route(frame("ERR 8 no such alarm")),
            RoutedFrame::Completed
        ));
        assert_eq!(pending_outcome(&shared), Some("device_error"));
    }

    #[test]
    fn test_route_notification_bypasses_pending() {
        let shared = Shared::new();
        install(&shared, standard_matcher());

        assert!(matches!(
            shared.route(frame("TIMER_FIRED")),
            RoutedFrame::Event(Notification::TimerFired)
        ));
        // The exchange is still unresolved.
        assert_eq!(pending_outcome(&shared), None);
    }

    #[test]
    fn test_route_second_reply_is_stale() {
        let shared = Shared::new();
        install(&shared, standard_matcher());

        assert!(matches!(shared.route(frame("OK")), RoutedFrame::Completed));
        assert!(matches!(
            shared.route(frame("OK")),
            RoutedFrame::StaleReply(_)
        ));
    }

    #[test]
    fn test_close_cancels_pending() {
        let shared = Shared::new();
        install(&shared, standard_matcher());

        assert!(shared.close());
        assert_eq!(pending_outcome(&shared), Some("cancelled"));
        // Second close is a no-op.
        assert!(!shared.close());
    }

    #[test]
    fn test_fail_resolves_pending_with_reason() {
        let shared = Shared::new();
        install(&shared, standard_matcher());

        let reason = FailureReason {
            kind: io::ErrorKind::BrokenPipe,
            message: "port gone".to_string(),
        };
        shared.fail(reason);
        assert_eq!(pending_outcome(&shared), Some("failed"));
        assert!(matches!(
            shared.inner.lock().lifecycle,
            Lifecycle::Failed(_)
        ));
    }
}
