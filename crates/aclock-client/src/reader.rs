//! Reader thread that drains the transport.
//!
//! All inbound traffic goes through this single thread: bytes are fed to the
//! line codec, decoded frames are routed to the pending command or forwarded
//! to the event dispatcher, in arrival order. When the transport dies the
//! thread marks the client failed and exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use aclock_protocol::{LineCodec, Notification};
use crossbeam_channel::Sender;

use crate::channel::{FailureReason, RoutedFrame, Shared};
use crate::transport::Transport;

/// Reader thread handle.
pub(crate) struct Reader {
    stop_flag: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Reader {
    /// Start the reader thread over the given read half.
    ///
    /// The `events` sender is owned by the thread; dropping it on exit is
    /// what tells the event dispatcher to drain and finish.
    pub(crate) fn spawn(
        mut transport: Box<dyn Transport>,
        shared: Arc<Shared>,
        events: Sender<Notification>,
        max_frame_len: usize,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);

        let thread_handle = thread::spawn(move || {
            let mut codec = LineCodec::with_max_line_len(max_frame_len);
            let mut buf = [0u8; 256];

            while !thread_stop.load(Ordering::Relaxed) {
                match transport.read(&mut buf) {
                    Ok(0) => {
                        tracing::error!("transport closed by peer");
                        let err = io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "transport closed by peer",
                        );
                        shared.fail(FailureReason::from_io(&err));
                        break;
                    }
                    Ok(n) => {
                        codec.push(&buf[..n]);
                        drain_codec(&mut codec, &shared, &events);
                    }
                    Err(err) if is_poll_timeout(&err) => continue,
                    Err(err) => {
                        tracing::error!(error = %err, "transport read failed");
                        shared.fail(FailureReason::from_io(&err));
                        break;
                    }
                }
            }
        });

        Reader {
            stop_flag,
            thread_handle: Some(thread_handle),
        }
    }

    /// Stop the reader thread and wait for it to finish.
    pub(crate) fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Don't wait for the thread in drop - it will terminate on its own
    }
}

/// Decode every complete frame buffered in the codec and route it.
fn drain_codec(codec: &mut LineCodec, shared: &Shared, events: &Sender<Notification>) {
    loop {
        match codec.decode() {
            Ok(Some(frame)) => match shared.route(frame) {
                RoutedFrame::Completed => {}
                RoutedFrame::StaleReply(frame) => {
                    // A reply arrived after its command timed out.
                    tracing::warn!(frame = %frame, "dropping reply with no pending command");
                }
                RoutedFrame::Event(event) => {
                    if events.send(event).is_err() {
                        // Dispatcher already gone; replies still matter, so
                        // keep reading.
                        tracing::trace!("event dispatcher gone, notification dropped");
                    }
                }
            },
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame");
            }
        }
    }
}

/// Whether a read error is just an empty poll cycle.
fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
