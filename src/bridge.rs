//! Hand-off from the blocking reader thread to the async consumer.
//!
//! A forwarding thread polls the source with a short timeout and pushes into
//! an unbounded async channel, so the consumer only ever awaits. There is no
//! flow control: a slow consumer lets the buffer grow.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_std::channel;
use async_std::channel::Receiver;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The producer side hung up for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceClosed;

pub trait EventSource<T>: Send + 'static {
    /// Waits at most `timeout` for the next event. `Ok(None)` means the
    /// window expired, which is not an error.
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<T>, SourceClosed>;
}

impl<T: Send + 'static> EventSource<T> for mpsc::Receiver<T> {
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<T>, SourceClosed> {
        match self.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SourceClosed),
        }
    }
}

pub struct EventBridge<T> {
    receiver: Receiver<T>,
    stopped: Arc<AtomicBool>,
    forwarder: Option<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> EventBridge<T> {
    pub fn new<S: EventSource<T>>(source: S, poll_timeout: Duration) -> std::io::Result<EventBridge<T>> {
        let (sender, receiver) = channel::unbounded();
        let stopped = Arc::new(AtomicBool::new(false));

        let forwarder = {
            let stopped = stopped.clone();
            let mut source = source;
            thread::Builder::new()
                .name("event-bridge".to_string())
                .spawn(move || {
                    while !stopped.load(Ordering::SeqCst) {
                        match source.try_receive(poll_timeout) {
                            Ok(Some(event)) => {
                                if sender.try_send(event).is_err() {
                                    debug!("Bridge consumer is gone, stopping forwarder");
                                    break;
                                }
                            },
                            Ok(None) => continue,
                            Err(SourceClosed) => {
                                debug!("Bridge source closed");
                                break;
                            }
                        }
                    }
                })?
        };

        Ok(EventBridge { receiver, stopped, forwarder: Some(forwarder) })
    }

    /// Next event in emission order. `None` once the forwarder has exited
    /// and everything it forwarded has been taken.
    pub async fn get(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }
}

impl<T> EventBridge<T> {
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }

    /// Stops the forwarding thread and waits for it, which takes at most one
    /// poll timeout. Events already buffered can still be drained afterwards.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(forwarder) = self.forwarder.take() {
            if forwarder.join().is_err() {
                error!("Event bridge forwarder panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.forwarder.is_none()
    }
}

impl<T> Drop for EventBridge<T> {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop();
        }
    }
}
