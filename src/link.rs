//! # Link Management Module
//!
//! Owns the radio connection lifecycle for the sensor module: connect,
//! read, reconnect on failure, tear down on stop. The only component
//! that touches the transport.
//!
//! ## Key Components
//! - `LinkManager`: runs in a dedicated thread with its own Tokio runtime
//! - `LinkHandle`: start/stop/reset control surface handed to the session
//! - `LinkEvent`: status transitions and raw chunks, pushed into a
//!   bounded channel the pipeline thread drains
//!
//! ## Failure Semantics
//! Transport errors inside the read loop are logged and treated as a
//! disconnect, never propagated as fatal. After a disconnect the manager
//! retries (with the configured delay) until a stop is requested. Every
//! exit path releases the transport before returning, so a dangling open
//! connection cannot outlive a session.
//!
//! ## Why a Dedicated Thread
//! The connection process involves blocking async operations. Running in
//! a separate thread with its own Tokio runtime keeps the pipeline thread
//! free to drain events.

use crate::error::{LinkError, TransportError};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;

/// How long the read loop waits between cooperative stop-flag checks.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the pipeline to drain a full event queue before
/// dropping a chunk.
const EVENT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the link manager toward the pipeline thread.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Status(LinkState),
    Chunk(Vec<u8>),
}

#[derive(Debug, Clone)]
enum LinkCommand {
    Start,
}

enum ReadOutcome {
    Stopped,
    Reset,
    Lost,
}

/// Control surface for the link thread.
///
/// Cloneable; dropping every handle (with a stop issued) lets the link
/// thread exit once its current session ends.
#[derive(Clone)]
pub struct LinkHandle {
    command_tx: mpsc::Sender<LinkCommand>,
    stop: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    state: Arc<Mutex<LinkState>>,
}

impl LinkHandle {
    /// Begin (or resume) the connect/read lifecycle.
    pub fn start(&self) {
        if self.command_tx.send(LinkCommand::Start).is_err() {
            log::error!("Link thread is gone; cannot start");
        }
    }

    /// Request a stop. The read loop notices at its next suspension
    /// point and halts in `Disconnected` without auto-retry.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Force a teardown-and-reconnect of the active session.
    pub fn reset(&self) {
        self.reset.store(true, Ordering::Relaxed);
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }
}

/// Manages the radio connection lifecycle.
///
/// Processes start commands and runs the connect/read/retry loop against
/// the transport it owns exclusively.
pub struct LinkManager {
    command_rx: mpsc::Receiver<LinkCommand>,
    event_tx: crossbeam_channel::Sender<LinkEvent>,
    transport: Box<dyn Transport>,
    retry_delay: Duration,
    stop: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    state: Arc<Mutex<LinkState>>,
}

impl LinkManager {
    /// Creates a new LinkManager.
    ///
    /// Returns the manager and the handle used to control it from the
    /// session thread.
    pub fn new(
        transport: Box<dyn Transport>,
        event_tx: crossbeam_channel::Sender<LinkEvent>,
        retry_delay: Duration,
    ) -> (Self, LinkHandle) {
        let (command_tx, command_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reset = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(LinkState::Disconnected));

        let handle = LinkHandle {
            command_tx,
            stop: stop.clone(),
            reset: reset.clone(),
            state: state.clone(),
        };

        let manager = LinkManager {
            command_rx,
            event_tx,
            transport,
            retry_delay,
            stop,
            reset,
            state,
        };

        (manager, handle)
    }

    /// Runs the link management loop.
    ///
    /// This should be called in a spawned thread. It blocks until the
    /// command channel is closed and any active session has stopped.
    pub fn run(mut self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = LinkError::RuntimeCreation(e.to_string());
                log::error!("{}", error);
                self.publish(LinkState::Disconnected);
                return;
            }
        };

        while let Ok(command) = self.command_rx.recv() {
            match command {
                LinkCommand::Start => {
                    // Each session starts with fresh flags
                    self.stop.store(false, Ordering::Relaxed);
                    self.reset.store(false, Ordering::Relaxed);
                    rt.block_on(self.run_link());
                }
            }
        }

        log::info!("Link manager: command channel closed, shutting down");
    }

    /// Connect/read/retry until a stop is requested.
    async fn run_link(&mut self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            self.publish(LinkState::Connecting);
            match self.transport.connect().await {
                Ok(()) => {
                    log::info!("Link established");
                    self.publish(LinkState::Connected);
                    let outcome = self.read_loop().await;

                    // Scoped release before deciding what happens next
                    if let Err(e) = self.transport.disconnect().await {
                        log::warn!("Error releasing transport: {}", e);
                    }
                    self.publish(LinkState::Disconnected);

                    match outcome {
                        ReadOutcome::Stopped => break,
                        ReadOutcome::Reset => {
                            log::info!("Link reset requested; reconnecting");
                            continue;
                        }
                        ReadOutcome::Lost => {}
                    }
                }
                Err(TransportError::NoAdapter) => {
                    // No point retrying without a radio
                    log::error!("{}", TransportError::NoAdapter);
                    self.publish(LinkState::Disconnected);
                    break;
                }
                Err(e) => {
                    log::warn!("Connect attempt failed: {}", e);
                    self.publish(LinkState::Disconnected);
                }
            }

            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if !self.retry_delay.is_zero() {
                // Backoff stays responsive to stop requests
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = wait_for_flag(self.stop.clone()) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        // Final teardown; harmless if already disconnected
        if let Err(e) = self.transport.disconnect().await {
            log::warn!("Error releasing transport: {}", e);
        }
        self.publish(LinkState::Disconnected);
    }

    async fn read_loop(&mut self) -> ReadOutcome {
        enum ReadStep {
            Chunk(Vec<u8>),
            Ended,
            Failed(TransportError),
            Flagged,
        }

        loop {
            let stop = self.stop.clone();
            let reset = self.reset.clone();

            let step = tokio::select! {
                result = self.transport.recv_chunk() => {
                    match result {
                        Ok(Some(chunk)) => ReadStep::Chunk(chunk),
                        Ok(None) => ReadStep::Ended,
                        Err(e) => ReadStep::Failed(e),
                    }
                }
                _ = wait_for_either_flag(stop, reset) => ReadStep::Flagged,
            };

            match step {
                ReadStep::Chunk(chunk) => self.forward_chunk(chunk),
                ReadStep::Ended => {
                    log::info!("Transport stream ended");
                    return ReadOutcome::Lost;
                }
                ReadStep::Failed(e) => {
                    log::warn!("Read failed, treating as disconnect: {}", e);
                    return ReadOutcome::Lost;
                }
                ReadStep::Flagged => {
                    if self.stop.load(Ordering::Relaxed) {
                        log::info!("Stop requested; leaving read loop");
                        return ReadOutcome::Stopped;
                    }
                    self.reset.store(false, Ordering::Relaxed);
                    return ReadOutcome::Reset;
                }
            }

            // Re-check after each chunk so a stop never waits on the radio
            if self.stop.load(Ordering::Relaxed) {
                return ReadOutcome::Stopped;
            }
            if self.reset.swap(false, Ordering::Relaxed) {
                return ReadOutcome::Reset;
            }
        }
    }

    fn forward_chunk(&self, chunk: Vec<u8>) {
        match self
            .event_tx
            .send_timeout(LinkEvent::Chunk(chunk), EVENT_SEND_TIMEOUT)
        {
            Ok(()) => {}
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                log::warn!("Pipeline backlogged; dropping chunk");
            }
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                log::debug!("Pipeline gone; dropping chunk");
            }
        }
    }

    fn publish(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
        if self
            .event_tx
            .send_timeout(LinkEvent::Status(state), EVENT_SEND_TIMEOUT)
            .is_err()
        {
            log::debug!("Pipeline not draining status events");
        }
    }
}

async fn wait_for_flag(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

async fn wait_for_either_flag(a: Arc<AtomicBool>, b: Arc<AtomicBool>) {
    loop {
        if a.load(Ordering::Relaxed) || b.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}
