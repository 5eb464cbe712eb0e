//! Background frame generator.
//!
//! Stands in for a channel's receive interrupt: a thread raises
//! `notify_receive` (and, in chaos mode, the odd receive error) against the
//! core without ever taking the administrative lock.

use crate::common::{MockMode, MockRng, TimingConfig};
use bytes::{BufMut, Bytes, BytesMut};
use cronyx_core::{BinderError, BinderResult, ItemRef, LineError, WeakCore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Probability of a receive error per frame in chaos mode.
const CHAOS_ERROR_RATE: f64 = 0.02;

/// Deterministic frame: big-endian sequence number followed by a counting
/// pattern.
pub fn frame_pattern(seq: u64, len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(len);
    for b in seq.to_be_bytes().iter().take(len) {
        buf.put_u8(*b);
    }
    let mut fill = seq as u8;
    while buf.len() < len {
        buf.put_u8(fill);
        fill = fill.wrapping_add(1);
    }
    buf.freeze()
}

/// Handle to a running generator. Dropping it stops the thread.
#[derive(Debug)]
pub struct TrafficGenerator {
    stop: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl TrafficGenerator {
    pub(crate) fn spawn(
        core: WeakCore,
        item: ItemRef,
        rng: Arc<MockRng>,
        mode: MockMode,
        timing: TimingConfig,
        frames: Option<u64>,
        frame_len: usize,
    ) -> BinderResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(AtomicU64::new(0));
        let thread_stop = stop.clone();
        let thread_sent = sent.clone();
        let handle = std::thread::Builder::new()
            .name(format!("cxmock-rx-{}", item.id()))
            .spawn(move || {
                let mut seq = 0u64;
                while !thread_stop.load(Ordering::Acquire) && frames.map_or(true, |n| seq < n) {
                    let Some(core) = core.upgrade() else {
                        break;
                    };
                    if mode.is_chaotic() && rng.should_fail(CHAOS_ERROR_RATE) {
                        core.notify_receive_error(&item, LineError::Crc);
                    } else {
                        let frame = match mode {
                            MockMode::Instant => frame_pattern(seq, frame_len),
                            _ => rng.payload(frame_len),
                        };
                        core.notify_receive(&item, frame);
                    }
                    drop(core);
                    seq += 1;
                    thread_sent.store(seq, Ordering::Release);
                    if mode.is_paced() {
                        std::thread::sleep(timing.frame_interval());
                    } else if seq % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
                debug!(item = %item.name(), frames = seq, "traffic generator finished");
            })
            .map_err(|e| BinderError::ResourceExhausted(format!("traffic thread: {e}")))?;
        Ok(Self {
            stop,
            sent,
            handle: Some(handle),
        })
    }

    /// Notifications raised so far (frames and errors).
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Waits for a bounded run to finish; returns the notifications raised.
    pub fn join(mut self) -> u64 {
        self.wait();
        self.sent()
    }

    /// Stops the thread and returns the notifications raised.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        self.wait();
        self.sent()
    }

    fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("traffic thread panicked");
            }
        }
    }
}

impl Drop for TrafficGenerator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.wait();
    }
}
