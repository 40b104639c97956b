//! Raw frame hand-off between capture and analysis.
//!
//! Bounded channels evict the oldest pending frame when full, so a slow
//! analysis stage sees the most recent frames instead of an ever-growing
//! backlog. Capacity 0 gives an unbounded channel.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use facefeed_hw::Frame;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a blocked receiver re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = if capacity == 0 {
        crossbeam_channel::unbounded()
    } else {
        crossbeam_channel::bounded(capacity)
    };
    let evict_rx = (capacity > 0).then(|| rx.clone());
    (FrameSender { tx, evict_rx }, FrameReceiver { rx })
}

pub struct FrameSender {
    tx: Sender<Frame>,
    evict_rx: Option<Receiver<Frame>>,
}

impl FrameSender {
    /// Enqueue `frame`. Returns the pending frame evicted to make room, if any.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut frame = frame;
        let mut evicted = None;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(rejected)) => {
                    frame = rejected;
                    if let Some(old) = self.evict_rx.as_ref().and_then(|rx| rx.try_recv().ok()) {
                        evicted = Some(old);
                    }
                }
                // The sender keeps a receiver clone for eviction, so the
                // channel cannot disconnect while `self` is alive.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

impl FrameReceiver {
    /// Next frame in FIFO order. `None` once the sender is gone and the
    /// queue is drained, or as soon as `cancel` fires.
    pub fn recv(&self, cancel: &CancellationToken) -> Option<Frame> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.rx.recv_timeout(CANCEL_POLL) {
                Ok(frame) => return Some(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), sequence)
    }

    fn drain(rx: &FrameReceiver) -> Vec<u64> {
        let cancel = CancellationToken::new();
        std::iter::from_fn(|| rx.recv(&cancel)).map(|f| f.sequence).collect()
    }

    #[test]
    fn test_unbounded_keeps_everything_in_order() {
        let (tx, rx) = frame_channel(0);
        for seq in 0..50 {
            assert!(tx.push(frame(seq)).is_none());
        }
        drop(tx);
        assert_eq!(drain(&rx), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_bounded_drops_oldest() {
        let (tx, rx) = frame_channel(1);
        assert!(tx.push(frame(0)).is_none());
        let evicted = tx.push(frame(1)).map(|f| f.sequence);
        assert_eq!(evicted, Some(0));
        drop(tx);
        assert_eq!(drain(&rx), vec![1]);
    }

    #[test]
    fn test_bounded_survivors_stay_in_order() {
        let (tx, rx) = frame_channel(3);
        let dropped = (0..10).filter_map(|seq| tx.push(frame(seq))).count();
        drop(tx);
        assert_eq!(dropped, 7);
        assert_eq!(drain(&rx), vec![7, 8, 9]);
    }

    #[test]
    fn test_recv_returns_none_when_cancelled() {
        let (_tx, rx) = frame_channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(rx.recv(&cancel).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_recv_wakes_on_cancel_from_other_thread() {
        let (_tx, rx) = frame_channel(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        assert!(rx.recv(&cancel).is_none());
        handle.join().unwrap();
    }
}
