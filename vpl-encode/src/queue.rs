use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::frame::Frame;

/// FIFO handoff of captured frames to the encode loop.
#[derive(Debug)]
pub struct FrameQueue {
    frame_tx: Sender<Frame>,
    frame_rx: Receiver<Frame>,
    interrupt_tx: Sender<()>,
    interrupt_rx: Receiver<()>,
}

impl FrameQueue {
    pub fn new() -> Self {
        let (frame_tx, frame_rx) = channel::unbounded();
        let (interrupt_tx, interrupt_rx) = channel::unbounded();
        Self {
            frame_tx,
            frame_rx,
            interrupt_tx,
            interrupt_rx,
        }
    }

    /// Append a frame, returns the number of frames now waiting.
    pub fn push(&self, frame: Frame) -> usize {
        // Both ends live in `self`, the channel cannot be disconnected.
        self.frame_tx.send(frame).ok();
        self.frame_rx.len()
    }

    pub fn pop(&self) -> Option<Frame> {
        self.frame_rx.try_recv().ok()
    }

    /// Like [`FrameQueue::pop`], but waits up to `timeout` for a frame to
    /// arrive. Returns early after [`FrameQueue::interrupt`].
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        if let Ok(frame) = self.frame_rx.try_recv() {
            return Some(frame);
        }
        crossbeam::select! {
            recv(self.frame_rx) -> frame => frame.ok(),
            recv(self.interrupt_rx) -> _ => None,
            default(timeout) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.frame_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_rx.is_empty()
    }

    /// Wake up a consumer blocked in [`FrameQueue::pop_timeout`].
    pub fn interrupt(&self) {
        self.interrupt_tx.send(()).ok();
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
