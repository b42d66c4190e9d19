//! # Bounded PCM Frame Queue
//!
//! Hands binary WebSocket frames from the session actor to the recognition
//! worker. The queue never blocks the producer: when it is full the oldest frame
//! is dropped, so a slow recognizer loses old audio instead of stalling the socket.
//! Closing the queue lets the consumer drain what is left and then stop.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Vec<u8>>,
    closed: bool,
    dropped: u64,
}

/// Single-consumer queue of raw PCM frames with drop-oldest overflow.
#[derive(Debug)]
pub struct PcmQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl PcmQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a frame. Returns `true` if an older frame had to be dropped.
    /// Frames pushed after [`PcmQueue::close`] are discarded.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let dropped = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return false;
            }
            let dropped = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                true
            } else {
                false
            };
            state.frames.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Stop accepting frames and wake the consumer.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_one();
    }

    /// Next frame, waiting if the queue is empty. `None` once closed and drained.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    /// Frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }
}
