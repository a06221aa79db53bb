//! Bounded blocking FIFO between acquisition and encoding

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error};

use crate::Frame;

/// Create a queue holding at most `capacity` frames.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = flume::bounded(capacity);
    (
        FrameSender {
            tx,
            capacity,
            waits: 0,
        },
        FrameReceiver { rx },
    )
}

/// Producer half. Owned by the acquisition loop; closing consumes it, so no
/// push can follow a close.
pub struct FrameSender {
    tx: Sender<Frame>,
    capacity: usize,
    waits: u64,
}

/// Consumer half
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

/// Result of [`FrameReceiver::pop`]
#[derive(Debug)]
pub enum Popped {
    Frame(Frame),
    /// Empty and closed: nothing more will arrive
    Closed,
}

impl FrameSender {
    /// Enqueue a frame, blocking while the queue is full.
    ///
    /// Never drops or overwrites. Returns `false` only when the consumer is
    /// gone, which means the frame was not accepted.
    pub fn push(&mut self, frame: Frame) -> bool {
        let frame = match self.tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(frame)) => {
                error!(sequence = frame.sequence, "Frame queue consumer is gone");
                return false;
            }
            Err(TrySendError::Full(frame)) => frame,
        };

        self.waits += 1;
        metrics::counter!("backpressure_waits").increment(1);
        debug!(
            sequence = frame.sequence,
            capacity = self.capacity,
            "Frame queue full, waiting for the encoder"
        );

        match self.tx.send(frame) {
            Ok(()) => true,
            Err(e) => {
                error!(sequence = e.0.sequence, "Frame queue consumer is gone");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pushes that had to wait for space
    pub fn backpressure_waits(&self) -> u64 {
        self.waits
    }

    /// Close the queue for pushes. Frames already queued stay poppable.
    pub fn close(self) {
        debug!(pending = self.tx.len(), "Frame queue closed");
    }
}

impl FrameReceiver {
    /// Dequeue the oldest frame, blocking while the queue is empty and open.
    pub fn pop(&self) -> Popped {
        match self.rx.recv() {
            Ok(frame) => {
                metrics::gauge!("queue_depth").set(self.rx.len() as f64);
                Popped::Frame(frame)
            }
            Err(_) => Popped::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;
    use bytes::Bytes;
    use std::thread;
    use std::time::{Duration, SystemTime};

    fn frame(sequence: u64) -> Frame {
        Frame {
            sequence,
            captured_at: SystemTime::now(),
            meta: FrameMetadata {
                width: 1,
                height: 1,
                device_frame_id: None,
                device_timestamp: None,
            },
            pixels: Bytes::from_static(&[0, 0, 0]),
        }
    }

    fn sequence(popped: Popped) -> Option<u64> {
        match popped {
            Popped::Frame(f) => Some(f.sequence),
            Popped::Closed => None,
        }
    }

    #[test]
    fn preserves_order_and_drains_after_close() {
        let (mut tx, rx) = frame_queue(4);
        for seq in 1..=3 {
            assert!(tx.push(frame(seq)));
        }
        tx.close();

        assert_eq!(sequence(rx.pop()), Some(1));
        assert_eq!(sequence(rx.pop()), Some(2));
        assert_eq!(sequence(rx.pop()), Some(3));
        assert!(matches!(rx.pop(), Popped::Closed));
        assert!(matches!(rx.pop(), Popped::Closed));
    }

    #[test]
    fn full_queue_blocks_until_pop() {
        let (mut tx, rx) = frame_queue(1);
        assert!(tx.push(frame(1)));

        let producer = thread::spawn(move || {
            let pushed = tx.push(frame(2));
            (pushed, tx.backpressure_waits())
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished(), "push should block on a full queue");
        assert_eq!(rx.len(), 1);

        assert_eq!(sequence(rx.pop()), Some(1));
        let (pushed, waits) = producer.join().unwrap();
        assert!(pushed);
        assert_eq!(waits, 1);
        assert_eq!(sequence(rx.pop()), Some(2));
    }

    #[test]
    fn pop_blocks_until_push_or_close() {
        let (mut tx, rx) = frame_queue(2);
        let consumer = thread::spawn(move || (sequence(rx.pop()), sequence(rx.pop())));

        thread::sleep(Duration::from_millis(20));
        assert!(tx.push(frame(9)));
        tx.close();

        assert_eq!(consumer.join().unwrap(), (Some(9), None));
    }

    #[test]
    fn push_without_consumer_reports_failure() {
        let (mut tx, rx) = frame_queue(2);
        drop(rx);
        assert!(!tx.push(frame(1)));
    }
}
