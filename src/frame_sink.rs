//! The boundary between the simulator's camera thread and the recorder.
//!
//! The camera callback calls [`FrameSink::receive`], which converts the image
//! to packed BGR and pushes it onto a bounded queue; the main loop drains the
//! queue once per tick. The callback never waits on the main loop: when the
//! queue is full the oldest frame is thrown away and a warning is logged.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use log::{trace, warn};

use crate::simulator::RawImage;

const DROP_WARNING_EVERY: u64 = 20;

/// A camera image in storage format: packed BGR, 3 bytes per pixel, row
/// major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Converts a BGRA simulator image by dropping the alpha channel. Returns
    /// `None` if the buffer does not hold `width * height` pixels.
    pub fn from_bgra(raw: &RawImage, captured_at: Instant) -> Option<Self> {
        let n_pixels = raw.width as usize * raw.height as usize;
        if raw.data.len() != n_pixels * 4 {
            return None;
        }

        let mut pixels = Vec::with_capacity(n_pixels * 3);
        for bgra in raw.data.chunks_exact(4) {
            pixels.extend_from_slice(&bgra[..3]);
        }

        Some(Frame {
            captured_at,
            width: raw.width,
            height: raw.height,
            pixels,
        })
    }

    /// The `[b, g, r]` value at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }
}

/// What became of an image handed to [`FrameSink::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Queued,
    /// Queued, and the oldest waiting frame was dropped to make room.
    QueuedDroppingOldest,
    /// Not recording; the image was only counted.
    Ignored,
    /// The buffer did not hold `width * height` BGRA pixels.
    Rejected,
}

/// A cloneable handle to the shared frame queue. One clone lives in the
/// camera callback, the other in the main loop.
#[derive(Debug, Clone)]
pub struct FrameSink {
    queue: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
    accepting: Arc<AtomicBool>,
    received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            accepting: Arc::new(AtomicBool::new(false)),
            received: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames are only converted and queued while accepting; otherwise they
    /// are counted and discarded. The recorder turns this on while a
    /// session is recording.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
        if !accepting {
            self.queue_lock().clear();
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Entry point for the camera callback.
    pub fn receive(&self, raw: RawImage) -> Received {
        let captured_at = Instant::now();
        self.received.fetch_add(1, Ordering::Relaxed);
        if !self.is_accepting() {
            return Received::Ignored;
        }

        let Some(frame) = Frame::from_bgra(&raw, captured_at) else {
            let n = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 || n % DROP_WARNING_EVERY == 0 {
                warn!(
                    "Rejected malformed camera image {} ({} bytes for {}x{}), {} so far",
                    raw.frame,
                    raw.data.len(),
                    raw.width,
                    raw.height,
                    n
                );
            }
            return Received::Rejected;
        };

        let mut queue = self.queue_lock();
        let overflowed = queue.len() >= self.capacity;
        if overflowed {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);

        trace!("Queued camera frame {}", raw.frame);
        if !overflowed {
            return Received::Queued;
        }
        let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % DROP_WARNING_EVERY == 0 {
            warn!("Frame queue full, dropped oldest frame ({} dropped so far)", n);
        }
        Received::QueuedDroppingOldest
    }

    /// Take every queued frame, oldest first.
    pub fn drain(&self) -> Vec<Frame> {
        self.queue_lock().drain(..).collect()
    }

    /// Total images delivered by the simulator, accepted or not.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Frames thrown away because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn queue_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Frame>> {
        // a panic elsewhere must not take the camera thread down with it
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(frame: u64, width: u32, height: u32) -> RawImage {
        let data = (0..width * height)
            .flat_map(|i| [i as u8, 10, 20, 255])
            .collect();
        RawImage {
            frame,
            width,
            height,
            data,
        }
    }

    #[test]
    fn bgra_to_bgr() {
        let frame = Frame::from_bgra(&raw(0, 2, 2), Instant::now()).unwrap();
        assert_eq!(frame.pixels.len(), 12);
        assert_eq!(frame.pixel(0, 0), Some([0, 10, 20]));
        assert_eq!(frame.pixel(1, 1), Some([3, 10, 20]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut bad = raw(0, 2, 2);
        bad.data.truncate(10);
        assert!(Frame::from_bgra(&bad, Instant::now()).is_none());

        let sink = FrameSink::new(4);
        sink.set_accepting(true);
        assert_eq!(sink.receive(bad), Received::Rejected);
        assert_eq!(sink.rejected(), 1);
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn not_accepting_only_counts() {
        let sink = FrameSink::new(4);
        assert_eq!(sink.receive(raw(0, 1, 1)), Received::Ignored);
        sink.receive(raw(1, 1, 1));
        assert_eq!(sink.received(), 2);
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn drain_keeps_order() {
        let sink = FrameSink::new(8);
        sink.set_accepting(true);
        for i in 0..5 {
            sink.receive(raw(i, 1, 1));
        }
        let frames = sink.drain();
        assert_eq!(frames.len(), 5);
        assert!(frames
            .windows(2)
            .all(|w| w[0].captured_at <= w[1].captured_at));
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let sink = FrameSink::new(3);
        sink.set_accepting(true);
        let outcomes: Vec<Received> = (0..5u8)
            .map(|i| {
                let mut image = raw(i as u64, 1, 1);
                image.data[0] = i;
                sink.receive(image)
            })
            .collect();
        assert_eq!(outcomes[2], Received::Queued);
        assert_eq!(outcomes[3], Received::QueuedDroppingOldest);
        assert_eq!(sink.dropped(), 2);
        let firsts: Vec<u8> = sink.drain().iter().map(|f| f.pixels[0]).collect();
        assert_eq!(firsts, vec![2, 3, 4]);
    }

    #[test]
    fn stop_accepting_clears_queue() {
        let sink = FrameSink::new(3);
        sink.set_accepting(true);
        sink.receive(raw(0, 1, 1));
        sink.set_accepting(false);
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn callback_thread() {
        let sink = FrameSink::new(100);
        sink.set_accepting(true);
        let callback_sink = sink.clone();
        std::thread::spawn(move || {
            for i in 0..50 {
                callback_sink.receive(raw(i, 2, 2));
            }
        })
        .join()
        .unwrap();
        assert_eq!(sink.drain().len(), 50);
        assert_eq!(sink.received(), 50);
    }
}
