//! Deferred-destroy queue
//!
//! Resource destructors never release native state directly; they hand the
//! payload to a queue tagged with the frame it was enqueued in. An entry is
//! released only once every frame that could still reference it has retired:
//! `current_frame - enqueue_frame >= max_in_flight`.

use std::collections::VecDeque;

/// FIFO of `(payload, enqueue_frame)` pairs released after the frames that
/// could reference the payload have retired.
///
/// Backends keep one queue per native object kind (images, buffers,
/// pipelines, bindless indices, ...), with the payload type carrying the
/// native handle plus whatever the release closure needs.
pub struct DestroyQueue<T> {
    entries: VecDeque<(T, u64)>,
}

impl<T> DestroyQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Enqueue a payload last referenced no later than `frame`
    pub fn push(&mut self, payload: T, frame: u64) {
        debug_assert!(
            self.entries.back().map_or(true, |(_, f)| *f <= frame),
            "destroy queue entries must be pushed in frame order"
        );
        self.entries.push_back((payload, frame));
    }

    /// Release every entry whose retire window has passed.
    ///
    /// Called once per frame during `end_frame`.
    pub fn update<F>(&mut self, current_frame: u64, max_in_flight: u64, mut release: F)
    where
        F: FnMut(T),
    {
        while let Some((_, frame)) = self.entries.front() {
            if frame.saturating_add(max_in_flight) <= current_frame {
                let (payload, _) = self.entries.pop_front().unwrap();
                release(payload);
            } else {
                break;
            }
        }
    }

    /// Release every entry unconditionally (shutdown pass, `current_frame = ∞`)
    pub fn drain<F>(&mut self, mut release: F)
    where
        F: FnMut(T),
    {
        while let Some((payload, _)) = self.entries.pop_front() {
            release(payload);
        }
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for DestroyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "destroy_queue_tests.rs"]
mod tests;
