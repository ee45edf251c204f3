//! Stream framer: extracts complete protocol frames from fragmented reads.
//!
//! TCP is a stream protocol without message boundaries: a single read may
//! contain a partial frame, one complete frame, several frames, or noise
//! between transmissions. The scanner buffers the unconsumed remainder
//! across reads, so feeding a message one byte at a time yields exactly the
//! same frames as feeding it whole, including when a multi-character
//! marker itself is split across reads.
//!
//! # Markers
//!
//! Frames are delimited by per-driver start/end markers. Markers are
//! strings: most dialects use one-character control markers (ENQ/EOT,
//! VT/FS, STX/ETX), the sentinel dialects use a line of text such as
//! `TRANSFER FINISH` as the end marker. An *empty* start marker means the
//! stream is always inside a frame and only the end marker cuts it.
//!
//! # State machine
//!
//! ```text
//! ┌──────────────┐ start marker ┌──────────────┐  end marker  ┌─────────────┐
//! │ OutsideFrame │─────────────>│ InsideFrame  │─────────────>│ frame ready │
//! └──────────────┘              └──────────────┘              └─────────────┘
//!        │  bytes before the marker      │ no end marker yet
//!        │  are discarded (noise)        │ remainder buffered for next feed
//! ```
//!
//! Scanner state is strictly per-connection and is never shared.

use std::collections::VecDeque;

/// Upper bound on the buffered (incomplete-frame) text.
///
/// A stream that keeps growing without ever producing an end marker is a
/// protocol violation; the scanner resets rather than accumulate without
/// bound.
const MAX_BUFFER_BYTES: usize = 64 * 1024;

/// Stateful frame extractor for one connection.
///
/// Feed raw text with [`feed`](Self::feed), then take completed frames with
/// [`drain_frames`](Self::drain_frames). Only non-empty frames are emitted.
#[derive(Debug)]
pub struct FrameScanner {
    start: String,
    end: String,
    /// Unconsumed input: frame content while inside a frame, or at most a
    /// partial start marker while outside one.
    buffer: String,
    /// Whether the scanner is currently between start and end markers.
    in_frame: bool,
    frames: VecDeque<String>,
}

impl FrameScanner {
    /// Create a scanner for the given marker pair.
    ///
    /// An empty `start` marker means "always inside a frame"; `end` must be
    /// non-empty.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        let end = end.into();
        debug_assert!(!end.is_empty(), "end marker must not be empty");
        Self {
            start: start.into(),
            end,
            buffer: String::new(),
            in_frame: false,
            frames: VecDeque::new(),
        }
    }

    /// Scan a chunk of input, queueing any frames it completes.
    ///
    /// Multiple frames may complete in one call; an unterminated trailing
    /// frame is buffered for the next call.
    pub fn feed(&mut self, input: &str) {
        if self.buffer.len() > MAX_BUFFER_BYTES {
            self.reset();
        }

        self.buffer.push_str(input);

        loop {
            if !self.in_frame {
                match self.buffer.find(&self.start) {
                    Some(pos) => {
                        // Bytes before the marker are inter-frame noise.
                        self.buffer.drain(..pos + self.start.len());
                        self.in_frame = true;
                    }
                    None => {
                        self.discard_noise();
                        return;
                    }
                }
            }

            match self.buffer.find(&self.end) {
                Some(pos) => {
                    let frame: String = self.buffer.drain(..pos).collect();
                    self.buffer.drain(..self.end.len());
                    if !frame.is_empty() {
                        self.frames.push_back(frame);
                    }
                    self.in_frame = false;
                    if self.buffer.is_empty() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Take the next completed frame, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    /// Number of completed frames waiting to be taken.
    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Take all completed frames in arrival order.
    pub fn drain_frames(&mut self) -> Vec<String> {
        self.frames.drain(..).collect()
    }

    /// Discard all state: buffered text, queued frames, and the in-frame
    /// flag. Used for error recovery.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.in_frame = false;
    }

    /// Drop pre-frame noise, keeping only a tail that could still turn out
    /// to be the beginning of a split start marker.
    fn discard_noise(&mut self) {
        let keep = self.start.len().saturating_sub(1);
        if self.buffer.len() <= keep {
            return;
        }
        let mut cut = self.buffer.len() - keep;
        while !self.buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.drain(..cut);
    }
}
