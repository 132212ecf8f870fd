// src/loop_buffer.rs

//! The recorded-loop sample store: append-only while recording, circularly
//! read during playback.

/// Holds at most one finalized loop. Owned exclusively by the audio thread,
/// so no locking is needed.
///
/// Three observable states: no loop (never recorded, or cleared), recording
/// (accumulating), and finalized. A finalized loop may be zero-length, which
/// is valid and plays back as silence.
pub struct LoopBuffer {
    audio: Vec<f32>,
    recording: bool,
    has_loop: bool,
}

impl LoopBuffer {
    pub fn new() -> Self {
        Self {
            audio: Vec::new(),
            recording: false,
            has_loop: false,
        }
    }

    /// Preallocates so that appends during a normal take never reallocate on
    /// the audio thread. `Vec::clear` keeps capacity across record cycles.
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            audio: Vec::with_capacity(samples),
            recording: false,
            has_loop: false,
        }
    }

    /// Discards any existing loop and starts accumulating a new one.
    pub fn begin_recording(&mut self) {
        self.audio.clear();
        self.recording = true;
        self.has_loop = false;
    }

    /// Appends one block of samples. Only valid while recording; calls in any
    /// other state are ignored.
    pub fn append(&mut self, block: &[f32]) {
        if !self.recording {
            return;
        }
        self.audio.extend_from_slice(block);
    }

    /// Ends accumulation. The accumulated samples become the current loop;
    /// zero appended samples produce a valid, explicitly empty loop.
    pub fn finalize(&mut self) {
        self.recording = false;
        self.has_loop = true;
    }

    /// Returns to the no-loop state.
    pub fn clear(&mut self) {
        self.audio.clear();
        self.recording = false;
        self.has_loop = false;
    }

    /// Fills `out` with exactly `out.len()` samples starting at `cursor`,
    /// wrapping to the start of the loop when the end is reached. A loop
    /// shorter than one block is read repeatedly within the same call, so the
    /// output is always a contiguous logical read across the seam. Returns
    /// the new cursor, always in `[0, len)` for a non-empty loop.
    ///
    /// An empty (or absent) loop yields silence and a cursor of 0.
    pub fn read_block(&self, out: &mut [f32], cursor: usize) -> usize {
        let len = self.audio.len();
        if len == 0 {
            out.fill(0.0);
            return 0;
        }
        let mut cursor = cursor % len;
        for sample in out.iter_mut() {
            *sample = self.audio[cursor];
            cursor += 1;
            if cursor == len {
                cursor = 0;
            }
        }
        cursor
    }

    /// Number of samples in the current loop (0 while empty or recording from
    /// scratch).
    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    /// True once a recording has been finalized and not yet cleared, even if
    /// the finalized loop is zero-length.
    pub fn has_loop(&self) -> bool {
        self.has_loop
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// The finalized loop content, for export.
    pub fn loop_samples(&self) -> &[f32] {
        &self.audio
    }
}

impl Default for LoopBuffer {
    fn default() -> Self {
        Self::new()
    }
}
