/// Circular buffer of interleaved audio frames.
///
/// Wrap in `Arc<parking_lot::Mutex<FrameRingBuffer>>` for cross-thread access.
/// Overflow drops the oldest whole frames; a partial trailing frame in a
/// write is ignored so channels never shift.
#[derive(Debug)]
pub struct FrameRingBuffer {
    buffer: Vec<f32>,
    channels: usize,
    capacity_frames: usize,
    write_frame: usize,
    read_frame: usize,
    available_frames: usize,
}

impl FrameRingBuffer {
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let capacity_frames = capacity_frames.max(1);
        Self {
            buffer: vec![0.0; capacity_frames * channels],
            channels,
            capacity_frames,
            write_frame: 0,
            read_frame: 0,
            available_frames: 0,
        }
    }

    /// Appends interleaved samples. Returns the number of frames dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let frames = samples.len() / self.channels;
        if frames == 0 {
            return 0;
        }

        // Only the newest `capacity_frames` of an oversized write survive.
        let skipped = frames.saturating_sub(self.capacity_frames);
        let kept = frames - skipped;
        let samples = &samples[skipped * self.channels..frames * self.channels];

        let overflow = (self.available_frames + kept).saturating_sub(self.capacity_frames);
        if overflow > 0 {
            self.read_frame = (self.read_frame + overflow) % self.capacity_frames;
            self.available_frames -= overflow;
        }

        for frame in samples.chunks_exact(self.channels) {
            let start = self.write_frame * self.channels;
            self.buffer[start..start + self.channels].copy_from_slice(frame);
            self.write_frame = (self.write_frame + 1) % self.capacity_frames;
        }
        self.available_frames += kept;
        skipped + overflow
    }

    /// Moves up to `out.len() / channels` frames into `out`.
    ///
    /// Returns the number of frames copied; the rest of `out` is untouched.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.available_frames);
        for (i, dst) in out.chunks_exact_mut(self.channels).take(frames).enumerate() {
            let start = ((self.read_frame + i) % self.capacity_frames) * self.channels;
            dst.copy_from_slice(&self.buffer[start..start + self.channels]);
        }
        self.read_frame = (self.read_frame + frames) % self.capacity_frames;
        self.available_frames -= frames;
        frames
    }

    /// Reads and removes up to `frames` frames.
    pub fn read(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames.min(self.available_frames) * self.channels];
        self.read_into(&mut out);
        out
    }

    pub fn available_frames(&self) -> usize {
        self.available_frames
    }

    pub fn is_empty(&self) -> bool {
        self.available_frames == 0
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn clear(&mut self) {
        self.write_frame = 0;
        self.read_frame = 0;
        self.available_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_in_order() {
        let mut buf = FrameRingBuffer::new(4, 2);
        assert_eq!(buf.write(&[1.0, -1.0, 2.0, -2.0]), 0);
        assert_eq!(buf.available_frames(), 2);
        assert_eq!(buf.read(1), vec![1.0, -1.0]);
        assert_eq!(buf.read(8), vec![2.0, -2.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_frames() {
        let mut buf = FrameRingBuffer::new(3, 2);
        buf.write(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(buf.write(&[4.0, 4.0]), 1);
        assert_eq!(buf.read(3), vec![2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut buf = FrameRingBuffer::new(2, 1);
        assert_eq!(buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3);
        assert_eq!(buf.read(2), vec![4.0, 5.0]);
    }

    #[test]
    fn partial_frame_is_ignored() {
        let mut buf = FrameRingBuffer::new(4, 2);
        buf.write(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.available_frames(), 1);
        assert_eq!(buf.read(4), vec![1.0, 2.0]);
    }

    #[test]
    fn wraps_around() {
        let mut buf = FrameRingBuffer::new(3, 1);
        buf.write(&[1.0, 2.0]);
        buf.read(2);
        buf.write(&[3.0, 4.0, 5.0]);
        let mut out = [0.0f32; 4];
        assert_eq!(buf.read_into(&mut out), 3);
        assert_eq!(out, [3.0, 4.0, 5.0, 0.0]);
    }

    #[test]
    fn clear_empties() {
        let mut buf = FrameRingBuffer::new(4, 2);
        buf.write(&[1.0, 2.0]);
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.read(4).is_empty());
        assert_eq!(buf.write(&[]), 0);
    }
}
