//! Re-chunks variable tap blocks into fixed-size PCM16 frames for events.

use crate::writer::to_pcm16;

#[derive(Debug)]
pub struct PcmChunker {
    chunk_samples: usize,
    pending: Vec<i16>,
}

impl PcmChunker {
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk_samples,
            pending: Vec::with_capacity(chunk_samples),
        }
    }

    /// Append samples and return every complete chunk, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<i16>> {
        let mut ready = Vec::new();
        for &sample in samples {
            self.pending.push(to_pcm16(sample));
            if self.pending.len() == self.chunk_samples {
                let full = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.chunk_samples),
                );
                ready.push(full);
            }
        }
        ready
    }

    /// Take the partial tail, if any.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
