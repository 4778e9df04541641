use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::{AudioError, Result};

/// Convert a float sample in `[-1.0, 1.0]` to 16-bit PCM.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Streams mono 16-bit PCM to a WAV file as blocks arrive.
pub struct WavFileWriter {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
    sample_rate: u32,
}

impl WavFileWriter {
    /// Create (or truncate) the file at `path`, creating parent directories.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let file = File::create(&path)?;
        let writer = WavWriter::new(BufWriter::new(file), spec)?;

        Ok(Self {
            path,
            writer: Some(writer),
            samples_written: 0,
            sample_rate,
        })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AudioError::Writer("writer already finalized".to_string()))?;
        for &sample in samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_written as f32 / self.sample_rate as f32
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Patch the header and flush. Further writes fail.
    pub fn finalize(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => Ok(writer.finalize()?),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WavFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileWriter")
            .field("path", &self.path)
            .field("samples_written", &self.samples_written)
            .field("finalized", &self.writer.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(2.0), 32767);
        assert_eq!(to_pcm16(-2.0), -32768);
    }

    #[test]
    fn test_write_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("take.wav");
        let mut writer = WavFileWriter::create(&path, 48_000).unwrap();

        writer.write(&[0.0, 0.5, -0.5]).unwrap();
        writer.write(&[1.0]).unwrap();
        assert_eq!(writer.samples_written(), 4);
        writer.finalize().unwrap();
        assert!(writer.write(&[0.0]).is_err());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, 32767]);
    }
}
