//! Photo capture: frame conversion, JPEG encoding and the interval timer.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{Mailbox, SessionMsg};
use crate::constants::PHOTO_EXTENSION;
use crate::engine::{Frame, PixelFormat, Plane};
use crate::error::{Result, ScanError};
use crate::timer::ScheduledTask;

/// Interval timer and file numbering for one session.
#[derive(Debug, Default)]
pub struct PhotoCapture {
    interval: Option<Duration>,
    timer: Option<ScheduledTask>,
    generation: u64,
    taken: usize,
}

impl PhotoCapture {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Replace the interval. The caller re-arms if the session is running.
    pub fn set_interval(&mut self, interval: Option<Duration>) {
        self.disarm();
        self.interval = interval.filter(|i| !i.is_zero());
    }

    pub(crate) fn arm(&mut self, mailbox: &Mailbox) {
        self.disarm();
        let Some(period) = self.interval else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let mailbox = mailbox.clone();
        self.timer = Some(ScheduledTask::every(period, move || {
            mailbox.post(SessionMsg::PhotoTick { generation })
        }));
        tracing::debug!(?period, generation, "photo timer armed");
    }

    pub fn disarm(&mut self) {
        if self.timer.take().is_some() {
            self.generation += 1;
            tracing::debug!("photo timer disarmed");
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.timer.is_some() && generation == self.generation
    }

    /// Number the next photo, starting at 1.
    pub fn next_index(&mut self) -> usize {
        self.taken += 1;
        self.taken
    }

    pub fn reset(&mut self) {
        self.disarm();
        self.taken = 0;
    }
}

pub fn photo_file_name(scan_name: &str, index: usize, timestamp_ms: i64) -> String {
    format!("{scan_name}_photo_{index}_{timestamp_ms}.{PHOTO_EXTENSION}")
}

pub fn photo_path(dir: &Path, scan_name: &str, index: usize, timestamp_ms: i64) -> PathBuf {
    dir.join(photo_file_name(scan_name, index, timestamp_ms))
}

fn plane(frame: &Frame, index: usize, rows: usize, row_bytes: usize) -> Result<&Plane> {
    let plane = frame.planes.get(index).ok_or_else(|| {
        ScanError::PhotoCaptureFailure(format!("frame is missing plane {index}"))
    })?;
    if plane.bytes_per_row < row_bytes {
        return Err(ScanError::PhotoCaptureFailure(format!(
            "plane {index} stride {} shorter than row of {row_bytes} bytes",
            plane.bytes_per_row
        )));
    }
    let needed = plane.bytes_per_row * rows.saturating_sub(1) + row_bytes;
    if rows > 0 && plane.data.len() < needed {
        return Err(ScanError::PhotoCaptureFailure(format!(
            "plane {index} holds {} bytes, expected at least {needed}",
            plane.data.len()
        )));
    }
    Ok(plane)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Full-range BT.601 YCbCr to RGB.
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    [
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp_u8(y + 1.772 * cb),
    ]
}

/// Convert a frame in any supported pixel format to packed RGB8.
pub fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if width == 0 || height == 0 {
        return Err(ScanError::PhotoCaptureFailure("empty frame".to_string()));
    }
    let mut rgb = Vec::with_capacity(width * height * 3);

    match frame.format {
        PixelFormat::Nv12 => {
            let luma = plane(frame, 0, height, width)?;
            let chroma_rows = height.div_ceil(2);
            let chroma_row_bytes = width.div_ceil(2) * 2;
            let chroma = plane(frame, 1, chroma_rows, chroma_row_bytes)?;
            for row in 0..height {
                let y_row = &luma.data[row * luma.bytes_per_row..];
                let c_row = &chroma.data[(row / 2) * chroma.bytes_per_row..];
                for col in 0..width {
                    let c = (col / 2) * 2;
                    rgb.extend_from_slice(&ycbcr_to_rgb(y_row[col], c_row[c], c_row[c + 1]));
                }
            }
        }
        PixelFormat::Bgra8 | PixelFormat::Rgba8 => {
            let packed = plane(frame, 0, height, width * 4)?;
            let bgra = frame.format == PixelFormat::Bgra8;
            for row in 0..height {
                let line = &packed.data[row * packed.bytes_per_row..][..width * 4];
                for px in line.chunks_exact(4) {
                    if bgra {
                        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                    } else {
                        rgb.extend_from_slice(&px[..3]);
                    }
                }
            }
        }
    }

    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| ScanError::PhotoCaptureFailure("pixel buffer size mismatch".to_string()))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(|e| ScanError::PhotoCaptureFailure(format!("jpeg encoding: {e}")))?;
    Ok(buf)
}

/// Convert, encode and write one frame. Blocking.
pub fn write_photo(frame: &Frame, path: &Path, quality: u8) -> Result<()> {
    let image = frame_to_rgb(frame)?;
    let jpeg = encode_jpeg(&image, quality)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ScanError::PhotoCaptureFailure(format!("{}: {e}", parent.display())))?;
    }
    std::fs::write(path, jpeg)
        .map_err(|e| ScanError::PhotoCaptureFailure(format!("{}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn nv12(width: u32, height: u32, y: u8, cb: u8, cr: u8) -> Frame {
        let (w, h) = (width as usize, height as usize);
        let chroma: Vec<u8> = [cb, cr].repeat(w.div_ceil(2) * h.div_ceil(2));
        Frame {
            width,
            height,
            format: PixelFormat::Nv12,
            planes: vec![
                Plane {
                    bytes_per_row: w,
                    data: Arc::from(vec![y; w * h]),
                },
                Plane {
                    bytes_per_row: w.div_ceil(2) * 2,
                    data: Arc::from(chroma),
                },
            ],
        }
    }

    #[test]
    fn test_ycbcr_reference_colors() {
        assert_eq!(ycbcr_to_rgb(128, 128, 128), [128, 128, 128]);
        assert_eq!(ycbcr_to_rgb(255, 128, 128), [255, 255, 255]);
        // Full-range red.
        let [r, g, b] = ycbcr_to_rgb(76, 85, 255);
        assert!(r > 250 && g < 5 && b < 5, "got {r},{g},{b}");
    }

    #[test]
    fn test_nv12_frame_converts_every_pixel() {
        let image = frame_to_rgb(&nv12(4, 2, 255, 128, 128)).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        assert!(image.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_nv12_odd_dimensions() {
        let image = frame_to_rgb(&nv12(3, 3, 0, 128, 128)).unwrap();
        assert_eq!(image.dimensions(), (3, 3));
    }

    #[test]
    fn test_bgra_swaps_channels_and_honours_stride() {
        let frame = Frame {
            width: 1,
            height: 2,
            format: PixelFormat::Bgra8,
            planes: vec![Plane {
                bytes_per_row: 8,
                data: Arc::from(vec![1u8, 2, 3, 255, 9, 9, 9, 9, 4, 5, 6, 255]),
            }],
        };
        let image = frame_to_rgb(&frame).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(image.get_pixel(0, 1).0, [6, 5, 4]);
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let mut frame = nv12(4, 4, 0, 128, 128);
        frame.planes.truncate(1);
        assert!(matches!(
            frame_to_rgb(&frame),
            Err(ScanError::PhotoCaptureFailure(_))
        ));
    }

    #[test]
    fn test_write_photo_produces_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = photo_path(&dir.path().join("photos"), "den", 2, 1_700_000_000_000);
        assert!(path.ends_with("den_photo_2_1700000000000.jpg"));

        write_photo(&nv12(8, 8, 90, 100, 150), &path, 80).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_index_and_interval_bookkeeping() {
        let mut photos = PhotoCapture::new(Some(Duration::ZERO));
        assert!(photos.interval().is_none());
        assert_eq!(photos.next_index(), 1);
        assert_eq!(photos.next_index(), 2);
        photos.reset();
        assert_eq!(photos.next_index(), 1);
        assert!(!photos.is_armed());
    }
}
