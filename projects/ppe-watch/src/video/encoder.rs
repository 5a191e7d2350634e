// Still-image encoding and the multipart chunk framing used by live viewers.

use crate::error::{PipelineError, Result};
use crate::pipeline::types::Frame;
use opencv::core::Vector;
use opencv::imgcodecs::{imencode, IMWRITE_JPEG_QUALITY};

/// Response content type for a live stream of `frame_chunk` payloads.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const CHUNK_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const CHUNK_TRAILER: &[u8] = b"\r\n";

pub trait FrameEncoder: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;
}

/// Lossy JPEG encoding through `imencode`.
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: i32,
}

impl JpegEncoder {
    pub fn new(quality: i32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(95)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let params = Vector::<i32>::from_slice(&[IMWRITE_JPEG_QUALITY, self.quality]);
        let mut buf = Vector::<u8>::new();
        let ok = imencode(".jpg", &frame.mat, &mut buf, &params).map_err(|e| {
            PipelineError::invalid_state(format!("jpeg encode of frame {}: {}", frame.index, e))
        })?;
        if !ok {
            return Err(PipelineError::invalid_state(format!(
                "jpeg encoder rejected frame {}",
                frame.index
            )));
        }
        Ok(buf.to_vec())
    }
}

/// Wraps one encoded image in the `--frame` multipart boundary.
pub fn frame_chunk(payload: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(CHUNK_HEADER.len() + payload.len() + CHUNK_TRAILER.len());
    chunk.extend_from_slice(CHUNK_HEADER);
    chunk.extend_from_slice(payload);
    chunk.extend_from_slice(CHUNK_TRAILER);
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::solid_frame;
    use opencv::core::Mat;

    #[test]
    fn test_frame_chunk_wire_format() {
        let chunk = frame_chunk(b"JPEGDATA");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n".to_vec()
        );
    }

    #[test]
    fn test_frame_chunk_empty_payload() {
        assert_eq!(
            frame_chunk(&[]),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_jpeg_encoder_emits_jpeg() {
        let bytes = JpegEncoder::default()
            .encode(&solid_frame(0, 32, 24, 128))
            .unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_unencodable_frame_is_invalid_state() {
        let empty = Frame::new(4, Mat::default());
        let err = JpegEncoder::default().encode(&empty).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegEncoder::new(0).quality, 1);
        assert_eq!(JpegEncoder::new(250).quality, 100);
    }
}
