use super::{FrameSource, Origin, VideoSpec};
use crate::error::{PipelineError, Result};
use crate::pipeline::types::Frame;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};

const FALLBACK_FPS: f64 = 30.0;

/// OpenCV capture over a video file or a camera device.
pub struct OpencvSource {
    capture: Option<VideoCapture>,
    origin: Origin,
    spec: VideoSpec,
    frame_count: Option<usize>,
    next_index: usize,
}

impl OpencvSource {
    pub fn open(origin: &Origin) -> Result<Self> {
        let unavailable =
            |e: opencv::Error| PipelineError::source_unavailable(format!("{}: {}", origin, e));

        let capture = match origin {
            Origin::File(path) => {
                if !path.is_file() {
                    return Err(PipelineError::source_unavailable(format!(
                        "no such video file: {}",
                        path.display()
                    )));
                }
                let path_str = path.to_str().ok_or_else(|| {
                    PipelineError::source_unavailable(format!(
                        "non UTF-8 video path: {}",
                        path.display()
                    ))
                })?;
                VideoCapture::from_file(path_str, CAP_ANY).map_err(unavailable)?
            }
            Origin::Device(index) => VideoCapture::new(*index, CAP_ANY).map_err(unavailable)?,
        };

        if !capture.is_opened().map_err(unavailable)? {
            return Err(PipelineError::source_unavailable(format!(
                "failed to open {}",
                origin
            )));
        }

        let width = capture.get(CAP_PROP_FRAME_WIDTH).map_err(unavailable)? as i32;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT).map_err(unavailable)? as i32;
        let mut fps = capture.get(CAP_PROP_FPS).map_err(unavailable)?;
        if fps <= 0.0 {
            tracing::warn!(
                "OpencvSource: no usable FPS for {}, falling back to {:.1}",
                origin,
                FALLBACK_FPS
            );
            fps = FALLBACK_FPS;
        }

        let frame_count = if origin.is_bounded() {
            let raw_count = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0) as usize;
            tracing::info!(
                "OpencvSource: opened {}, {}x{}, fps={:.2}, stream_frames={}",
                origin,
                width,
                height,
                fps,
                raw_count
            );
            Some(raw_count).filter(|&n| n > 0)
        } else {
            tracing::info!(
                "OpencvSource: opened {}, {}x{}, fps={:.2}",
                origin,
                width,
                height,
                fps
            );
            None
        };

        Ok(Self {
            capture: Some(capture),
            origin: origin.clone(),
            spec: VideoSpec { width, height, fps },
            frame_count,
            next_index: 0,
        })
    }
}

impl FrameSource for OpencvSource {
    fn spec(&self) -> VideoSpec {
        self.spec
    }

    fn is_bounded(&self) -> bool {
        self.origin.is_bounded()
    }

    fn frame_count(&self) -> Option<usize> {
        self.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let capture = self.capture.as_mut().ok_or_else(|| {
            PipelineError::invalid_state(format!("read from closed source {}", self.origin))
        })?;

        let mut mat = Mat::default();
        let success = capture
            .read(&mut mat)
            .map_err(|e| PipelineError::source_unavailable(format!("{}: {}", self.origin, e)))?;
        if !success || mat.empty() {
            if !self.origin.is_bounded() {
                tracing::warn!("OpencvSource: {} stopped delivering frames", self.origin);
            }
            return Ok(None);
        }

        let frame = Frame::new(self.next_index, mat);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("OpencvSource: failed to release {}: {}", self.origin, e);
            }
            tracing::info!(
                "OpencvSource: closed {} after {} frames",
                self.origin,
                self.next_index
            );
        }
    }
}

impl Drop for OpencvSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::write_artifact;

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Origin::File(dir.path().join("missing.mp4"));
        match OpencvSource::open(&origin) {
            Err(PipelineError::SourceUnavailable(msg)) => assert!(msg.contains("missing.mp4")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a file that does not exist"),
        }
    }

    #[test]
    fn test_reads_written_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.mp4");
        write_artifact(&path, 5);

        let mut source = OpencvSource::open(&Origin::File(path)).unwrap();
        assert!(source.is_bounded());
        assert_eq!((source.spec().width, source.spec().height), (64, 64));

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_read_after_close_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.mp4");
        write_artifact(&path, 3);

        let mut source = OpencvSource::open(&Origin::File(path)).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        source.close();
        source.close();

        assert!(matches!(
            source.next_frame(),
            Err(PipelineError::InvalidState(_))
        ));
    }
}
