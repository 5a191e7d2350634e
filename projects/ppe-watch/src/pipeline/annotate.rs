use crate::error::{PipelineError, Result};
use crate::pipeline::policy::{AnnotationPolicy, Overlay};
use crate::pipeline::types::{Detection, Frame};
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc::{
    get_text_size, put_text, rectangle_points, FILLED, FONT_HERSHEY_SIMPLEX, LINE_8, LINE_AA,
};

const BOX_THICKNESS: i32 = 3;
const FONT_SCALE: f64 = 1.0;
/// Thickness used to measure the label; the text itself is drawn at 1px.
const MEASURE_THICKNESS: i32 = 2;
const TEXT_THICKNESS: i32 = 1;

/// Applies the policy's overlays to frames in place.
#[derive(Debug, Clone, Default)]
pub struct Annotator {
    policy: AnnotationPolicy,
}

impl Annotator {
    pub fn new(policy: AnnotationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AnnotationPolicy {
        &self.policy
    }

    /// Draws every accepted detection onto the frame and hands the same frame back,
    /// along with the number of overlays drawn.
    pub fn annotate(&self, mut frame: Frame, detections: &[Detection]) -> Result<(Frame, usize)> {
        let overlays = self.policy.plan(detections);
        draw_overlays(&mut frame.mat, &overlays).map_err(|e| {
            PipelineError::invalid_state(format!("annotating frame {}: {}", frame.index, e))
        })?;
        Ok((frame, overlays.len()))
    }
}

/// Box outline, filled label background above the top-left corner, then white text.
///
/// Label geometry is not clipped here, so labels on boxes touching the top edge
/// end up mostly outside the frame.
pub fn draw_overlays(img: &mut Mat, overlays: &[Overlay]) -> opencv::Result<()> {
    for overlay in overlays {
        let color = overlay.scalar();
        let top_left = Point::new(overlay.bbox.x1, overlay.bbox.y1);
        let bottom_right = Point::new(overlay.bbox.x2, overlay.bbox.y2);

        rectangle_points(img, top_left, bottom_right, color, BOX_THICKNESS, LINE_8, 0)?;

        let mut baseline = 0;
        let text_size = get_text_size(
            &overlay.label,
            FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            MEASURE_THICKNESS,
            &mut baseline,
        )?;
        let label_corner = Point::new(
            overlay.bbox.x1 + text_size.width,
            overlay.bbox.y1 - text_size.height - 3,
        );
        rectangle_points(img, top_left, label_corner, color, FILLED, LINE_AA, 0)?;

        put_text(
            img,
            &overlay.label,
            Point::new(overlay.bbox.x1, overlay.bbox.y1 - 2),
            FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            TEXT_THICKNESS,
            LINE_AA,
            false,
        )?;
    }
    Ok(())
}
