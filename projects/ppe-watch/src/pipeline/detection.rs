use crate::error::{PipelineError, Result};
use crate::pipeline::types::{BBox, Detection, Frame};
use anyhow::anyhow;
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::{Arc, Mutex};
use usls::models::RTDETR;
use usls::{Config, Image};

/// Ordered vocabulary of the PPE model; class ids index into this list.
pub const PPE_CLASS_NAMES: [&str; 31] = [
    "Excavator",
    "Gloves",
    "Helmet",
    "Ladder",
    "Mask",
    "NO-Hardhat",
    "NO-Mask",
    "NO-Safety Vest",
    "Person",
    "SUV",
    "Safety Cone",
    "Safety Vest",
    "bus",
    "dump truck",
    "fire hydrant",
    "glove",
    "goggles",
    "machinery",
    "mini-van",
    "no_glove",
    "no_goggles",
    "no_shoes",
    "sedan",
    "semi",
    "shoes",
    "trailer",
    "truck",
    "truck and trailer",
    "van",
    "vehicle",
    "wheel loader",
];

/// Maps one frame to zero or more detections. No memory between frames.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Rounds a raw score up to the next hundredth so borderline hits are not under-reported.
pub fn ceil_confidence(raw: f32) -> f32 {
    ((raw * 100.0).ceil() / 100.0).clamp(0.0, 1.0)
}

/// Model output before validation, in image pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct RawDetection<'a> {
    pub xyxy: [f32; 4],
    pub score: Option<f32>,
    pub class_id: Option<usize>,
    pub class_name: Option<&'a str>,
}

/// Validates geometry and resolves the class label against the vocabulary.
pub fn to_detection(raw: RawDetection<'_>, class_names: &[String]) -> Result<Detection> {
    let [x1, y1, x2, y2] = raw.xyxy;
    if raw.xyxy.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::detection(format!(
            "non-finite box {:?}",
            raw.xyxy
        )));
    }
    if x2 < x1 || y2 < y1 {
        return Err(PipelineError::detection(format!(
            "inverted box {:?}",
            raw.xyxy
        )));
    }

    let score = raw
        .score
        .filter(|s| s.is_finite())
        .ok_or_else(|| PipelineError::detection("detection without confidence"))?;

    let class_label = raw
        .class_id
        .and_then(|id| class_names.get(id).cloned())
        .or_else(|| raw.class_name.map(str::to_string))
        .ok_or_else(|| {
            PipelineError::detection(format!("unknown class id {:?}", raw.class_id))
        })?;

    Ok(Detection {
        class_label,
        confidence: ceil_confidence(score),
        bbox: BBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
    })
}

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct ObjectDetector {
    model: Mutex<RTDETR>,
    class_names: Vec<String>,
}

impl ObjectDetector {
    pub fn new(model_path: &str, class_names: &[&str]) -> anyhow::Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(class_names);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        tracing::info!("Loaded detection model from {}", model_path);

        Ok(Self {
            model: Mutex::new(model),
            class_names: class_names.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl Detector for ObjectDetector {
    fn name(&self) -> &str {
        "RT-DETR"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let dynamic_image = mat_to_dynamic_image(&frame.mat)
            .map_err(|e| PipelineError::detection(format!("frame {}: {}", frame.index, e)))?;
        let (x_corr, y_corr) = aspect_correction(frame.width() as f32, frame.height() as f32);

        let results = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| PipelineError::detection("model mutex poisoned"))?;
            model
                .forward(&[Image::from(dynamic_image)])
                .map_err(|e| PipelineError::detection(format!("frame {}: {}", frame.index, e)))?
        };

        let Some(y) = results.into_iter().next() else {
            return Ok(Vec::new());
        };

        y.hbbs
            .into_iter()
            .map(|hbb| {
                let x = hbb.xmin() * x_corr;
                let y_coord = hbb.ymin() * y_corr;
                let raw = RawDetection {
                    xyxy: [
                        x,
                        y_coord,
                        x + hbb.width() * x_corr,
                        y_coord + hbb.height() * y_corr,
                    ],
                    score: hbb.confidence(),
                    class_id: hbb.id(),
                    class_name: hbb.name(),
                };
                to_detection(raw, &self.class_names)
            })
            .collect()
    }
}

/// Loader for the process-wide model slot.
pub fn load_shared(model_path: &str) -> anyhow::Result<Arc<dyn Detector>> {
    Ok(Arc::new(ObjectDetector::new(model_path, &PPE_CLASS_NAMES)?))
}

/// Scale factors undoing the square padding USLS applies before RT-DETR.
fn aspect_correction(img_w: f32, img_h: f32) -> (f32, f32) {
    if img_w > img_h {
        (img_w / img_h, 1.0)
    } else if img_h > img_w {
        (1.0, img_h / img_w)
    } else {
        (1.0, 1.0)
    }
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> anyhow::Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
