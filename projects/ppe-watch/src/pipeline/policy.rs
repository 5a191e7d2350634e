// Decides which detections get an overlay and how it looks.

use crate::pipeline::types::{BBox, Detection};
use opencv::core::Scalar;
use std::collections::HashSet;

/// Safety violations and vehicles that get the high-visibility overlay.
pub const DEFAULT_ALERT_CLASSES: [&str; 19] = [
    "NO-Hardhat",
    "NO-Mask",
    "NO-Safety Vest",
    "bus",
    "dump truck",
    "fire hydrant",
    "machinery",
    "mini-van",
    "no_glove",
    "no_goggles",
    "no_shoes",
    "sedan",
    "semi",
    "trailer",
    "truck",
    "truck and trailer",
    "van",
    "vehicle",
    "wheel loader",
];

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// BGR red-orange.
pub const ALERT_COLOR: [u8; 3] = [85, 45, 255];
/// BGR magenta.
pub const SECONDARY_COLOR: [u8; 3] = [222, 82, 175];

/// What to draw for one accepted detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BBox,
    pub color: [u8; 3],
    pub label: String,
}

impl Overlay {
    pub fn scalar(&self) -> Scalar {
        let [b, g, r] = self.color;
        Scalar::new(b as f64, g as f64, r as f64, 0.0)
    }
}

/// Class filter, color choice and confidence gate.
///
/// `classes_of_interest` gates drawing at all; `alert_classes` only picks the color.
/// Both default to the same list, which leaves the secondary color unused until
/// they are configured apart.
#[derive(Debug, Clone)]
pub struct AnnotationPolicy {
    classes_of_interest: HashSet<String>,
    alert_classes: HashSet<String>,
    confidence_threshold: f32,
}

impl Default for AnnotationPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALERT_CLASSES.iter().copied(),
            DEFAULT_ALERT_CLASSES.iter().copied(),
            DEFAULT_CONFIDENCE_THRESHOLD,
        )
    }
}

impl AnnotationPolicy {
    pub fn new<I, J, S, T>(classes_of_interest: I, alert_classes: J, threshold: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            classes_of_interest: classes_of_interest.into_iter().map(Into::into).collect(),
            alert_classes: alert_classes.into_iter().map(Into::into).collect(),
            confidence_threshold: threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Returns the overlay for a detection, or `None` when nothing must be drawn.
    pub fn overlay_for(&self, detection: &Detection) -> Option<Overlay> {
        if !self.classes_of_interest.contains(&detection.class_label) {
            return None;
        }
        if detection.confidence <= self.confidence_threshold {
            return None;
        }

        let color = if self.alert_classes.contains(&detection.class_label) {
            ALERT_COLOR
        } else {
            SECONDARY_COLOR
        };

        Some(Overlay {
            bbox: detection.bbox,
            color,
            label: label_text(&detection.class_label, detection.confidence),
        })
    }

    /// Overlays for a frame, in detection order.
    pub fn plan(&self, detections: &[Detection]) -> Vec<Overlay> {
        detections
            .iter()
            .filter_map(|d| self.overlay_for(d))
            .collect()
    }
}

/// `"{class}{confidence}"` with no separator; existing viewers match on it.
pub fn label_text(class_label: &str, confidence: f32) -> String {
    if confidence.fract() == 0.0 {
        format!("{}{:.1}", class_label, confidence)
    } else {
        format!("{}{}", class_label, confidence)
    }
}
