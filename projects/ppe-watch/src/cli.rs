use crate::pipeline::policy::{AnnotationPolicy, DEFAULT_ALERT_CLASSES};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the ONNX detection model
    #[arg(long, env = "PPE_WATCH_MODEL", default_value = "weights/ppe.onnx", global = true)]
    pub model: String,

    /// Directory for uploaded videos and processed artifacts
    #[arg(long, env = "PPE_WATCH_UPLOAD_ROOT", default_value = "static/files", global = true)]
    pub upload_root: PathBuf,

    /// Detections at or below this confidence are not drawn
    #[arg(long, default_value_t = 0.5, global = true)]
    pub confidence_threshold: f32,

    /// Classes drawn at all (comma separated, defaults to the alert classes)
    #[arg(long, value_delimiter = ',', global = true)]
    pub classes_of_interest: Vec<String>,

    /// Classes drawn in the alert color (comma separated)
    #[arg(long, value_delimiter = ',', global = true)]
    pub alert_classes: Vec<String>,

    /// JPEG quality of live stream frames
    #[arg(long, default_value_t = 95, global = true)]
    pub jpeg_quality: i32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the upload, replay and live camera endpoints
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind to
        #[arg(long, default_value_t = 5000)]
        port: u16,

        /// Capture device used by the live endpoint
        #[arg(long, default_value_t = 0)]
        camera: i32,
    },
    /// Run detection over a video file (or device index) and write the annotated artifact
    Process {
        #[arg(long)]
        input: String,

        #[arg(long)]
        output: PathBuf,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn policy(&self) -> AnnotationPolicy {
        let alert: Vec<String> = if self.alert_classes.is_empty() {
            DEFAULT_ALERT_CLASSES.iter().map(|s| s.to_string()).collect()
        } else {
            self.alert_classes.clone()
        };
        let interest = if self.classes_of_interest.is_empty() {
            alert.clone()
        } else {
            self.classes_of_interest.clone()
        };
        AnnotationPolicy::new(interest, alert, self.confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::policy::{ALERT_COLOR, SECONDARY_COLOR};
    use crate::pipeline::types::{BBox, Detection};

    fn det(class: &str) -> Detection {
        Detection {
            class_label: class.to_string(),
            confidence: 0.8,
            bbox: BBox::new(0, 0, 4, 4),
        }
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([
            "ppe-watch",
            "process",
            "--input",
            "a.mp4",
            "--output",
            "out/a.mp4",
        ])
        .unwrap();
        assert_eq!(args.confidence_threshold, 0.5);
        assert_eq!(args.jpeg_quality, 95);
        let policy = args.policy();
        assert_eq!(policy.overlay_for(&det("van")).unwrap().color, ALERT_COLOR);
        assert!(policy.overlay_for(&det("Person")).is_none());
    }

    #[test]
    fn test_diverged_class_sets() {
        let args = Args::try_parse_from([
            "ppe-watch",
            "--classes-of-interest",
            "NO-Hardhat,Person",
            "--alert-classes",
            "NO-Hardhat",
            "serve",
        ])
        .unwrap();
        let policy = args.policy();
        assert_eq!(
            policy.overlay_for(&det("Person")).unwrap().color,
            SECONDARY_COLOR
        );
        assert!(policy.overlay_for(&det("van")).is_none());
        assert!(matches!(args.command, Command::Serve { port: 5000, camera: 0, .. }));
    }
}
