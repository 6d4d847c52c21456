mod detection;
mod labels;
mod model_service;
mod ort_service;

pub mod config;

pub use detection::{BoundingBox, Detection, Detections, PlotError};
pub use labels::{ColorLabel, LabelsError};
pub use model_service::{ModelError, ModelService};
pub use ort_service::OrtModelService;
