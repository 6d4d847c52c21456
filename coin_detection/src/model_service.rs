use crate::{detection::Detections, labels::ColorLabel};
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Failed to load labels: {0}")]
    Labels(#[from] crate::labels::LabelsError),
    #[error("Session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("Failed to build tensor: {0}")]
    Tensor(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("Inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// Class labels in model index order.
    fn labels(&self) -> &[ColorLabel];

    async fn predict(
        &self,
        image: Arc<RgbImage>,
        min_confidence: f32,
    ) -> Result<Detections, ModelError>;
}
