use crate::{
    config::{LabelsConfig, ModelConfig, Validatable},
    detection::{BoundingBox, Detection, Detections},
    labels::{load_labels, ColorLabel},
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::{s, Array, ArrayD, ArrayViewD, Axis, Ix2, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const OUTPUT_NAME: &str = "output0";
const UNKNOWN_CLASS_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

/// Parameters for turning raw YOLO output rows into detections.
#[derive(Debug, Clone, Copy)]
struct Postprocess {
    input_size: u32,
    image_width: u32,
    image_height: u32,
    min_confidence: f32,
    iou_threshold: f32,
    max_detections: usize,
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a `[1, 4 + classes, anchors]` output tensor, keeps the best class
/// per anchor and applies per-class non-maximum suppression. Scores must be
/// strictly above `min_confidence`; a box is suppressed only when its overlap
/// with a kept box of the same class is strictly above `iou_threshold`.
fn extract_detections(
    output: ArrayViewD<'_, f32>,
    labels: &[ColorLabel],
    params: Postprocess,
) -> Result<Detections, ModelError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] == 0 || shape[1] <= 4 {
        return Err(ModelError::Output(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            shape
        )));
    }

    let rows = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| ModelError::Output(e.to_string()))?;
    let scale_x = params.image_width as f32 / params.input_size as f32;
    let scale_y = params.image_height as f32 / params.input_size as f32;
    let max_x = params.image_width as f32;
    let max_y = params.image_height as f32;

    let mut candidates = Vec::new();
    for anchor in rows.axis_iter(Axis(1)) {
        let best = anchor
            .slice(s![4..])
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((class_id, confidence)) = best else {
            continue;
        };

        if confidence <= params.min_confidence {
            continue;
        }

        let xc = anchor[0] * scale_x;
        let yc = anchor[1] * scale_y;
        let w = anchor[2] * scale_x;
        let h = anchor[3] * scale_y;

        let (class_label, color) = match labels.get(class_id) {
            Some(color_label) => (color_label.label.clone(), color_label.color()),
            None => (format!("Unknown class {}", class_id), UNKNOWN_CLASS_COLOR),
        };

        candidates.push(Detection {
            class_id,
            class_label,
            confidence,
            bbox: BoundingBox {
                x1: (xc - w / 2.).clamp(0., max_x),
                y1: (yc - h / 2.).clamp(0., max_y),
                x2: (xc + w / 2.).clamp(0., max_x),
                y2: (yc + h / 2.).clamp(0., max_y),
            },
            color,
        });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= params.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id
                && existing.bbox.iou(&candidate.bbox) > params.iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    Ok(Detections::new(kept))
}

fn require_output<T>(output: Option<T>, name: &str) -> Result<T, ModelError> {
    output.ok_or_else(|| ModelError::Output(format!("model has no {} output", name)))
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Arc<Vec<ColorLabel>>,
    input_size: u32,
    iou_threshold: f32,
    max_detections: usize,
}

impl OrtModelService {
    pub fn new(
        model_config: &ModelConfig,
        labels_config: &LabelsConfig,
    ) -> Result<Self, ModelError> {
        model_config.validate().map_err(ModelError::Load)?;
        let labels = load_labels(labels_config)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let builder = Session::builder()?;
                #[cfg(feature = "tensorrt")]
                let builder = builder.with_execution_providers([
                    ort::execution_providers::TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .build(),
                ])?;
                let session = builder
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels: Arc::new(labels),
            input_size: model_config.input_size,
            iou_threshold: model_config.iou_threshold,
            max_detections: model_config.max_detections,
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = require_output(outputs.get(OUTPUT_NAME), OUTPUT_NAME)?
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn detect(&self, image: &RgbImage, min_confidence: f32) -> Result<Detections, ModelError> {
        let input = transform_image(image, self.input_size);
        let output = self.run_inference(&input)?;

        extract_detections(
            output.view(),
            &self.labels,
            Postprocess {
                input_size: self.input_size,
                image_width: image.width(),
                image_height: image.height(),
                min_confidence,
                iou_threshold: self.iou_threshold,
                max_detections: self.max_detections,
            },
        )
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    fn labels(&self) -> &[ColorLabel] {
        &self.labels
    }

    async fn predict(
        &self,
        image: Arc<RgbImage>,
        min_confidence: f32,
    ) -> Result<Detections, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect(&image, min_confidence)).await?
    }
}
