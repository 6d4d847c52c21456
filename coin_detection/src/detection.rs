use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use thiserror::Error;

const LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const MIN_FONT_SIZE: f32 = 12.0;
const LABEL_PADDING: u32 = 2;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to load label font: {0}")]
    Font(#[from] InvalidFont),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let width = self.x2.min(other.x2) - self.x1.max(other.x1);
        let height = self.y2.min(other.y2) - self.y1.max(other.y1);
        width.max(0.0) * height.max(0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection(other) / union
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
}

/// Detections for a single image, highest confidence first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    detections: Vec<Detection>,
}

impl Detections {
    pub fn new(mut detections: Vec<Detection>) -> Self {
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// Returns a copy of `image` with every detection drawn as a rectangle
    /// in its label color, captioned with `"{label} {confidence:.2}"`.
    pub fn plot(&self, image: &RgbImage) -> Result<RgbImage, PlotError> {
        let font = FontRef::try_from_slice(LABEL_FONT)?;
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return Ok(canvas);
        }

        let thickness = line_width(width, height);
        let scale = PxScale::from(font_size(width, height));
        for detection in &self.detections {
            let Some(rect) = pixel_rect(&detection.bbox, width, height) else {
                continue;
            };
            for t in 0..thickness {
                let inner_width = rect.width().saturating_sub(2 * t);
                let inner_height = rect.height().saturating_sub(2 * t);
                if inner_width == 0 || inner_height == 0 {
                    break;
                }
                let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32)
                    .of_size(inner_width, inner_height);
                draw_hollow_rect_mut(&mut canvas, inner, detection.color);
            }
            draw_label(&mut canvas, &font, scale, rect, detection);
        }
        Ok(canvas)
    }
}

impl<'a> IntoIterator for &'a Detections {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

fn line_width(width: u32, height: u32) -> u32 {
    let scaled = ((width + height) as f32 / 2.0 * 0.003).round() as u32;
    scaled.max(2)
}

fn font_size(width: u32, height: u32) -> f32 {
    ((width + height) as f32 / 2.0 * 0.035).round().max(MIN_FONT_SIZE)
}

/// Clamps a box to the image and converts it to an inclusive pixel rectangle.
fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    let x1 = bbox.x1.clamp(0.0, max_x) as u32;
    let y1 = bbox.y1.clamp(0.0, max_y) as u32;
    let x2 = bbox.x2.clamp(0.0, max_x) as u32;
    let y2 = bbox.y2.clamp(0.0, max_y) as u32;
    if x2 < x1 || y2 < y1 {
        return None;
    }

    Some(Rect::at(x1 as i32, y1 as i32).of_size(x2 - x1 + 1, y2 - y1 + 1))
}

/// Draws the caption on a filled tab above the box, or just inside its top
/// edge when there is no room above.
fn draw_label(
    canvas: &mut RgbImage,
    font: &FontRef<'_>,
    scale: PxScale,
    rect: Rect,
    detection: &Detection,
) {
    let text = format!("{} {:.2}", detection.class_label, detection.confidence);
    let (text_width, text_height) = text_size(scale, font, &text);
    let tab_width = text_width + 2 * LABEL_PADDING;
    let tab_height = text_height + 2 * LABEL_PADDING;

    let top = if rect.top() >= tab_height as i32 {
        rect.top() - tab_height as i32
    } else {
        rect.top()
    };

    draw_filled_rect_mut(
        canvas,
        Rect::at(rect.left(), top).of_size(tab_width, tab_height),
        detection.color,
    );
    draw_text_mut(
        canvas,
        text_color(detection.color),
        rect.left() + LABEL_PADDING as i32,
        top + LABEL_PADDING as i32,
        scale,
        font,
        &text,
    );
}

fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 160.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}
