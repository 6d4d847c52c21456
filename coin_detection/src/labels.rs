use crate::config::{LabelsConfig, Validatable};
use image::Rgb;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid {channel} value on line {line}")]
    InvalidColor { channel: &'static str, line: usize },
    #[error("Invalid line format on line {line}: {content}")]
    InvalidLine { line: usize, content: String },
    #[error("Labels file is empty")]
    Empty,
}

/// A class name together with the color its boxes are drawn in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorLabel {
    pub fn color(&self) -> Rgb<u8> {
        Rgb([self.red, self.green, self.blue])
    }
}

pub fn load_labels(labels_cfg: &LabelsConfig) -> Result<Vec<ColorLabel>, LabelsError> {
    load_color_labels(&labels_cfg.get_path())
}

/// Reads one `label,red,green,blue` entry per line, in class index order.
/// Blank lines are skipped.
fn load_color_labels(filepath: &Path) -> Result<Vec<ColorLabel>, LabelsError> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut color_labels = Vec::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [label, red, green, blue] = parts.as_slice() else {
            return Err(LabelsError::InvalidLine {
                line: line_number,
                content: line.clone(),
            });
        };

        let parse = |value: &str, channel: &'static str| {
            value.parse::<u8>().map_err(|_| LabelsError::InvalidColor {
                channel,
                line: line_number,
            })
        };

        color_labels.push(ColorLabel {
            label: label.to_string(),
            red: parse(*red, "red")?,
            green: parse(*green, "green")?,
            blue: parse(*blue, "blue")?,
        });
    }

    if color_labels.is_empty() {
        return Err(LabelsError::Empty);
    }

    Ok(color_labels)
}
