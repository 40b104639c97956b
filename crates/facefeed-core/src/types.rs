use image::Rgb;
use serde::{Deserialize, Serialize};

/// Outline and label colour for a face that matched a gallery entry.
pub const IDENTIFIED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Outline and label colour for a face with no gallery match.
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Label shown for an unmatched face.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned face rectangle in the pixel space of the image it was detected in.
///
/// Edges are inclusive pixel coordinates: `left..=right`, `top..=bottom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Map a region found on an image downsampled by `scale` back to the
    /// full-resolution image (every coordinate multiplied by `1 / scale`).
    pub fn rescale(&self, scale: f32) -> FaceRegion {
        let factor = 1.0 / scale;
        let up = |v: i32| (v as f32 * factor).round() as i32;
        FaceRegion {
            top: up(self.top),
            right: up(self.right),
            bottom: up(self.bottom),
            left: up(self.left),
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One enrolled identity. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Identification outcome for one detected face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Identified(String),
    Unknown,
}

impl MatchResult {
    /// Text drawn in the label bar.
    pub fn label(&self) -> &str {
        match self {
            MatchResult::Identified(name) => name,
            MatchResult::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            MatchResult::Identified(_) => IDENTIFIED_COLOR,
            MatchResult::Unknown => UNKNOWN_COLOR,
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, MatchResult::Identified(_))
    }
}

/// Positional match decisions: `similarity(gallery[i], candidate) >= threshold`.
pub fn cosine_matches(gallery: &[Embedding], candidate: &Embedding, threshold: f32) -> Vec<bool> {
    gallery
        .iter()
        .map(|known| known.similarity(candidate) >= threshold)
        .collect()
}
