//! Recognition engine contract and the ONNX-backed implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{cosine_matches, Embedding, FaceRegion};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("engine returned {embeddings} embeddings for {regions} regions")]
    Misaligned { regions: usize, embeddings: usize },
    #[error("engine lock poisoned")]
    Poisoned,
    #[error("{0}")]
    Other(String),
}

/// Face detection, embedding and matching.
///
/// `detect_faces` reports regions in the pixel space of the image it was
/// given. `embed_faces` returns one embedding per region, in the same order.
/// `matches` returns one decision per gallery embedding, in gallery order.
pub trait RecognitionEngine: Send {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, EngineError>;

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Embedding>, EngineError>;

    fn matches(&self, gallery: &[Embedding], candidate: &Embedding) -> Vec<bool>;
}

/// Engine shared by every active stream; analysis holds the lock for one frame.
pub type SharedEngine = Arc<Mutex<dyn RecognitionEngine>>;

pub fn shared<E: RecognitionEngine + 'static>(engine: E) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// SCRFD detection + ArcFace embeddings, matched by cosine similarity.
pub struct OnnxEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    threshold: f32,
}

impl OnnxEngine {
    /// Load both models. Fails fast if either file is missing or invalid.
    pub fn load(scrfd_path: &str, arcface_path: &str, threshold: f32) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(scrfd_path)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
            threshold,
        })
    }
}

impl RecognitionEngine for OnnxEngine {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, EngineError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Embedding>, EngineError> {
        regions
            .iter()
            .map(|region| self.recognizer.extract(image, region).map_err(EngineError::from))
            .collect()
    }

    fn matches(&self, gallery: &[Embedding], candidate: &Embedding) -> Vec<bool> {
        cosine_matches(gallery, candidate, self.threshold)
    }
}
