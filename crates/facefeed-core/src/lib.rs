//! Face analysis for the live annotated video feed.
//!
//! Defines the recognition engine contract, the known-identity gallery,
//! per-frame analysis and overlay drawing, and an ONNX engine using SCRFD
//! for detection and ArcFace for embeddings.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod overlay;
pub mod recognizer;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use annotate::{annotate, AnnotateSettings, FaceAnnotation};
pub use engine::{EngineError, OnnxEngine, RecognitionEngine, SharedEngine};
pub use gallery::{EnrollError, Gallery, IdentitySpec, MultiFacePolicy};
pub use overlay::OverlayStyle;
pub use types::{Embedding, FaceRegion, GalleryEntry, MatchResult};
