//! Known-identity gallery, enrolled once at startup from reference images.

use crate::engine::{EngineError, RecognitionEngine};
use crate::types::{Embedding, GalleryEntry, MatchResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("failed to load reference image for {name} ({}): {source}", path.display())]
    Image {
        name: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face found in reference image for {name} ({})", path.display())]
    NoFaceFound { name: String, path: PathBuf },
    #[error(
        "{count} faces found in reference image for {name} ({}); expected exactly one",
        path.display()
    )]
    MultipleFaces {
        name: String,
        path: PathBuf,
        count: usize,
    },
    #[error("recognition failed for {name}: {source}")]
    Engine {
        name: String,
        #[source]
        source: EngineError,
    },
}

/// What to do when a reference image contains more than one face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Enroll the first face the engine reports.
    #[default]
    First,
    /// Refuse to start.
    Reject,
}

/// One identity to enroll: a display name and its reference image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentitySpec {
    pub name: String,
    pub image: PathBuf,
}

/// Ordered, immutable set of known identities. First match wins.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    embeddings: Vec<Embedding>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        let embeddings = entries.iter().map(|e| e.embedding.clone()).collect();
        Self {
            entries,
            embeddings,
        }
    }

    /// Enroll every identity in order. Any reference image without a usable
    /// face aborts the whole load; a partial gallery is never returned.
    pub fn enroll(
        identities: &[IdentitySpec],
        engine: &mut dyn RecognitionEngine,
        policy: MultiFacePolicy,
    ) -> Result<Self, EnrollError> {
        let mut entries = Vec::with_capacity(identities.len());
        for identity in identities {
            let embedding = enroll_one(&identity.name, &identity.image, engine, policy)?;
            tracing::info!(
                name = %identity.name,
                path = %identity.image.display(),
                "identity enrolled"
            );
            entries.push(GalleryEntry {
                name: identity.name.clone(),
                embedding,
            });
        }
        Ok(Self::from_entries(entries))
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identify a candidate: the first entry, in gallery order, the engine
    /// reports as a match.
    pub fn identify(&self, engine: &dyn RecognitionEngine, candidate: &Embedding) -> MatchResult {
        engine
            .matches(&self.embeddings, candidate)
            .iter()
            .position(|&matched| matched)
            .and_then(|idx| self.entries.get(idx))
            .map(|entry| MatchResult::Identified(entry.name.clone()))
            .unwrap_or(MatchResult::Unknown)
    }
}

fn enroll_one(
    name: &str,
    path: &Path,
    engine: &mut dyn RecognitionEngine,
    policy: MultiFacePolicy,
) -> Result<Embedding, EnrollError> {
    let image = image::open(path)
        .map_err(|source| EnrollError::Image {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let engine_err = |source| EnrollError::Engine {
        name: name.to_string(),
        source,
    };

    let regions = engine.detect_faces(&image).map_err(engine_err)?;
    match (regions.len(), policy) {
        (0, _) => {
            return Err(EnrollError::NoFaceFound {
                name: name.to_string(),
                path: path.to_path_buf(),
            })
        }
        (1, _) => {}
        (count, MultiFacePolicy::Reject) => {
            return Err(EnrollError::MultipleFaces {
                name: name.to_string(),
                path: path.to_path_buf(),
                count,
            })
        }
        (count, MultiFacePolicy::First) => {
            tracing::warn!(name, count, "multiple faces in reference image; enrolling the first");
        }
    }

    let first = &regions[..1];
    let mut embeddings = engine.embed_faces(&image, first).map_err(engine_err)?;
    if embeddings.len() != 1 {
        return Err(engine_err(EngineError::Misaligned {
            regions: 1,
            embeddings: embeddings.len(),
        }));
    }
    Ok(embeddings.remove(0))
}
