//! Deterministic recognition engines for tests.

use crate::engine::{EngineError, RecognitionEngine};
use crate::types::{cosine_matches, Embedding, FaceRegion};
use image::RgbImage;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Call counters shared with the test after the engine is moved away.
#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    detect: Arc<AtomicUsize>,
    embed: Arc<AtomicUsize>,
}

impl CallCounts {
    pub fn detect(&self) -> usize {
        self.detect.load(Ordering::SeqCst)
    }

    pub fn embed(&self) -> usize {
        self.embed.load(Ordering::SeqCst)
    }
}

/// Reports a fixed set of regions for every image and embeds each region as
/// `[left, top]`. Selected `detect_faces` calls (0-based) can be made to fail.
pub struct ScriptedEngine {
    faces: Vec<FaceRegion>,
    fail_on: HashSet<usize>,
    threshold: f32,
    counts: CallCounts,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            faces: Vec::new(),
            fail_on: HashSet::new(),
            threshold: 0.5,
            counts: CallCounts::default(),
        }
    }

    pub fn with_faces(mut self, faces: Vec<FaceRegion>) -> Self {
        self.faces = faces;
        self
    }

    pub fn failing_on(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_on.extend(calls);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn counts(&self) -> CallCounts {
        self.counts.clone()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<FaceRegion>, EngineError> {
        let call = self.counts.detect.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(EngineError::Other(format!("scripted failure on call {call}")));
        }
        Ok(self.faces.clone())
    }

    fn embed_faces(
        &mut self,
        _image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Embedding>, EngineError> {
        self.counts.embed.fetch_add(1, Ordering::SeqCst);
        Ok(regions
            .iter()
            .map(|r| Embedding::new(vec![r.left as f32, r.top as f32]))
            .collect())
    }

    fn matches(&self, gallery: &[Embedding], candidate: &Embedding) -> Vec<bool> {
        cosine_matches(gallery, candidate, self.threshold)
    }
}

/// Treats every 4-connected blob of bright pixels (all channels above 200)
/// as a face. The embedding is the blob's mean colour, so differently tinted
/// blobs are different identities.
#[derive(Debug, Default)]
pub struct BrightSpotEngine;

const BRIGHT: u8 = 200;

fn is_bright(image: &RgbImage, x: u32, y: u32) -> bool {
    image.get_pixel(x, y).0.iter().all(|&c| c > BRIGHT)
}

impl RecognitionEngine for BrightSpotEngine {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, EngineError> {
        let (w, h) = image.dimensions();
        let mut seen = vec![false; (w * h) as usize];
        let mut regions = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) as usize;
                if seen[idx] || !is_bright(image, x, y) {
                    continue;
                }
                let (mut left, mut top, mut right, mut bottom) = (x, y, x, y);
                let mut stack = vec![(x, y)];
                seen[idx] = true;
                while let Some((cx, cy)) = stack.pop() {
                    left = left.min(cx);
                    right = right.max(cx);
                    top = top.min(cy);
                    bottom = bottom.max(cy);
                    let neighbours = [
                        (cx.wrapping_sub(1), cy),
                        (cx + 1, cy),
                        (cx, cy.wrapping_sub(1)),
                        (cx, cy + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= w || ny >= h {
                            continue;
                        }
                        let nidx = (ny * w + nx) as usize;
                        if !seen[nidx] && is_bright(image, nx, ny) {
                            seen[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
                regions.push(FaceRegion::new(
                    top as i32,
                    right as i32,
                    bottom as i32,
                    left as i32,
                ));
            }
        }
        Ok(regions)
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<Embedding>, EngineError> {
        let (w, h) = image.dimensions();
        Ok(regions
            .iter()
            .map(|r| {
                let mut sum = [0.0f32; 3];
                let mut n = 0.0f32;
                for y in r.top.max(0)..=r.bottom.min(h as i32 - 1) {
                    for x in r.left.max(0)..=r.right.min(w as i32 - 1) {
                        let px = image.get_pixel(x as u32, y as u32);
                        for c in 0..3 {
                            sum[c] += px[c] as f32;
                        }
                        n += 1.0;
                    }
                }
                Embedding::new(sum.iter().map(|s| s / n.max(1.0)).collect())
            })
            .collect())
    }

    fn matches(&self, gallery: &[Embedding], candidate: &Embedding) -> Vec<bool> {
        cosine_matches(gallery, candidate, 0.999)
    }
}
