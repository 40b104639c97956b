//! Single-frame analysis: downsample, detect, embed, rescale, identify, draw.

use crate::engine::{EngineError, RecognitionEngine};
use crate::gallery::Gallery;
use crate::overlay::{self, OverlayStyle};
use crate::types::{FaceRegion, MatchResult};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Parameters for one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotateSettings {
    /// Linear downsample factor applied before detection, in (0, 1].
    pub downsample_scale: f32,
    pub style: OverlayStyle,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        Self {
            downsample_scale: 0.25,
            style: OverlayStyle::default(),
        }
    }
}

/// One identified (or unknown) face in full-resolution coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub region: FaceRegion,
    pub result: MatchResult,
}

/// Detection copy of `image`, each axis multiplied by `scale`.
pub fn downsample(image: &RgbImage, scale: f32) -> RgbImage {
    if (scale - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Run detection and recognition on a downsampled copy of `image` and return
/// the faces mapped back to full resolution. Does not modify `image`.
pub fn analyze(
    engine: &mut dyn RecognitionEngine,
    gallery: &Gallery,
    image: &RgbImage,
    settings: &AnnotateSettings,
) -> Result<Vec<FaceAnnotation>, EngineError> {
    let small = downsample(image, settings.downsample_scale);

    let regions = engine.detect_faces(&small)?;
    if regions.is_empty() {
        return Ok(Vec::new());
    }
    let embeddings = engine.embed_faces(&small, &regions)?;
    if embeddings.len() != regions.len() {
        return Err(EngineError::Misaligned {
            regions: regions.len(),
            embeddings: embeddings.len(),
        });
    }

    Ok(regions
        .iter()
        .zip(embeddings.iter())
        .map(|(region, embedding)| FaceAnnotation {
            region: region.rescale(settings.downsample_scale),
            result: gallery.identify(&*engine, embedding),
        })
        .collect())
}

pub fn draw_annotations(image: &mut RgbImage, annotations: &[FaceAnnotation], style: OverlayStyle) {
    for annotation in annotations {
        overlay::draw_face(image, &annotation.region, &annotation.result, style);
    }
}

/// Analyze and draw in place. On error `image` is left untouched.
pub fn annotate(
    engine: &mut dyn RecognitionEngine,
    gallery: &Gallery,
    image: &mut RgbImage,
    settings: &AnnotateSettings,
) -> Result<Vec<FaceAnnotation>, EngineError> {
    let annotations = analyze(engine, gallery, image, settings)?;
    draw_annotations(image, &annotations, settings.style);
    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BrightSpotEngine, ScriptedEngine};
    use crate::types::{Embedding, GalleryEntry};
    use image::Rgb;

    fn scene(spot: (u32, u32, u32, u32)) -> RgbImage {
        let (x0, y0, w, h) = spot;
        let mut img = RgbImage::from_pixel(640, 480, Rgb([10, 10, 10]));
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        img
    }

    #[test]
    fn test_downsample_dimensions() {
        let img = RgbImage::new(640, 480);
        let small = downsample(&img, 0.25);
        assert_eq!(small.dimensions(), (160, 120));
        assert_eq!(downsample(&img, 1.0).dimensions(), (640, 480));
    }

    #[test]
    fn test_rescaled_region_matches_full_resolution_detection() {
        let img = scene((200, 120, 160, 200));
        let mut engine = BrightSpotEngine;

        let direct = engine.detect_faces(&img).unwrap();
        assert_eq!(direct.len(), 1);

        let settings = AnnotateSettings::default();
        let annotations = analyze(&mut engine, &Gallery::default(), &img, &settings).unwrap();
        assert_eq!(annotations.len(), 1);

        let mapped = &annotations[0].region;
        let tolerance = (1.0 / settings.downsample_scale) as i32 + 1;
        for (a, b) in [
            (mapped.top, direct[0].top),
            (mapped.right, direct[0].right),
            (mapped.bottom, direct[0].bottom),
            (mapped.left, direct[0].left),
        ] {
            assert!((a - b).abs() <= tolerance, "mapped {mapped:?} vs direct {:?}", direct[0]);
        }
    }

    #[test]
    fn test_rescale_follows_half_scale() {
        let img = scene((200, 120, 160, 200));
        let mut engine = BrightSpotEngine;
        let settings = AnnotateSettings {
            downsample_scale: 0.5,
            ..Default::default()
        };
        let annotations = analyze(&mut engine, &Gallery::default(), &img, &settings).unwrap();
        let region = &annotations[0].region;
        assert!((region.left - 200).abs() <= 3, "{region:?}");
        assert!((region.bottom - 319).abs() <= 3, "{region:?}");
    }

    #[test]
    fn test_annotate_identifies_against_gallery() {
        let img = scene((200, 120, 160, 200));
        let gallery = Gallery::from_entries(vec![GalleryEntry {
            name: "White".into(),
            embedding: Embedding::new(vec![255.0, 255.0, 255.0]),
        }]);
        let mut engine = BrightSpotEngine;
        let mut frame = img.clone();
        let annotations =
            annotate(&mut engine, &gallery, &mut frame, &AnnotateSettings::default()).unwrap();
        assert_eq!(annotations[0].result, MatchResult::Identified("White".into()));
        assert_ne!(frame, img);
    }

    #[test]
    fn test_annotate_failure_leaves_frame_untouched() {
        let img = scene((200, 120, 160, 200));
        let mut engine = ScriptedEngine::new()
            .with_faces(vec![FaceRegion::new(10, 20, 20, 10)])
            .failing_on([0]);
        let mut frame = img.clone();
        let settings = AnnotateSettings::default();
        let result = annotate(&mut engine, &Gallery::default(), &mut frame, &settings);
        assert!(result.is_err());
        assert_eq!(frame, img);
    }

    #[test]
    fn test_no_faces_skips_embedding() {
        let img = RgbImage::new(64, 64);
        let mut engine = ScriptedEngine::new();
        let counts = engine.counts();
        let annotations =
            analyze(&mut engine, &Gallery::default(), &img, &AnnotateSettings::default()).unwrap();
        assert!(annotations.is_empty());
        assert_eq!(counts.detect(), 1);
        assert_eq!(counts.embed(), 0);
    }
}
