// Phase 3: Mask building and text removal
//
// The mask is 255 inside every confident token box and 0 elsewhere. An empty
// mask means there is nothing to erase and the inpainter is not called.

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::errors::InpaintingError;
use crate::core::types::{FallbackReason, Outcome, TextToken};
use crate::services::inpainting::Inpainter;
use crate::utils::{Metrics, Stage};

/// Filled, non-antialiased rectangles clipped to the image
pub fn build_mask(width: u32, height: u32, boxes: &[TextToken]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for token in boxes {
        let x_end = token.left.saturating_add(token.width).min(width);
        let y_end = token.top.saturating_add(token.height).min(height);
        for y in token.top.min(height)..y_end {
            for x in token.left.min(width)..x_end {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

pub fn mask_is_empty(mask: &GrayImage) -> bool {
    mask.pixels().all(|p| p[0] == 0)
}

pub struct Phase3Pipeline {
    inpainter: Option<Arc<dyn Inpainter>>,
    metrics: Option<Metrics>,
}

impl Phase3Pipeline {
    pub fn new(inpainter: Option<Arc<dyn Inpainter>>) -> Self {
        Self {
            inpainter,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Erase the confident text boxes from `source`.
    ///
    /// Every failure path falls back to the unmodified source image.
    #[instrument(skip_all, fields(boxes = boxes.len()))]
    pub async fn execute(&self, source: &DynamicImage, boxes: &[TextToken]) -> Outcome<DynamicImage> {
        let (width, height) = source.dimensions();
        let mask = build_mask(width, height, boxes);

        if mask_is_empty(&mask) {
            debug!("Empty mask, skipping inpainting");
            return Outcome::fallback(source.clone(), FallbackReason::NothingToErase);
        }

        let Some(inpainter) = &self.inpainter else {
            return Outcome::fallback(source.clone(), FallbackReason::InpaintingUnavailable);
        };

        let start = Instant::now();
        let result = inpainter
            .inpaint(source, &mask)
            .await
            .and_then(|cleaned| {
                if cleaned.dimensions() == (width, height) {
                    Ok(cleaned)
                } else {
                    Err(InpaintingError::DimensionMismatch {
                        width,
                        height,
                        actual_width: cleaned.width(),
                        actual_height: cleaned.height(),
                    })
                }
            });
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(Stage::Inpainting, start.elapsed());
        }

        let outcome = Outcome::recover(
            result,
            || source.clone(),
            |e| FallbackReason::InpaintingFailed(e.to_string()),
        );
        if let Some(reason) = outcome.reason() {
            warn!("Inpainting fell back to the source image: {}", reason);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::InpaintingResult;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    fn boxed(left: u32, top: u32, width: u32, height: u32) -> TextToken {
        TextToken {
            text: "x".to_string(),
            left,
            top,
            width,
            height,
            confidence: 90.0,
        }
    }

    fn source() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 10, Rgba([200, 0, 0, 255])))
    }

    struct Whiteout;

    #[async_trait]
    impl Inpainter for Whiteout {
        async fn inpaint(&self, image: &DynamicImage, _: &GrayImage) -> InpaintingResult<DynamicImage> {
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                image.width(),
                image.height(),
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    struct WrongSize;

    #[async_trait]
    impl Inpainter for WrongSize {
        async fn inpaint(&self, _: &DynamicImage, _: &GrayImage) -> InpaintingResult<DynamicImage> {
            Ok(DynamicImage::ImageRgba8(RgbaImage::new(5, 5)))
        }
    }

    #[test]
    fn test_mask_marks_boxes() {
        let mask = build_mask(10, 8, &[boxed(2, 1, 3, 2)]);
        assert_eq!(mask.dimensions(), (10, 8));
        assert_eq!(mask.get_pixel(2, 1)[0], 255);
        assert_eq!(mask.get_pixel(4, 2)[0], 255);
        assert_eq!(mask.get_pixel(5, 2)[0], 0);
        assert_eq!(mask.get_pixel(2, 3)[0], 0);
        let marked = mask.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(marked, 6);
    }

    #[test]
    fn test_mask_clips_out_of_bounds_boxes() {
        let mask = build_mask(4, 4, &[boxed(3, 3, 10, 10), boxed(50, 50, 5, 5)]);
        let marked = mask.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(marked, 1);
    }

    #[test]
    fn test_no_boxes_is_all_zero() {
        let mask = build_mask(16, 16, &[]);
        assert!(mask_is_empty(&mask));
    }

    #[tokio::test]
    async fn test_empty_mask_skips_inpainter() {
        let phase = Phase3Pipeline::new(Some(Arc::new(WrongSize)));
        let out = phase.execute(&source(), &[]).await;
        assert_eq!(out.reason(), Some(&FallbackReason::NothingToErase));
        assert_eq!(out.value().dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn test_inpainting_success_and_failures() {
        let boxes = [boxed(1, 1, 4, 4)];

        let out = Phase3Pipeline::new(Some(Arc::new(Whiteout)))
            .execute(&source(), &boxes)
            .await;
        assert!(!out.is_fallback());
        assert_eq!(out.value().to_rgba8().get_pixel(0, 0), &Rgba([255, 255, 255, 255]));

        let out = Phase3Pipeline::new(None).execute(&source(), &boxes).await;
        assert_eq!(out.reason(), Some(&FallbackReason::InpaintingUnavailable));

        let out = Phase3Pipeline::new(Some(Arc::new(WrongSize)))
            .execute(&source(), &boxes)
            .await;
        assert!(matches!(out.reason(), Some(FallbackReason::InpaintingFailed(_))));
        assert_eq!(out.value().to_rgba8().get_pixel(0, 0), &Rgba([200, 0, 0, 255]));
    }
}
