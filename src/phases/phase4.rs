// Phase 4: Text layout, compositing and persistence
//
// Draws the chosen text onto the cleaned background and writes a fresh PNG.
// Errors here are per-language and surface to the orchestrator.

use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{ExtractedRegions, FontStyle, NO_TEXT_PLACEHOLDER};
use crate::services::rendering::{Placement, TextRenderer};
use crate::utils::{unique_output_path, Metrics, Stage};

/// The translation when it has content, else the original, else a placeholder
pub fn text_to_draw<'a>(translated: &'a str, original: &'a str) -> &'a str {
    if !translated.trim().is_empty() {
        translated.trim()
    } else if !original.trim().is_empty() {
        original.trim()
    } else {
        NO_TEXT_PLACEHOLDER
    }
}

pub struct Phase4Pipeline {
    renderer: Arc<TextRenderer>,
    output_dir: PathBuf,
    default_position: (i32, i32),
    line_padding: i32,
    metrics: Option<Metrics>,
}

impl Phase4Pipeline {
    pub fn new(renderer: Arc<TextRenderer>, config: &RenderingConfig, output_dir: &Path) -> Self {
        Self {
            renderer,
            output_dir: output_dir.to_path_buf(),
            default_position: config.default_position,
            line_padding: config.line_padding,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// First confident box's top-left, or the configured default
    pub fn anchored_placement(&self, regions: &ExtractedRegions) -> Placement {
        let (x, y) = regions.anchor().unwrap_or(self.default_position);
        Placement::Anchored {
            x,
            y,
            line_padding: self.line_padding,
        }
    }

    /// Draw `text` on a copy of `background` and persist it under a unique name
    #[instrument(skip(self, background, text, style), fields(chars = text.len()))]
    pub async fn execute(
        &self,
        background: &DynamicImage,
        text: &str,
        style: &FontStyle,
        placement: Placement,
        prefix: &str,
    ) -> RenderingResult<PathBuf> {
        let start = Instant::now();
        let mut canvas = background.to_rgba8();
        let rendered = self
            .renderer
            .draw_text(&mut canvas, text, style, placement)
            .await?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| RenderingError::OutputFailed {
                path: self.output_dir.display().to_string(),
                source,
            })?;

        let path = unique_output_path(&self.output_dir, prefix);
        let save_path = path.clone();
        tokio::task::spawn_blocking(move || canvas.save_with_format(&save_path, image::ImageFormat::Png))
            .await
            .map_err(|e| RenderingError::TaskFailed(e.to_string()))??;

        debug!(
            "Composited {} lines at {:?} -> {}",
            rendered.lines,
            rendered.origin,
            path.display()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(Stage::Compositing, start.elapsed());
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TextToken;
    use image::{Rgba, RgbaImage};

    fn rendering_config() -> RenderingConfig {
        RenderingConfig {
            fonts_dir: PathBuf::from("fonts"),
            load_system_fonts: false,
            default_font_family: "arial.ttf".to_string(),
            default_font_size: 24.0,
            default_font_color: "#000000".to_string(),
            line_padding: 10,
            default_position: (50, 50),
            centered_font_size: 72.0,
        }
    }

    #[test]
    fn test_text_to_draw_policy() {
        assert_eq!(text_to_draw("Hola", "Hello"), "Hola");
        assert_eq!(text_to_draw("  ", "Hello\n"), "Hello");
        assert_eq!(text_to_draw("", " "), NO_TEXT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_placement_defaults_and_anchor() {
        let fonts = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(TextRenderer::with_fonts(fonts.path(), false));
        let phase = Phase4Pipeline::new(renderer, &rendering_config(), out.path());

        assert_eq!(
            phase.anchored_placement(&ExtractedRegions::empty()),
            Placement::Anchored { x: 50, y: 50, line_padding: 10 }
        );

        let regions = ExtractedRegions {
            text: "HELLO".to_string(),
            confident_tokens: vec![TextToken {
                text: "HELLO".to_string(),
                left: 7,
                top: 9,
                width: 40,
                height: 12,
                confidence: 80.0,
            }],
        };
        assert_eq!(
            phase.anchored_placement(&regions),
            Placement::Anchored { x: 7, y: 9, line_padding: 10 }
        );
    }

    #[tokio::test]
    async fn test_execute_writes_distinct_files() {
        let fonts = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let nested = out.path().join("edited");
        let renderer = Arc::new(TextRenderer::with_fonts(fonts.path(), false));
        let phase = Phase4Pipeline::new(renderer, &rendering_config(), &nested);

        let background = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 32, Rgba([255; 4])));
        let placement = Placement::Anchored { x: 2, y: 2, line_padding: 10 };

        let a = phase
            .execute(&background, "Hola", &FontStyle::default(), placement, "edited")
            .await
            .unwrap();
        let b = phase
            .execute(&background, "Bonjour", &FontStyle::default(), placement, "edited")
            .await
            .unwrap();

        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
        let saved = image::open(&a).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 32));
    }
}
