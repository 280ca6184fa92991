// Text compositing with cosmic-text
//
// Shaping, bidi reordering and per-glyph font fallback are delegated to
// cosmic-text; this module picks the shaping mode per script, lays lines out
// either from an anchor or centred, and alpha-blends glyphs onto the image.

pub mod script;

use cosmic_text::{
    fontdb, Align, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, SwashCache,
    Wrap,
};
use dashmap::DashMap;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::RenderingConfig;
use crate::core::errors::RenderingResult;
use crate::core::types::FontStyle;

pub use script::{classify, ScriptClass};

const FONT_EXTENSIONS: [&str; 3] = ["ttf", "otf", "ttc"];

/// Where the text block goes on the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Top-left of the first line at (x, y); each further line moves down by
    /// its height plus `line_padding`
    Anchored { x: i32, y: i32, line_padding: i32 },
    /// Whole block centred on the image
    Centered,
}

/// What was actually drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedText {
    pub origin: (i32, i32),
    pub width: f32,
    pub height: f32,
    pub lines: usize,
    /// False when no font was available and the image was left untouched
    pub drawn: bool,
}

pub struct TextRenderer {
    font_system: Arc<Mutex<FontSystem>>,
    swash_cache: Arc<Mutex<SwashCache>>,
    fonts_dir: PathBuf,
    /// Requested family (name or file) -> resolved family name, if any
    resolved_families: DashMap<String, Option<String>>,
}

impl TextRenderer {
    pub fn new(config: &RenderingConfig) -> Self {
        Self::with_fonts(&config.fonts_dir, config.load_system_fonts)
    }

    pub fn with_fonts(fonts_dir: &Path, load_system_fonts: bool) -> Self {
        let mut db = fontdb::Database::new();
        if load_system_fonts {
            db.load_system_fonts();
        }

        let mut loaded = 0usize;
        if let Ok(entries) = std::fs::read_dir(fonts_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_font = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FONT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false);
                if !is_font {
                    continue;
                }
                match db.load_font_file(&path) {
                    Ok(()) => {
                        loaded += 1;
                        debug!("Font loaded: {}", path.display());
                    }
                    Err(e) => warn!("Font not loadable {}: {}", path.display(), e),
                }
            }
        } else {
            debug!("Fonts directory {} not readable", fonts_dir.display());
        }

        info!(
            "Text renderer initialized: {} faces ({} from {})",
            db.faces().count(),
            loaded,
            fonts_dir.display()
        );

        Self {
            font_system: Arc::new(Mutex::new(FontSystem::new_with_locale_and_db(
                "en-US".to_string(),
                db,
            ))),
            swash_cache: Arc::new(Mutex::new(SwashCache::new())),
            fonts_dir: fonts_dir.to_path_buf(),
            resolved_families: DashMap::new(),
        }
    }

    pub async fn face_count(&self) -> usize {
        self.font_system.lock().await.db().faces().count()
    }

    /// Resolve a style family to a loaded family name.
    ///
    /// Font file paths (absolute, or relative to the fonts dir) are loaded on
    /// first use. Unknown names resolve to `None`, meaning the generic
    /// sans-serif family plus cosmic-text's fallback chain.
    fn resolve_family(&self, font_system: &mut FontSystem, requested: &str) -> Option<String> {
        if let Some(cached) = self.resolved_families.get(requested) {
            return cached.clone();
        }

        let resolved = Self::lookup_family(font_system, &self.fonts_dir, requested);
        match &resolved {
            Some(name) => debug!("Font '{}' resolved to family '{}'", requested, name),
            None => debug!("Font '{}' not found, using sans-serif fallback", requested),
        }
        self.resolved_families
            .insert(requested.to_string(), resolved.clone());
        resolved
    }

    fn lookup_family(font_system: &mut FontSystem, fonts_dir: &Path, requested: &str) -> Option<String> {
        let as_path = Path::new(requested);
        let is_file_name = as_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FONT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);

        if is_file_name {
            for candidate in [as_path.to_path_buf(), fonts_dir.join(as_path)] {
                if candidate.is_file() && font_system.db_mut().load_font_file(&candidate).is_ok() {
                    if let Some(name) = font_system
                        .db()
                        .faces()
                        .last()
                        .and_then(|face| face.families.first())
                        .map(|(name, _)| name.clone())
                    {
                        return Some(name);
                    }
                }
            }
        }

        // Match by family name, or by file stem ("arial.ttf" -> "Arial")
        let wanted = if is_file_name {
            as_path.file_stem()?.to_str()?.to_lowercase()
        } else {
            requested.trim().to_lowercase()
        };
        if wanted.is_empty() {
            return None;
        }
        let db = font_system.db();
        let exact = db
            .faces()
            .flat_map(|f| f.families.iter())
            .find(|(name, _)| name.to_lowercase() == wanted)
            .map(|(name, _)| name.clone());
        exact.or_else(|| {
            db.faces()
                .flat_map(|f| f.families.iter())
                .find(|(name, _)| name.to_lowercase().starts_with(&wanted))
                .map(|(name, _)| name.clone())
        })
    }

    fn line_height(font_size: f32) -> f32 {
        (font_size * 1.35).max(font_size * 1.2)
    }

    /// Shape `text` into a buffer constrained to `max_width`.
    fn shape(
        font_system: &mut FontSystem,
        text: &str,
        family: Option<&str>,
        font_size: f32,
        max_width: f32,
    ) -> Buffer {
        let class = classify(text);
        let metrics = Metrics::new(font_size, Self::line_height(font_size));
        let mut buffer = Buffer::new(font_system, metrics);
        buffer.set_size(font_system, Some(max_width.max(1.0)), None);
        buffer.set_wrap(font_system, Wrap::WordOrGlyph);

        let attrs = match family {
            Some(name) => Attrs::new().family(Family::Name(name)),
            None => Attrs::new().family(Family::SansSerif),
        };
        buffer.set_text(font_system, text, &attrs, class.shaping());
        // RTL paragraphs would otherwise hug the right edge of the layout box
        for line in buffer.lines.iter_mut() {
            line.set_align(Some(Align::Left));
        }
        buffer.shape_until_scroll(font_system, false);
        buffer
    }

    /// Visual (width, height) of a shaped buffer
    fn extent(buffer: &Buffer) -> (f32, f32, usize) {
        let mut width = 0.0f32;
        let mut lines = 0usize;
        for run in buffer.layout_runs() {
            lines += 1;
            let glyph_right = run
                .glyphs
                .iter()
                .map(|g| g.x + g.w)
                .fold(run.line_w, f32::max);
            width = width.max(glyph_right);
        }
        (width, lines as f32 * buffer.metrics().line_height, lines)
    }

    /// Draw `text` onto `img`.
    ///
    /// With no fonts at all the image is left as is and `drawn` is false, so
    /// callers still get an output file.
    pub async fn draw_text(
        &self,
        img: &mut RgbaImage,
        text: &str,
        style: &FontStyle,
        placement: Placement,
    ) -> RenderingResult<RenderedText> {
        let (img_w, img_h) = (img.width() as i32, img.height() as i32);
        let color = style.rgba();
        let class = classify(text);

        let mut font_system = self.font_system.lock().await;
        if font_system.db().faces().next().is_none() {
            warn!("No fonts loaded, leaving image without text");
            let origin = match placement {
                Placement::Anchored { x, y, .. } => (x, y),
                Placement::Centered => (img_w / 2, img_h / 2),
            };
            return Ok(RenderedText {
                origin,
                width: 0.0,
                height: 0.0,
                lines: 0,
                drawn: false,
            });
        }
        let family = self.resolve_family(&mut font_system, &style.family);
        let mut swash_cache = self.swash_cache.lock().await;

        debug!(
            "Drawing {} chars ({:?}, shaped: {}) with {:?}",
            text.chars().count(),
            class,
            class.needs_shaping(),
            placement
        );

        let rendered = match placement {
            Placement::Anchored { x, y, line_padding } => {
                let max_width = (img_w - x).max(1) as f32;
                let mut cursor_y = y;
                let mut width = 0.0f32;
                let mut lines = 0usize;
                for line in text.lines() {
                    let buffer = Self::shape(&mut font_system, line, family.as_deref(), style.size, max_width);
                    let (w, h, runs) = Self::extent(&buffer);
                    Self::blit(&buffer, &mut font_system, &mut swash_cache, img, color, x, cursor_y);
                    width = width.max(w);
                    lines += runs.max(1);
                    let advance = if runs == 0 { Self::line_height(style.size) } else { h };
                    cursor_y += advance as i32 + line_padding;
                }
                RenderedText {
                    origin: (x, y),
                    width,
                    height: (cursor_y - y) as f32,
                    lines,
                    drawn: true,
                }
            }
            Placement::Centered => {
                let buffer = Self::shape(&mut font_system, text.trim(), family.as_deref(), style.size, img_w as f32);
                let (w, h, lines) = Self::extent(&buffer);
                let x = ((img_w as f32 - w) / 2.0) as i32;
                let y = ((img_h as f32 - h) / 2.0) as i32;
                Self::blit(&buffer, &mut font_system, &mut swash_cache, img, color, x, y);
                RenderedText {
                    origin: (x, y),
                    width: w,
                    height: h,
                    lines,
                    drawn: true,
                }
            }
        };

        Ok(rendered)
    }

    /// Alpha-blend the buffer's glyph coverage at (x, y)
    fn blit(
        buffer: &Buffer,
        font_system: &mut FontSystem,
        swash_cache: &mut SwashCache,
        img: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
    ) {
        let cosmic_color = CosmicColor::rgba(color[0], color[1], color[2], color[3]);
        let (img_w, img_h) = (img.width() as i32, img.height() as i32);

        buffer.draw(font_system, swash_cache, cosmic_color, |px, py, w, h, pixel| {
            let alpha = pixel.a() as f32 / 255.0;
            if alpha <= 0.0 {
                return;
            }
            let inv_alpha = 1.0 - alpha;
            for dy in 0..h as i32 {
                for dx in 0..w as i32 {
                    let ix = x + px + dx;
                    let iy = y + py + dy;
                    if ix < 0 || iy < 0 || ix >= img_w || iy >= img_h {
                        continue;
                    }
                    let existing = img.get_pixel(ix as u32, iy as u32);
                    let blended = Rgba([
                        (pixel.r() as f32 * alpha + existing[0] as f32 * inv_alpha) as u8,
                        (pixel.g() as f32 * alpha + existing[1] as f32 * inv_alpha) as u8,
                        (pixel.b() as f32 * alpha + existing[2] as f32 * inv_alpha) as u8,
                        existing[3].max(pixel.a()),
                    ]);
                    img.put_pixel(ix as u32, iy as u32, blended);
                }
            }
        });
    }
}
