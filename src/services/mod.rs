pub mod captioning;
pub mod generation;
pub mod inpainting;
pub mod ocr;
pub mod rendering;
pub mod scheduler;
pub mod translation;

// Re-export commonly used services
pub use captioning::{Captioner, HttpCaptioner};
pub use generation::{ImageGenerator, PromptImageClient};
pub use inpainting::{HttpInpainter, Inpainter};
pub use ocr::{OcrEngine, RecognizedPage, TesseractOcr};
pub use rendering::{Placement, TextRenderer};
pub use scheduler::PostScheduler;
pub use translation::{TranslationAdapter, TranslationBackend};
