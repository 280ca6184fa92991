pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{
    encode_mask_png, encode_png, load_image_async, load_image_from_memory_async,
    unique_output_path,
};
pub use metrics::{Metrics, Stage};
