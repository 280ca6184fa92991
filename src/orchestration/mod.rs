pub mod content_pipeline;
pub mod state_store;

pub use content_pipeline::{ContentPipeline, ContentPipelineBuilder};
pub use state_store::StateStore;
