//! Builder images: config, composition and inspection.

pub mod compose;
pub mod config;
pub mod metadata;

pub use compose::{ComposeError, Composer, CreateBuilderOptions};
pub use config::{BuilderConfig, BuildpackConfig, StackConfig};
pub use metadata::{Builder, BuilderBuildpack, BuilderError, BuilderMetadata};
