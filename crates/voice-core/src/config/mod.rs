//! Configuration for the voice pipeline
//!
//! ```ignore
//! use voice_core::config::{default_config_path, load_config, PipelineConfig};
//!
//! let config: PipelineConfig = load_config(&default_config_path());
//! config.validate()?;
//! ```

mod io;
mod paths;
mod pipeline;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
pub use pipeline::{GainSettings, LayerTuning, PipelineConfig, SinkSettings, SourceSettings};
