//! Voice Core - layered virtual sinks and sources for voice calls

pub mod clock;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gc;
pub mod hardware;
pub mod latency;
pub mod pipeline;
pub mod queue;
pub mod rewind;
pub mod sink;
pub mod source;
pub mod types;
pub mod volume;

pub use error::{DispatchError, PipelineError, StateError};
pub use pipeline::{DeviceInfo, LayerOptions, Pipeline, PipelineServices};
pub use sink::SinkChain;
pub use source::SourceChain;
pub use types::*;
