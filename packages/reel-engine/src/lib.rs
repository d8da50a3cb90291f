pub mod artifacts;
pub mod config;
pub mod error;
pub mod explain;
pub mod extract;
pub mod logging;
pub mod model;
pub mod mutation;
pub mod observer;
pub mod pipeline;
pub mod render;
pub mod retrieval;
pub mod scene;

pub use error::{ReelError, ReelResult};
