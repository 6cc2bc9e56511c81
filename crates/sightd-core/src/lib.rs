pub mod blob;
pub mod detection;
pub mod engine;

pub use blob::*;
pub use detection::*;
pub use engine::*;
