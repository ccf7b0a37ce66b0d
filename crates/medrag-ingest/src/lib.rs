pub mod chunker;
pub mod pipeline;
pub mod store;

pub use chunker::*;
pub use pipeline::*;
pub use store::*;
