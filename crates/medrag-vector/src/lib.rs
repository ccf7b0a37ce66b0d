pub mod expansion;
pub mod index;
pub mod providers;
pub mod retriever;

pub use expansion::*;
pub use index::*;
pub use providers::*;
pub use retriever::*;
