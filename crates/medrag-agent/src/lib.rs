pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod service;
pub mod session;
pub mod state;

pub use gateway::*;
pub use model::*;
pub use orchestrator::*;
pub use service::*;
pub use session::*;
pub use state::*;
