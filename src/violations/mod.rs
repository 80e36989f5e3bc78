pub mod dispatcher;
pub mod tracker;
pub mod types;

pub use dispatcher::ViolationDispatcher;
pub use tracker::{ViolationTracker, DEFAULT_THROTTLE_WINDOW};
pub use types::{ViolationEvent, ViolationType};
