pub mod controller;
pub mod state;

pub use controller::{ExamTimer, ExpiryCallback};
pub use state::{CountdownState, TimerPhase};
