//! Session orchestrator: binds a capture handle to the detector loops and
//! funnels their violations through one throttled reporter.

pub mod controller;
pub mod loop_worker;
pub mod status;

use serde::{Deserialize, Serialize};

pub use controller::{ProctoringController, ProctoringSetup};
pub use status::{
    Alert, Indicator, ProctoringStatus, ReferenceState, StatusBoard, SubsystemState,
    SubsystemStates,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Subsystem {
    Face,
    Brightness,
    Audio,
    Objects,
}
