//! Device drive states and user-level line states.

/// Device-level drive-state codes.
pub mod drive;
/// User-level line states and their drive mapping.
pub mod line_state;

pub use drive::{DriveState, PcmCut};
pub use line_state::LineState;
