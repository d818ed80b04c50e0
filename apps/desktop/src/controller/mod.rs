//! Controller layer: view routing, error classification and shell command orchestration.

pub mod events;
pub mod orchestration;
pub mod router;
