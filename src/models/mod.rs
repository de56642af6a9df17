//! Domain models shared across the whole monitoring pipeline.

pub mod alert;
pub mod position;
pub mod tick;

pub use alert::{DispatchedAlert, Direction, MoveEvent};
pub use position::{CloseReason, Level, Position, TradeRecord, TradeStats};
pub use tick::{Sample, Tick};
