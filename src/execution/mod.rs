// Execution engine
//
// The coordinator drives one decision cycle at a time against the exchange
// gateway; the state machine is the single writer of the position; retry,
// scheduling, and the candle window are its supporting pieces.

pub mod coordinator;
pub mod retry;
pub mod schedule;
pub mod state_machine;
pub mod window;

pub use coordinator::{Coordinator, CycleOutcome, EngineSettings};
pub use retry::RetryPolicy;
pub use state_machine::{position_from_report, PositionState, PositionTracker};
pub use window::CandleWindow;
