pub mod ids;
pub mod state;

pub use ids::{TaskId, TimerId};
pub use state::TimerState;
