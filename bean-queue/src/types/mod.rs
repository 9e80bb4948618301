pub mod ids;
pub mod message;
pub mod priority;
pub mod state;
pub mod events;

pub use ids::MessageId;
pub use message::Message;
pub use priority::Priority;
pub use state::MessageState;
pub use events::MessageEvent;
