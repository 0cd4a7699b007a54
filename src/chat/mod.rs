pub mod engine;
pub mod store;

pub use engine::{ChatEngine, ChatSettings, SendOutcome, SendRequest};
pub use store::ChatStore;
