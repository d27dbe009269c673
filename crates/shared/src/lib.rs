pub mod models;
pub mod error;
pub mod config;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::EventBus;
