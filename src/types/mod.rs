//! Public types for the Parley API.

mod event;
mod message;
mod params;

pub use event::{AdapterEvent, ReplyEvent};
pub use message::{Message, Role};
pub use params::GenerationParams;
