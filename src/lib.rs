pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod router;
pub mod server;
pub mod world;

pub use error::WorldError;
pub use event::{Event, Message, User, UserId};
pub use router::{EventRouter, Session};
pub use world::{World, WorldRegistry};
