pub mod batch;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod scheduler;
pub mod sentiment;
pub mod webhook;

pub use common::{crypto, ratelimit};
