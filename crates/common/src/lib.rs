pub mod crypto;
pub mod ratelimit;
