//! Outbound notifications. Email is the only channel.

mod email;

pub use email::*;
