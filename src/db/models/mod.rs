//! Database models split into domain-specific modules.

pub mod audit;
pub mod common;
pub mod contact_request;
pub mod invitation;
pub mod metrics;
pub mod patient;
pub mod payment;
pub mod profile;
pub mod session;
pub mod site_content;
pub mod therapist;

pub use audit::*;
pub use common::*;
pub use contact_request::*;
pub use invitation::*;
pub use metrics::*;
pub use patient::*;
pub use payment::*;
pub use profile::*;
pub use session::*;
pub use site_content::*;
pub use therapist::*;
