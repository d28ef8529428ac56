//! Database models split into domain-specific modules.

pub mod attendance;
pub mod class;
pub mod face;
pub mod notification;
pub mod user;

pub use attendance::*;
pub use class::*;
pub use face::*;
pub use notification::*;
pub use user::*;
