//! Client-side authorization and authentication
//!
//! - `group`: checks that the invoking user belongs to the gpvpn group
//! - `helper`: runs the external helper that produces a login code

pub mod group;
pub mod helper;

pub use group::{authorize_current_user, AuthorizationError};
pub use helper::{AuthHelper, AuthHelperError};
