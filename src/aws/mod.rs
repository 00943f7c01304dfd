//! AWS side of the login: role selection, the STS exchange and where the
//! resulting credentials end up.

pub mod credentials;
pub mod roles;
pub mod sink;
pub mod sts;
