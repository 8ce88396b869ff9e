pub mod user_session;

pub use user_session::*;
