pub mod auth;
pub mod logging;
pub mod notify;
pub mod runtime;
pub mod settings;
pub mod sink;
pub mod source;
pub mod sync;
