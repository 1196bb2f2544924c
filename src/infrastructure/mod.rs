pub mod event;
pub mod host;
pub mod logging;
