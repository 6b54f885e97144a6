pub mod http;
pub mod scripted;

pub use http::{HttpFeedConfig, HttpSignalFeed};
pub use scripted::ScriptedFeed;
