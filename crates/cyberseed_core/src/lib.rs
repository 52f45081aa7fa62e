pub mod classify;
pub mod client;
pub mod config;
pub mod failure;
#[cfg(feature = "markup-parser")]
pub mod markup;
pub mod naming;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod summarize;
