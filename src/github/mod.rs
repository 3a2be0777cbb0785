mod client;
mod types;

pub use client::{GitHubClient, RetryPolicy};
pub use types::RemoteRun;
