pub mod email;
pub mod mattermost;
pub mod slack;
pub mod telegram;
pub mod webhook;

use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub(crate) fn http_client(timeout_secs: Option<u64>) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
        .build()
        .unwrap_or_default()
}
