use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue},
};
use std::time::Duration;

const USER_AGENT: &str = concat!("bicimarket-api/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the Supabase gateway. Every request carries the project
/// `apikey`; the `Authorization` header is chosen per call since it depends on
/// whose session the request runs under.
pub fn build_backend_client(api_key: &str) -> Client {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(api_key) {
        headers.insert("apikey", value);
    }
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(Duration::from_secs(env_secs("HTTP_TIMEOUT_SECS", 15)))
        .connect_timeout(Duration::from_secs(env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5)))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}
