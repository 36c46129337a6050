//! Default values for configuration

/// Default upstream base URL (Sportradar soccer extended v4, English)
pub fn default_api_base_url() -> String {
    std::env::var("MATCHSTATS_BASE_URL").unwrap_or_else(|_| {
        "https://api.sportradar.com/soccer-extended/production/v4/en".to_string()
    })
}

/// Default environment variable holding the API key
pub fn default_api_key_env() -> String {
    "SPORTRADAR_API_KEY".to_string()
}

/// Default query parameter the API key is sent in
pub fn default_api_key_param() -> String {
    "api_key".to_string()
}

/// Default per-request timeout in seconds
pub fn default_api_timeout() -> u64 {
    30
}

/// Default user agent
pub fn default_api_user_agent() -> String {
    format!("matchstats/{}", env!("CARGO_PKG_VERSION"))
}

/// Default competition index endpoint (lists seasons)
pub fn default_competition_endpoint() -> Option<String> {
    Some("{base}/competitions/{id}/seasons.xml".to_string())
}

/// Default season index endpoint (lists scheduled matches)
pub fn default_season_endpoint() -> Option<String> {
    Some("{base}/seasons/{id}/schedules.xml".to_string())
}

/// Default match document endpoint
pub fn default_match_endpoint() -> String {
    "{base}/sport_events/{id}/summary.xml".to_string()
}

/// Default requests allowed per window (trial keys allow one per second)
pub fn default_requests_per_window() -> u32 {
    1
}

/// Default rate window length in seconds
pub fn default_window_secs() -> u64 {
    1
}

/// Default retry bound for throttled and transient failures
pub fn default_max_retries() -> u32 {
    3
}

/// Default initial backoff in milliseconds
pub fn default_backoff_base_ms() -> u64 {
    2000
}

/// Default backoff ceiling in milliseconds
pub fn default_backoff_max_ms() -> u64 {
    60_000
}

/// Default raw document directory (relative to the config directory)
pub fn default_documents_dir() -> String {
    "games".to_string()
}

/// Default output table directory (relative to the config directory)
pub fn default_tables_dir() -> String {
    "tables".to_string()
}

/// Default number of parse workers
pub fn default_transform_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
}

/// Default: also write CSV copies of the tables
pub fn default_write_csv() -> bool {
    true
}
