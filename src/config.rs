use clap::Parser;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "donation-gate")]
#[command(about = "Rate-limited API gateway for the donation site")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Shared counter store, e.g. "redis://127.0.0.1:6379"
    // Without it counters live in process memory
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    // Base delay for violation backoff in seconds
    #[arg(long, default_value_t = 60)]
    pub backoff_base_secs: u64,

    // Upper bound for violation backoff in seconds
    #[arg(long, default_value_t = 3600)]
    pub backoff_max_secs: u64,

    // How long a client's violation count is remembered
    #[arg(long, default_value_t = 3600)]
    pub violation_ttl_secs: u64,

    // Hex SHA-256 of the admin password accepted by /api/auth/login
    #[arg(long, env = "ADMIN_PASSWORD_SHA256")]
    pub admin_password_sha256: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backoff_policy() {
        let args = Args::parse_from(["donation-gate"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.backoff_base_secs, 60);
        assert_eq!(args.backoff_max_secs, 3600);
        assert_eq!(args.violation_ttl_secs, 3600);
    }

    #[test]
    fn redis_url_from_flag() {
        let args = Args::parse_from(["donation-gate", "--redis-url", "redis://cache:6379"]);
        assert_eq!(args.redis_url.as_deref(), Some("redis://cache:6379"));
    }
}
