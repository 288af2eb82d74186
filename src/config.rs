use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::handlers::Limits;
use crate::token::TokenSigner;

/// Server configuration, shared by `serve` and `configtest`.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Host address to bind to
    #[arg(long, env = "GA4GH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "GA4GH_PORT", default_value = "8000")]
    pub port: u16,

    /// Repository root directory
    #[arg(long, env = "GA4GH_REPO", default_value = "./repo")]
    pub repo: PathBuf,

    /// Page size used when a search omits pageSize
    #[arg(long, env = "GA4GH_DEFAULT_PAGE_SIZE", default_value = "100")]
    pub default_page_size: usize,

    /// Hard ceiling on pageSize; larger requests are clamped
    #[arg(long, env = "GA4GH_MAX_PAGE_SIZE", default_value = "1000")]
    pub max_page_size: usize,

    /// Largest reference-bases span a single request may ask for
    #[arg(long, env = "GA4GH_MAX_BASES_SPAN", default_value = "1048576")]
    pub max_bases_span: u64,

    /// Bases returned per page within an accepted span
    #[arg(long, env = "GA4GH_BASES_CHUNK", default_value = "65536")]
    pub bases_chunk: u64,

    /// Per-request deadline in seconds for backend page extraction
    #[arg(long, env = "GA4GH_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout_secs: u64,

    /// HMAC key for continuation tokens; a random key is generated when
    /// unset, so tokens do not survive a restart
    #[arg(long, env = "GA4GH_TOKEN_KEY")]
    pub token_key: Option<String>,

    /// Enable CORS for all origins
    #[arg(long, env = "GA4GH_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            max_bases_span: self.max_bases_span,
            bases_chunk: self.bases_chunk,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn signer(&self) -> TokenSigner {
        match &self.token_key {
            Some(key) => TokenSigner::new(key.as_bytes().to_vec()),
            None => TokenSigner::new(TokenSigner::generate_secret()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(token_key: Option<String>) -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            repo: PathBuf::from("./repo"),
            default_page_size: 100,
            max_page_size: 1000,
            max_bases_span: 1 << 20,
            bases_chunk: 65536,
            request_timeout_secs: 30,
            token_key,
            cors: true,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_limits_carry_over() {
        let limits = config_with_key(None).limits();
        assert_eq!(limits.default_page_size, 100);
        assert_eq!(limits.max_page_size, 1000);
        assert_eq!(limits.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_configured_key_yields_stable_tokens() {
        use crate::token::{Cursor, TokenKind};

        let a = config_with_key(Some("shared-key".to_string())).signer();
        let b = config_with_key(Some("shared-key".to_string())).signer();
        let token = a.issue(TokenKind::Datasets, "fp", "v1", Cursor::Offset { offset: 1 });
        assert!(b.verify(&token, TokenKind::Datasets, "fp", "v1").is_ok());
    }
}
