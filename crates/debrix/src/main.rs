use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use base64::Engine;
use clap::{Parser, ValueEnum};
use libdebrix::http_api::HttpApi;
use libdebrix::{OAuth2Config, Session, SessionOptions};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser)]
#[command(version, author, about)]
struct Opts {
    /// The console loglevel.
    #[arg(value_enum, short = 'v', long = "log-level", env = "DEBRIX_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Log encoding: console or json.
    #[arg(long = "log-encoding", default_value = "console", env = "DEBRIX_LOG_ENCODING")]
    log_encoding: String,

    /// The listen address for the HTTP API.
    #[arg(
        long = "listen-addr",
        default_value = "127.0.0.1:8080",
        env = "DEBRIX_LISTEN_ADDR"
    )]
    listen_addr: SocketAddr,

    /// Externally reachable base URL, used inside stream responses.
    #[arg(
        long = "base-url",
        default_value = "http://localhost:8080",
        env = "DEBRIX_BASE_URL"
    )]
    base_url: String,

    /// Directory for cache snapshots. Unset disables persistence.
    #[arg(long = "cache-dir", env = "DEBRIX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// How often to persist cache snapshots, e.g. 1h, 30m.
    #[arg(long = "persist-interval", value_parser = parse_duration::parse, default_value = "1h", env = "DEBRIX_PERSIST_INTERVAL")]
    persist_interval: Duration,

    /// Per-request timeout for outbound HTTP calls.
    #[arg(long = "request-timeout", value_parser = parse_duration::parse, default_value = "5s", env = "DEBRIX_REQUEST_TIMEOUT")]
    request_timeout: Duration,

    /// How long to wait for normal torrent sources.
    #[arg(long = "search-timeout", value_parser = parse_duration::parse, default_value = "5s", env = "DEBRIX_SEARCH_TIMEOUT")]
    search_timeout: Duration,

    /// Quick-skip budget for rate-limited (slow) torrent sources.
    #[arg(long = "slow-search-timeout", value_parser = parse_duration::parse, default_value = "2s", env = "DEBRIX_SLOW_SEARCH_TIMEOUT")]
    slow_search_timeout: Duration,

    /// How long a submitted magnet may stay undownloaded before giving up.
    #[arg(long = "wait-for-download", value_parser = parse_duration::parse, default_value = "5s", env = "DEBRIX_WAIT_FOR_DOWNLOAD")]
    wait_for_download: Duration,

    /// Max age of cached torrent search results.
    #[arg(long = "max-age-torrents", value_parser = parse_duration::parse, default_value = "7d", env = "DEBRIX_MAX_AGE_TORRENTS")]
    max_age_torrents: Duration,

    /// Max age of cached title metadata.
    #[arg(long = "max-age-meta", value_parser = parse_duration::parse, default_value = "30d", env = "DEBRIX_MAX_AGE_META")]
    max_age_meta: Duration,

    /// Max age of instant-availability marks.
    #[arg(long = "max-age-availability", value_parser = parse_duration::parse, default_value = "24h", env = "DEBRIX_MAX_AGE_AVAILABILITY")]
    max_age_availability: Duration,

    /// How long a validated debrid credential is trusted without re-checking.
    #[arg(long = "token-expiration", value_parser = parse_duration::parse, default_value = "24h", env = "DEBRIX_TOKEN_EXPIRATION")]
    token_expiration: Duration,

    /// Capacity of the bounded per-indexer result cache.
    #[arg(
        long = "indexer-cache-capacity",
        default_value = "16384",
        env = "DEBRIX_INDEXER_CACHE_CAPACITY"
    )]
    indexer_cache_capacity: usize,

    /// If set, indexer requests go through this SOCKS5 proxy.
    /// The format is socks5://[username:password@]host:port
    #[arg(long = "socks-proxy-url", env = "DEBRIX_SOCKS_PROXY_URL")]
    socks_proxy_url: Option<String>,

    /// Extra header to send with every outbound request, as "Name: value".
    /// May be repeated; in the environment, separate several with ';'.
    #[arg(long = "extra-header", env = "DEBRIX_EXTRA_HEADERS", value_delimiter = ';')]
    extra_headers: Vec<String>,

    /// Redis URL; if set, all caches live there instead of in-process.
    #[arg(long = "redis-url", env = "DEBRIX_REDIS_URL")]
    redis_url: Option<String>,

    /// Enable OAuth2 user-data blobs. Requires the key and client values.
    #[arg(long = "oauth2-enable", env = "DEBRIX_OAUTH2_ENABLE")]
    oauth2_enable: bool,

    /// Base64 of the 32-byte AES key OAuth2 blobs are encrypted with.
    #[arg(long = "oauth2-key", env = "DEBRIX_OAUTH2_KEY")]
    oauth2_key: Option<String>,

    #[arg(long = "rd-oauth2-client-id", env = "DEBRIX_RD_OAUTH2_CLIENT_ID")]
    rd_oauth2_client_id: Option<String>,

    #[arg(long = "rd-oauth2-client-secret", env = "DEBRIX_RD_OAUTH2_CLIENT_SECRET")]
    rd_oauth2_client_secret: Option<String>,

    #[arg(long = "pm-oauth2-client-id", env = "DEBRIX_PM_OAUTH2_CLIENT_ID")]
    pm_oauth2_client_id: Option<String>,

    #[arg(long = "pm-oauth2-client-secret", env = "DEBRIX_PM_OAUTH2_CLIENT_SECRET")]
    pm_oauth2_client_secret: Option<String>,

    /// How many threads to spawn for the executor.
    #[arg(short = 't', long, env = "DEBRIX_RUNTIME_WORKER_THREADS")]
    worker_threads: Option<usize>,

    /// Use tokio's single threaded runtime. Mostly useful for debugging.
    #[arg(short, long, env = "DEBRIX_SINGLE_THREAD_RUNTIME")]
    single_thread_runtime: bool,
}

fn init_logging(opts: &Opts) -> anyhow::Result<()> {
    let default_level = match opts.log_level.unwrap_or(LogLevel::Info) {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    match opts.log_encoding.as_str() {
        "console" => tracing_subscriber::fmt().with_env_filter(filter).init(),
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        other => bail!("invalid logEncoding {other:?}, expected console or json"),
    }
    Ok(())
}

fn parse_extra_headers(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|h| {
            let (name, value) = h
                .split_once(':')
                .with_context(|| format!("malformed header {h:?}, expected \"Name: value\""))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn oauth2_config(opts: &Opts) -> anyhow::Result<Option<OAuth2Config>> {
    if !opts.oauth2_enable {
        return Ok(None);
    }
    let key_b64 = opts
        .oauth2_key
        .as_deref()
        .context("OAuth2 is enabled but --oauth2-key is missing")?;
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .context("--oauth2-key is not valid base64")?;
    let encryption_key: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("--oauth2-key must decode to exactly 32 bytes"))?;
    let require = |value: &Option<String>, name: &str| -> anyhow::Result<String> {
        value
            .clone()
            .with_context(|| format!("OAuth2 is enabled but --{name} is missing"))
    };
    Ok(Some(OAuth2Config {
        encryption_key,
        rd_client_id: require(&opts.rd_oauth2_client_id, "rd-oauth2-client-id")?,
        rd_client_secret: require(&opts.rd_oauth2_client_secret, "rd-oauth2-client-secret")?,
        rd_token_url: OAuth2Config::DEFAULT_RD_TOKEN_URL.to_string(),
        pm_client_id: require(&opts.pm_oauth2_client_id, "pm-oauth2-client-id")?,
        pm_client_secret: require(&opts.pm_oauth2_client_secret, "pm-oauth2-client-secret")?,
        pm_token_url: OAuth2Config::DEFAULT_PM_TOKEN_URL.to_string(),
    }))
}

fn main() {
    let opts = Opts::parse();

    let mut rt_builder = match opts.single_thread_runtime {
        true => tokio::runtime::Builder::new_current_thread(),
        false => {
            let mut b = tokio::runtime::Builder::new_multi_thread();
            if let Some(threads) = opts.worker_threads {
                b.worker_threads(threads);
            }
            b
        }
    };
    let rt = match rt_builder.enable_time().enable_io().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error building runtime: {e:#}");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async_main(opts));
    rt.shutdown_timeout(Duration::from_secs(1));
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("error running debrix: {e:#}");
            eprintln!("error running debrix: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn async_main(opts: Opts) -> anyhow::Result<()> {
    init_logging(&opts)?;

    let session_opts = SessionOptions {
        base_url: opts.base_url.trim_end_matches('/').to_string(),
        cache_dir: opts.cache_dir.clone(),
        persist_interval: opts.persist_interval,
        request_timeout: opts.request_timeout,
        search_timeout: opts.search_timeout,
        slow_search_timeout: opts.slow_search_timeout,
        wait_for_download: opts.wait_for_download,
        max_age_torrents: opts.max_age_torrents,
        max_age_meta: opts.max_age_meta,
        max_age_availability: opts.max_age_availability,
        token_expiration: opts.token_expiration,
        indexer_cache_capacity: opts.indexer_cache_capacity,
        socks_proxy_url: opts.socks_proxy_url.clone(),
        extra_headers: parse_extra_headers(&opts.extra_headers)?,
        redis_url: opts.redis_url.clone(),
        oauth2: oauth2_config(&opts)?,
        ..Default::default()
    };

    let session = Session::new(session_opts)
        .await
        .context("error creating session")?;

    let listener = tokio::net::TcpListener::bind(opts.listen_addr)
        .await
        .with_context(|| format!("error binding {}", opts.listen_addr))?;
    info!("listening on http://{}", opts.listen_addr);

    let api = HttpApi::new(session.clone());
    tokio::select! {
        result = api.run(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, persisting caches");
            session.stop().await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extra_headers() {
        let parsed = parse_extra_headers(&[
            "X-Forwarded-For: 10.0.0.1".to_string(),
            "Accept-Language:en".to_string(),
        ])
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("X-Forwarded-For".to_string(), "10.0.0.1".to_string()),
                ("Accept-Language".to_string(), "en".to_string()),
            ]
        );
        assert!(parse_extra_headers(&["no-colon-here".to_string()]).is_err());
    }

    #[test]
    fn test_oauth2_config_requires_values_when_enabled() {
        let mut opts = Opts::parse_from(["debrix"]);
        assert!(oauth2_config(&opts).unwrap().is_none());

        opts.oauth2_enable = true;
        assert!(oauth2_config(&opts).is_err());

        opts.oauth2_key =
            Some(base64::engine::general_purpose::STANDARD.encode([9u8; 32]));
        opts.rd_oauth2_client_id = Some("id".to_string());
        opts.rd_oauth2_client_secret = Some("secret".to_string());
        opts.pm_oauth2_client_id = Some("id".to_string());
        opts.pm_oauth2_client_secret = Some("secret".to_string());
        let cfg = oauth2_config(&opts).unwrap().unwrap();
        assert_eq!(cfg.encryption_key, [9u8; 32]);
    }
}
