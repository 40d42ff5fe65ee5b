// tests/ingest_config.rs
use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use market_news_ingest::config::{
    load_config_default, load_config_from, parse_config, ENV_CONFIG_PATH,
};
use market_news_ingest::ingest::AdapterKind;
use market_news_ingest::rate_limit::RateLimits;

#[test]
fn shipped_sample_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/ingest.toml");
    let cfg = load_config_from(&path).expect("sample config");

    assert_eq!(cfg.scheduler.tiers.len(), 3);
    assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
    assert_eq!(cfg.cache.ttl(), Duration::from_secs(86_400));
    assert_eq!(cfg.retry.policy().base_delay, Duration::from_millis(2_000));

    let rss = cfg.adapter(AdapterKind::Syndication);
    assert_eq!(rss.feeds.len(), 3);
    assert_eq!(rss.limits, RateLimits::new(30, 10_000));

    let news = cfg.adapter(AdapterKind::PollRest);
    assert_eq!(news.api_key_env.as_deref(), Some("NEWSAPI_KEY"));
    assert_eq!(news.limits, RateLimits::new(10, 100));
}

#[test]
fn unknown_adapter_sections_are_dropped() {
    let cfg = parse_config(
        r#"
[adapters.bloomberg]
calls_per_minute = 99

[adapters.finnhub]
calls_per_minute = 30
"#,
    )
    .unwrap();
    assert_eq!(cfg.adapters.len(), 1);
    assert_eq!(
        cfg.adapter(AdapterKind::TimeWindowed).limits,
        RateLimits::new(30, 1_000)
    );
}

#[test]
fn malformed_toml_is_an_error() {
    let err = parse_config("error_threshold = \"lots\"").unwrap_err();
    assert!(format!("{err:#}").contains("parsing ingest config toml"));
}

#[serial_test::serial]
#[test]
fn env_path_must_exist() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope.toml");
    env::set_var(ENV_CONFIG_PATH, missing.display().to_string());
    assert!(load_config_default().is_err());

    let present = tmp.path().join("ingest.toml");
    fs::write(&present, "lookback_days = 3\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, present.display().to_string());
    assert_eq!(load_config_default().unwrap().lookback_days, 3);

    env::remove_var(ENV_CONFIG_PATH);
}
