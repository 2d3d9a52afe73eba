//! The shipped configuration files parse and agree with each other.

use rust_decimal_macros::dec;
use spreadbot_bot::tokens::{merge, TokensFile};
use spreadbot_bot::AppConfig;
use spreadbot_core::{EntryOrderType, MarginMode, Settings, TokenBook};

const DEFAULT: &str = include_str!("../../../config/default.toml");
const SETTINGS: &str = include_str!("../../../config/settings.toml");
const TOKENS: &str = include_str!("../../../config/tokens.toml");

#[test]
fn test_default_config_parses() {
    let config = AppConfig::from_toml(DEFAULT).unwrap();
    assert_eq!(config.settings_path, "config/settings.toml");
    assert_eq!(config.spread_filter().min_percent, dec!(1.2));
    assert_eq!(config.feed_config().backoff.max_ms, 10_000);
    assert!(config.tokens_reload_interval().is_some());
}

#[test]
fn test_settings_parse() {
    let settings = Settings::from_toml(SETTINGS).unwrap();
    assert_eq!(settings.leverage, Some(10));
    assert_eq!(settings.margin_mode, MarginMode::Isolated);
    assert_eq!(settings.entry_order_type, EntryOrderType::Limit);
    assert_eq!(settings.pyramiding.max_entries, 2);
    assert_eq!(settings.sorted_scale_out_targets().len(), 2);
    assert_eq!(settings.max_position_age_ms(), Some(24 * 3_600_000));
}

#[test]
fn test_tokens_file_builds_book() {
    let file = TokensFile::from_toml(TOKENS).unwrap();
    let book = TokenBook::from_configs(merge(&[], &file));
    let abc = book.get("ABC_USDT").unwrap();
    assert!(!abc.is_ignored);
    assert_eq!(abc.custom_percent, Some(dec!(2.0)));
    assert!(book.get("XYZ_USDT").unwrap().is_ignored);
}
