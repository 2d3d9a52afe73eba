//! Token book bootstrap.
//!
//! Contract details from the exchange give sizing and precision; the local
//! tokens file decides what actually trades. Contracts without an override
//! stay ignored.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use spreadbot_core::{Size, TokenConfig};
use spreadbot_exchange::{ContractDetail, ExchangeApi};
use spreadbot_feed::normalize_symbol;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Per-symbol override from the tokens file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenOverride {
    pub symbol: String,
    #[serde(default)]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_normik: bool,
    #[serde(default)]
    pub custom_percent: Option<Decimal>,
    #[serde(default)]
    pub max_margin: Option<Decimal>,
    /// Lowers the exchange maximum; never raises it.
    #[serde(default)]
    pub max_leverage: Option<u32>,
}

/// `[[tokens]]` entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokensFile {
    #[serde(default)]
    pub tokens: Vec<TokenOverride>,
}

impl TokensFile {
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read tokens {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(text: &str) -> AppResult<Self> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("Failed to parse tokens: {e}")))
    }
}

/// Contract details from the exchange; empty when unavailable.
pub async fn fetch_contracts(api: &dyn ExchangeApi) -> Vec<ContractDetail> {
    match api.contract_details().await {
        Ok(resp) if resp.is_ok() => {
            let contracts = resp.data.unwrap_or_default();
            info!(count = contracts.len(), "Contract details loaded");
            contracts
        }
        Ok(resp) => {
            warn!(code = resp.code, message = ?resp.message, "Contract details rejected");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Contract details unavailable");
            Vec::new()
        }
    }
}

fn from_contract(contract: &ContractDetail) -> TokenConfig {
    let mut token = TokenConfig::new(normalize_symbol(&contract.symbol));
    if let Some(base) = contract.base_coin.as_ref().filter(|b| !b.is_empty()) {
        token.base_coin = base.clone();
    }
    if let Some(size) = contract.contract_size.filter(|s| *s > Decimal::ZERO) {
        token.contract_size = size;
    }
    if let Some(scale) = contract.price_scale {
        token.price_scale = scale;
    }
    if let Some(scale) = contract.vol_scale {
        token.vol_scale = scale;
    }
    if let Some(max) = contract.max_leverage.filter(|l| *l > 0) {
        token.max_leverage = max;
    }
    token.max_volume = contract
        .max_vol
        .filter(|v| *v > Decimal::ZERO)
        .map(Size::new);
    token
}

fn apply_override(token: &mut TokenConfig, ov: &TokenOverride) {
    token.is_ignored = ov.is_ignored;
    token.is_normik = ov.is_normik;
    token.custom_percent = ov.custom_percent;
    token.max_margin = ov.max_margin;
    if let Some(max) = ov.max_leverage.filter(|l| *l > 0) {
        token.max_leverage = token.max_leverage.min(max);
    }
}

/// Merge contracts with overrides.
///
/// With no contracts at all (exchange unreachable) the overrides are used
/// alone with default precision; otherwise an override for a symbol the
/// exchange does not list is dropped.
pub fn merge(contracts: &[ContractDetail], file: &TokensFile) -> Vec<TokenConfig> {
    let overrides: HashMap<String, &TokenOverride> = file
        .tokens
        .iter()
        .map(|ov| (normalize_symbol(&ov.symbol), ov))
        .collect();

    if contracts.is_empty() {
        warn!(count = overrides.len(), "No contract details, using token overrides with defaults");
        return overrides
            .into_iter()
            .map(|(symbol, ov)| {
                let mut token = TokenConfig::new(symbol);
                apply_override(&mut token, ov);
                token
            })
            .collect();
    }

    let mut tokens: Vec<TokenConfig> = contracts.iter().map(from_contract).collect();
    for token in &mut tokens {
        if let Some(ov) = overrides.get(&token.symbol) {
            apply_override(token, ov);
        }
    }
    for symbol in overrides.keys() {
        if !tokens.iter().any(|t| &t.symbol == symbol) {
            warn!(%symbol, "Token override has no exchange contract, dropped");
        }
    }

    let active = tokens.iter().filter(|t| !t.is_ignored).count();
    info!(total = tokens.len(), active, "Token configuration merged");
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn contract(symbol: &str) -> ContractDetail {
        ContractDetail {
            symbol: symbol.into(),
            base_coin: Some(symbol.split('_').next().unwrap_or_default().into()),
            contract_size: Some(dec!(10)),
            price_scale: Some(5),
            vol_scale: Some(0),
            max_leverage: Some(50),
            max_vol: Some(dec!(100000)),
        }
    }

    const FILE: &str = r#"
[[tokens]]
symbol = "abc"
custom_percent = 3
max_leverage = 25

[[tokens]]
symbol = "GONE_USDT"
"#;

    #[test]
    fn test_merge_overrides_onto_contracts() {
        let file = TokensFile::from_toml(FILE).unwrap();
        let tokens = merge(&[contract("ABC_USDT"), contract("XYZ_USDT")], &file);
        assert_eq!(tokens.len(), 2);

        let abc = tokens.iter().find(|t| t.symbol == "ABC_USDT").unwrap();
        assert!(!abc.is_ignored);
        assert_eq!(abc.contract_size, dec!(10));
        assert_eq!(abc.price_scale, 5);
        assert_eq!(abc.max_leverage, 25);
        assert_eq!(abc.custom_percent, Some(dec!(3)));
        assert_eq!(abc.max_volume, Some(Size::new(dec!(100000))));

        let xyz = tokens.iter().find(|t| t.symbol == "XYZ_USDT").unwrap();
        assert!(xyz.is_ignored);
        assert_eq!(xyz.max_leverage, 50);
    }

    #[test]
    fn test_merge_without_contracts_uses_defaults() {
        let file = TokensFile::from_toml(FILE).unwrap();
        let mut tokens = merge(&[], &file);
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].symbol, "ABC_USDT");
        assert_eq!(tokens[0].price_scale, 8);
        assert_eq!(tokens[0].contract_size, Decimal::ONE);
        assert_eq!(tokens[0].max_leverage, 20);
        assert!(!tokens[1].is_ignored);
    }

    #[test]
    fn test_bad_tokens_file() {
        assert!(TokensFile::from_toml("[[tokens]]\ncustom_percent = 1").is_err());
        assert!(TokensFile::from_toml("").unwrap().tokens.is_empty());
    }
}
