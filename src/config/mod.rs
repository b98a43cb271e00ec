use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::ledger::{Address, Amount, TokenMetadata, DEFAULT_DECIMALS, DEFAULT_SYMBOL};

pub const DEFAULT_STATE_FILE: &str = "ledger.json";

/// Largest `decimals` whose scale still fits in an [`Amount`].
pub const MAX_DECIMALS: u8 = 38;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            symbol: Some(DEFAULT_SYMBOL.to_string()),
            decimals: Some(DEFAULT_DECIMALS),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenesisConfig {
    pub admin: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    pub path: Option<String>,
}

impl LedgerConfig {
    /// Load from `path`, or from the default location when none is given.
    /// A missing default file means defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(&expand_tilde(path)),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.token_metadata()?;
        Ok(config)
    }

    pub fn token_metadata(&self) -> Result<TokenMetadata> {
        let symbol = self
            .token
            .symbol
            .clone()
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
        if symbol.is_empty() {
            return Err(anyhow!("token symbol must not be empty"));
        }
        let decimals = self.token.decimals.unwrap_or(DEFAULT_DECIMALS);
        if decimals > MAX_DECIMALS {
            return Err(anyhow!(
                "decimals {} exceeds the maximum of {}",
                decimals,
                MAX_DECIMALS
            ));
        }
        Ok(TokenMetadata { symbol, decimals })
    }

    pub fn genesis_admin(&self) -> Result<Option<Address>> {
        self.genesis
            .admin
            .as_deref()
            .map(|admin| {
                admin
                    .parse::<Address>()
                    .map_err(|err| anyhow!("Invalid genesis admin {}: {}", admin, err))
            })
            .transpose()
    }

    pub fn state_path(&self) -> PathBuf {
        expand_tilde(self.state.path.as_deref().unwrap_or(DEFAULT_STATE_FILE))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mexc-ledger").join("config.toml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Parse a display amount such as `"4000"` or `"0.5"` into raw units.
pub fn parse_amount(value: &str, decimals: u8) -> Result<Amount> {
    let sanitized = value.trim().replace('_', "");
    let (whole, fractional) = sanitized
        .split_once('.')
        .unwrap_or((sanitized.as_str(), ""));
    if whole.is_empty() && fractional.is_empty() {
        return Err(anyhow!("Empty amount"));
    }
    let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !digits_only(whole) || !digits_only(fractional) {
        return Err(anyhow!("Invalid amount: {}", value));
    }
    if fractional.len() > decimals as usize {
        return Err(anyhow!("Too many decimal places"));
    }
    let whole_value: Amount = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .with_context(|| format!("Invalid amount: {}", value))?
    };
    let mut fraction = fractional.to_string();
    while fraction.len() < decimals as usize {
        fraction.push('0');
    }
    let fractional_value: Amount = if fraction.is_empty() {
        0
    } else {
        fraction
            .parse()
            .with_context(|| format!("Invalid amount: {}", value))?
    };
    let scale = (10 as Amount)
        .checked_pow(decimals as u32)
        .ok_or_else(|| anyhow!("Decimal overflow"))?;
    whole_value
        .checked_mul(scale)
        .and_then(|value| value.checked_add(fractional_value))
        .ok_or_else(|| anyhow!("Amount overflow"))
}

/// Render raw units with `decimals` places, dropping trailing zeros.
pub fn format_amount(amount: Amount, decimals: u8) -> String {
    let Some(scale) = (10 as Amount).checked_pow(decimals as u32) else {
        return amount.to_string();
    };
    if decimals == 0 {
        return amount.to_string();
    }
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
