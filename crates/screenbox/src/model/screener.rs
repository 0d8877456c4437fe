//! Screener definitions and data-provider selection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Configuration keys that may carry the symbol universe, in lookup order.
const UNIVERSE_KEYS: &[&str] = &["universe", "assets", "symbols"];
/// Configuration keys that may carry the data provider tag, in lookup order.
const PROVIDER_KEYS: &[&str] = &["data_source", "provider"];

/// A user-authored screener plus its configuration.
///
/// Owned by the persistence layer and handed to the executor by value; the
/// executor never mutates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreenerDefinition {
    /// Stable identifier of the screener.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// How the screener was authored.
    #[serde(rename = "type")]
    pub screener_type: ScreenerType,
    /// The user script.
    pub source: ScreenerSource,
    /// Free-form key/value configuration.
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

/// Origin of a screener definition.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenerType {
    /// Generated by an assistant.
    AiGenerated,
    /// Instantiated from a stock template.
    Template,
    /// Written by hand.
    Custom,
}

/// Source of the screener logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScreenerSource {
    /// Inline script body spliced verbatim into the assembled program.
    Code {
        /// The user script body.
        content: String,
    },
}

impl ScreenerSource {
    /// The raw script body.
    pub fn content(&self) -> &str {
        match self {
            Self::Code { content } => content,
        }
    }
}

impl ScreenerDefinition {
    /// Symbols listed under `universe`, `assets` or `symbols`, if any.
    ///
    /// Entries that are not strings are skipped. An empty list is treated as absent.
    pub fn universe(&self) -> Option<Vec<String>> {
        UNIVERSE_KEYS.iter().find_map(|key| {
            let symbols: Vec<String> = self
                .configuration
                .get(*key)?
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .map(|symbol| symbol.trim().to_ascii_uppercase())
                .filter(|symbol| !symbol.is_empty())
                .collect();
            (!symbols.is_empty()).then_some(symbols)
        })
    }

    /// Provider selected by `data_source` or `provider`, if any.
    pub fn data_provider(&self) -> Option<DataProvider> {
        PROVIDER_KEYS.iter().find_map(|key| {
            self.configuration
                .get(*key)
                .and_then(Value::as_str)
                .map(DataProvider::from_tag)
        })
    }
}

/// Market-data provider the generated loader calls into.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DataProvider {
    /// Alpaca market data.
    #[default]
    Alpaca,
    /// Polygon.io aggregates.
    Polygon,
    /// Yahoo Finance.
    YahooFinance,
    /// Any tag not recognised above. Generated code fails loudly for it.
    Unknown(String),
}

impl DataProvider {
    /// Parse a provider tag. Matching is case-insensitive and accepts common aliases.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "alpaca" => Self::Alpaca,
            "polygon" | "polygon.io" | "polygonio" => Self::Polygon,
            "yahoo" | "yfinance" | "yahoo_finance" | "yahoo-finance" => Self::YahooFinance,
            _ => Self::Unknown(tag.to_string()),
        }
    }

    /// Canonical tag passed to the provider-selection abstraction.
    pub fn tag(&self) -> &str {
        match self {
            Self::Alpaca => "alpaca",
            Self::Polygon => "polygon",
            Self::YahooFinance => "yfinance",
            Self::Unknown(tag) => tag,
        }
    }

    /// Environment variables holding this provider's credentials, paired with
    /// the keyword argument name the provider factory expects.
    pub fn credential_env(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Alpaca => &[
                ("api_key", "ALPACA_API_KEY"),
                ("secret_key", "ALPACA_SECRET_KEY"),
            ],
            Self::Polygon => &[("api_key", "POLYGON_API_KEY")],
            Self::YahooFinance | Self::Unknown(_) => &[],
        }
    }

    /// Every provider with known credentials, used for the preamble lookups.
    pub fn known() -> [Self; 3] {
        [Self::Alpaca, Self::Polygon, Self::YahooFinance]
    }
}

impl fmt::Display for DataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for DataProvider {
    fn from(value: String) -> Self {
        Self::from_tag(&value)
    }
}

impl From<DataProvider> for String {
    fn from(value: DataProvider) -> Self {
        value.tag().to_string()
    }
}
