use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supermarket chains that own a raw catalog database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Supermarket {
    Carrefour,
    Dia,
    Jumbo,
    Vea,
    Disco,
}

impl Supermarket {
    pub const ALL: [Supermarket; 5] = [
        Supermarket::Carrefour,
        Supermarket::Dia,
        Supermarket::Jumbo,
        Supermarket::Vea,
        Supermarket::Disco,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Supermarket::Carrefour => "carrefour",
            Supermarket::Dia => "dia",
            Supermarket::Jumbo => "jumbo",
            Supermarket::Vea => "vea",
            Supermarket::Disco => "disco",
        }
    }
}

impl FromStr for Supermarket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Supermarket::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidSupermarket(s.to_string()))
    }
}

impl fmt::Display for Supermarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized logical database names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogicalDb {
    Admin,
    Operations,
    Processed,
    Raw(Supermarket),
}

impl LogicalDb {
    pub const ALL: [LogicalDb; 8] = [
        LogicalDb::Admin,
        LogicalDb::Operations,
        LogicalDb::Processed,
        LogicalDb::Raw(Supermarket::Carrefour),
        LogicalDb::Raw(Supermarket::Dia),
        LogicalDb::Raw(Supermarket::Jumbo),
        LogicalDb::Raw(Supermarket::Vea),
        LogicalDb::Raw(Supermarket::Disco),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalDb::Admin => "admin",
            LogicalDb::Operations => "operations",
            LogicalDb::Processed => "processed",
            LogicalDb::Raw(m) => m.as_str(),
        }
    }

    /// Collections each database is expected to hold.
    pub fn collections(&self) -> &'static [&'static str] {
        match self {
            LogicalDb::Admin => &["users", "user_addresses", "user_sessions", "carts"],
            LogicalDb::Operations => &["orders", "api_logs", "notifications", "system_settings"],
            LogicalDb::Processed => &[
                "categories",
                "subcategories",
                "products",
                "producttypes",
                "supermarkets",
                "offers",
                "filters",
                "price_history",
            ],
            LogicalDb::Raw(_) => &[
                "categories",
                "subcategories",
                "products",
                "producttypes",
                "offers",
                "filters",
                "price_history",
                "supermarket-info",
            ],
        }
    }
}

impl FromStr for LogicalDb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(LogicalDb::Admin),
            "operations" | "operations_db" => Ok(LogicalDb::Operations),
            "processed" | "caminando_online_db" => Ok(LogicalDb::Processed),
            other => other
                .parse::<Supermarket>()
                .map(LogicalDb::Raw)
                .map_err(|_| Error::UnknownDatabase(other.to_string())),
        }
    }
}

impl fmt::Display for LogicalDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness classification reported by the registry health check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Connected => "connected",
            HealthStatus::Connecting => "connecting",
            HealthStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
