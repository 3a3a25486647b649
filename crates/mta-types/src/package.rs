//! Deployed package records and blue-green colors

use crate::ids::PackageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blue-green generation color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationColor {
    Blue,
    Green,
}

impl ApplicationColor {
    pub fn alternative(&self) -> Self {
        match self {
            ApplicationColor::Blue => ApplicationColor::Green,
            ApplicationColor::Green => ApplicationColor::Blue,
        }
    }

    /// Name suffix including the leading dash.
    pub fn suffix(&self) -> &'static str {
        match self {
            ApplicationColor::Blue => "-blue",
            ApplicationColor::Green => "-green",
        }
    }

    /// Color encoded in an application name suffix, if any.
    pub fn from_app_name(name: &str) -> Option<Self> {
        [ApplicationColor::Blue, ApplicationColor::Green]
            .into_iter()
            .find(|color| name.ends_with(color.suffix()))
    }
}

impl Default for ApplicationColor {
    fn default() -> Self {
        ApplicationColor::Blue
    }
}

impl std::fmt::Display for ApplicationColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationColor::Blue => write!(f, "blue"),
            ApplicationColor::Green => write!(f, "green"),
        }
    }
}

impl std::str::FromStr for ApplicationColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blue" => Ok(ApplicationColor::Blue),
            "green" => Ok(ApplicationColor::Green),
            other => Err(format!("unknown application color: {other}")),
        }
    }
}

/// Suffixes used when original application names are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacySuffix {
    Idle,
    Live,
}

impl LegacySuffix {
    pub fn suffix(&self) -> &'static str {
        match self {
            LegacySuffix::Idle => "-idle",
            LegacySuffix::Live => "-live",
        }
    }

    pub fn from_app_name(name: &str) -> Option<Self> {
        [LegacySuffix::Idle, LegacySuffix::Live]
            .into_iter()
            .find(|suffix| name.ends_with(suffix.suffix()))
    }

    /// Strip the suffix if the name carries it.
    pub fn strip<'a>(&self, name: &'a str) -> &'a str {
        name.strip_suffix(self.suffix()).unwrap_or(name)
    }
}

impl std::fmt::Display for LegacySuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacySuffix::Idle => write!(f, "idle"),
            LegacySuffix::Live => write!(f, "live"),
        }
    }
}

/// An application recorded as part of a deployed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedApplication {
    pub name: String,

    pub module_name: String,

    #[serde(default)]
    pub color: Option<ApplicationColor>,

    #[serde(default)]
    pub routes: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl DeployedApplication {
    /// Color from metadata, falling back to the name suffix.
    pub fn effective_color(&self) -> Option<ApplicationColor> {
        self.color
            .or_else(|| ApplicationColor::from_app_name(&self.name))
    }
}

/// Ownership record of a package currently deployed on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedPackage {
    pub id: PackageId,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub applications: Vec<DeployedApplication>,

    /// Services the package declares
    #[serde(default)]
    pub services: Vec<String>,
}

impl DeployedPackage {
    pub fn new(id: PackageId) -> Self {
        Self {
            id,
            version: None,
            applications: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn find_application(&self, name: &str) -> Option<&DeployedApplication> {
        self.applications.iter().find(|app| app.name == name)
    }

    pub fn contains_application(&self, name: &str) -> bool {
        self.find_application(name).is_some()
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_suffixes() {
        assert_eq!(ApplicationColor::from_app_name("web-blue"), Some(ApplicationColor::Blue));
        assert_eq!(ApplicationColor::from_app_name("web-green"), Some(ApplicationColor::Green));
        assert_eq!(ApplicationColor::from_app_name("web"), None);
        assert_eq!(ApplicationColor::Blue.alternative(), ApplicationColor::Green);
        assert_eq!("GREEN".parse::<ApplicationColor>(), Ok(ApplicationColor::Green));
    }

    #[test]
    fn test_legacy_suffix_strip() {
        assert_eq!(LegacySuffix::Live.strip("web-live"), "web");
        assert_eq!(LegacySuffix::Live.strip("web"), "web");
        assert_eq!(LegacySuffix::from_app_name("web-idle"), Some(LegacySuffix::Idle));
    }
}
