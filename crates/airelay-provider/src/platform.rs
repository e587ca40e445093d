use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Dialect family a provider pool belongs to.
///
/// `Custom` pools speak the claude dialect but keep their own blacklist and
/// round-robin state under the `custom:<name>` key form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Claude,
    Codex,
    Gemini,
    Custom(String),
}

impl Platform {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => f.write_str("claude"),
            Self::Codex => f.write_str("codex"),
            Self::Gemini => f.write_str("gemini"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            _ => match value.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => Ok(Self::Custom(name.to_string())),
                _ => Err(UnknownPlatform(value.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform: {}", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_round_trips() {
        for (platform, text) in [
            (Platform::Claude, "claude"),
            (Platform::Codex, "codex"),
            (Platform::Gemini, "gemini"),
            (Platform::custom("relay2"), "custom:relay2"),
        ] {
            assert_eq!(platform.to_string(), text);
            assert_eq!(text.parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn rejects_unknown_and_empty_custom() {
        assert!("openai".parse::<Platform>().is_err());
        assert!("custom:".parse::<Platform>().is_err());
    }
}
