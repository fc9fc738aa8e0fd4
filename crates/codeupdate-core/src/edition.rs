use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Edition {
    #[default]
    Stable,
    Insiders,
}

impl Edition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Insiders => "insiders",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "insiders" => Some(Self::Insiders),
            _ => None,
        }
    }

    /// Channel token used by the update service URLs.
    pub fn channel(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Insiders => "insider",
        }
    }

    /// Executable and process name of the installed application.
    pub fn process_name(self) -> &'static str {
        match self {
            Self::Stable => "code",
            Self::Insiders => "code-insiders",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Stable => "Visual Studio Code",
            Self::Insiders => "Visual Studio Code - Insiders",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ConfigError::InvalidEdition(s.to_string()))
    }
}
