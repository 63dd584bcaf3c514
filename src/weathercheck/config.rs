// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono_tz::Tz;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Error loading or validating the station configuration file
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(serde_yaml::Error),
    TimeZone(String),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "unable to parse configuration: {}", e),
            ConfigError::TimeZone(tz) => write!(f, "unknown time zone '{}'", tz),
            ConfigError::Invalid(msg) => msg.fmt(f),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Account and message used to send emergency alerts.
///
/// Older configuration files used `subject_text`, `messagetxt`, and `receiverlist`
/// for some of these fields and are still accepted.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct EmailConfig {
    pub username: String,
    pub passkey: String,
    #[serde(alias = "subject_text")]
    pub subject: String,
    #[serde(alias = "messagetxt")]
    pub message: String,
    #[serde(alias = "receiverlist")]
    pub recipients: Vec<String>,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

// Keep the passkey out of logs
impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("username", &self.username)
            .field("passkey", &"<redacted>")
            .field("subject", &self.subject)
            .field("message", &self.message)
            .field("recipients", &self.recipients)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

fn default_smtp_server() -> String {
    DEFAULT_SMTP_SERVER.to_owned()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    timezone: Option<String>,
    emergency_email: EmailConfig,
}

/// Validated contents of the recorder configuration file.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub timezone: Tz,
    pub emergency_email: EmailConfig,
}

impl StationConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents).map_err(ConfigError::Parse)?;
        let timezone = match raw.timezone {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::TimeZone(name))?,
            None => Tz::UTC,
        };

        if raw.emergency_email.recipients.is_empty() {
            return Err(ConfigError::Invalid("emergency_email must have at least one recipient"));
        }

        if raw.emergency_email.username.is_empty() {
            return Err(ConfigError::Invalid("emergency_email username must not be empty"));
        }

        Ok(StationConfig {
            timezone,
            emergency_email: raw.emergency_email,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{ConfigError, StationConfig, DEFAULT_SMTP_PORT, DEFAULT_SMTP_SERVER};
    use chrono_tz::Tz;
    use std::io::Write;

    const LEGACY: &str = "
emergency_email:
  username: station@example.com
  passkey: hunter2
  subject_text: Cold weather
  messagetxt: It's cold in the greenhouse
  receiverlist:
    - one@example.com
    - two@example.com
";

    #[test]
    fn test_legacy_field_names() {
        let config = StationConfig::from_yaml(LEGACY).unwrap();
        let email = &config.emergency_email;

        assert_eq!(Tz::UTC, config.timezone);
        assert_eq!("Cold weather", email.subject);
        assert_eq!("It's cold in the greenhouse", email.message);
        assert_eq!(vec!["one@example.com", "two@example.com"], email.recipients);
        assert_eq!(DEFAULT_SMTP_SERVER, email.smtp_server);
        assert_eq!(DEFAULT_SMTP_PORT, email.smtp_port);
    }

    #[test]
    fn test_timezone_and_smtp_overrides() {
        let yaml = "
timezone: America/New_York
emergency_email:
  username: station@example.com
  passkey: hunter2
  subject: Cold
  message: Cold
  recipients: [one@example.com]
  smtp_server: mail.example.com
  smtp_port: 2525
";
        let config = StationConfig::from_yaml(yaml).unwrap();
        assert_eq!(Tz::America__New_York, config.timezone);
        assert_eq!("mail.example.com", config.emergency_email.smtp_server);
        assert_eq!(2525, config.emergency_email.smtp_port);
    }

    #[test]
    fn test_unknown_timezone() {
        let yaml = format!("timezone: Mars/Olympus_Mons\n{}", LEGACY);
        assert!(matches!(StationConfig::from_yaml(&yaml), Err(ConfigError::TimeZone(_))));
    }

    #[test]
    fn test_missing_recipients() {
        let yaml = "
emergency_email:
  username: station@example.com
  passkey: hunter2
  subject: Cold
  message: Cold
  recipients: []
";
        assert!(matches!(StationConfig::from_yaml(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_section() {
        assert!(matches!(StationConfig::from_yaml("timezone: UTC\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LEGACY.as_bytes()).unwrap();

        let config = StationConfig::from_path(file.path()).unwrap();
        assert_eq!("station@example.com", config.emergency_email.username);
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_from_path_missing() {
        let dir = tempfile::tempdir().unwrap();
        let res = StationConfig::from_path(dir.path().join("nope.yaml"));
        assert!(matches!(res, Err(ConfigError::Io(_, _))));
    }
}
