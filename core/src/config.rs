//! Runtime configuration.
//!
//! Settings come from `$CHECKGATE_HOME/config.toml`; the bot token and the
//! admin password come from the environment (optionally via a `.env` file
//! the binary loads first).

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::extract::ExtractorKind;
use crate::extract::ExtractorSet;
use crate::extract::FieldPatterns;
use crate::extract::FilenameConventionExtractor;
use crate::extract::FilenameFormat;
use crate::extract::HttpReceiptLookup;
use crate::extract::IdentifierExtractor;
use crate::extract::OpticalTextExtractor;
use crate::extract::StructuredDocumentExtractor;
use crate::extract::TesseractOcr;
use crate::gate::AdminSecret;
use crate::replies::Replies;

pub const CONFIG_FILE: &str = "config.toml";
pub const HOME_ENV: &str = "CHECKGATE_HOME";
pub const TOKEN_ENV: &str = "CHECKGATE_TOKEN";
pub const ADMIN_PASSWORD_ENV: &str = "CHECKGATE_ADMIN_PASSWORD";
/// Names used by earlier deployments of the bot, read when the primary
/// variables are unset.
const LEGACY_TOKEN_ENV: &str = "TOKEN";
const LEGACY_ADMIN_PASSWORD_ENV: &str = "PASSWORD";

const DEFAULT_HOME_DIR: &str = ".checkgate";
const DEFAULT_IDENTIFIER_PATTERN: &str =
    r"(?i:check\s+number|номер\s+чека|№\s*чека)\s*:?\s*([0-9A-Za-z-]+)";
const DEFAULT_AMOUNT_PATTERN: &str = r"(?i:amount|сумма)\s*:?\s*([0-9][0-9\s]*[.,]?[0-9]*)";
const DEFAULT_URL_PATTERN: &str = r"https?://\S+";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory; set {HOME_ENV}")]
    HomeNotFound,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pattern for {name}: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex_lite::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Bot API token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

/// Resolve the checkgate home: `$CHECKGATE_HOME` when set and non-empty,
/// otherwise `~/.checkgate`. The directory does not have to exist.
pub fn find_checkgate_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_HOME_DIR))
        .ok_or(ConfigError::HomeNotFound)
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    /// Where the JSON stores live. Relative paths resolve against the home.
    pub data_dir: Option<PathBuf>,
    /// Root for per-request scratch directories.
    pub scratch_dir: Option<PathBuf>,
    pub document_extractor: Option<ExtractorKind>,
    pub filename: FilenameToml,
    pub structured: StructuredToml,
    pub optical: OpticalToml,
    pub telegram: TelegramToml,
    pub replies: Replies,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilenameToml {
    /// Names of the conventions in force: built-in `v1`/`v2` or a `custom`
    /// entry.
    pub formats: Vec<String>,
    pub custom: Vec<FilenameFormat>,
}

impl Default for FilenameToml {
    fn default() -> Self {
        Self {
            formats: vec!["v1".to_string()],
            custom: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StructuredToml {
    pub identifier_pattern: String,
    /// Extra fields recorded with each submission, `name = "pattern"`.
    pub fields: BTreeMap<String, String>,
    pub url_pattern: String,
    /// Hosts whose verification pages may be fetched. Subdomains of a listed
    /// host are accepted too; an empty list refuses every link.
    pub allowed_hosts: Vec<String>,
    pub lookup_timeout_secs: u64,
}

impl Default for StructuredToml {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), DEFAULT_AMOUNT_PATTERN.to_string());
        Self {
            identifier_pattern: DEFAULT_IDENTIFIER_PATTERN.to_string(),
            fields,
            url_pattern: DEFAULT_URL_PATTERN.to_string(),
            allowed_hosts: Vec::new(),
            lookup_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpticalToml {
    pub marker: String,
    pub tesseract: PathBuf,
    pub languages: String,
}

impl Default for OpticalToml {
    fn default() -> Self {
        Self {
            marker: "QR".to_string(),
            tesseract: PathBuf::from("tesseract"),
            languages: "rus+eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramToml {
    pub api_base: String,
    pub poll_timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for TelegramToml {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            retry_delay_secs: 5,
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub document_extractor: ExtractorKind,
    pub filename_formats: Vec<FilenameFormat>,
    pub structured: StructuredToml,
    pub optical: OpticalToml,
    pub telegram: TelegramToml,
    pub replies: Replies,
    pub bot_token: Option<BotToken>,
    pub admin_password: Option<AdminSecret>,
}

impl Config {
    /// Load `config.toml` from `home` (absent file means defaults) and read
    /// secrets from the process environment.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        let toml = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                ConfigToml::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Self::from_toml(home, toml, |name| std::env::var(name).ok())
    }

    pub fn from_toml(
        home: &Path,
        toml: ConfigToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let secret = |primary: &str, legacy: &str| {
            env(primary)
                .filter(|value| !value.is_empty())
                .or_else(|| env(legacy).filter(|value| !value.is_empty()))
        };
        let bot_token = secret(TOKEN_ENV, LEGACY_TOKEN_ENV).map(BotToken::new);
        let admin_password = secret(ADMIN_PASSWORD_ENV, LEGACY_ADMIN_PASSWORD_ENV)
            .and_then(AdminSecret::new);

        let resolve = |dir: Option<PathBuf>, default: &str| match dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => home.join(dir),
            None => home.join(default),
        };
        let data_dir = resolve(toml.data_dir, "data");
        let scratch_dir = resolve(toml.scratch_dir, "scratch");

        let filename_formats = resolve_formats(&toml.filename)?;
        if toml.optical.marker.chars().count() != 2 {
            return Err(ConfigError::Invalid(format!(
                "optical marker must be exactly two characters, got '{}'",
                toml.optical.marker
            )));
        }

        let config = Self {
            home: home.to_path_buf(),
            data_dir,
            scratch_dir,
            document_extractor: toml.document_extractor.unwrap_or(ExtractorKind::Structured),
            filename_formats,
            structured: toml.structured,
            optical: toml.optical,
            telegram: toml.telegram,
            replies: toml.replies,
            bot_token,
            admin_password,
        };
        if config.document_extractor == ExtractorKind::Optical {
            return Err(ConfigError::Invalid(
                "document_extractor must be 'structured' or 'filename'".to_string(),
            ));
        }
        config.field_patterns()?;
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.poll_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.telegram.retry_delay_secs)
    }

    fn field_patterns(&self) -> Result<FieldPatterns, ConfigError> {
        FieldPatterns::compile(&self.structured.identifier_pattern, &self.structured.fields)
            .map_err(|source| ConfigError::Pattern {
                name: "structured.identifier_pattern or structured.fields".to_string(),
                source,
            })
    }

    /// Build one extractor by kind.
    pub fn extractor(&self, kind: ExtractorKind) -> Result<Arc<dyn IdentifierExtractor>, ConfigError> {
        let extractor: Arc<dyn IdentifierExtractor> = match kind {
            ExtractorKind::Filename => Arc::new(FilenameConventionExtractor::new(
                self.filename_formats.clone(),
            )),
            ExtractorKind::Structured => {
                let patterns = Arc::new(self.field_patterns()?);
                let url_pattern =
                    Regex::new(&self.structured.url_pattern).map_err(|source| {
                        ConfigError::Pattern {
                            name: "structured.url_pattern".to_string(),
                            source,
                        }
                    })?;
                if self.structured.allowed_hosts.is_empty() {
                    tracing::warn!(
                        "structured.allowed_hosts is empty; every verification link will be refused"
                    );
                }
                let lookup = HttpReceiptLookup::new(
                    url_pattern,
                    self.structured.allowed_hosts.clone(),
                    patterns.clone(),
                    Duration::from_secs(self.structured.lookup_timeout_secs),
                )?;
                Arc::new(StructuredDocumentExtractor::new(patterns, Arc::new(lookup)))
            }
            ExtractorKind::Optical => {
                let engine = TesseractOcr::new(
                    self.optical.tesseract.clone(),
                    self.optical.languages.clone(),
                );
                let optical = OpticalTextExtractor::new(&self.optical.marker, Arc::new(engine))
                    .map_err(|source| ConfigError::Pattern {
                        name: "optical.marker".to_string(),
                        source,
                    })?;
                Arc::new(optical)
            }
        };
        Ok(extractor)
    }

    /// The document extractor chosen by `document_extractor` plus the
    /// optical extractor for photos.
    pub fn extractor_set(&self) -> Result<ExtractorSet, ConfigError> {
        Ok(ExtractorSet::new(
            self.extractor(self.document_extractor)?,
            self.extractor(ExtractorKind::Optical)?,
        ))
    }
}

fn resolve_formats(filename: &FilenameToml) -> Result<Vec<FilenameFormat>, ConfigError> {
    if filename.formats.is_empty() {
        return Err(ConfigError::Invalid(
            "filename.formats must name at least one format".to_string(),
        ));
    }
    filename
        .formats
        .iter()
        .map(|name| {
            let format = filename
                .custom
                .iter()
                .find(|custom| &custom.name == name)
                .cloned()
                .or_else(|| FilenameFormat::builtin(name))
                .ok_or_else(|| ConfigError::Invalid(format!("unknown filename format '{name}'")))?;
            format.validate().map_err(ConfigError::Invalid)?;
            Ok(format)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse(home: &Path, contents: &str) -> Result<Config, ConfigError> {
        let toml: ConfigToml = toml::from_str(contents).expect("toml");
        Config::from_toml(home, toml, no_env)
    }

    #[test]
    fn defaults_without_config_file() {
        let home = tempdir().expect("tmp");
        let config = Config::load(home.path()).expect("config");
        assert_eq!(config.data_dir, home.path().join("data"));
        assert_eq!(config.document_extractor, ExtractorKind::Structured);
        assert_eq!(config.filename_formats, vec![FilenameFormat::v1()]);
        assert_eq!(config.optical.marker, "QR");
        assert_eq!(config.replies, Replies::default());
    }

    #[test]
    fn default_patterns_read_english_and_russian_receipts() {
        let home = tempdir().expect("tmp");
        let config = parse(home.path(), "").expect("config");
        let patterns = config.field_patterns().expect("patterns");
        let extraction = patterns
            .extract("Check number: 48213377\nAmount: 1500.00")
            .expect("english");
        assert_eq!(extraction.identifier.as_str(), "48213377");
        assert_eq!(extraction.fields.get("amount").map(String::as_str), Some("1500.00"));
        let extraction = patterns.extract("№ чека QR1234567").expect("russian");
        assert_eq!(extraction.identifier.as_str(), "QR1234567");
    }

    #[test]
    fn selects_formats_including_custom_ones() {
        let home = tempdir().expect("tmp");
        let config = parse(
            home.path(),
            r#"
document_extractor = "filename"
data_dir = "/var/lib/checkgate"

[filename]
formats = ["v2", "bank"]

[[filename.custom]]
name = "bank"
marker = "bank-"
prefix_len = 5
"#,
        )
        .expect("config");
        assert_eq!(config.document_extractor, ExtractorKind::Filename);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/checkgate"));
        let names: Vec<&str> = config.filename_formats.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["v2", "bank"]);
        assert_eq!(config.filename_formats[1].extension_len, 4);
    }

    #[test]
    fn rejects_invalid_settings() {
        let home = tempdir().expect("tmp");
        assert_matches!(
            parse(home.path(), "[filename]\nformats = [\"v9\"]"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            parse(home.path(), "[optical]\nmarker = \"QRC\""),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            parse(home.path(), "document_extractor = \"optical\""),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            parse(home.path(), "[structured]\nidentifier_pattern = \"(\""),
            Err(ConfigError::Pattern { .. })
        );
    }

    #[test]
    fn verification_hosts_default_to_none() {
        let home = tempdir().expect("tmp");
        assert!(parse(home.path(), "").expect("config").structured.allowed_hosts.is_empty());
        let config = parse(
            home.path(),
            "[structured]\nallowed_hosts = [\"bank.example\", \"pay.example\"]",
        )
        .expect("config");
        assert_eq!(config.structured.allowed_hosts, vec!["bank.example", "pay.example"]);
    }

    #[test]
    fn reads_secrets_with_legacy_fallback() {
        let home = tempdir().expect("tmp");
        let env: HashMap<&str, &str> =
            HashMap::from([("TOKEN", "legacy-token"), ("CHECKGATE_ADMIN_PASSWORD", "hunter2")]);
        let config = Config::from_toml(home.path(), ConfigToml::default(), |name| {
            env.get(name).map(ToString::to_string)
        })
        .expect("config");
        assert_eq!(config.bot_token.as_ref().map(BotToken::expose), Some("legacy-token"));
        assert_eq!(config.admin_password, AdminSecret::new("hunter2"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let home = tempdir().expect("tmp");
        std::fs::write(home.path().join(CONFIG_FILE), "data_dir = [").expect("write");
        assert_matches!(Config::load(home.path()), Err(ConfigError::Parse { .. }));
    }

    #[test]
    fn builds_every_extractor() {
        let home = tempdir().expect("tmp");
        let config = parse(home.path(), "").expect("config");
        for kind in [ExtractorKind::Structured, ExtractorKind::Filename, ExtractorKind::Optical] {
            assert_eq!(config.extractor(kind).expect("extractor").kind(), kind);
        }
        assert_eq!(
            config.extractor_set().expect("set").document_kind(),
            ExtractorKind::Structured
        );
    }
}
