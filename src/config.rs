// Determine config stuffs

use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

lazy_static! {
    pub static ref APP_DATA: Option<ProjectDirs> =
        ProjectDirs::from("io", "securitygate", "RfidGateClient");
}

/// Set this to point the client at a config file outside the data dir.
pub const CONFIG_PATH_ENV: &str = "RFID_GATE_CONFIG";

pub const DEFAULT_AUTH_PATH: &str = "/api/security-gate/auth-door";
pub const DEFAULT_HANDSHAKE_PATH: &str = "/api/aes/init";
pub const DEFAULT_SHARED_SECRET: &str = "example-secret-key";
pub const DEFAULT_CIPHER_IV: &str = "1231231231231231";

// 2^61 - 1 is prime and keeps every shared secret inside a u64.
pub const DEFAULT_MODULUS: u64 = 2_305_843_009_213_693_951;
pub const DEFAULT_GENERATOR: u64 = 37;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_auth_path")]
    pub auth_path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<u64>,
    #[serde(default)]
    pub handshake: Option<HandshakeConfig>,
    #[serde(default = "default_shared_secret")]
    pub shared_secret: String,
    #[serde(default = "default_cipher_iv")]
    pub cipher_iv: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub signature_header: Option<String>,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    #[serde(default = "default_handshake_path")]
    pub path: String,
    #[serde(default = "default_modulus")]
    pub modulus: u64,
    #[serde(default = "default_generator")]
    pub generator: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            path: default_handshake_path(),
            modulus: DEFAULT_MODULUS,
            generator: DEFAULT_GENERATOR,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReaderConfig {
    // Keyboard-wedge readers type the serial number followed by Enter
    Stdin,
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig::Stdin
    }
}

/// Where the pipeline's api key and secret key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Static { api_key: String, secret_key: u64 },
    Handshake(HandshakeConfig),
}

fn default_port() -> u16 {
    3000
}

fn default_scheme() -> String {
    "http".to_owned()
}

fn default_auth_path() -> String {
    DEFAULT_AUTH_PATH.to_owned()
}

fn default_handshake_path() -> String {
    DEFAULT_HANDSHAKE_PATH.to_owned()
}

fn default_modulus() -> u64 {
    DEFAULT_MODULUS
}

fn default_generator() -> u64 {
    DEFAULT_GENERATOR
}

fn default_shared_secret() -> String {
    DEFAULT_SHARED_SECRET.to_owned()
}

fn default_cipher_iv() -> String {
    DEFAULT_CIPHER_IV.to_owned()
}

fn default_timeout() -> u64 {
    5
}

fn default_baud_rate() -> u32 {
    9600
}

impl Config {
    /// Loads `config.json` from the app data dir, or from `RFID_GATE_CONFIG` when set.
    pub fn load() -> Result<Config, ConfigError> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => APP_DATA
                .as_ref()
                .map(|dirs| dirs.data_dir().join("config.json"))
                .ok_or(ConfigError::Invalid {
                    field: "config path",
                    reason: "no home directory to resolve the app data dir from".to_owned(),
                })?,
        };
        Config::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Config, ConfigError> {
        let file = std::fs::File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Config =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                }
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server_host",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.cipher_iv.len() != 16 {
            return Err(ConfigError::Invalid {
                field: "cipher_iv",
                reason: format!("must be 16 bytes, got {}", self.cipher_iv.len()),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if let Some(handshake) = &self.handshake {
            // The private exponent is drawn from [2, modulus - 1)
            if handshake.modulus <= 3 {
                return Err(ConfigError::Invalid {
                    field: "handshake.modulus",
                    reason: "must be greater than 3".to_owned(),
                });
            }
            if handshake.generator < 2 || handshake.generator >= handshake.modulus {
                return Err(ConfigError::Invalid {
                    field: "handshake.generator",
                    reason: "must lie in [2, modulus)".to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Static credentials win over a handshake block when both are present.
    pub fn credential_source(&self) -> Result<CredentialSource, ConfigError> {
        match (&self.api_key, self.secret_key, &self.handshake) {
            (Some(api_key), Some(secret_key), _) => Ok(CredentialSource::Static {
                api_key: api_key.clone(),
                secret_key,
            }),
            (_, _, Some(handshake)) => Ok(CredentialSource::Handshake(handshake.clone())),
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.server_host, self.server_port)
    }
}
