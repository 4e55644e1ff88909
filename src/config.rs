//! Configuration, read from a TOML file. Every field has a default, so an empty file (or no
//! file at all) gives a working setup under `~/.dhboard`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dh::PeerKeyPolicy;
use crate::engine::Cipher;
use crate::error::Error;
use crate::messages::Envelope;

/// CONFIG_FILE_NAME is looked up in the home directory
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// HOME_DIR_NAME is the default home under the user's home directory
pub const HOME_DIR_NAME: &str = ".dhboard";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the key store, handoff file and message output
    #[serde(default = "default_home")]
    pub home: PathBuf,
    #[serde(default = "default_store_file")]
    pub store_file: String,
    #[serde(default)]
    pub cipher: Cipher,
    #[serde(default)]
    pub peer_key_policy: PeerKeyPolicy,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub posting: PostingConfig,
}

/// NewsConfig points at the news server to scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsConfig {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_group")]
    pub group: String,
}

/// PostingConfig covers everything written out for others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingConfig {
    /// mail2news gateways used in the To header of anonymous postings
    #[serde(default = "default_gateways")]
    pub gateways: Vec<String>,
    /// Directory (relative to home unless absolute) for decrypted messages
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Key handoff file (relative to home unless absolute)
    #[serde(default = "default_handoff_file")]
    pub handoff_file: PathBuf,
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(HOME_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(HOME_DIR_NAME))
}

fn default_store_file() -> String {
    "keys.db".to_string()
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    119
}

fn default_group() -> String {
    "alt.anonymous.messages".to_string()
}

fn default_gateways() -> Vec<String> {
    vec![
        "mail2news@dizum.com".to_string(),
        "mail2news@m2n.mixmin.net".to_string(),
    ]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("messages")
}

fn default_handoff_file() -> PathBuf {
    PathBuf::from("mutatedkey.asc")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            home: default_home(),
            store_file: default_store_file(),
            cipher: Cipher::default(),
            peer_key_policy: PeerKeyPolicy::default(),
            news: NewsConfig::default(),
            posting: PostingConfig::default(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        NewsConfig {
            server: default_server(),
            port: default_port(),
            group: default_group(),
        }
    }
}

impl Default for PostingConfig {
    fn default() -> Self {
        PostingConfig {
            gateways: default_gateways(),
            output_dir: default_output_dir(),
            handoff_file: default_handoff_file(),
        }
    }
}

impl Config {
    /// load reads a config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if config.peer_key_policy == PeerKeyPolicy::RangeOnly {
            tracing::warn!("peer keys will only be range checked");
        }
        Ok(config)
    }

    /// save writes the config as TOML
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.home.join(&self.store_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.home.join(&self.posting.output_dir)
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.home.join(&self.posting.handoff_file)
    }

    /// envelope builds the posting headers for anonymous postings
    pub fn envelope(&self) -> Envelope {
        Envelope {
            gateways: self.posting.gateways.clone(),
            newsgroup: self.news.group.clone(),
        }
    }
}

/* ------------------------------------------------------------------------- */

// TESTS
