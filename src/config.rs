//! Configuration Management
//!
//! Handles persistent configuration storage for cfkit. The password is
//! only ever read from the environment and never written to disk.

use crate::cf::client::{LoginOptions, DEFAULT_PAGE_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

const DEFAULT_CLIENT_ID: &str = "cf";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Cloud Controller base URL
    #[serde(default)]
    pub api_url: Option<String>,
    /// UAA base URL; discovered from the Cloud Controller when absent
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Identity provider origin sent as login hint
    #[serde(default)]
    pub origin: Option<String>,
    /// Target space
    #[serde(default)]
    pub space_guid: Option<Uuid>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub token_exchange: bool,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cfkit").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Could not read {:?}: {}", path, e);
                Self::default()
            },
        }
    }

    /// Parse a config document, falling back to defaults when it is invalid
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unparseable config: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Get effective API URL (CLI > CF_API > config)
    pub fn effective_api_url(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| env("CF_API"))
            .or_else(|| self.api_url.clone())
    }

    /// Get effective username (CLI > CF_USERNAME > config)
    pub fn effective_username(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| env("CF_USERNAME"))
            .or_else(|| self.username.clone())
    }

    /// Password comes from CF_PASSWORD only
    pub fn effective_password(&self) -> Option<String> {
        env("CF_PASSWORD")
    }

    /// Get effective origin (CLI > CF_ORIGIN > config)
    pub fn effective_origin(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| env("CF_ORIGIN"))
            .or_else(|| self.origin.clone())
    }

    /// Get effective target space (CLI > CF_SPACE_GUID > config)
    pub fn effective_space(&self, cli: Option<Uuid>) -> Result<Option<Uuid>> {
        if let Some(space) = cli {
            return Ok(Some(space));
        }
        match env("CF_SPACE_GUID") {
            Some(raw) => Uuid::parse_str(&raw)
                .map(Some)
                .with_context(|| format!("CF_SPACE_GUID is not a guid: {}", raw)),
            None => Ok(self.space_guid),
        }
    }

    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
    }

    pub fn effective_client_secret(&self) -> String {
        self.client_secret.clone().unwrap_or_default()
    }

    pub fn effective_page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Login options for the configured UAA
    pub fn login_options(&self, origin: Option<String>) -> LoginOptions {
        LoginOptions {
            auth_url: self.auth_url.clone(),
            origin,
            token_exchange: self.token_exchange,
            page_size: Some(self.effective_page_size()),
        }
    }

    /// Remember the target and save
    pub fn set_target(&mut self, api_url: &str, space_guid: Option<Uuid>) -> Result<()> {
        self.api_url = Some(api_url.to_string());
        if space_guid.is_some() {
            self.space_guid = space_guid;
        }
        self.save()
    }
}
