use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::*;
use crate::geo::Jitter;
use crate::refresher::{ImageSources, RefreshConfig, StalePolicy};
use crate::map_surface::CameraOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub port: u16,
    pub image_urls: Vec<String>,
    pub fetch_count: usize,
    pub jitter_span: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub drop_stale_fetches: bool,
    #[serde(default)]
    pub auto_open_browser: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            image_urls: DEFAULT_IMAGE_URLS.iter().map(|s| s.to_string()).collect(),
            fetch_count: DEFAULT_FETCH_COUNT,
            jitter_span: DEFAULT_JITTER_SPAN,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            drop_stale_fetches: false,
            auto_open_browser: false,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        let mut settings = Self::load_from(&config_path)?;

        if let Ok(port_str) = std::env::var("PINMAP_PORT") {
            match port_str.parse::<u16>() {
                Ok(port) => settings.port = port,
                Err(_) => warn!(value = %port_str, "ignoring invalid PINMAP_PORT"),
            }
        }
        Ok(settings)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Parses `key = value` lines; unknown keys and unparsable values keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut settings = Settings::default();
        let mut image_urls = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "port" => parse_into(key, value, &mut settings.port),
                "image_url" => {
                    if !value.is_empty() {
                        image_urls.push(value.to_string());
                    }
                }
                "fetch_count" => parse_into(key, value, &mut settings.fetch_count),
                "jitter_span" => parse_into(key, value, &mut settings.jitter_span),
                "min_zoom" => parse_into(key, value, &mut settings.min_zoom),
                "max_zoom" => parse_into(key, value, &mut settings.max_zoom),
                "fetch_timeout_secs" => parse_into(key, value, &mut settings.fetch_timeout_secs),
                "drop_stale_fetches" => parse_into(key, value, &mut settings.drop_stale_fetches),
                "auto_open_browser" => parse_into(key, value, &mut settings.auto_open_browser),
                _ => warn!(key, "unknown config key"),
            }
        }

        if !image_urls.is_empty() {
            settings.image_urls = image_urls;
        }
        settings
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Creating config directory")?;
        }

        let mut content = String::new();
        content.push_str("# PinMap Configuration File\n");
        content.push_str(&format!("port = {}\n", self.port));
        for url in &self.image_urls {
            content.push_str(&format!("image_url = \"{}\"\n", url));
        }
        content.push_str(&format!("fetch_count = {}\n", self.fetch_count));
        content.push_str(&format!("jitter_span = {}\n", self.jitter_span));
        content.push_str(&format!("min_zoom = {}\n", self.min_zoom));
        content.push_str(&format!("max_zoom = {}\n", self.max_zoom));
        content.push_str(&format!("fetch_timeout_secs = {}\n", self.fetch_timeout_secs));
        content.push_str(&format!("drop_stale_fetches = {}\n", self.drop_stale_fetches));
        content.push_str(&format!("auto_open_browser = {}\n", self.auto_open_browser));

        std::fs::write(config_path, content).context("Failed to write to config file")?;
        Ok(())
    }

    pub fn refresh_config(&self) -> Result<RefreshConfig> {
        let jitter = Jitter::new(self.jitter_span).context("Invalid jitter_span")?;
        let stale_policy = if self.drop_stale_fetches {
            StalePolicy::Drop
        } else {
            StalePolicy::Keep
        };
        Ok(RefreshConfig {
            fetch_count: self.fetch_count,
            jitter,
            stale_policy,
        })
    }

    pub fn image_sources(&self) -> Result<ImageSources> {
        ImageSources::new(self.image_urls.iter().cloned()).context("No image_url configured")
    }

    pub fn camera(&self) -> CameraOptions {
        CameraOptions {
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom.max(self.min_zoom),
            ..CameraOptions::default()
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .unwrap_or_default()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        if path.ends_with("target/debug") || path.ends_with("target/release") {
            path.pop();
            path.pop();
        }
        path.push("pinmap.ini");
        path
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "ignoring unparsable config value"),
    }
}
