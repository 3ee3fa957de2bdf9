use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use url::Url;

use crate::overlay::{OverlayStyle, MAX_SURFACE_SIDE};
use crate::surface::parse_hex_color;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/analysis/analyze";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(
        endpoint: Option<String>,
        connect_timeout_secs: Option<u64>,
        read_timeout_secs: Option<u64>,
    ) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(endpoint) = endpoint.filter(|v| !v.trim().is_empty()) {
            cfg.endpoint = endpoint.trim().to_string();
        }
        cfg.connect_timeout = connect_timeout_secs.map(Duration::from_secs);
        cfg.read_timeout = read_timeout_secs.map(Duration::from_secs);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)
            .map_err(|err| anyhow!("invalid analysis endpoint '{}': {err}", self.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "unsupported endpoint scheme '{}'; expected http(s)",
                url.scheme()
            );
        }
        for (name, timeout) in [
            ("connect", self.connect_timeout),
            ("read", self.read_timeout),
        ] {
            if timeout == Some(Duration::ZERO) {
                bail!("{name} timeout must be at least one second");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    /// Display width; `None` renders at the source width.
    pub target_width: Option<u32>,
    pub style: OverlayStyle,
}

impl RenderConfig {
    pub fn new(
        target_width: Option<u32>,
        accent: Option<&str>,
        label_text: Option<&str>,
    ) -> Result<Self> {
        match target_width {
            Some(0) => bail!("render width must be at least 1 pixel"),
            Some(width) if width > MAX_SURFACE_SIDE => {
                bail!("render width {width} exceeds the {MAX_SURFACE_SIDE} px limit")
            }
            _ => {}
        }
        let mut style = OverlayStyle::default();
        if let Some(raw) = accent {
            style.accent =
                parse_hex_color(raw).ok_or_else(|| anyhow!("invalid accent color: {raw}"))?;
        }
        if let Some(raw) = label_text {
            style.label_text =
                parse_hex_color(raw).ok_or_else(|| anyhow!("invalid label color: {raw}"))?;
        }
        Ok(Self {
            target_width,
            style,
        })
    }
}
