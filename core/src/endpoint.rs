use serde::Serialize;
use std::fmt;

use crate::error::DecodeFailure;

/// Longest label kept on an [`Endpoint`], in characters.
pub const LABEL_MAX_CHARS: usize = 48;

/// Label used when a descriptor carries no display name.
pub const LABEL_PLACEHOLDER: &str = "NoName";

/// The four descriptor encodings understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Vmess,
    Vless,
    Trojan,
    #[serde(rename = "ss")]
    Shadowsocks,
}

impl ProtocolFamily {
    pub const ALL: [ProtocolFamily; 4] = [
        ProtocolFamily::Vmess,
        ProtocolFamily::Vless,
        ProtocolFamily::Trojan,
        ProtocolFamily::Shadowsocks,
    ];

    /// URI scheme prefix including `://`.
    pub const fn prefix(self) -> &'static str {
        match self {
            ProtocolFamily::Vmess => "vmess://",
            ProtocolFamily::Vless => "vless://",
            ProtocolFamily::Trojan => "trojan://",
            ProtocolFamily::Shadowsocks => "ss://",
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            ProtocolFamily::Vmess => "vmess",
            ProtocolFamily::Vless => "vless",
            ProtocolFamily::Trojan => "trojan",
            ProtocolFamily::Shadowsocks => "ss",
        }
    }

    /// Upper-case tag used in result file names.
    pub const fn file_tag(self) -> &'static str {
        match self {
            ProtocolFamily::Vmess => "VMESS",
            ProtocolFamily::Vless => "VLESS",
            ProtocolFamily::Trojan => "TROJAN",
            ProtocolFamily::Shadowsocks => "SS",
        }
    }

    /// Family whose prefix the token starts with, if any.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| token.starts_with(f.prefix()))
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A decoded, validated descriptor. Only built through [`Endpoint::new`], so
/// the host is never empty and the port is always in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    family: ProtocolFamily,
    host: String,
    port: u16,
    label: String,
    source: String,
}

impl Endpoint {
    pub fn new(
        family: ProtocolFamily,
        host: impl Into<String>,
        port: u16,
        raw_label: &str,
        source: impl Into<String>,
    ) -> Result<Self, DecodeFailure> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(DecodeFailure::EmptyHost);
        }
        if port == 0 {
            return Err(DecodeFailure::InvalidPort("0".into()));
        }
        Ok(Endpoint {
            family,
            host,
            port,
            label: sanitize_label(raw_label),
            source: source.into(),
        })
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The descriptor exactly as it was extracted.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Replace filesystem-unsafe and control characters with `_`, cap the length
/// at [`LABEL_MAX_CHARS`] and fall back to [`LABEL_PLACEHOLDER`] when empty.
pub fn sanitize_label(raw: &str) -> String {
    if raw.is_empty() {
        return LABEL_PLACEHOLDER.to_string();
    }
    raw.chars()
        .take(LABEL_MAX_CHARS)
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
