//! Decode vmess / vless / trojan / shadowsocks descriptors into endpoints.
//!
//! Every family fails independently and a failure never carries partial
//! data: the result is either a complete [`Endpoint`] or a [`DecodeFailure`].

pub mod b64;

use serde_json::Value;
use sweep_core::{DecodeFailure, Endpoint, ProtocolFamily};
use url::{Host, Url};

/// Port assumed when a descriptor leaves it out.
pub const DEFAULT_PORT: u16 = 443;

/// Decode one descriptor token.
pub fn parse(token: &str) -> Result<Endpoint, DecodeFailure> {
    let token = token.trim();
    match ProtocolFamily::from_token(token) {
        Some(ProtocolFamily::Vmess) => parse_vmess(token),
        Some(family @ (ProtocolFamily::Vless | ProtocolFamily::Trojan)) => parse_uri(family, token),
        Some(ProtocolFamily::Shadowsocks) => parse_shadowsocks(token),
        None => Err(DecodeFailure::UnknownScheme),
    }
}

/// Decode every token, keeping failures alongside the token that caused them.
pub fn parse_all<I, S>(tokens: I) -> (Vec<Endpoint>, Vec<(String, DecodeFailure)>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut endpoints = Vec::new();
    let mut failures = Vec::new();
    for token in tokens {
        let token = token.as_ref();
        match parse(token) {
            Ok(ep) => endpoints.push(ep),
            Err(e) => failures.push((token.to_string(), e)),
        }
    }
    (endpoints, failures)
}

fn parse_vmess(token: &str) -> Result<Endpoint, DecodeFailure> {
    let payload = &token[ProtocolFamily::Vmess.prefix().len()..];
    let bytes = b64::decode_lenient(payload).map_err(|e| DecodeFailure::Base64(e.to_string()))?;
    let json: Value = serde_json::from_slice(&bytes).map_err(|e| DecodeFailure::Json(e.to_string()))?;
    let obj = json
        .as_object()
        .ok_or_else(|| DecodeFailure::Json("expected a JSON object".into()))?;

    let host = match obj.get("add") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => return Err(DecodeFailure::MissingField("add")),
        Some(other) => other.to_string(),
    };
    let port = match obj.get("port") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| DecodeFailure::InvalidPort(n.to_string()))?,
        Some(Value::String(s)) if !s.trim().is_empty() => parse_port(s)?,
        _ => return Err(DecodeFailure::MissingField("port")),
    };
    let label = match obj.get("ps") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Endpoint::new(ProtocolFamily::Vmess, host, port, &label, token)
}

fn parse_uri(family: ProtocolFamily, token: &str) -> Result<Endpoint, DecodeFailure> {
    let url = Url::parse(token).map_err(|e| match e {
        url::ParseError::InvalidPort => DecodeFailure::InvalidPort(token.to_string()),
        other => DecodeFailure::InvalidUri(other.to_string()),
    })?;
    let host = match url.host() {
        Some(Host::Domain(d)) => d.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        None => return Err(DecodeFailure::EmptyHost),
    };
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let label = url.fragment().map(percent_decode).unwrap_or_default();
    Endpoint::new(family, host, port, &label, token)
}

fn parse_shadowsocks(token: &str) -> Result<Endpoint, DecodeFailure> {
    let rest = &token[ProtocolFamily::Shadowsocks.prefix().len()..];
    // body ends at the first `#`, the label starts after the last one
    let body = rest.split('#').next().unwrap_or(rest);
    let fragment = rest.rsplit_once('#').map(|(_, f)| f);

    let authority = if let Some((_, after)) = body.split_once('@') {
        // plain form: userinfo@host:port[/][?plugin=...]
        let seg = after.split('@').next().unwrap_or(after);
        strip_suffix_params(seg, &['?', '/']).to_string()
    } else {
        // encoded form: base64(method:password@host:port)
        let encoded = strip_suffix_params(body, &['?']);
        let decoded = b64::decode_lenient_text(encoded).map_err(|e| DecodeFailure::Base64(e.to_string()))?;
        let decoded = decoded.trim();
        let tail = decoded.rsplit('@').next().unwrap_or(decoded);
        tail.trim().to_string()
    };

    let (host, port) = split_host_port(&authority)?;
    let label = fragment.map(percent_decode).unwrap_or_default();
    Endpoint::new(ProtocolFamily::Shadowsocks, host, port, &label, token)
}

fn strip_suffix_params<'a>(s: &'a str, stops: &[char]) -> &'a str {
    match s.find(stops) {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Split `host:port`, `[v6]:port`, or a bare host (port defaults to 443).
fn split_host_port(s: &str) -> Result<(String, u16), DecodeFailure> {
    if let Some(inner) = s.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| DecodeFailure::InvalidUri(format!("unterminated IPv6 literal: {s}")))?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }
    match s.split_once(':') {
        Some((host, rest)) => {
            let port_str = rest.split(':').next().unwrap_or(rest);
            Ok((host.to_string(), parse_port(port_str)?))
        }
        None => Ok((s.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(s: &str) -> Result<u16, DecodeFailure> {
    let s = s.trim();
    match s.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(DecodeFailure::InvalidPort(s.to_string())),
    }
}

fn percent_decode(s: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned()
}
