//! Pull descriptor tokens out of pasted text, subscription bodies or files.

use descriptor::b64;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use sweep_core::ProtocolFamily;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[a-zA-Z]+://[^\s<>"']+"#).expect("token pattern"));

/// Anything that can hand over a blob of text to scan.
pub trait TextSource {
    fn get_text(&self) -> io::Result<String>;
}

impl TextSource for str {
    fn get_text(&self) -> io::Result<String> {
        Ok(self.to_string())
    }
}

impl TextSource for String {
    fn get_text(&self) -> io::Result<String> {
        Ok(self.clone())
    }
}

/// Whether the token starts with one of the recognized scheme prefixes.
pub fn has_known_scheme(token: &str) -> bool {
    ProtocolFamily::from_token(token).is_some()
}

fn contains_known_scheme(text: &str) -> bool {
    ProtocolFamily::ALL.iter().any(|f| text.contains(f.prefix()))
}

/// Extract unique descriptor tokens in first-seen order.
///
/// When the whole blob does not already start with a descriptor it is tried
/// as base64; the decoded text replaces the original only if it contains a
/// descriptor. Otherwise the original text is scanned as-is.
pub fn extract(text: &str) -> Vec<String> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    if cleaned.is_empty() {
        return Vec::new();
    }

    let decoded = if has_known_scheme(&cleaned) {
        None
    } else {
        b64::decode_lenient_text(&cleaned).ok().filter(|d| contains_known_scheme(d))
    };
    let working = decoded.as_deref().unwrap_or(text);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in TOKEN.find_iter(working) {
        let Some(token) = m.as_str().split_whitespace().next() else { continue };
        if !has_known_scheme(token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            out.push(token.to_string());
        }
    }
    out
}

/// Extract from each blob on its own and merge the results, keeping the
/// first-seen order across blobs.
pub fn extract_many<I, S>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in texts {
        for token in extract(t.as_ref()) {
            if seen.insert(token.clone()) {
                out.push(token);
            }
        }
    }
    out
}

pub fn extract_from<S: TextSource + ?Sized>(source: &S) -> io::Result<Vec<String>> {
    Ok(extract(&source.get_text()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn duplicate_lines_collapse() {
        let text = "vless://user@example.com:443#MyNode\nvless://user@example.com:443#MyNode";
        assert_eq!(extract(text), vec!["vless://user@example.com:443#MyNode".to_string()]);
    }

    #[test]
    fn empty_input() {
        assert!(extract("").is_empty());
        assert!(extract("  \r\n ").is_empty());
    }

    #[test]
    fn keeps_first_seen_order_and_filters_schemes() {
        let text = "ss://a@h:1 https://example.com trojan://p@h:2\nvmess://abc ss://a@h:1 vless://u@h:3";
        assert_eq!(
            extract(text),
            vec!["ss://a@h:1", "trojan://p@h:2", "vmess://abc", "vless://u@h:3"]
        );
    }

    #[test]
    fn stops_at_quotes_and_angle_brackets() {
        let text = r#"<a href="trojan://p@h:2#x">link</a> 'vless://u@h:3'"#;
        assert_eq!(extract(text), vec!["trojan://p@h:2#x", "vless://u@h:3"]);
    }

    #[test]
    fn mixed_text_with_descriptors_later_is_scanned_raw() {
        let text = "my servers:\n  trojan://p@h:2#one\n  garbage\n  ss://m:p@h:3#two";
        assert_eq!(extract(text), vec!["trojan://p@h:2#one", "ss://m:p@h:3#two"]);
    }

    #[test]
    fn base64_subscription_is_decoded() {
        let body = "vless://u@h:3#a\ntrojan://p@h:2#b\n";
        let wrapped = STANDARD.encode(body);
        // subscriptions are often wrapped at 76 columns
        let folded: String = wrapped
            .as_bytes()
            .chunks(20)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert_eq!(extract(&folded), vec!["vless://u@h:3#a", "trojan://p@h:2#b"]);
        assert_eq!(extract(wrapped.trim_end_matches('=')), vec!["vless://u@h:3#a", "trojan://p@h:2#b"]);
    }

    #[test]
    fn base64_without_descriptors_keeps_original() {
        let wrapped = STANDARD.encode("nothing to see here");
        assert!(extract(&wrapped).is_empty());
    }

    #[test]
    fn decoded_text_replaces_raw_descriptors() {
        // a base64 blob followed by a raw descriptor: only the decoded set is used
        let wrapped = STANDARD.encode("vless://u@h:3#a\n");
        let text = format!("{wrapped}\ntrojan://p@h:2#raw");
        assert_eq!(extract(&text), vec!["vless://u@h:3#a"]);
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "junk trojan://p@h:2#one vless://u@h:3 trojan://p@h:2#one\nss://m:p@h:3#two";
        let first = extract(text);
        assert_eq!(extract(&first.join("\n")), first);
    }

    #[test]
    fn extract_many_joins_sources() {
        let got = extract_many(["trojan://p@h:2#a", "trojan://p@h:2#a", "vless://u@h:3"]);
        assert_eq!(got, vec!["trojan://p@h:2#a", "vless://u@h:3"]);
    }

    #[test]
    fn padded_subscriptions_from_separate_sources() {
        let a = STANDARD.encode("trojan://pw@10.0.0.1:8443#A\n");
        let b = STANDARD.encode("vless://u@h.example:443#B\n");
        assert!(a.ends_with('=') && b.ends_with('='));
        assert_eq!(
            extract_many([a.as_str(), b.as_str(), a.as_str()]),
            vec!["trojan://pw@10.0.0.1:8443#A", "vless://u@h.example:443#B"]
        );
        // pasted together, decoding ends at the first padding
        assert_eq!(extract(&format!("{a}\n{b}")), vec!["trojan://pw@10.0.0.1:8443#A"]);
    }

    #[test]
    fn text_source_for_strings() {
        let s = String::from("vless://u@h:3");
        assert_eq!(extract_from(&s).unwrap(), vec!["vless://u@h:3"]);
        assert_eq!(extract_from("nothing").unwrap(), Vec::<String>::new());
    }
}
