//! Cache key computation.
//!
//! A fingerprint is the byte-concatenation, with `0x00` separators, of the
//! uppercased method, the normalized URL, and (when the server's `Vary`
//! is known) the request's values for each varying header. Equality of
//! fingerprints implies cache-level request equivalence; the full byte
//! string is the stored key, so hash collisions are never relied on.

use crate::http::Headers;
use url::form_urlencoded;
use url::Url;

const SEP: u8 = 0x00;
/// Marks a varying header the request did not carry (distinct from an
/// empty value).
const ABSENT: u8 = 0x01;

/// Compute the cache key for a request. `known_vary` is the header-name
/// list a cached response declared via `Vary`, if any; pass `None` on
/// first contact with a URL.
pub fn compute(method: &str, url: &Url, headers: &Headers, known_vary: Option<&[String]>) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(method.to_ascii_uppercase().as_bytes());
    key.push(SEP);
    key.extend_from_slice(normalized_url(url).as_bytes());

    if let Some(vary) = known_vary {
        let mut names: Vec<String> = vary.iter().map(|n| n.to_ascii_lowercase()).collect();
        names.sort_unstable();
        names.dedup();
        for name in names {
            key.push(SEP);
            key.extend_from_slice(name.as_bytes());
            key.push(SEP);
            match headers.get(&name) {
                Some(value) => key.extend_from_slice(value.as_bytes()),
                None => key.push(ABSENT),
            }
        }
    }
    key
}

/// Normalized URL: lowercase scheme and host, default port elided, path
/// as-is, query pairs stably sorted by key with values preserved.
fn normalized_url(url: &Url) -> String {
    let mut out = String::new();
    out.push_str(url.scheme());
    out.push_str("://");
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        // Stable sort: repeated keys keep their declared value order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        if !pairs.is_empty() {
            let mut ser = form_urlencoded::Serializer::new(String::new());
            for (k, v) in &pairs {
                ser.append_pair(k, v);
            }
            out.push('?');
            out.push_str(&ser.finish());
        }
    }
    out
}
