//! Conditional-request negotiation.
//!
//! Translated responses carry ETags derived from the translated body and
//! tagged with [`ETAG_SUFFIX`] inside the closing quote. The upstream static
//! server knows nothing about translation, so:
//!
//! - inbound `If-None-Match` tokens without the suffix are never forwarded
//!   (they validate the raw file, not the translation);
//! - tagged tokens are forwarded stripped, letting the upstream answer `304`
//!   when the raw file is unchanged;
//! - `If-Modified-Since` is always dropped;
//! - an upstream `304` gets the suffix appended to its ETag.

use axum::http::{HeaderMap, HeaderValue, header};

/// Marker distinguishing translated-response ETags from upstream ones.
pub const ETAG_SUFFIX: &str = "-translate";

/// `Accept` media types sent by module loaders that want translated source.
pub const MODULE_MEDIA_TYPES: [&str; 2] =
    ["module/x-module-loader-module", "application/x-es-module"];

fn tokens(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

/// Whether the request's `Accept` header asks for a translated module.
pub fn wants_translation(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(tokens)
        .map(|token| token.split(';').next().unwrap_or(token).trim())
        .any(|media| {
            MODULE_MEDIA_TYPES
                .iter()
                .any(|wanted| media.eq_ignore_ascii_case(wanted))
        })
}

/// Whether `etag` carries the translation suffix.
pub fn is_tagged(etag: &str) -> bool {
    etag.strip_suffix('"').unwrap_or(etag).ends_with(ETAG_SUFFIX)
}

/// Remove the translation suffix, keeping quotes and weak prefix intact.
pub fn strip_tag(etag: &str) -> String {
    match etag.strip_suffix('"') {
        Some(inner) => match inner.strip_suffix(ETAG_SUFFIX) {
            Some(bare) => format!("{bare}\""),
            None => etag.to_string(),
        },
        None => etag.strip_suffix(ETAG_SUFFIX).unwrap_or(etag).to_string(),
    }
}

/// Append the translation suffix unless already present.
pub fn tag(etag: &str) -> String {
    if is_tagged(etag) {
        return etag.to_string();
    }
    match etag.strip_suffix('"') {
        Some(inner) => format!("{inner}{ETAG_SUFFIX}\""),
        None => format!("{etag}{ETAG_SUFFIX}"),
    }
}

/// ETag for a translated body.
pub fn compute_etag(body: &[u8]) -> String {
    format!("\"{}{}\"", blake3::hash(body).to_hex(), ETAG_SUFFIX)
}

/// Rewrite conditional headers of a module request before it goes upstream.
///
/// Returns the stripped tagged tokens, which are later compared with the
/// ETag of the freshly translated body.
pub fn rewrite_request_headers(headers: &mut HeaderMap) -> Vec<String> {
    let forwarded: Vec<String> = headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(tokens)
        .filter(|token| is_tagged(token))
        .map(strip_tag)
        .collect();

    headers.remove(header::IF_NONE_MATCH);
    headers.remove(header::IF_MODIFIED_SINCE);

    if !forwarded.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&forwarded.join(", ")) {
            headers.insert(header::IF_NONE_MATCH, value);
        }
    }

    forwarded
}

/// Tag the ETag of an upstream `304` so clients keep revalidating through us.
pub fn tag_not_modified(headers: &mut HeaderMap) {
    let Some(etag) = headers
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
    else {
        return;
    };
    if is_tagged(etag) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&tag(etag)) {
        headers.insert(header::ETAG, value);
    }
}

fn opaque(etag: &str) -> &str {
    etag.strip_prefix("W/").unwrap_or(etag)
}

/// Whether `etag` matches any of the (already stripped) inbound tokens.
///
/// Comparison is weak: a `W/` prefix on either side is ignored.
pub fn matches(etag: &str, inbound: &[String]) -> bool {
    let ours = strip_tag(etag);
    inbound
        .iter()
        .any(|token| opaque(token) == opaque(&ours))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_wants_translation() {
        assert!(wants_translation(&headers(&[(
            header::ACCEPT,
            "module/x-module-loader-module */*"
        )])));
        assert!(wants_translation(&headers(&[(
            header::ACCEPT,
            "text/html, application/x-es-module;q=0.9"
        )])));
        assert!(!wants_translation(&headers(&[(header::ACCEPT, "*/*")])));
        assert!(!wants_translation(&HeaderMap::new()));
    }

    #[test]
    fn test_tag_and_strip() {
        assert!(is_tagged("\"abc-translate\""));
        assert!(!is_tagged("\"abc\""));
        assert_eq!(tag("\"abc\""), "\"abc-translate\"");
        assert_eq!(tag("W/\"abc\""), "W/\"abc-translate\"");
        assert_eq!(tag("\"abc-translate\""), "\"abc-translate\"");
        assert_eq!(strip_tag("\"abc-translate\""), "\"abc\"");
        assert_eq!(strip_tag("W/\"abc-translate\""), "W/\"abc\"");
        assert_eq!(strip_tag("\"abc\""), "\"abc\"");
    }

    #[test]
    fn test_compute_etag_is_tagged_and_stable() {
        let a = compute_etag(b"console.log(1);");
        assert!(a.starts_with('"') && a.ends_with("-translate\""));
        assert_eq!(a, compute_etag(b"console.log(1);"));
        assert_ne!(a, compute_etag(b"console.log(2);"));
    }

    #[test]
    fn test_rewrite_forwards_only_tagged_tokens() {
        let mut map = headers(&[
            (header::IF_NONE_MATCH, "\"up\" \"abc-translate\""),
            (header::IF_MODIFIED_SINCE, "Mon, 01 Jan 2024 00:00:00 GMT"),
        ]);

        let forwarded = rewrite_request_headers(&mut map);

        assert_eq!(forwarded, vec!["\"abc\""]);
        assert_eq!(map.get(header::IF_NONE_MATCH).unwrap(), "\"abc\"");
        assert!(map.get(header::IF_MODIFIED_SINCE).is_none());
    }

    #[test]
    fn test_rewrite_removes_untagged_header() {
        let mut map = headers(&[(header::IF_NONE_MATCH, "\"up1\", \"up2\"")]);
        assert!(rewrite_request_headers(&mut map).is_empty());
        assert!(map.get(header::IF_NONE_MATCH).is_none());
    }

    #[test]
    fn test_tag_not_modified() {
        let mut map = headers(&[(header::ETAG, "\"up\"")]);
        tag_not_modified(&mut map);
        assert_eq!(map.get(header::ETAG).unwrap(), "\"up-translate\"");

        tag_not_modified(&mut map);
        assert_eq!(map.get(header::ETAG).unwrap(), "\"up-translate\"");
    }

    #[test]
    fn test_matches_ignores_weakness() {
        let etag = compute_etag(b"x");
        let stripped = strip_tag(&etag);
        assert!(matches(&etag, &[stripped.clone()]));
        assert!(matches(&etag, &[format!("W/{stripped}")]));
        assert!(!matches(&etag, &["\"other\"".to_string()]));
        assert!(!matches(&etag, &[]));
    }
}
