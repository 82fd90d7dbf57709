//! Source map repair and inlining.

use base64::{Engine, engine::general_purpose::STANDARD};
use oxc_sourcemap::SourceMap;

const INLINE_PREFIX: &str = "//# sourceMappingURL=data:application/json;charset=utf-8;base64,";

/// Fill in the fields browsers need to resolve a builder's source map.
///
/// `source_root` is the server-relative location of the build root.
/// `entry` is the entry module id and its source text; when the builder did
/// not embed sources, the entry's text is inlined and every other source is
/// left `null` for the browser to fetch.
pub fn repair(
    map: &SourceMap,
    source_root: &str,
    entry: Option<(&str, &str)>,
) -> Result<SourceMap, oxc_sourcemap::Error> {
    let mut json = map.to_json();
    json.source_root = Some(source_root.to_string());

    let embedded = json
        .sources_content
        .as_ref()
        .is_some_and(|contents| contents.iter().any(Option::is_some));
    if !embedded {
        json.sources_content = Some(
            json.sources
                .iter()
                .map(|source| match entry {
                    Some((id, text)) if id == source => Some(text.to_string()),
                    _ => None,
                })
                .collect(),
        );
    }

    SourceMap::from_json(json)
}

/// Append `map` to `source` as an inline base64 `sourceMappingURL` comment.
pub fn inline(source: &mut String, map: &SourceMap) {
    if !source.is_empty() && !source.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(INLINE_PREFIX);
    source.push_str(&STANDARD.encode(map.to_json_string()));
    source.push('\n');
}

/// Serde adapter carrying an optional [`SourceMap`] as its JSON object.
pub(crate) mod json {
    use oxc_sourcemap::SourceMap;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(map: &Option<SourceMap>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match map {
            Some(map) => serde_json::from_str::<serde_json::Value>(&map.to_json_string())
                .map_err(S::Error::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SourceMap>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<serde_json::Value>::deserialize(deserializer)? {
            Some(value) => SourceMap::from_json_string(&value.to_string())
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(sources: &[&str]) -> SourceMap {
        let raw = json!({
            "version": 3,
            "file": "lib/a.js",
            "sources": sources,
            "names": [],
            "mappings": ";AAAA",
        });
        SourceMap::from_json_string(&raw.to_string()).unwrap()
    }

    fn decode_inline(source: &str) -> serde_json::Value {
        let encoded = source
            .lines()
            .last()
            .unwrap()
            .strip_prefix(INLINE_PREFIX)
            .unwrap();
        serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_repair_backfills_entry_only() {
        let m = repair(
            &map(&["lib/b.js", "lib/a.js"]),
            "/app",
            Some(("lib/a.js", "module.exports = 1;")),
        )
        .unwrap();

        let json = m.to_json();
        assert_eq!(json.source_root.as_deref(), Some("/app"));
        assert_eq!(
            json.sources_content,
            Some(vec![None, Some("module.exports = 1;".to_string())])
        );
        assert_eq!(json.mappings, ";AAAA");
    }

    #[test]
    fn test_repair_keeps_existing_contents() {
        let raw = json!({
            "version": 3,
            "sources": ["lib/a.js"],
            "sourcesContent": ["original"],
            "names": [],
            "mappings": "AAAA",
        });
        let m = SourceMap::from_json_string(&raw.to_string()).unwrap();

        let json = repair(&m, "/", Some(("lib/a.js", "other"))).unwrap().to_json();
        assert_eq!(json.source_root.as_deref(), Some("/"));
        assert_eq!(json.sources_content, Some(vec![Some("original".to_string())]));
    }

    #[test]
    fn test_inline_appends_decodable_comment() {
        let m = repair(&map(&["lib/a.js"]), "/", None).unwrap();
        let mut source = "console.log(1);".to_string();
        inline(&mut source, &m);

        assert!(source.starts_with("console.log(1);\n//# sourceMappingURL="));
        assert!(source.ends_with('\n'));

        let decoded = decode_inline(&source);
        assert_eq!(decoded["version"], 3);
        assert_eq!(decoded["sourceRoot"], "/");
        assert_eq!(decoded["sources"][0], "lib/a.js");
        assert_eq!(decoded["mappings"], ";AAAA");
    }
}
