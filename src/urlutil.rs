//! URL construction with query-object expansion.

use crate::base::error::FetchError;
use serde_json::Value;
use url::{form_urlencoded, Url};

/// Build a URL from a base and an optional query object.
///
/// Query values may be strings, numbers, or booleans; arrays of those
/// expand to repeated keys in declared order. Values are encoded per
/// `application/x-www-form-urlencoded` (space becomes `+`, non-ASCII is
/// UTF-8 percent-encoded). With no (or an empty) query object the parsed
/// base is returned unchanged, which makes the function idempotent.
pub fn create_url(base_url: &str, query: Option<&Value>) -> Result<String, FetchError> {
    let url = Url::parse(base_url)?;

    let Some(query) = query else {
        return Ok(url.into());
    };
    let Value::Object(map) = query else {
        return Err(FetchError::invalid("query must be an object of scalars or scalar arrays"));
    };
    if map.is_empty() {
        return Ok(url.into());
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &scalar_value(key, item)?);
                }
            }
            scalar => {
                serializer.append_pair(key, &scalar_value(key, scalar)?);
            }
        }
    }
    let encoded = serializer.finish();

    let mut out = String::from(url);
    out.push(if out.contains('?') { '&' } else { '?' });
    out.push_str(&encoded);
    Ok(out)
}

fn scalar_value(key: &str, value: &Value) -> Result<String, FetchError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(FetchError::invalid(format!(
            "query value for {key:?} must be a scalar, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_numbers_and_arrays() {
        let url = create_url(
            "https://h/json",
            Some(&json!({
                "helix": 42,
                "dummy": true,
                "name": "André Citroën",
                "rumple": "stiltskin",
                "nephews": ["Huey", "Louie", "Dewey"],
            })),
        )
        .unwrap();
        assert_eq!(
            url,
            "https://h/json?helix=42&dummy=true&name=Andr%C3%A9+Citro%C3%ABn&rumple=stiltskin&nephews=Huey&nephews=Louie&nephews=Dewey"
        );
    }

    #[test]
    fn test_idempotent_without_query() {
        let once = create_url("https://example.com/path", None).unwrap();
        let twice = create_url(&once, None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_query_appends_nothing() {
        let url = create_url("https://h/p", Some(&json!({}))).unwrap();
        assert_eq!(url, "https://h/p");
    }

    #[test]
    fn test_appends_to_existing_query() {
        let url = create_url("https://h/p?a=1", Some(&json!({"b": 2}))).unwrap();
        assert_eq!(url, "https://h/p?a=1&b=2");
    }

    #[test]
    fn test_space_becomes_plus() {
        let url = create_url("https://h/p", Some(&json!({"q": "a b"}))).unwrap();
        assert_eq!(url, "https://h/p?q=a+b");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            create_url("::not-a-url::", None),
            Err(FetchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_query_values() {
        assert!(create_url("https://h/", Some(&json!(["a"]))).is_err());
        assert!(create_url("https://h/", Some(&json!({"k": {"nested": 1}}))).is_err());
        assert!(create_url("https://h/", Some(&json!({"k": null}))).is_err());
        assert!(create_url("https://h/", Some(&json!({"k": [["nested"]]}))).is_err());
    }
}
