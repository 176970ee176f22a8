//! Canonical cache keys for request descriptors.
//!
//! A key looks like `GET:/courses?subject=CS&term=202620#9f3a0c1d2e4b5a67`:
//! method and endpoint, then the non-null params in sorted, form-urlencoded
//! order, then a 64-bit body fingerprint when body combining is enabled.

use crate::dedup::descriptor::RequestDescriptor;
use serde_json::Value;
use std::sync::Arc;

/// Strategy for deriving a cache key from a descriptor.
///
/// Any `Fn(&RequestDescriptor) -> String` closure is a `KeyGenerator`.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, descriptor: &RequestDescriptor) -> String;
}

impl<F> KeyGenerator for F
where
    F: Fn(&RequestDescriptor) -> String + Send + Sync,
{
    fn generate(&self, descriptor: &RequestDescriptor) -> String {
        self(descriptor)
    }
}

pub type SharedKeyGenerator = Arc<dyn KeyGenerator>;

/// Build the canonical key for `descriptor`.
///
/// Descriptors that differ only in parameter insertion order, in `null`
/// parameters, or in an empty vs. absent parameter map produce the same key.
pub fn canonical_key(descriptor: &RequestDescriptor, combine_bodies: bool) -> String {
    let mut key = format!("{}:{}", descriptor.method, descriptor.endpoint);

    if let Some(query) = canonical_query(descriptor) {
        key.push('?');
        key.push_str(&query);
    }

    if combine_bodies
        && let Some(body) = descriptor.body.as_ref().filter(|b| !b.is_null())
    {
        key.push('#');
        key.push_str(&body_fingerprint(body));
    }

    key
}

/// Sorted `name=value` pairs, or `None` when no non-null parameter remains.
fn canonical_query(descriptor: &RequestDescriptor) -> Option<String> {
    // BTreeMap iteration is already sorted by name.
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (name, value) in &descriptor.params {
        let Some(value) = param_string(value) else {
            continue;
        };
        serializer.append_pair(name, &value);
        any = true;
    }
    any.then(|| serializer.finish())
}

/// Stable string form of a parameter value. `null` is excluded.
fn param_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Objects serialize with sorted keys, arrays keep their order.
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Hex-encoded 64-bit rapidhash of the body's compact JSON form.
pub fn body_fingerprint(body: &Value) -> String {
    let bytes = body.to_string();
    format!("{:016x}", rapidhash::v3::rapidhash_v3(bytes.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    fn key(descriptor: &RequestDescriptor) -> String {
        canonical_key(descriptor, true)
    }

    #[test]
    fn method_and_endpoint_only() {
        assert_eq!(key(&RequestDescriptor::get("/courses")), "GET:/courses");
        assert_eq!(key(&RequestDescriptor::post("/courses")), "POST:/courses");
    }

    #[test]
    fn param_order_does_not_matter() {
        let a = RequestDescriptor::get("/x").param("b", 1).param("a", 2);
        let b = RequestDescriptor::get("/x").param("a", 2).param("b", 1);
        assert_eq!(key(&a), key(&b));
        assert_eq!(key(&a), "GET:/x?a=2&b=1");
    }

    #[test]
    fn empty_params_match_absent_params() {
        let empty = RequestDescriptor::get("/x").params(Vec::<(String, Value)>::new());
        assert_eq!(key(&empty), key(&RequestDescriptor::get("/x")));
    }

    #[test]
    fn null_params_are_excluded() {
        let with_null = RequestDescriptor::get("/x")
            .param("a", 1)
            .param("gone", Value::Null);
        assert_eq!(key(&with_null), "GET:/x?a=1");

        let only_null = RequestDescriptor::get("/x").param("gone", Value::Null);
        assert_eq!(key(&only_null), "GET:/x");
    }

    #[test]
    fn value_coercion_is_stable() {
        let d = RequestDescriptor::get("/x")
            .param("flag", true)
            .param("n", 3.5)
            .param("s", "text");
        assert_eq!(key(&d), "GET:/x?flag=true&n=3.5&s=text");
    }

    #[test]
    fn separators_inside_values_do_not_alias() {
        let smuggled = RequestDescriptor::get("/x").param("a", "1&b=2");
        let split = RequestDescriptor::get("/x").param("a", "1").param("b", "2");
        assert_ne!(key(&smuggled), key(&split));
    }

    #[test]
    fn distinct_requests_get_distinct_keys() {
        let base = RequestDescriptor::get("/x").param("a", 1);
        assert_ne!(key(&base), key(&RequestDescriptor::get("/y").param("a", 1)));
        assert_ne!(
            key(&base),
            key(&RequestDescriptor::new(Method::DELETE, "/x").param("a", 1))
        );
        assert_ne!(key(&base), key(&RequestDescriptor::get("/x").param("a", 2)));
    }

    #[test]
    fn body_fingerprint_suffix() {
        let d = RequestDescriptor::post("/x").body(json!({"name": "a"}));
        let k = key(&d);
        let (prefix, hash) = k.split_once('#').unwrap();
        assert_eq!(prefix, "POST:/x");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn body_key_order_does_not_matter() {
        let a = RequestDescriptor::post("/x").body(json!({"a": 1, "b": [1, 2]}));
        let b = RequestDescriptor::post("/x").body(json!({"b": [1, 2], "a": 1}));
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn different_bodies_differ() {
        let a = RequestDescriptor::post("/x").body(json!({"name": "a"}));
        let b = RequestDescriptor::post("/x").body(json!({"name": "b"}));
        assert_ne!(key(&a), key(&b));
    }

    #[test]
    fn bodies_ignored_when_combining_disabled() {
        let a = RequestDescriptor::post("/x").body(json!({"name": "a"}));
        let b = RequestDescriptor::post("/x").body(json!({"name": "b"}));
        assert_eq!(canonical_key(&a, false), "POST:/x");
        assert_eq!(canonical_key(&a, false), canonical_key(&b, false));
    }

    #[test]
    fn null_body_is_absent() {
        let d = RequestDescriptor::post("/x").body(Value::Null);
        assert_eq!(key(&d), "POST:/x");
    }

    #[test]
    fn closures_are_key_generators() {
        let by_endpoint = |d: &RequestDescriptor| d.endpoint.clone();
        let generator: SharedKeyGenerator = Arc::new(by_endpoint);
        assert_eq!(
            generator.generate(&RequestDescriptor::get("/only-endpoint").param("a", 1)),
            "/only-endpoint"
        );
    }
}
