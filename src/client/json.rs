//! Response decoding that reports where in the body a mismatch happened.

use anyhow::Result;
use serde::de::DeserializeOwned;

/// Characters of context shown around the failing column.
const SNIPPET_CONTEXT: usize = 20;

/// Deserialize `body`, and on failure describe the JSON path, the type
/// mismatch and a snippet of the offending line.
pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let (line, column) = (inner.line(), inner.column());

        let message = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let message = message.strip_suffix(&location).unwrap_or(&message);

        let mut described = String::new();
        if !path.is_empty() && path != "." {
            described.push_str(&format!("at path '{path}': "));
        }
        described.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(message),
            snippet(body, line, column)
        ));
        anyhow::anyhow!(described)
    })
}

/// Turn `invalid type: null, expected a string` into `expected a string, got null`.
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {expected}, got {actual}");
    }
    message.to_string()
}

fn snippet(body: &str, line: usize, column: usize) -> String {
    let target: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or_default()
        .chars()
        .collect();
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    let error_idx = column.saturating_sub(1).min(target.len());
    let start = error_idx.saturating_sub(SNIPPET_CONTEXT / 2);
    let end = (error_idx + SNIPPET_CONTEXT / 2).min(target.len());
    let slice: String = target[start..end].iter().collect();
    let marker = " ".repeat(error_idx - start) + "^";

    format!("...{slice}...\n   {marker}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Debug, Deserialize)]
    struct Section {
        title: String,
        seats: u32,
    }

    #[allow(dead_code)]
    #[derive(Debug, Deserialize)]
    struct Listing {
        sections: Vec<Section>,
    }

    #[test]
    fn decodes_valid_body() {
        let listing: Listing =
            decode_body(r#"{"sections": [{"title": "Algorithms", "seats": 30}]}"#).unwrap();
        assert_eq!(listing.sections.len(), 1);
    }

    #[test]
    fn mismatch_names_path_and_types() {
        let err = decode_body::<Listing>(r#"{"sections": [{"title": null, "seats": 30}]}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("sections[0].title"), "{err}");
        assert!(err.contains("expected a string, got null"), "{err}");
        assert!(err.contains('^'), "{err}");
    }

    #[test]
    fn syntax_error_keeps_message() {
        let err = decode_body::<Listing>("{not json").unwrap_err().to_string();
        assert!(err.contains("line 1"), "{err}");
    }

    #[test]
    fn snippet_handles_multibyte_text() {
        let text = snippet("{\"título\": \"Introducción\", \"x\": null}", 1, 30);
        assert!(text.contains('^'));
    }
}
