use serde_json::{Map, Value};

use crate::wrapper::SENTINEL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// No sentinel: `main` never returned.
    RuntimeError,
    /// The segment after the sentinel is not a single JSON line.
    Serialization(String),
    /// The result is not an object, or is the epilogue's `{"error": ...}` marker.
    InvalidResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResult {
    Success {
        stdout: String,
        value: Map<String, Value>,
    },
    Failure {
        kind: FailureKind,
        stdout: String,
    },
}

/// Recover the script's own output and its return value from captured stdout.
pub fn decode(stdout_bytes: &[u8]) -> DecodedResult {
    let text = String::from_utf8_lossy(stdout_bytes);
    let Some((stdout, tail)) = split_at_sentinel(&text) else {
        return DecodedResult::Failure {
            kind: FailureKind::RuntimeError,
            stdout: text.into_owned(),
        };
    };
    let stdout = stdout.to_string();

    let line = tail.trim_end();
    if line.contains('\n') {
        return DecodedResult::Failure {
            kind: FailureKind::Serialization(format!(
                "expected a single result line, found {}",
                line.lines().count()
            )),
            stdout,
        };
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(value)) if !value.contains_key("error") => {
            DecodedResult::Success { stdout, value }
        }
        Ok(_) => DecodedResult::Failure {
            kind: FailureKind::InvalidResult,
            stdout,
        },
        Err(err) => DecodedResult::Failure {
            kind: FailureKind::Serialization(err.to_string()),
            stdout,
        },
    }
}

// Splits around the first sentinel followed by a newline. It need not start a
// line: unterminated script output comes right before it.
fn split_at_sentinel(text: &str) -> Option<(&str, &str)> {
    let marker = format!("{SENTINEL}\n");
    let start = text.find(&marker)?;
    Some((&text[..start], &text[start + marker.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(stdout: &str, result: &str) -> Vec<u8> {
        format!("{stdout}{SENTINEL}\n{result}\n").into_bytes()
    }

    #[test]
    fn decodes_object_result() {
        let decoded = decode(&output("", r#"{"a": 1}"#));
        let DecodedResult::Success { stdout, value } = decoded else {
            panic!("expected success");
        };
        assert_eq!(stdout, "");
        assert_eq!(Value::Object(value), json!({"a": 1}));
    }

    #[test]
    fn keeps_script_output_verbatim() {
        let decoded = decode(&output("  hi\n\nthere\n", "{}"));
        assert_eq!(
            decoded,
            DecodedResult::Success {
                stdout: "  hi\n\nthere\n".to_string(),
                value: Map::new(),
            }
        );
    }

    #[test]
    fn first_sentinel_wins() {
        let raw = format!("{SENTINEL}\n{{\"x\": 1}}\n{SENTINEL}\n{{}}\n");
        let decoded = decode(raw.as_bytes());
        assert!(matches!(
            decoded,
            DecodedResult::Failure {
                kind: FailureKind::Serialization(_),
                ..
            }
        ));
    }

    #[test]
    fn sentinel_after_unterminated_output() {
        let raw = format!("hi{SENTINEL}\n{{}}\n");
        assert_eq!(
            decode(raw.as_bytes()),
            DecodedResult::Success {
                stdout: "hi".to_string(),
                value: Map::new(),
            }
        );
    }

    #[test]
    fn sentinel_without_newline_is_not_a_marker() {
        let raw = format!("done {SENTINEL}");
        assert_eq!(
            decode(raw.as_bytes()),
            DecodedResult::Failure {
                kind: FailureKind::RuntimeError,
                stdout: raw,
            }
        );
    }

    #[test]
    fn missing_sentinel_is_runtime_error() {
        let decoded = decode(b"partial output\n");
        assert_eq!(
            decoded,
            DecodedResult::Failure {
                kind: FailureKind::RuntimeError,
                stdout: "partial output\n".to_string(),
            }
        );
    }

    #[test]
    fn non_object_results_are_invalid() {
        for result in [r#""Hello""#, "[1, 2]", "42", "null"] {
            let decoded = decode(&output("out\n", result));
            assert_eq!(
                decoded,
                DecodedResult::Failure {
                    kind: FailureKind::InvalidResult,
                    stdout: "out\n".to_string(),
                },
                "{result}"
            );
        }
    }

    #[test]
    fn error_marker_is_invalid() {
        let decoded = decode(&output(
            "",
            r#"{"error": "Error serializing result: Object of type function is not JSON serializable"}"#,
        ));
        assert!(matches!(
            decoded,
            DecodedResult::Failure {
                kind: FailureKind::InvalidResult,
                ..
            }
        ));
    }

    #[test]
    fn unparseable_result_is_serialization_error() {
        let decoded = decode(&output("", "{not json"));
        assert!(matches!(
            decoded,
            DecodedResult::Failure {
                kind: FailureKind::Serialization(_),
                ..
            }
        ));
    }

    #[test]
    fn non_string_keys_arrive_as_strings() {
        let decoded = decode(&output("", r#"{"square_dict": {"0": 0, "1": 1, "2": 4}}"#));
        let DecodedResult::Success { value, .. } = decoded else {
            panic!("expected success");
        };
        assert_eq!(value["square_dict"], json!({"0": 0, "1": 1, "2": 4}));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut raw = b"caf\xff\n".to_vec();
        raw.extend_from_slice(&output("", "{}"));
        let DecodedResult::Success { stdout, .. } = decode(&raw) else {
            panic!("expected success");
        };
        assert_eq!(stdout, "caf\u{fffd}\n");
    }
}
