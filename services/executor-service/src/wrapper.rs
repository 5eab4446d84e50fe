use uuid::Uuid;

/// Line printed between the script's own output and its encoded result.
pub const SENTINEL: &str = "--------------------------------";

// Binds the names scripts may use without importing them, runs `main()` once,
// then prints the sentinel followed by exactly one JSON line.
const EPILOGUE: &str = r#"if __name__ == "__main__":
    import json
    import sys
    import os
    try:
        import pandas
    except ImportError:
        pass
    try:
        import numpy
    except ImportError:
        pass
    import json as _sandrun_json
    _sandrun_result = main()
    print("--------------------------------")
    try:
        print(_sandrun_json.dumps(_sandrun_result))
    except Exception as _sandrun_err:
        print(_sandrun_json.dumps({"error": f"Error serializing result: {_sandrun_err}"}))
"#;

/// A validated script ready to be written to its scratch file.
#[derive(Debug, Clone)]
pub struct ExecutionPayload {
    pub id: Uuid,
    pub text: String,
}

impl ExecutionPayload {
    /// Append the epilogue to a script that already passed validation.
    pub fn wrap(validated_source: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: format!("{}\n\n{EPILOGUE}", validated_source.trim_end()),
        }
    }

    /// Use `text` verbatim, without the epilogue.
    #[cfg(test)]
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epilogue_prints_the_sentinel() {
        assert!(EPILOGUE.contains(&format!("print(\"{SENTINEL}\")")));
        assert_eq!(SENTINEL.len(), 32);
    }

    #[test]
    fn wrap_appends_epilogue_after_trimmed_source() {
        let payload = ExecutionPayload::wrap("def main():\n    return {}\n\n   \n");
        assert!(payload
            .text
            .starts_with("def main():\n    return {}\n\nif __name__ == \"__main__\":\n"));
        assert!(payload.text.ends_with(EPILOGUE));
        assert_eq!(payload.text.matches("main()").count(), 2);
    }

    #[test]
    fn epilogue_preloads_modules_before_main() {
        let call = EPILOGUE.find("main()").unwrap();
        for module in ["json", "sys", "os", "pandas", "numpy"] {
            let import = EPILOGUE.find(&format!("import {module}\n")).unwrap();
            assert!(import < call, "{module} imported after main()");
        }
    }

    #[test]
    fn payload_ids_are_unique() {
        let first = ExecutionPayload::wrap("def main():\n    return {}");
        let second = ExecutionPayload::wrap("def main():\n    return {}");
        assert_ne!(first.id, second.id);
    }
}
