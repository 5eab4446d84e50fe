//! Pre-execution script validator.
//!
//! This is a fast textual reject layer, not the security boundary: the
//! external sandbox process provides the actual isolation. Matching is purely
//! lexical, so a script that assembles a forbidden name at runtime (string
//! concatenation, `getattr` lookups, a second module in `import a, b`) passes
//! here and must be contained by the sandbox.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::rules::RuleSet;

// `import m` and `import m as alias`.
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\n)\s*import\s+(\w+)").expect("static regex is valid"));
static IMPORT_AS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\n)\s*import\s+(\w+)\s+as\s+\w+").expect("static regex is valid")
});
// `from m[.sub] import name` and `from m[.sub] import name as alias`.
static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\n)\s*from\s+(\w+)(?:\.\w+)*\s+import\s+(\w+)").expect("static regex is valid")
});
static FROM_IMPORT_AS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\n)\s*from\s+(\w+)(?:\.\w+)*\s+import\s+(\w+)\s+as\s+\w+")
        .expect("static regex is valid")
});

static ENTRY_POINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^def\s+main\s*\(").expect("static regex is valid"));

/// Why a script was rejected. The display text is what callers see; the
/// payload names the offending module or rule for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Potentially dangerous import detected")]
    DisallowedImport(String),
    #[error("Potentially dangerous operation detected")]
    DisallowedPattern(String),
}

impl Violation {
    pub fn detail(&self) -> &str {
        match self {
            Violation::DisallowedImport(module) => module,
            Violation::DisallowedPattern(description) => description,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ImportStatement<'a> {
    module: &'a str,
    symbol: Option<&'a str>,
}

/// True when the script defines a top-level `main` function.
pub fn has_entry_point(source: &str) -> bool {
    ENTRY_POINT_RE.is_match(source)
}

/// Check `source` against `rules`. Every import is checked before any
/// operation pattern, so a script that trips both reports the import.
pub fn validate(rules: &RuleSet, source: &str) -> Result<(), Violation> {
    for statement in import_statements(source) {
        check_import(rules, &statement)?;
    }

    if let Some(pattern) = rules.first_dangerous_pattern(source) {
        return Err(Violation::DisallowedPattern(
            pattern.description().to_string(),
        ));
    }

    Ok(())
}

fn check_import(rules: &RuleSet, statement: &ImportStatement<'_>) -> Result<(), Violation> {
    let module = statement.module;
    if !rules.is_module_allowed(module) || rules.is_dangerous_name(module) {
        return Err(Violation::DisallowedImport(module.to_string()));
    }
    if let Some(symbol) = statement.symbol {
        if rules.is_dangerous_name(symbol) {
            return Err(Violation::DisallowedImport(format!("{module}.{symbol}")));
        }
    }
    Ok(())
}

fn import_statements(source: &str) -> Vec<ImportStatement<'_>> {
    let mut statements = Vec::new();
    for regex in [&*IMPORT_RE, &*IMPORT_AS_RE] {
        statements.extend(regex.captures_iter(source).filter_map(|captures| {
            Some(ImportStatement {
                module: captures.get(1)?.as_str(),
                symbol: None,
            })
        }));
    }
    for regex in [&*FROM_IMPORT_RE, &*FROM_IMPORT_AS_RE] {
        statements.extend(regex.captures_iter(source).filter_map(|captures| {
            Some(ImportStatement {
                module: captures.get(1)?.as_str(),
                symbol: captures.get(2).map(|symbol| symbol.as_str()),
            })
        }));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::standard().unwrap()
    }

    fn script_with(line: &str) -> String {
        format!("\n{line}\ndef main():\n    return {{\"status\": \"success\"}}\n")
    }

    #[test]
    fn accepts_plain_script() {
        assert!(validate(&rules(), "def main():\n    return {'a': 1}").is_ok());
    }

    #[test]
    fn accepts_allowed_imports() {
        let source = "import pandas as pd\nimport numpy as np\nfrom datetime import datetime, timedelta\nimport os.path\nfrom collections.abc import Mapping\n\ndef main():\n    import time\n    return {}\n";
        assert_eq!(validate(&rules(), source), Ok(()));
    }

    #[test]
    fn rejects_forbidden_imports() {
        for line in [
            "import subprocess",
            "import socket",
            "import multiprocessing",
            "from os import system",
            "import builtins",
            "import socket as s",
            "from socket import create_connection",
            "from os.path import popen as p",
        ] {
            let err = validate(&rules(), &script_with(line)).unwrap_err();
            assert!(
                matches!(err, Violation::DisallowedImport(_)),
                "{line} -> {err:?}"
            );
            assert_eq!(err.to_string(), "Potentially dangerous import detected");
        }
    }

    #[test]
    fn dangerous_symbol_names_the_module() {
        let err = validate(&rules(), &script_with("from os import fork")).unwrap_err();
        assert_eq!(err, Violation::DisallowedImport("os.fork".to_string()));
        assert_eq!(err.detail(), "os.fork");
    }

    #[test]
    fn only_first_path_segment_is_checked() {
        assert!(validate(&rules(), &script_with("import json.decoder")).is_ok());
        let err = validate(&rules(), &script_with("import xml.json")).unwrap_err();
        assert_eq!(err, Violation::DisallowedImport("xml".to_string()));
    }

    #[test]
    fn rejects_dangerous_operations() {
        for operation in [
            "__import__('os')",
            "eval('2+2')",
            "exec('print(1)')",
            "os.system('ls')",
            "subprocess.run(['ls'])",
            "open('/etc/passwd')",
            "().__class__.__bases__",
            "().__class__.__subclasses__()",
            "().__dict__",
            "().__globals__",
            "s = os.socket()",
            "sock.recvfrom(1024)",
            "socket.gethostbyname('example.com')",
        ] {
            let source = format!("def main():\n    {operation}\n    return {{}}\n");
            let err = validate(&rules(), &source).unwrap_err();
            assert!(
                matches!(err, Violation::DisallowedPattern(_)),
                "{operation} -> {err:?}"
            );
            assert_eq!(err.to_string(), "Potentially dangerous operation detected");
        }
    }

    #[test]
    fn imports_are_reported_before_operations() {
        let source = "def main():\n    eval('1')\n    return {}\nimport socket\n";
        let err = validate(&rules(), source).unwrap_err();
        assert_eq!(err, Violation::DisallowedImport("socket".to_string()));
    }

    #[test]
    fn patterns_scan_whole_text() {
        // Not an import line and not inside main: still rejected.
        let source = "x = open  ('f')\ndef main():\n    return {}\n";
        let err = validate(&rules(), source).unwrap_err();
        assert_eq!(err, Violation::DisallowedPattern("file open".to_string()));
    }

    #[test]
    fn obfuscated_call_is_not_detected() {
        // Documented limitation: runtime string assembly evades textual checks.
        let source = "import os\ndef main():\n    f = getattr(os, 'sys' + 'tem')\n    return {}\n";
        assert!(validate(&rules(), source).is_ok());
    }

    #[test]
    fn import_statements_extracts_symbols() {
        let statements = import_statements("from os.path import join as j\nimport math");
        assert!(statements.contains(&ImportStatement {
            module: "math",
            symbol: None
        }));
        assert!(statements.contains(&ImportStatement {
            module: "os",
            symbol: Some("join")
        }));
    }

    #[test]
    fn entry_point_detection() {
        assert!(has_entry_point("def main():\n    return {}"));
        assert!(has_entry_point("import os\n\ndef main ( ):\n    pass"));
        assert!(!has_entry_point("print('Hello')"));
        assert!(!has_entry_point("def main_helper():\n    pass"));
        assert!(!has_entry_point("class A:\n    def main(self):\n        pass"));
    }
}
