//! Static rule table consulted by the script validator.
//!
//! A [`RuleSet`] is built once at startup and shared read-only between
//! request handlers, so adding or removing a rule never touches control flow.

use regex::Regex;
use std::collections::HashSet;

/// Modules a script may import.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "os",
    "pandas",
    "numpy",
    "json",
    "sys",
    "math",
    "random",
    "datetime",
    "collections",
    "itertools",
    "functools",
    "time",
];

/// Bare names that are rejected as an imported module or symbol.
pub const DEFAULT_DANGEROUS_NAMES: &[&str] =
    &["system", "popen", "spawn", "fork", "kill", "exec", "eval"];

/// `(description, regex)` pairs, checked in order against the whole script.
const DEFAULT_DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("dynamic import", r"__import__\s*\("),
    ("dynamic evaluation", r"eval\s*\("),
    ("dynamic execution", r"exec\s*\("),
    ("shell command", r"os\.system\s*\("),
    ("subprocess access", r"subprocess\s*\."),
    ("file open", r"open\s*\("),
    ("file open", r"file\s*\("),
    ("attribute introspection", r"\.__dict__"),
    ("class introspection", r"\.__class__"),
    ("class introspection", r"\.__bases__"),
    ("class introspection", r"\.__subclasses__"),
    ("globals introspection", r"\.__globals__"),
    ("builtins introspection", r"\.__builtins__"),
    ("socket connect", r"\.connect\s*\("),
    ("socket bind", r"\.bind\s*\("),
    ("socket listen", r"\.listen\s*\("),
    ("socket accept", r"\.accept\s*\("),
    ("socket send", r"\.send\s*\("),
    ("socket receive", r"\.recv\s*\("),
    ("socket send", r"\.sendto\s*\("),
    ("socket receive", r"\.recvfrom\s*\("),
    ("address resolution", r"\.getaddrinfo\s*\("),
    ("address resolution", r"\.gethostbyname\s*\("),
    ("address resolution", r"\.gethostbyaddr\s*\("),
    ("service resolution", r"\.getservbyname\s*\("),
    ("service resolution", r"\.getservbyport\s*\("),
    ("socket creation", r"\.socket\s*\("),
];

/// A compiled deny-list entry.
#[derive(Debug, Clone)]
pub struct DangerousPattern {
    description: String,
    regex: Regex,
}

impl DangerousPattern {
    pub fn new(description: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            description: description.into(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    allowed_modules: HashSet<String>,
    dangerous_names: HashSet<String>,
    dangerous_patterns: Vec<DangerousPattern>,
}

impl RuleSet {
    pub fn new<A, N>(
        allowed_modules: A,
        dangerous_names: N,
        dangerous_patterns: Vec<DangerousPattern>,
    ) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            allowed_modules: allowed_modules.into_iter().map(Into::into).collect(),
            dangerous_names: dangerous_names.into_iter().map(Into::into).collect(),
            dangerous_patterns,
        }
    }

    /// The rule table the service ships with.
    pub fn standard() -> Result<Self, regex::Error> {
        let patterns = DEFAULT_DANGEROUS_PATTERNS
            .iter()
            .map(|(description, pattern)| DangerousPattern::new(*description, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            DEFAULT_ALLOWED_MODULES.iter().copied(),
            DEFAULT_DANGEROUS_NAMES.iter().copied(),
            patterns,
        ))
    }

    /// Extend the allow-list. Names on the deny-list stay rejected regardless.
    pub fn with_allowed_modules<I>(mut self, modules: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.allowed_modules
            .extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.allowed_modules.contains(module)
    }

    pub fn is_dangerous_name(&self, name: &str) -> bool {
        self.dangerous_names.contains(name)
    }

    /// First deny-list entry, in table order, that matches anywhere in `text`.
    pub fn first_dangerous_pattern(&self, text: &str) -> Option<&DangerousPattern> {
        self.dangerous_patterns
            .iter()
            .find(|pattern| pattern.is_match(text))
    }

    pub fn allowed_module_count(&self) -> usize {
        self.allowed_modules.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.dangerous_patterns.len()
    }
}
