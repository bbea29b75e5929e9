use regex::Regex;
use tracing::warn;

enum Matcher {
    /// Exact name with `*` spanning any run of characters.
    Glob(Regex),
    /// `regex:`-prefixed pattern, full-string match.
    Regex(Regex),
    /// Fallback when a `regex:` pattern fails to compile.
    Literal(String),
}

impl Matcher {
    fn compile(pattern: &str) -> Self {
        if let Some(expr) = pattern.strip_prefix("regex:") {
            match Regex::new(&format!("^(?:{expr})$")) {
                Ok(re) => return Matcher::Regex(re),
                Err(err) => {
                    warn!(pattern, error = %err, "invalid regex protection pattern; matching literally");
                    return Matcher::Literal(expr.to_string());
                }
            }
        }
        let escaped = regex::escape(pattern).replace(r"\*", ".*");
        match Regex::new(&format!("^(?:{escaped})$")) {
            Ok(re) => Matcher::Glob(re),
            Err(_) => Matcher::Literal(pattern.to_string()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Glob(re) | Matcher::Regex(re) => re.is_match(name),
            Matcher::Literal(literal) => literal == name,
        }
    }
}

/// Branch protection set: patterns guard branches from deletion, excludes
/// subtract from the guarded set. Patterns compile once at construction.
pub struct BranchProtection {
    patterns: Vec<Matcher>,
    excludes: Vec<Matcher>,
}

impl BranchProtection {
    pub fn new(patterns: &[String], excludes: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| Matcher::compile(p)).collect(),
            excludes: excludes.iter().map(|p| Matcher::compile(p)).collect(),
        }
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.patterns.iter().any(|m| m.matches(name))
            && !self.excludes.iter().any(|m| m.matches(name))
    }
}
