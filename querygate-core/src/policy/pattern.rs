//! Case-insensitive wildcard patterns for table names.

/// A compiled wildcard pattern.
///
/// Supports:
/// - `*` matches any sequence of characters
/// - `?` matches any single character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    raw: String,
    chars: Vec<char>,
    qualified: bool,
}

impl WildcardPattern {
    /// Compiles a pattern; matching ignores case and double quotes.
    pub fn new(pattern: &str) -> Self {
        let raw = normalize_name(pattern);
        Self {
            chars: raw.chars().collect(),
            qualified: raw.contains('.'),
            raw,
        }
    }

    /// The normalized pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a table reference.
    ///
    /// A schema-qualified pattern is compared with the qualified name. An
    /// unqualified reference may resolve to any schema in `search_path`, so
    /// it matches when `<schema>.<name>` matches for one of them. Otherwise
    /// the bare table name is compared.
    pub fn matches_table(&self, full_name: &str, bare_name: &str, search_path: &[String]) -> bool {
        if !self.qualified {
            return self.matches(bare_name);
        }
        if full_name.contains('.') {
            return self.matches(full_name);
        }
        search_path
            .iter()
            .any(|schema| self.matches(&format!("{}.{}", schema, bare_name)))
    }

    /// Matches already-normalized text.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        glob_match(&self.chars, &text)
    }
}

/// Lower-cases a SQL name and strips identifier quoting.
pub fn normalize_name(name: &str) -> String {
    name.trim().replace('"', "").to_lowercase()
}

/// Iterative star matcher; runs in `O(pattern * text)` worst case.
///
/// On a mismatch after a `*`, only the most recent star is retried one
/// character further along, so earlier stars never need revisiting.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    // Position after the last star seen, and the text position it is tried at
    let mut resume: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                pi = pi.saturating_add(1);
                resume = Some((pi, ti));
            }
            Some(c) if *c == '?' || *c == text[ti] => {
                pi = pi.saturating_add(1);
                ti = ti.saturating_add(1);
            }
            _ => match resume {
                Some((star_pi, star_ti)) => {
                    let next_ti = star_ti.saturating_add(1);
                    resume = Some((star_pi, next_ti));
                    pi = star_pi;
                    ti = next_ti;
                }
                None => return false,
            },
        }
    }

    // Trailing stars match the empty remainder
    pattern[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question_mark() {
        let pattern = WildcardPattern::new("audit_*");
        assert!(pattern.matches("audit_logs"));
        assert!(pattern.matches("audit_"));
        assert!(!pattern.matches("audits"));

        let pattern = WildcardPattern::new("tmp_?");
        assert!(pattern.matches("tmp_1"));
        assert!(!pattern.matches("tmp_12"));

        assert!(WildcardPattern::new("**secret**").matches("my_secret_table"));
        assert!(WildcardPattern::new("*").matches(""));
    }

    #[test]
    fn test_many_stars_match_quickly() {
        let pattern = WildcardPattern::new("*a*a*a*a*a*a*a*b");
        let name = "a".repeat(40);
        let started = std::time::Instant::now();
        assert!(!pattern.matches(&name));
        assert!(pattern.matches(&format!("{}b", name)));
        assert!(started.elapsed() < std::time::Duration::from_millis(100));

        assert!(WildcardPattern::new("a*b*c").matches("axxbyyc"));
        assert!(!WildcardPattern::new("a*b*c").matches("axxbyy"));
        assert!(WildcardPattern::new("*_log?").matches("audit_logs"));
        assert!(!WildcardPattern::new("?").matches(""));
    }

    fn public() -> Vec<String> {
        vec!["public".to_string()]
    }

    #[test]
    fn test_case_and_quotes_are_ignored() {
        let pattern = WildcardPattern::new("\"Audit_*\"");
        assert_eq!(pattern.as_str(), "audit_*");
        assert!(pattern.matches_table("audit_logs", "audit_logs", &public()));
    }

    #[test]
    fn test_qualified_patterns() {
        let pattern = WildcardPattern::new("internal.*");
        assert!(pattern.matches_table("internal.users", "users", &public()));
        assert!(!pattern.matches_table("public.users", "users", &public()));
        assert!(!pattern.matches_table("users", "users", &public()));

        let pattern = WildcardPattern::new("public.payments");
        assert!(pattern.matches_table("payments", "payments", &public()));
    }

    #[test]
    fn test_unqualified_names_follow_search_path() {
        let search_path = vec!["internal".to_string(), "public".to_string()];
        let pattern = WildcardPattern::new("internal.*");
        assert!(pattern.matches_table("secrets", "secrets", &search_path));
        assert!(!pattern.matches_table("public.secrets", "secrets", &search_path));
    }

    #[test]
    fn test_bare_patterns_ignore_schema() {
        let pattern = WildcardPattern::new("payroll");
        assert!(pattern.matches_table("hr.payroll", "payroll", &public()));
        assert!(!pattern.matches_table("hr.payroll_summary", "payroll_summary", &public()));
    }
}
