//! Gitignore-style path exclusion on top of `globset`.
//!
//! Supported syntax, matched against `/`-separated paths relative to the
//! source root:
//! - `name` without a slash matches at any depth (`**/name`)
//! - a leading `/` or an inner `/` anchors the pattern to the root
//! - a trailing `/` matches directories only (everything beneath them)
//! - `!pattern` re-includes; the last matching line wins
//! - `#` starts a comment line; `\#` and `\!` escape a literal first char
//!
//! In case of doubt about globs, consult <https://docs.rs/globset/latest/globset/#syntax>

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::ScanError;

#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    set: GlobSet,
    /// Rule index for every glob in `set`.
    rule_of_glob: Vec<usize>,
    /// Whether each rule is a `!` negation.
    negated: Vec<bool>,
}

impl IgnoreMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ScanError> {
        let mut builder = GlobSetBuilder::new();
        let mut rule_of_glob = Vec::new();
        let mut negated = Vec::new();

        for raw in patterns {
            let Some(rule) = Rule::parse(raw.as_ref()) else {
                continue;
            };
            let rule_idx = negated.len();
            negated.push(rule.negated);

            for glob in rule.globs() {
                let compiled = GlobBuilder::new(&glob)
                    .literal_separator(true)
                    .backslash_escape(true)
                    .build()
                    .map_err(|source| ScanError::InvalidPattern {
                        pattern: raw.as_ref().to_string(),
                        source,
                    })?;
                builder.add(compiled);
                rule_of_glob.push(rule_idx);
            }
        }

        let set = builder.build().map_err(|source| ScanError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join("\n"),
            source,
        })?;

        Ok(Self {
            set,
            rule_of_glob,
            negated,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.negated.is_empty()
    }

    /// `relative` must be relative to the source root.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        if self.is_empty() {
            return false;
        }
        let normalized = normalize(relative);
        self.set
            .matches(normalized.as_str())
            .into_iter()
            .map(|glob_idx| self.rule_of_glob[glob_idx])
            .max()
            .map(|rule_idx| !self.negated[rule_idx])
            .unwrap_or(false)
    }
}

struct Rule {
    body: String,
    negated: bool,
    anchored: bool,
    dir_only: bool,
}

impl Rule {
    fn parse(line: &str) -> Option<Self> {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut negated = false;
        if let Some(rest) = line.strip_prefix('!') {
            negated = true;
            line = rest;
        } else if let Some(rest) = line.strip_prefix('\\') {
            if rest.starts_with('!') || rest.starts_with('#') {
                line = rest;
            }
        }

        let dir_only = line.ends_with('/');
        let line = line.trim_end_matches('/');
        let anchored = line.contains('/');
        let body = line.trim_start_matches('/').to_string();
        if body.is_empty() {
            return None;
        }

        Some(Self {
            body,
            negated,
            anchored,
            dir_only,
        })
    }

    fn globs(&self) -> Vec<String> {
        let base = if self.anchored || self.body.starts_with("**/") {
            self.body.clone()
        } else {
            format!("**/{}", self.body)
        };
        if base.ends_with("/**") {
            return vec![base];
        }
        let contents = format!("{base}/**");
        if self.dir_only {
            vec![contents]
        } else {
            vec![base, contents]
        }
    }
}

fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
