//! Watch filter normalization and glob matching.
//!
//! # Filter language
//!
//! Filters are `/` separated relative paths after normalization, `\` is converted on all platforms.
//! `*` matches a run of non-separator characters, `**` matches across separators with `**/` meaning
//! any number of directories including zero, `?` matches a single character. A trailing separator
//! selects the directory and all descendants recursively and `*.*` is a synonym for `*`. Matching
//! is case-insensitive ordinal.
//!
//! Absolute filters and filters that escape the watched root through `..` segments are rejected,
//! watchers answer them with the no-op token.

use std::path::Path;

/// Normalize a watch filter.
///
/// Converts `\` to `/` and trims any leading `./` segments. Returns `None` for filters that
/// cannot address anything under a root: empty, absolute or escaping through `..`.
pub(crate) fn normalize_filter(filter: &str) -> Option<String> {
    let mut filter = filter.replace('\\', "/");
    while let Some(f) = filter.strip_prefix("./") {
        filter = f.to_owned();
    }

    if filter.is_empty() || is_absolute(&filter) || navigates_above_root(&filter) {
        return None;
    }
    Some(filter)
}

fn is_absolute(filter: &str) -> bool {
    if filter.starts_with('/') {
        return true;
    }
    // windows style drive or UNC prefix
    let mut chars = filter.chars();
    matches!((chars.next(), chars.next()), (Some(c), Some(':')) if c.is_ascii_alphabetic())
}

fn navigates_above_root(filter: &str) -> bool {
    let mut depth = 0i32;
    for segment in filter.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}

/// If the normalized filter routes to the wildcard registry.
///
/// A filter is a pattern when it contains `*` or selects a whole directory with a trailing
/// separator. Everything else is an exact path entry.
pub(crate) fn is_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.ends_with('/')
}

/// Convert an event path relative to the root into the `/` separated match form.
pub(crate) fn normalize_event_path(relative: &Path) -> String {
    let s = relative.to_string_lossy();
    if s.contains('\\') { s.replace('\\', "/") } else { s.into_owned() }
}

/// Case folding used for exact-path registry keys.
pub(crate) fn fold_case(path: &str) -> String {
    path.to_lowercase()
}

/// Compiled glob matcher over normalized relative paths.
///
/// Thin boundary over the [`glob`](https://docs.rs/glob) crate, applying the filter language
/// rewrites before compilation.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: glob::Pattern,
}
impl PathMatcher {
    /// Compile a normalized filter.
    ///
    /// A trailing separator is expanded to select all descendants and `*.*` segments are
    /// rewritten to `*`.
    pub fn compile(filter: &str) -> Result<Self, glob::PatternError> {
        let mut pattern = String::with_capacity(filter.len() + 4);
        for (i, segment) in filter.split('/').enumerate() {
            if i > 0 {
                pattern.push('/');
            }
            pattern.push_str(if segment == "*.*" { "*" } else { segment });
        }
        if pattern.ends_with('/') {
            pattern.push_str("**/*");
        }

        Ok(PathMatcher {
            pattern: glob::Pattern::new(&pattern)?,
        })
    }

    /// Test a `/` separated relative path.
    pub fn matches(&self, relative_path: &str) -> bool {
        const OPTIONS: glob::MatchOptions = glob::MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.pattern.matches_with(relative_path, OPTIONS)
    }

    /// The compiled pattern string.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}
