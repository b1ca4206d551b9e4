//! Dot-path utilities used to name leaf positions inside a tree.
//!
//! A dot-path joins object keys and array indices with `.`, e.g.
//! `stats.totalUsers` or `rows.3.email`. The root of a tree is the empty
//! path `""`.
//!
//! Components are escaped the same way RFC 6901 pointers escape `/`:
//! - `~` becomes `~0`
//! - `.` becomes `~1`
//! - the empty key becomes `~2` (otherwise `""` would be the root)

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("dot path has an empty component at position {0}")]
    EmptyComponent(usize),
    #[error("dot path has a dangling escape in component {0:?}")]
    DanglingEscape(String),
}

const EMPTY_KEY: &str = "~2";

/// Unescapes one dot-path component.
pub fn unescape_component(component: &str) -> Result<String, PathError> {
    if component == EMPTY_KEY {
        return Ok(String::new());
    }
    if !component.contains('~') {
        return Ok(component.to_string());
    }
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('.'),
            _ => return Err(PathError::DanglingEscape(component.to_string())),
        }
    }
    Ok(out)
}

/// Escapes one dot-path component.
pub fn escape_component(component: &str) -> String {
    if component.is_empty() {
        return EMPTY_KEY.to_string();
    }
    if !component.contains('.') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('.', "~1")
}

/// Parse a dot-path into unescaped components.
///
/// Examples:
/// - `"" -> []`
/// - `"a.b" -> ["a", "b"]`
/// - `"a~1b.~0k.0" -> ["a.b", "~k", "0"]`
/// - `"~2.x" -> ["", "x"]`
pub fn parse_dot_path(path: &str) -> Result<Vec<String>, PathError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split('.')
        .enumerate()
        .map(|(pos, raw)| {
            if raw.is_empty() {
                Err(PathError::EmptyComponent(pos))
            } else {
                unescape_component(raw)
            }
        })
        .collect()
}

/// Format unescaped components into a dot-path.
pub fn format_dot_path<S: AsRef<str>>(components: &[S]) -> String {
    let mut out = String::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&escape_component(component.as_ref()));
    }
    out
}

/// Append one unescaped component to an already formatted path.
pub fn join(parent: &str, component: &str) -> String {
    let escaped = escape_component(component);
    if parent.is_empty() {
        return escaped;
    }
    let mut out = String::with_capacity(parent.len() + 1 + escaped.len());
    out.push_str(parent);
    out.push('.');
    out.push_str(&escaped);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_matrix() {
        assert_eq!(parse_dot_path("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_dot_path("a").unwrap(), vec!["a".to_string()]);
        assert_eq!(
            parse_dot_path("a~1b.~0k.1").unwrap(),
            vec!["a.b".to_string(), "~k".to_string(), "1".to_string()]
        );
        assert_eq!(format_dot_path(&["a.b", "~k", "1"]), "a~1b.~0k.1");
        assert_eq!(format_dot_path::<&str>(&[]), "");
    }

    #[test]
    fn empty_key_has_its_own_escape() {
        assert_eq!(escape_component(""), "~2");
        assert_eq!(parse_dot_path("~2.x").unwrap(), vec!["", "x"]);
        assert_eq!(format_dot_path(&["", "x"]), "~2.x");
        assert_eq!(escape_component("~2"), "~02");
        assert_eq!(parse_dot_path("~02").unwrap(), vec!["~2"]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse_dot_path("a..b"), Err(PathError::EmptyComponent(1)));
        assert_eq!(parse_dot_path(".a"), Err(PathError::EmptyComponent(0)));
        assert_eq!(
            parse_dot_path("a~"),
            Err(PathError::DanglingEscape("a~".to_string()))
        );
        assert!(parse_dot_path("a~9").is_err());
    }

    #[test]
    fn join_escapes_component() {
        assert_eq!(join("", "stats"), "stats");
        assert_eq!(join("stats", "totalUsers"), "stats.totalUsers");
        assert_eq!(join("rows", "a.b"), "rows.a~1b");
    }
}
