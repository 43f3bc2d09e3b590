//! Pattern translation shared by the query compilers
//!
//! Glob syntax: `*` matches any run of characters, `?` exactly one.

/// Escape character used in every LIKE pattern we emit
pub(crate) const LIKE_ESCAPE: char = '\\';

/// Escape LIKE metacharacters so `text` matches literally
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// `%text%` with `text` lowercased and escaped
pub(crate) fn contains_like(text: &str) -> String {
    format!("%{}%", escape_like(&text.to_lowercase()))
}

/// Translate a glob into a LIKE pattern (`*` -> `%`, `?` -> `_`)
pub(crate) fn glob_to_like(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for c in glob.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | LIKE_ESCAPE => {
                out.push(LIKE_ESCAPE);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Translate a glob into an anchored regular expression (`^...$`)
pub(crate) fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 2);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}
