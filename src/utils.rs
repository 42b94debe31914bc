/// Plain, unquoted SQL identifier: ASCII letter or underscore first, then
/// letters, digits or underscores, at most 63 bytes (the Postgres limit).
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["import", "production_meter", "_tmp", "wh_del2"] {
            assert!(is_sql_identifier(name), "{}", name);
        }
    }

    #[test]
    fn rejects_anything_needing_quotes() {
        for name in ["", "2fast", "wh-del", "end at", "x\"; drop", "ümlaut", &"a".repeat(64)] {
            assert!(!is_sql_identifier(name), "{}", name);
        }
    }
}
