use serde::Deserialize;
use std::collections::HashMap;

/// Logical to physical name mapping for tables and columns.
///
/// The schema this tool writes to is shared with an authentication
/// module whose deployments rename columns freely, so every statement
/// resolves names through here. Unmapped names fall back to themselves.
/// Two logical fields may map to the same physical column; that is not
/// validated, matching the deployments this was written against.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameMap {
    #[serde(default)]
    tables: HashMap<String, String>,
    #[serde(default)]
    fields: HashMap<String, String>,
}

impl NameMap {
    pub fn table<'a>(&'a self, logical: &'a str) -> &'a str {
        self.tables.get(logical).map(String::as_str).unwrap_or(logical)
    }

    pub fn field<'a>(&'a self, logical: &'a str) -> &'a str {
        self.fields.get(logical).map(String::as_str).unwrap_or(logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_names_resolve_to_themselves() {
        let names = NameMap::default();
        assert_eq!(names.table("user"), "user");
        assert_eq!(names.field("lstchg"), "lstchg");
    }

    #[test]
    fn mapped_names_resolve_to_the_configured_value() {
        let names: NameMap = toml::from_str(
            r#"
            [tables]
            user = "accounts"
            [fields]
            username = "login"
            "#,
        )
        .unwrap();
        assert_eq!(names.table("user"), "accounts");
        assert_eq!(names.table("grouplist"), "grouplist");
        assert_eq!(names.field("username"), "login");
        assert_eq!(names.field("gid"), "gid");
    }
}
