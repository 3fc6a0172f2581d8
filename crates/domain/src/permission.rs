use serde::{Deserialize, Serialize};

/// Permission level, totally ordered: `Guest < User < Admin < Owner`.
///
/// A tool is visible to a user iff the user's level is at least the tool's
/// `required_permission`. Unknown strings parse to `Guest` (least privilege).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Guest,
    User,
    Admin,
    Owner,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Guest => "guest",
            PermissionLevel::User => "user",
            PermissionLevel::Admin => "admin",
            PermissionLevel::Owner => "owner",
        }
    }

    /// Parse a stored permission string. Anything unrecognized falls back
    /// to `Guest` rather than failing the request.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "user" => PermissionLevel::User,
            "admin" => PermissionLevel::Admin,
            "owner" => PermissionLevel::Owner,
            _ => PermissionLevel::Guest,
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        assert!(PermissionLevel::Guest < PermissionLevel::User);
        assert!(PermissionLevel::User < PermissionLevel::Admin);
        assert!(PermissionLevel::Admin < PermissionLevel::Owner);
    }

    #[test]
    fn unknown_parses_to_guest() {
        assert_eq!(PermissionLevel::parse_lenient("root"), PermissionLevel::Guest);
        assert_eq!(PermissionLevel::parse_lenient(""), PermissionLevel::Guest);
        assert_eq!(PermissionLevel::parse_lenient("owner"), PermissionLevel::Owner);
    }

    #[test]
    fn serde_roundtrip() {
        let json = serde_json::to_string(&PermissionLevel::Admin).unwrap();
        assert_eq!(json, r#""admin""#);
        let back: PermissionLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PermissionLevel::Admin);
    }
}
