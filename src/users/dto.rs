use serde::Deserialize;

use crate::store::Role;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Pagination {
    pub const MAX_LIMIT: i64 = 100;

    /// (limit, offset) clamped to sane bounds.
    pub fn bounds(&self) -> (i64, i64) {
        (self.limit.clamp(1, Self::MAX_LIMIT), self.offset.max(0))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!(p.bounds(), (20, 0));
        let p = Pagination {
            limit: 10_000,
            offset: -5,
        };
        assert_eq!(p.bounds(), (100, 0));
        let p = Pagination { limit: 0, offset: 3 };
        assert_eq!(p.bounds(), (1, 3));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let res: Result<CreateUserRequest, _> = serde_json::from_str(
            r#"{"username":"x","email":"x@y.z","password":"pw123456","name":"X","role":"root"}"#,
        );
        assert!(res.is_err());
    }
}
