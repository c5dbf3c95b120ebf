use serde::{Deserialize, Serialize};

/// A missing email is treated like an unknown one.
#[derive(Debug, Deserialize)]
pub struct RequestResetRequest {
    #[serde(default)]
    pub email: String,
}

/// Same shape whether or not the email matched an account. `token` is only
/// filled in development.
#[derive(Debug, Serialize)]
pub struct RequestResetResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(alias = "new_password")]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
}
