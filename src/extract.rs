use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{AppError, FieldErrors};

/// JSON body extractor that rejects with [`AppError::Validation`] instead of
/// axum's plain-text rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!(error = %rejection, "request body rejected");
                Err(AppError::Validation(body_errors(&rejection)))
            }
        }
    }
}

/// Query string extractor with the same rejection shape as [`AppJson`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AppQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| {
                debug!(error = %rejection, "query string rejected");
                let message = detail(&rejection.body_text());
                AppError::Validation(FieldErrors::single("query", message))
            })
    }
}

/// Path parameter extractor with the same rejection shape as [`AppJson`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AppPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| Self(value))
            .map_err(|rejection| {
                debug!(error = %rejection, "path parameter rejected");
                AppError::Validation(FieldErrors::single("path", "Invalid path parameter"))
            })
    }
}

fn body_errors(rejection: &JsonRejection) -> FieldErrors {
    match rejection {
        JsonRejection::JsonDataError(e) => data_errors(&e.body_text()),
        JsonRejection::JsonSyntaxError(_) => {
            FieldErrors::single("body", "Request body is not valid JSON")
        }
        JsonRejection::MissingJsonContentType(_) => {
            FieldErrors::single("body", "Expected Content-Type: application/json")
        }
        other => FieldErrors::single("body", detail(&other.body_text())),
    }
}

/// serde names a missing field as "missing field `name`"; that message is
/// attributed to the field itself.
fn data_errors(text: &str) -> FieldErrors {
    let missing = text
        .split_once("missing field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| field)
        .filter(|field| !field.is_empty());
    match missing {
        Some(field) => FieldErrors::single(field.to_string(), "Field is required"),
        None => FieldErrors::single("body", detail(text)),
    }
}

/// Drops axum's "Failed to deserialize ..." prefix.
fn detail(text: &str) -> String {
    text.split_once(": ")
        .map_or(text, |(_, rest)| rest)
        .to_string()
}
