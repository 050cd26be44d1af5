//! Custom Axum extractors.

use crate::middleware::{CORRELATION_ID_HEADER, CorrelationId};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Extracts the request's [`CorrelationId`].
///
/// Prefers the id stored by the correlation id middleware, then the raw
/// header, then a fresh id, so handlers also work in routers without the
/// layer.
///
/// # Example
///
/// ```ignore
/// async fn handler(correlation_id: CorrelationId) -> String {
///     format!("Request ID: {correlation_id}")
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(id.clone());
        }

        Ok(parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
            .unwrap_or_else(Self::generate))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_correlation_id_from_extensions() {
        let mut req = Request::builder().body(()).unwrap();
        let stored = CorrelationId::parse("from-middleware").unwrap();
        req.extensions_mut().insert(stored.clone());
        let (mut parts, ()) = req.into_parts();

        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, stored);
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, "from-header")
            .body(())
            .unwrap();
        let (mut parts, ()) = req.into_parts();

        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id.as_str(), "from-header");
    }

    #[tokio::test]
    async fn test_correlation_id_generates_new() {
        let req = Request::builder().body(()).unwrap();
        let (mut parts, ()) = req.into_parts();

        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }
}
