//! API documentation endpoints.
//!
//! Each service ships a static OpenAPI description. `/api-docs` renders it
//! with Swagger UI (loaded from a CDN) and `/api-docs/openapi.yaml` serves
//! the raw document.

use axum::{
    Router,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
};

/// Path of the raw OpenAPI document.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.yaml";

/// Swagger UI page pointing at [`OPENAPI_PATH`].
#[must_use]
pub fn swagger_page(title: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>{title}</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js" crossorigin></script>
  <script>
    window.onload = () => {{
      window.ui = SwaggerUIBundle({{ url: "{OPENAPI_PATH}", dom_id: "#swagger-ui" }});
    }};
  </script>
</body>
</html>
"##
    )
}

/// Router serving `/api-docs` and [`OPENAPI_PATH`].
pub fn docs_router(title: &'static str, openapi_yaml: &'static str) -> Router {
    let page = swagger_page(title);
    Router::new()
        .route("/api-docs", get(move || async move { Html(page) }))
        .route(
            OPENAPI_PATH,
            get(move || async move {
                ([(header::CONTENT_TYPE, "application/yaml")], openapi_yaml).into_response()
            }),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    const DOC: &str = "openapi: 3.0.0\ninfo:\n  title: Test\n  version: 1.0.0\n";

    #[tokio::test]
    async fn test_serves_raw_document() {
        let response = docs_router("Test API", DOC)
            .oneshot(Request::builder().uri(OPENAPI_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/yaml"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, DOC.as_bytes());
    }

    #[tokio::test]
    async fn test_serves_swagger_page() {
        let response = docs_router("Test API", DOC)
            .oneshot(Request::builder().uri("/api-docs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<title>Test API</title>"));
        assert!(html.contains(OPENAPI_PATH));
        assert!(html.contains(r##"dom_id: "#swagger-ui""##));
        assert!(html.trim_end().ends_with("</html>"));
    }
}
