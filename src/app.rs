use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, documents, state::AppState, vendors};

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::router())
        .merge(vendors::router())
        .merge(documents::router(&state.config.ingest))
        .route("/health", get(|| async { "ok" }));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::jwt::JwtKeys, testing::fakes};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn bearer(state: &AppState, user: Uuid) -> String {
        let token = JwtKeys::from(&state.config.jwt).sign_access(user).unwrap();
        format!("Bearer {token}")
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = build_app(AppState::fake());
        for uri in ["/api/v1/me", "/api/v1/vendors", "/api/v1/documents"] {
            let res = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let state = AppState::fake();
        let refresh = JwtKeys::from(&state.config.jwt)
            .sign_refresh(Uuid::new_v4())
            .unwrap();
        let res = build_app(state)
            .oneshot(
                Request::get("/api/v1/vendors")
                    .header(header::AUTHORIZATION, format!("Bearer {refresh}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn vendors_are_isolated_per_user_over_http() {
        let f = fakes();
        let app = build_app(f.state.clone());
        let alice = bearer(&f.state, Uuid::new_v4());
        let bob = bearer(&f.state, Uuid::new_v4());

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/vendors")
                    .header(header::AUTHORIZATION, &alice)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "name": "Acme Catering", "email": "sales@acme.io" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert!(res.headers().contains_key(header::LOCATION));
        let created = json_body(res).await;
        let id = created["id"].as_str().unwrap().to_string();

        let res = app
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/vendors/{id}"))
                    .header(header::AUTHORIZATION, &bob)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(
                Request::get("/api/v1/vendors")
                    .header(header::AUTHORIZATION, &alice)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let list = json_body(res).await;
        assert_eq!(list.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn invalid_vendor_reports_the_field() {
        let f = fakes();
        let app = build_app(f.state.clone());
        let res = app
            .oneshot(
                Request::post("/api/v1/vendors")
                    .header(header::AUTHORIZATION, bearer(&f.state, Uuid::new_v4()))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "name": "" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(res.status().is_client_error());
        let body = json_body(res).await;
        assert_eq!(body["field"], "name");
    }

    #[tokio::test]
    async fn upload_results_hide_internal_errors() {
        let f = fakes();
        let app = build_app(f.state.clone());
        f.documents.fail_next_insert();

        let boundary = "X-DOCVAULT-BOUNDARY";
        let part = |name: &str| {
            format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
                 Content-Type: text/plain\r\n\r\n\
                 quarterly supplier review notes\r\n"
            )
        };
        let body = format!("{}{}--{boundary}--\r\n", part("a.txt"), part("b.txt"));
        let res = app
            .oneshot(
                Request::post("/api/v1/documents")
                    .header(header::AUTHORIZATION, bearer(&f.state, Uuid::new_v4()))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let upload = json_body(res).await;
        assert_eq!(upload["uploaded"], 1);
        assert_eq!(upload["results"][0]["success"], false);
        assert_eq!(upload["results"][0]["error"], "Internal server error");
        assert!(!upload.to_string().contains("duplicate key"));
    }

    #[tokio::test]
    async fn multipart_upload_then_search() {
        let f = fakes();
        let app = build_app(f.state.clone());
        let owner = Uuid::new_v4();
        let auth = bearer(&f.state, owner);

        let boundary = "X-DOCVAULT-BOUNDARY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"terms.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             invoice payment terms net thirty days for the supplier\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"logo.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             not really a png\r\n\
             --{boundary}--\r\n"
        );
        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/documents")
                    .header(header::AUTHORIZATION, &auth)
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let upload = json_body(res).await;
        assert_eq!(upload["uploaded"], 1);
        assert_eq!(upload["failed"], 1);
        let id: Uuid = upload["results"][0]["document"]["id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        crate::testing::wait_until_settled(&f, owner, id).await;

        let res = app
            .oneshot(
                Request::post("/api/v1/documents/search")
                    .header(header::AUTHORIZATION, &auth)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "query": "supplier invoice" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let found = json_body(res).await;
        assert_eq!(found["total"], 1);
        assert_eq!(found["results"][0]["document_id"], id.to_string());
    }
}
