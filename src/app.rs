use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::views::Registry;
use crate::{auth, questions};

/// Registers every view class and wraps the result in the HTTP trace layer.
pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let mut registry = Registry::new();
    registry
        .register(questions::handlers::view())?
        .register(auth::handlers::view())?;

    Ok(registry
        .into_router()?
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        ))
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
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    struct Client {
        app: Router,
        state: AppState,
    }

    impl Client {
        async fn new() -> Self {
            let state = AppState::in_memory().await;
            let app = build_app(state.clone()).expect("views register");
            Self { app, state }
        }

        async fn send(&self, req: Request<Body>) -> Response {
            self.app.clone().oneshot(req).await.expect("infallible")
        }

        async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
            let mut req = Request::builder().uri(uri);
            if let Some(cookie) = cookie {
                req = req.header(header::COOKIE, cookie);
            }
            self.send(req.body(Body::empty()).unwrap()).await
        }

        async fn post(&self, uri: &str, form: &str, cookie: Option<&str>) -> Response {
            let mut req = Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(cookie) = cookie {
                req = req.header(header::COOKIE, cookie);
            }
            self.send(req.body(Body::from(form.to_string())).unwrap()).await
        }

        async fn register(&self, username: &str, password: &str) -> Response {
            let form = format!("username={username}&password={password}&password_={password}");
            self.post("/user/register/", &form, None).await
        }

        /// Logs in and returns the `name=value` session cookie.
        async fn login(&self, username: &str, password: &str) -> String {
            let form = format!("username={username}&password={password}");
            let res = self.post("/user/login/", &form, None).await;
            assert_eq!(res.status(), StatusCode::SEE_OTHER);
            let set_cookie = res
                .headers()
                .get(header::SET_COOKIE)
                .expect("session cookie set")
                .to_str()
                .unwrap();
            set_cookie.split(';').next().unwrap().to_string()
        }

        async fn count(&self, sql: &str) -> i64 {
            let (n,): (i64,) = sqlx::query_as(sql)
                .fetch_one(&self.state.db)
                .await
                .unwrap();
            n
        }
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(res: &Response) -> &str {
        res.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn question_answer_vote_scenario() {
        let client = Client::new().await;
        assert_eq!(client.register("alice", "pw1").await.status(), StatusCode::SEE_OTHER);
        assert_eq!(client.register("bob", "pw2").await.status(), StatusCode::SEE_OTHER);

        let alice = client.login("alice", "pw1").await;
        let res = client
            .post("/question/new", "title=Q1&content=body", Some(&alice))
            .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/");

        let index = json_body(client.get("/", Some(&alice)).await).await;
        assert_eq!(index["template"], "index.html");
        assert_eq!(index["context"]["current_user"], "alice");
        let question = &index["context"]["questions"][0];
        assert_eq!(question["title"], "Q1");
        assert_eq!(question["answers_count"], 0);
        let question_id = question["id"].as_i64().unwrap();
        let question_url = format!("/question/{question_id}");

        let bob = client.login("bob", "pw2").await;
        let res = client.post(&question_url, "content=A1", Some(&bob)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), question_url);

        let page = json_body(client.get(&question_url, Some(&alice)).await).await;
        let answer_id = page["context"]["answers"][0]["id"].as_i64().unwrap();

        let res = client
            .get(&format!("/answer/rate/{answer_id}?action=up"), Some(&alice))
            .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), question_url);

        let page = json_body(client.get(&question_url, Some(&alice)).await).await;
        let answers = page["context"]["answers"].as_array().unwrap();
        assert_eq!(page["template"], "question.html");
        assert_eq!(page["context"]["question"]["answers_count"], 1);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0]["content"], "A1");
        assert_eq!(answers[0]["author"], "bob");
        assert_eq!(answers[0]["rating"], 1);
        assert_eq!(answers[0]["voted"], true);
    }

    #[tokio::test]
    async fn taken_username_is_a_form_error() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;

        let res = client.register("alice", "other").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["template"], "register.html");
        assert_eq!(body["context"]["errors"]["username"][0], "Username already taken");
        assert_eq!(body["context"]["form"]["username"], "alice");
        assert!(body["context"]["form"].get("password").is_none());
        assert_eq!(client.count("SELECT COUNT(*) FROM users").await, 1);
    }

    #[tokio::test]
    async fn invalid_registration_rerenders_with_messages() {
        let client = Client::new().await;
        let res = client
            .post("/user/register/", "username=&password=a&password_=b", None)
            .await;
        let body = json_body(res).await;
        assert_eq!(body["context"]["errors"]["username"][0], "Username : this field is required");
        assert_eq!(body["context"]["errors"]["password_"][0], "Passwords do not match");
        assert_eq!(client.count("SELECT COUNT(*) FROM users").await, 0);
    }

    #[tokio::test]
    async fn wrong_password_does_not_log_in() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;

        let res = client.post("/user/login/", "username=alice&password=nope", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
        let body = json_body(res).await;
        assert_eq!(body["template"], "login.html");
        assert_eq!(body["context"]["errors"]["_form"][0], "Invalid username or password");
        assert_eq!(body["context"]["current_user"], Value::Null);
    }

    #[tokio::test]
    async fn passwords_are_stored_exactly_as_typed() {
        let client = Client::new().await;
        let res = client.register("alice", "%20pw1%20").await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);

        let res = client
            .post("/user/login/", "username=alice&password=pw1", None)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::SET_COOKIE).is_none());

        client.login("alice", "%20pw1%20").await;
    }

    #[tokio::test]
    async fn user_pages_live_under_the_view_base() {
        let client = Client::new().await;
        for uri in ["/user/register/", "/user/login/"] {
            assert_eq!(client.get(uri, None).await.status(), StatusCode::OK);
        }
        assert_eq!(client.get("/login/", None).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            client.get("/user/logout/", None).await.status(),
            StatusCode::SEE_OTHER
        );
    }

    #[tokio::test]
    async fn repeat_votes_are_ignored() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;
        let alice = client.login("alice", "pw1").await;
        client
            .post("/question/new", "title=Q1&content=body", Some(&alice))
            .await;
        client.post("/question/1", "content=A1", Some(&alice)).await;

        for action in ["up", "up", "down"] {
            let res = client
                .get(&format!("/answer/rate/1?action={action}"), Some(&alice))
                .await;
            assert_eq!(res.status(), StatusCode::SEE_OTHER);
        }

        assert_eq!(client.count("SELECT COUNT(*) FROM answer_ratings").await, 1);
        let page = json_body(client.get("/question/1", None).await).await;
        assert_eq!(page["context"]["answers"][0]["rating"], 1);
    }

    #[tokio::test]
    async fn anonymous_visitors_are_sent_to_login() {
        let client = Client::new().await;

        let res = client.get("/question/new", None).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/user/login/");

        let res = client.get("/answer/rate/1?action=up", None).await;
        assert_eq!(location(&res), "/user/login/");

        let res = client.post("/question/new", "title=Q&content=c", None).await;
        assert_eq!(location(&res), "/user/login/");
        assert_eq!(client.count("SELECT COUNT(*) FROM questions").await, 0);
    }

    #[tokio::test]
    async fn missing_records_degrade_gracefully() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;
        let alice = client.login("alice", "pw1").await;

        let page = json_body(client.get("/question/42", None).await).await;
        assert_eq!(page["context"]["question"], Value::Null);
        assert_eq!(page["context"]["answers"], serde_json::json!([]));

        let page = json_body(client.get("/question/abc", None).await).await;
        assert_eq!(page["context"]["question"], Value::Null);

        let res = client.get("/answer/rate/42?action=up", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/");
    }

    #[tokio::test]
    async fn anonymous_answers_are_not_stored() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;
        let alice = client.login("alice", "pw1").await;
        client
            .post("/question/new", "title=Q1&content=body", Some(&alice))
            .await;

        let res = client.post("/question/1", "content=A1", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(client.count("SELECT COUNT(*) FROM answers").await, 0);
    }

    #[tokio::test]
    async fn logout_expires_the_session_cookie() {
        let client = Client::new().await;
        client.register("alice", "pw1").await;
        let alice = client.login("alice", "pw1").await;

        let res = client.get("/user/logout/", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        let set_cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(set_cookie.starts_with("qaboard_session="));
        assert!(set_cookie.contains("Max-Age=0"));
    }
}
