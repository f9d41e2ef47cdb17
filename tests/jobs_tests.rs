mod common;

use axum::http::{StatusCode, header};
use common::{TestApp, create_test_app};
use serde_json::{Value, json};

/// Post a job as a fresh user and approve it as staff. Returns the created job.
async fn approved_job(app: &TestApp, title: &str, company: &str, location: &str) -> Value {
    let poster = app.login_or_create("poster@example.com").await;
    let created = app
        .post(
            "/api/jobs",
            json!({
                "title": title,
                "company_name": company,
                "location": location,
                "url": "https://careers.example.com/apply",
            }),
            Some(&poster),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);

    let staff = app.login_or_create_staff().await;
    let id = created.body["id"].as_str().unwrap();
    let approved = app
        .request(
            "PATCH",
            &format!("/api/admin/jobs/{}", id),
            Some(json!({ "is_approved": true })),
            Some(&staff),
        )
        .await;
    assert_eq!(approved.status, StatusCode::OK);
    approved.body
}

trait JobHelpers {
    async fn login_or_create(&self, email: &str) -> String;
    async fn login_or_create_staff(&self) -> String;
}

impl JobHelpers for TestApp {
    async fn login_or_create(&self, email: &str) -> String {
        if self.db.users().get_by_email(email).await.unwrap().is_none() {
            self.confirmed_user("Poster", email).await;
        }
        self.login(email).await
    }

    async fn login_or_create_staff(&self) -> String {
        let email = "recruiter@example.com";
        if self.db.users().get_by_email(email).await.unwrap().is_none() {
            let id = self.confirmed_user("Rita", email).await;
            self.grant_roles(&id, &["recruiter"]).await;
        }
        self.login(email).await
    }
}

fn search(fields: Value) -> Value {
    json!({
        "page": 1,
        "pageSize": 10,
        "sort": "created_at",
        "isAscending": true,
        "filters": [{ "operator": "and", "fields": fields }],
    })
}

// --- Posting ---

#[tokio::test]
async fn test_post_job_requires_auth() {
    let app = create_test_app().await;

    let response = app
        .post(
            "/api/jobs",
            json!({ "title": "Rust Developer", "company_name": "Acme" }),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_posted_job_awaits_approval() {
    let app = create_test_app().await;
    let token = app.login_or_create("poster@example.com").await;

    let created = app
        .post(
            "/api/jobs",
            json!({ "title": "Rust Developer", "company_name": "Acme" }),
            Some(&token),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["is_approved"], false);
    assert_eq!(created.body["provider"], "vagasprajr");

    let code = created.body["code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(
        created.body["short_url"],
        format!("http://localhost:3000/go/{}", code)
    );

    let hidden = app.get(&format!("/api/jobs/{}", code), None).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_job_validates_input() {
    let app = create_test_app().await;
    let token = app.login_or_create("poster@example.com").await;

    let missing_title = app
        .post(
            "/api/jobs",
            json!({ "title": "  ", "company_name": "Acme" }),
            Some(&token),
        )
        .await;
    assert_eq!(missing_title.status, StatusCode::BAD_REQUEST);

    let bad_url = app
        .post(
            "/api/jobs",
            json!({ "title": "Dev", "company_name": "Acme", "url": "not a url" }),
            Some(&token),
        )
        .await;
    assert_eq!(bad_url.status, StatusCode::BAD_REQUEST);

    for url in [
        "javascript:alert(document.cookie)",
        "data:text/html,hi",
        "ftp://files.example.com",
    ] {
        let response = app
            .post(
                "/api/jobs",
                json!({ "title": "Dev", "company_name": "Acme", "url": url }),
                Some(&token),
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", url);
    }
}

#[tokio::test]
async fn test_moderation_requires_staff() {
    let app = create_test_app().await;
    let token = app.login_or_create("poster@example.com").await;

    let response = app
        .post("/api/admin/jobs/search", search(json!([])), Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["code"], "unauthorized");
}

// --- Public listing ---

#[tokio::test]
async fn test_public_job_lookup_and_url() {
    let app = create_test_app().await;
    let job = approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    let code = job["code"].as_str().unwrap();

    let found = app.get(&format!("/api/jobs/{}", code), None).await;
    assert_eq!(found.status, StatusCode::OK);
    assert_eq!(found.body["title"], "Rust Developer");

    let url = app.get(&format!("/api/jobs/{}/url", code), None).await;
    assert_eq!(url.body["url"], "https://careers.example.com/apply");

    let fallback = app.get("/api/jobs/zzzzzz/url", None).await;
    assert_eq!(fallback.body["url"], "http://localhost:3000/vagas/zzzzzz");
}

#[tokio::test]
async fn test_search_filters_public_jobs() {
    let app = create_test_app().await;
    approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    approved_job(&app, "Go Developer", "Globex", "Recife").await;
    approved_job(&app, "Rust Intern", "Initech", "Recife").await;

    // Unapproved postings never show up
    let token = app.login_or_create("poster@example.com").await;
    app.post(
        "/api/jobs",
        json!({ "title": "Rust Lead", "company_name": "Hidden" }),
        Some(&token),
    )
    .await;

    let rust = app
        .post(
            "/api/jobs/search",
            search(json!([{ "name": "title", "value": "rust", "type": "text" }])),
            None,
        )
        .await;
    assert_eq!(rust.status, StatusCode::OK);
    assert_eq!(rust.body["total"], 2);

    let either = app
        .post(
            "/api/jobs/search",
            json!({
                "page": 1,
                "pageSize": 10,
                "filters": [{
                    "operator": "or",
                    "fields": [
                        { "name": "company_name", "value": "globex", "type": "text" },
                        { "name": "company_name", "value": "initech", "type": "text" },
                    ],
                }],
            }),
            None,
        )
        .await;
    assert_eq!(either.body["total"], 2);

    let listed = app
        .post(
            "/api/jobs/search",
            search(json!([{
                "name": "location",
                "value": "Recife, Remoto",
                "type": "array_string",
            }])),
            None,
        )
        .await;
    assert_eq!(listed.body["total"], 3);

    // Unknown fields contribute nothing
    let unknown = app
        .post(
            "/api/jobs/search",
            search(json!([{ "name": "password_hash", "value": "x", "type": "text" }])),
            None,
        )
        .await;
    assert_eq!(unknown.body["total"], 3);
}

#[tokio::test]
async fn test_search_paginates() {
    let app = create_test_app().await;
    for n in 0..3 {
        approved_job(&app, &format!("Job {}", n), "Acme", "Remoto").await;
    }

    let page = app
        .post(
            "/api/jobs/search",
            json!({ "page": 2, "pageSize": 2, "sort": "title", "isAscending": true }),
            None,
        )
        .await;
    assert_eq!(page.body["total"], 3);
    assert_eq!(page.body["page"], 2);
    let data = page.body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["title"], "Job 2");
}

#[tokio::test]
async fn test_filter_options() {
    let app = create_test_app().await;
    approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    approved_job(&app, "Go Developer", "Globex", "Recife").await;

    let options = app.get("/api/jobs/filter-options", None).await;
    assert_eq!(options.status, StatusCode::OK);
    assert_eq!(options.body["companies"], json!(["Acme", "Globex"]));
    assert_eq!(options.body["locations"], json!(["Recife", "Remoto"]));
}

// --- Short links ---

#[tokio::test]
async fn test_job_redirect_counts_clicks() {
    let app = create_test_app().await;
    let job = approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    let code = job["code"].as_str().unwrap();

    let response = app.get(&format!("/go/{}", code), None).await;
    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers.get(header::LOCATION).unwrap(),
        "https://careers.example.com/apply"
    );

    let id = job["id"].as_str().unwrap();
    let stored = app.db.jobs().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.qty_clicks, 1);
}

#[tokio::test]
async fn test_job_redirect_unknown_code() {
    let app = create_test_app().await;

    assert_eq!(app.get("/go/abc123", None).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        app.get("/go/not-a-code", None).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_closed_job_is_hidden() {
    let app = create_test_app().await;
    let job = approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    let code = job["code"].as_str().unwrap();
    let staff = app.login_or_create_staff().await;

    let closed = app
        .request(
            "PATCH",
            &format!("/api/admin/jobs/{}", job["id"].as_str().unwrap()),
            Some(json!({ "is_closed": true })),
            Some(&staff),
        )
        .await;
    assert_eq!(closed.body["is_approved"], true);
    assert_eq!(closed.body["is_closed"], true);

    assert_eq!(
        app.get(&format!("/api/jobs/{}", code), None).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get(&format!("/go/{}", code), None).await.status,
        StatusCode::NOT_FOUND
    );
}

// --- Bookmarks ---

#[tokio::test]
async fn test_bookmarks() {
    let app = create_test_app().await;
    let job = approved_job(&app, "Rust Developer", "Acme", "Remoto").await;
    let id = job["id"].as_str().unwrap();
    let token = app.login_or_create("reader@example.com").await;

    let added = app
        .request(
            "POST",
            &format!("/api/users/me/bookmarks/{}", id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(added.status, StatusCode::OK);
    assert_eq!(added.body["bookmarked_jobs"], json!([id]));

    // Adding twice keeps one entry
    app.request(
        "POST",
        &format!("/api/users/me/bookmarks/{}", id),
        None,
        Some(&token),
    )
    .await;
    let listed = app.get("/api/users/me/bookmarks", Some(&token)).await;
    assert_eq!(listed.body["bookmarked_jobs"], json!([id]));

    let removed = app
        .request(
            "DELETE",
            &format!("/api/users/me/bookmarks/{}", id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(removed.body["bookmarked_jobs"], json!([]));

    let unknown = app
        .request("POST", "/api/users/me/bookmarks/missing", None, Some(&token))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}
