#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use primrose::auth::issue_token;
use primrose::config::AppConfig;
use primrose::models::Page;
use primrose::otp;
use primrose::repo::inmem::InMemRepo;
use primrose::repo::PageRepo;
use primrose::secrets::{SecretKind, SecretResolver};
use primrose::startup::{self, PrepareOptions};
use primrose::{config, AppState};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const JWT: &str = "pages-test-secret-must-be-32-bytes!!";
const SHARED: &str = "JBSWY3DPEHPK3PXP";

async fn state(shared: Option<&str>, repo: InMemRepo) -> AppState {
    let mut cfg = AppConfig::default().with_secret(SecretKind::JwtSecret, JWT);
    if let Some(s) = shared {
        cfg = cfg.with_secret(SecretKind::SharedSecret, s);
    }
    let dir = tempfile::tempdir().unwrap();
    let resolver = SecretResolver::new(dir.path())
        .with_overrides(cfg.secret_overrides.clone())
        .with_env(Arc::new(|_| None));
    let opts = PrepareOptions { bcrypt_cost: 4, ..Default::default() };
    startup::prepare(&cfg, &resolver, Arc::new(repo), opts).await.unwrap()
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn code_at(t: u64) -> String {
    otp::generate_at(&otp::decode_secret(SHARED).unwrap(), t)
}

fn bearer() -> String {
    let t = issue_token("editor", false, "Editor", JWT, chrono::Duration::hours(1)).unwrap();
    format!("Bearer {t}")
}

async fn seeded_repo() -> InMemRepo {
    let repo = InMemRepo::new();
    repo.create_page(primrose::models::NewPage { description: "Home".into(), url: "https://example.org".into() })
        .await
        .unwrap();
    repo
}

#[actix_web::test]
async fn current_code_lists_pages() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(Some(SHARED), seeded_repo().await).await)).configure(config),
    ).await;
    let req = test::TestRequest::get().uri("/api/pages").insert_header(("X-App-Auth", code_at(now()))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let pages: Vec<Page> = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].description, "Home");
}

#[actix_web::test]
async fn bad_missing_or_non_numeric_code_is_401() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(Some(SHARED), seeded_repo().await).await)).configure(config),
    ).await;
    let req = test::TestRequest::get().uri("/api/pages").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
    let req = test::TestRequest::get().uri("/api/pages").insert_header(("X-App-Auth", "letmein")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn without_shared_secret_every_code_fails() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(None, seeded_repo().await).await)).configure(config),
    ).await;
    for code in ["000000", "123456", ""] {
        let req = test::TestRequest::get().uri("/api/pages").insert_header(("X-App-Auth", code)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }
}

#[actix_web::test]
async fn jwt_holders_manage_pages() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(Some(SHARED), InMemRepo::new()).await)).configure(config),
    ).await;

    let req = test::TestRequest::post()
        .uri("/api/pages")
        .set_json(&json!({"description":"Docs","url":"https://docs.example.org"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/pages")
        .insert_header(("Authorization", bearer()))
        .set_json(&json!({"description":"Docs","url":"https://docs.example.org"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Page = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // body id must agree with the path
    let req = test::TestRequest::put()
        .uri(&format!("/api/pages/{}", created.id))
        .insert_header(("Authorization", bearer()))
        .set_json(&json!({"id": created.id + 1, "description":"x","url":"y"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::put()
        .uri(&format!("/api/pages/{}", created.id))
        .insert_header(("Authorization", bearer()))
        .set_json(&json!({"id": created.id, "description":"Docs v2","url":"https://docs.example.org/v2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: Page = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(updated.description, "Docs v2");

    let req = test::TestRequest::put()
        .uri("/api/pages/999")
        .insert_header(("Authorization", bearer()))
        .set_json(&json!({"id": 999, "description":"x","url":"y"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri("/api/pages/admin").insert_header(("Authorization", bearer())).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let pages: Vec<Page> = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(pages, vec![updated]);
}
