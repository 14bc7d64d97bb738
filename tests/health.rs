#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use primrose::config::AppConfig;
use primrose::rate_limit::{InMemoryRateLimiter, ManualClock};
use primrose::repo::inmem::InMemRepo;
use primrose::secrets::{SecretKind, SecretResolver};
use primrose::startup::{self, PrepareOptions};
use primrose::{config, configure, AppState, InternalAccess};
use std::sync::Arc;
use std::time::Duration;

async fn state(health_token: Option<&str>, limiter: InMemoryRateLimiter) -> AppState {
    let mut cfg = AppConfig::default().with_secret(SecretKind::JwtSecret, "health-test-secret-32-bytes-long!!!");
    if let Some(t) = health_token {
        cfg = cfg.with_secret(SecretKind::HealthToken, t);
    }
    let dir = tempfile::tempdir().unwrap();
    let resolver = SecretResolver::new(dir.path())
        .with_overrides(cfg.secret_overrides.clone())
        .with_env(Arc::new(|_| None));
    let opts = PrepareOptions { bcrypt_cost: 4, limiter };
    startup::prepare(&cfg, &resolver, Arc::new(InMemRepo::new()), opts).await.unwrap()
}

fn probe(client: &str) -> test::TestRequest {
    test::TestRequest::get().uri("/health").insert_header(("X-Forwarded-For", client.to_string()))
}

#[actix_web::test]
async fn ten_admitted_then_throttled() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(None, InMemoryRateLimiter::new()).await)).configure(config),
    ).await;
    for i in 0..10 {
        let resp = test::call_service(&app, probe("198.51.100.1").to_request()).await;
        assert_eq!(resp.status(), 200, "request {i}");
        let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
    }
    let resp = test::call_service(&app, probe("198.51.100.1").to_request()).await;
    assert_eq!(resp.status(), 429);
    assert_eq!(resp.headers().get("retry-after").unwrap(), "60");

    // other clients keep their own budget
    let resp = test::call_service(&app, probe("198.51.100.2").to_request()).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn window_resets_after_it_elapses() {
    let clock = Arc::new(ManualClock::new());
    let limiter = InMemoryRateLimiter::with_clock(clock.clone());
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(None, limiter).await)).configure(config),
    ).await;
    for _ in 0..10 {
        assert_eq!(test::call_service(&app, probe("203.0.113.5").to_request()).await.status(), 200);
    }
    assert_eq!(test::call_service(&app, probe("203.0.113.5").to_request()).await.status(), 429);

    clock.advance(Duration::from_secs(61));
    for _ in 0..10 {
        assert_eq!(test::call_service(&app, probe("203.0.113.5").to_request()).await.status(), 200);
    }
    assert_eq!(test::call_service(&app, probe("203.0.113.5").to_request()).await.status(), 429);
}

#[actix_web::test]
async fn unidentifiable_clients_share_one_bucket() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(None, InMemoryRateLimiter::new()).await)).configure(config),
    ).await;
    for _ in 0..10 {
        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
}

#[actix_web::test]
async fn configured_token_is_required() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(Some("probe-token"), InMemoryRateLimiter::new()).await)).configure(config),
    ).await;
    let resp = test::call_service(&app, probe("192.0.2.1").to_request()).await;
    assert_eq!(resp.status(), 403);

    let req = probe("192.0.2.1").insert_header(("X-Health-Token", "nope")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = probe("192.0.2.1").insert_header(("X-Health-Token", "probe-token")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn internal_probe_refuses_remote_without_allow_list() {
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(None, InMemoryRateLimiter::new()).await)).configure(config),
    ).await;
    let req = test::TestRequest::get()
        .uri("/health/internal")
        .peer_addr("10.20.30.40:5000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get()
        .uri("/health/internal")
        .peer_addr("127.0.0.1:5000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn internal_probe_admits_listed_address() {
    let allow = InternalAccess::new(vec!["10.20.30.40".parse().unwrap()]);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(None, InMemoryRateLimiter::new()).await))
            .configure(move |c| configure(c, allow)),
    ).await;
    let req = test::TestRequest::get()
        .uri("/health/internal")
        .peer_addr("10.20.30.40:5000".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["status"], "ok");

    // forwarding headers do not count
    let req = test::TestRequest::get()
        .uri("/health/internal")
        .insert_header(("X-Forwarded-For", "10.20.30.40"))
        .peer_addr("10.20.30.41:5000".parse().unwrap())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}
