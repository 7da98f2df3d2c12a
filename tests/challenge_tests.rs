// tests/challenge_tests.rs
//
// End-to-end lifecycle tests. They need a running Postgres (DATABASE_URL);
// when it is not set, each test prints a notice and passes vacuously.

use std::sync::Arc;

use questline_backend::{
    config::Config,
    notify::LogNotifier,
    routes,
    state::AppState,
    storage::LocalObjectStore,
    sweep,
    utils::auth::{ROLE_USER, sign_jwt},
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const TEST_SECRET: &str = "test_secret_for_integration_tests";

struct TestApp {
    address: String,
    pool: PgPool,
    state: AppState,
}

/// Spawns the app on a random port. Returns None (skip) without a database.
async fn spawn_app() -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL is not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let upload_dir = std::env::temp_dir().join(format!("questline-test-{}", uuid::Uuid::new_v4()));

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        sweep_interval_secs: 3600, // tests drive the sweep by hand
        upload_dir: upload_dir.to_string_lossy().into_owned(),
        public_base_url: "http://test.local".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
    };

    let state = AppState {
        pool: pool.clone(),
        config,
        storage: Arc::new(LocalObjectStore::new(&upload_dir, "http://test.local")),
        notifier: Arc::new(LogNotifier),
    };

    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp {
        address,
        pool,
        state,
    })
}

async fn seed_user(pool: &PgPool) -> i64 {
    let username = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..12]);
    sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
        .bind(username)
        .fetch_one(pool)
        .await
        .expect("Failed to seed user")
}

fn token_for(user_id: i64) -> String {
    sign_jwt(user_id, ROLE_USER, TEST_SECRET, 600).expect("Failed to sign test token")
}

async fn user_points(pool: &PgPool, user_id: i64) -> i64 {
    sqlx::query_scalar("SELECT points FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read user points")
}

/// Creates a challenge through the API and returns its JSON.
async fn create_challenge(
    app: &TestApp,
    client: &reqwest::Client,
    creator: i64,
    body: serde_json::Value,
) -> serde_json::Value {
    let response = client
        .post(format!("{}/api/challenges/create", app.address))
        .bearer_auth(token_for(creator))
        .json(&body)
        .send()
        .await
        .expect("create request failed");
    assert_eq!(response.status().as_u16(), 201, "challenge creation failed");
    response.json().await.expect("create response not json")
}

fn due_in_seconds(secs: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(secs)).to_rfc3339()
}

async fn join(app: &TestApp, client: &reqwest::Client, challenge_id: i64, user: i64) {
    let response = client
        .post(format!("{}/api/challenges/join/{}", app.address, challenge_id))
        .bearer_auth(token_for(user))
        .send()
        .await
        .expect("join request failed");
    assert_eq!(response.status().as_u16(), 200, "join failed");
}

async fn submit_progress(
    app: &TestApp,
    client: &reqwest::Client,
    challenge_id: i64,
    user: i64,
    completed: bool,
) -> reqwest::Response {
    client
        .post(format!(
            "{}/api/challenges/createprogress/{}",
            app.address, challenge_id
        ))
        .bearer_auth(token_for(user))
        .json(&serde_json::json!({ "completed": completed }))
        .send()
        .await
        .expect("submit request failed")
}

async fn vote(
    app: &TestApp,
    client: &reqwest::Client,
    challenge_id: i64,
    voter: i64,
    voted_for: i64,
) -> reqwest::Response {
    client
        .post(format!("{}/api/challenges/vote/{}", app.address, challenge_id))
        .bearer_auth(token_for(voter))
        .json(&serde_json::json!({ "voted_for_id": voted_for }))
        .send()
        .await
        .expect("vote request failed")
}

async fn get_detail(
    app: &TestApp,
    client: &reqwest::Client,
    challenge_id: i64,
) -> serde_json::Value {
    let response = client
        .get(format!("{}/api/challenges/get/{}", app.address, challenge_id))
        .send()
        .await
        .expect("get request failed");
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.expect("detail not json")
}

fn progress_of(detail: &serde_json::Value, user_id: i64) -> Option<serde_json::Value> {
    detail["user_progress"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["user_id"].as_i64() == Some(user_id))
        .cloned()
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/challenges/create", app.address))
        .json(&serde_json::json!({ "title": "t", "due_date": due_in_seconds(60) }))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn create_rejects_past_due_date() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;

    let response = client
        .post(format!("{}/api/challenges/create", app.address))
        .bearer_auth(token_for(creator))
        .json(&serde_json::json!({
            "title": "Read a book",
            "due_date": due_in_seconds(-60),
        }))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn update_rejects_past_due_date_and_keeps_stored_value() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Run 5k", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    let original_due = challenge["due_date"].clone();

    let response = client
        .put(format!("{}/api/challenges/update/{}", app.address, id))
        .bearer_auth(token_for(creator))
        .json(&serde_json::json!({ "due_date": due_in_seconds(-3600) }))
        .send()
        .await
        .expect("update request failed");
    assert_eq!(response.status().as_u16(), 400);

    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["due_date"], original_due);
}

#[tokio::test]
async fn join_and_leave_drive_status_transitions() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let other = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Meditate daily", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    assert_eq!(challenge["status"], "pending");

    // Second participant starts the competition.
    join(&app, &client, id, other).await;
    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["status"], "in-progress");

    // Duplicate join conflicts.
    let response = client
        .post(format!("{}/api/challenges/join/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("join request failed");
    assert_eq!(response.status().as_u16(), 409);

    // Back down to one participant: pending again.
    let response = client
        .post(format!("{}/api/challenges/leave/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("leave request failed");
    assert_eq!(response.status().as_u16(), 200);

    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["status"], "pending");

    // Leaving again: not a participant anymore.
    let response = client
        .post(format!("{}/api/challenges/leave/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("leave request failed");
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn private_challenge_requires_invite_code() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let other = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Secret club",
            "due_date": due_in_seconds(3600),
            "is_private": true,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    let invite_code = challenge["invite_code"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/challenges/join/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("join request failed");
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .post(format!(
            "{}/api/challenges/join/{}?invite_code={}",
            app.address, id, invite_code
        ))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("join request failed");
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn duplicate_progress_submission_conflicts() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Write tests", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();

    let response = submit_progress(&app, &client, id, creator, false).await;
    assert_eq!(response.status().as_u16(), 201);

    let response = submit_progress(&app, &client, id, creator, true).await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn non_participant_cannot_submit_progress() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let outsider = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Swim", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();

    let response = submit_progress(&app, &client, id, outsider, true).await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn first_finisher_bonus_is_awarded_exactly_once() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let second = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Ship a feature",
            "due_date": due_in_seconds(3600),
            "points": 10,
            "bonus_points": 5,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, second).await;

    let first_entry: serde_json::Value = submit_progress(&app, &client, id, creator, true)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first_entry["points_earned"], 15);

    let second_entry: serde_json::Value = submit_progress(&app, &client, id, second, true)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second_entry["points_earned"], 10);
}

#[tokio::test]
async fn concurrent_completions_yield_a_single_bonus() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let a = seed_user(&app.pool).await;
    let b = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Sprint finish",
            "due_date": due_in_seconds(3600),
            "points": 10,
            "bonus_points": 7,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, a).await;
    join(&app, &client, id, b).await;

    let (ra, rb) = tokio::join!(
        submit_progress(&app, &client, id, a, true),
        submit_progress(&app, &client, id, b, true),
    );
    assert_eq!(ra.status().as_u16(), 201);
    assert_eq!(rb.status().as_u16(), 201);

    let detail = get_detail(&app, &client, id).await;
    let mut earned: Vec<i64> = [a, b]
        .iter()
        .map(|u| progress_of(&detail, *u).unwrap()["points_earned"].as_i64().unwrap())
        .collect();
    earned.sort();
    assert_eq!(earned, vec![10, 17], "exactly one submission gets the bonus");
}

#[tokio::test]
async fn leave_removes_the_leavers_progress() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let other = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Sketch daily", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, other).await;

    assert_eq!(
        submit_progress(&app, &client, id, other, true).await.status().as_u16(),
        201
    );

    let response = client
        .post(format!("{}/api/challenges/leave/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("leave request failed");
    assert_eq!(response.status().as_u16(), 200);

    let detail = get_detail(&app, &client, id).await;
    assert!(progress_of(&detail, other).is_none());
}

#[tokio::test]
async fn votes_toggle_retarget_and_conserve_points() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let finisher_a = seed_user(&app.pool).await;
    let finisher_b = seed_user(&app.pool).await;
    let voter = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Best recipe",
            "due_date": due_in_seconds(3600),
            "points": 10,
            "bonus_points": 0,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, finisher_a).await;
    join(&app, &client, id, finisher_b).await;
    join(&app, &client, id, voter).await;

    submit_progress(&app, &client, id, finisher_a, true).await;
    submit_progress(&app, &client, id, finisher_b, true).await;

    // Self-vote and voting for a non-finisher are rejected.
    assert_eq!(vote(&app, &client, id, finisher_a, finisher_a).await.status().as_u16(), 400);
    assert_eq!(vote(&app, &client, id, voter, creator).await.status().as_u16(), 400);

    // First vote: +1 for A, evaluation flips to 'vote'.
    assert_eq!(vote(&app, &client, id, voter, finisher_a).await.status().as_u16(), 200);
    let detail = get_detail(&app, &client, id).await;
    assert_eq!(progress_of(&detail, finisher_a).unwrap()["points_earned"], 11);
    assert_eq!(detail["evaluation_method"], "vote");

    // Re-vote for the other finisher: A back to 10, B to 11.
    assert_eq!(vote(&app, &client, id, voter, finisher_b).await.status().as_u16(), 200);
    let detail = get_detail(&app, &client, id).await;
    assert_eq!(progress_of(&detail, finisher_a).unwrap()["points_earned"], 10);
    assert_eq!(progress_of(&detail, finisher_b).unwrap()["points_earned"], 11);

    // Voting the same target again toggles the vote off entirely.
    assert_eq!(vote(&app, &client, id, voter, finisher_b).await.status().as_u16(), 200);
    let detail = get_detail(&app, &client, id).await;
    assert_eq!(progress_of(&detail, finisher_b).unwrap()["points_earned"], 10);
    assert_eq!(detail["votes"].as_array().unwrap().len(), 0);
    assert_eq!(detail["evaluation_method"], "auto");
}

#[tokio::test]
async fn manual_finalize_before_due_date_fails() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Long haul", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/challenges/winner/{}", app.address, id))
        .bearer_auth(token_for(creator))
        .send()
        .await
        .expect("winner request failed");
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn finalize_is_idempotent_and_pays_every_finisher_once() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let late = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Photo contest",
            "due_date": due_in_seconds(2),
            "points": 10,
            "bonus_points": 0,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, late).await;

    // Earlier completion wins the points tie.
    submit_progress(&app, &client, id, creator, true).await;
    submit_progress(&app, &client, id, late, true).await;

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let response = client
        .post(format!("{}/api/challenges/winner/{}", app.address, id))
        .bearer_auth(token_for(creator))
        .send()
        .await
        .expect("winner request failed");
    // 409 only if another test's sweep pass got there first; either way the
    // challenge must end up finalized exactly once.
    assert!(matches!(response.status().as_u16(), 200 | 409));
    if response.status().as_u16() == 200 {
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["winner"].as_i64(), Some(creator));
        assert_eq!(body["points_awarded"], 10);
    }

    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["status"], "completed");
    assert_eq!(detail["winner_id"].as_i64(), Some(creator));

    // Both finishers are paid their earned points, exactly once.
    assert_eq!(user_points(&app.pool, creator).await, 10);
    assert_eq!(user_points(&app.pool, late).await, 10);

    let response = client
        .post(format!("{}/api/challenges/winner/{}", app.address, id))
        .bearer_auth(token_for(creator))
        .send()
        .await
        .expect("winner request failed");
    assert_eq!(response.status().as_u16(), 409);

    assert_eq!(user_points(&app.pool, creator).await, 10);
    assert_eq!(user_points(&app.pool, late).await, 10);

    // Finalized challenges accept no more votes.
    let response = vote(&app, &client, id, late, creator).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn finalize_by_non_creator_is_forbidden() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let other = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Pushups", "due_date": due_in_seconds(3600) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/api/challenges/winner/{}", app.address, id))
        .bearer_auth(token_for(other))
        .send()
        .await
        .expect("winner request failed");
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn finalize_with_no_completions_cancels_the_challenge() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({ "title": "Nobody shows up", "due_date": due_in_seconds(2) }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let response = client
        .post(format!("{}/api/challenges/winner/{}", app.address, id))
        .bearer_auth(token_for(creator))
        .send()
        .await
        .expect("winner request failed");
    assert_eq!(response.status().as_u16(), 400);

    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["status"], "cancelled");
    assert!(detail["winner_id"].is_null());
}

#[tokio::test]
async fn sweep_finalizes_due_challenges_without_double_award() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let creator = seed_user(&app.pool).await;
    let other = seed_user(&app.pool).await;

    let challenge = create_challenge(
        &app,
        &client,
        creator,
        serde_json::json!({
            "title": "Swept away",
            "due_date": due_in_seconds(2),
            "points": 10,
            "bonus_points": 3,
        }),
    )
    .await;
    let id = challenge["id"].as_i64().unwrap();
    join(&app, &client, id, other).await;
    submit_progress(&app, &client, id, other, true).await;

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    sweep::sweep_once(&app.state).await.expect("sweep failed");

    let detail = get_detail(&app, &client, id).await;
    assert_eq!(detail["status"], "completed");
    assert_eq!(detail["winner_id"].as_i64(), Some(other));
    assert_eq!(user_points(&app.pool, other).await, 13);

    // A second pass must not touch the finalized challenge again.
    sweep::sweep_once(&app.state).await.expect("sweep failed");
    assert_eq!(user_points(&app.pool, other).await, 13);
}
