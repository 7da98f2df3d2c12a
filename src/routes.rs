// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, patch, post, put},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    handlers::{challenge, membership, progress, vote, winner},
    state::AppState,
    utils::auth::auth_middleware,
};

/// Assembles the main application router.
///
/// * Public reads, auth-protected mutations under /api/challenges.
/// * Stored attachments served from /uploads.
/// * Global middleware (Trace, CORS) and shared state.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let public_routes = Router::new()
        .route("/get", get(challenge::list_challenges))
        .route("/get/{id}", get(challenge::get_challenge));

    let protected_routes = Router::new()
        .route("/create", post(challenge::create_challenge))
        .route("/update/{id}", put(challenge::update_challenge))
        .route("/delete/{id}", delete(challenge::delete_challenge))
        .route("/soft-delete/{id}", patch(challenge::soft_delete_challenge))
        .route("/recover/{id}", patch(challenge::recover_challenge))
        .route("/get-soft-deleted", get(challenge::list_soft_deleted_challenges))
        .route("/myparticipant", get(challenge::my_participating_challenges))
        .route("/join/{id}", post(membership::join_challenge))
        .route("/leave/{id}", post(membership::leave_challenge))
        .route("/createprogress/{id}", post(progress::submit_progress))
        .route("/updateprogress/{id}", patch(progress::update_progress))
        .route("/remove-progress/{id}", delete(progress::remove_progress))
        .route("/vote/{id}", post(vote::vote_for_participant))
        .route("/winner/{id}", post(winner::finalize_challenge))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let challenge_routes = public_routes.merge(protected_routes);

    Router::new()
        .nest("/api/challenges", challenge_routes)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
