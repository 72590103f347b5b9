use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use movierec::services::reconciliation::ReconcileReport;
use movierec::models::snapshot::LocalSnapshot;
use movierec::{
    init_tracing, AppState, Config, Item, RatedItem, Rating, RecommendationRequest, RecommendationResponse,
    Strategy, UserRatingStats,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    k: Option<usize>,
    strategy: Option<Strategy>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RatingBody {
    user_id: i64,
    item_id: i64,
    rating: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }
}

async fn health_check() -> Json<ApiResponse<HashMap<String, String>>> {
    let mut status = HashMap::new();
    status.insert("status".to_string(), "healthy".to_string());
    status.insert("service".to_string(), "movierec".to_string());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<RecommendationQuery>,
) -> Result<Json<ApiResponse<RecommendationResponse>>, StatusCode> {
    let num_recommendations = params.k.unwrap_or(state.config.recommendation.default_k);
    if num_recommendations == 0 || num_recommendations > state.config.recommendation.max_k {
        return Err(StatusCode::BAD_REQUEST);
    }

    let request = RecommendationRequest {
        user_id,
        num_recommendations,
        strategy: params.strategy,
    };

    match state.recommendation_service.try_recommend(&request).await {
        Ok(response) => Ok(Json(ApiResponse::success(response))),
        Err(e) => {
            tracing::error!("Failed to get recommendations: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn put_rating(
    State(state): State<AppState>,
    Json(body): Json<RatingBody>,
) -> Result<Json<ApiResponse<Rating>>, StatusCode> {
    match state
        .recommendation_service
        .upsert_rating(body.user_id, body.item_id, body.rating)
        .await
    {
        Ok(rating) => Ok(Json(ApiResponse::success(rating))),
        Err(e) => {
            tracing::warn!("Rejected rating for user {}: {:#}", body.user_id, e);
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }
    }
}

async fn delete_rating(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<String>>, StatusCode> {
    match state.recommendation_service.remove_rating(user_id, item_id).await {
        Ok(true) => Ok(Json(ApiResponse::success("Rating removed".to_string()))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to remove rating: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn reconcile_snapshot(
    State(state): State<AppState>,
    Json(mut snapshot): Json<LocalSnapshot>,
) -> Result<Json<ApiResponse<ReconcileReport>>, StatusCode> {
    match state.reconciliation_service.reconcile_with_report(&mut snapshot).await {
        Ok(report) => Ok(Json(ApiResponse::success(report))),
        Err(e) => {
            tracing::error!("Reconciliation failed: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<UserRatingStats>>, StatusCode> {
    match state.recommendation_service.user_stats(user_id).await {
        Ok(stats) => Ok(Json(ApiResponse::success(stats))),
        Err(e) => {
            tracing::error!("Failed to get user stats: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<RatedItem>>>, StatusCode> {
    match state.recommendation_service.user_ratings(user_id).await {
        Ok(ratings) => Ok(Json(ApiResponse::success(ratings))),
        Err(e) => {
            tracing::error!("Failed to list ratings for user {}: {:#}", user_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn search_items(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Vec<Item>>>, StatusCode> {
    let limit = params.limit.unwrap_or(state.config.recommendation.default_k);
    match state.recommendation_service.search_items(&params.q, limit).await {
        Ok(items) => Ok(Json(ApiResponse::success(items))),
        Err(e) => {
            tracing::error!("Failed to search items: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommendations/:user_id", get(get_recommendations))
        .route("/ratings", post(put_rating))
        .route("/ratings/:user_id/:item_id", delete(delete_rating))
        .route("/reconcile", post(reconcile_snapshot))
        .route("/users/:user_id/stats", get(get_user_stats))
        .route("/users/:user_id/ratings", get(get_user_ratings))
        .route("/items/search", get(search_items))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("MOVIEREC_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    let config = Config::from_file(&config_path)?;
    info!("Starting movierec server with config: {:?}", config.server);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?
        .block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
