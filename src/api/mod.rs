use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder, Responder};
use chrono::Utc;
use std::sync::Arc;

use crate::auth::{session_token, AuthService, CurrentUser};
use crate::error::{AppResult, LOGIN_URL};
use crate::models::*;
use crate::social::{profile_url, SocialGraph};
use crate::store::Store;
use crate::tweets::TweetService;

pub const HOME_URL: &str = "/";

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub social: SocialGraph,
    pub tweets: TweetService,
}

impl AppState {
    pub fn new(store: Arc<Store>, auth_service: Arc<AuthService>) -> Self {
        Self {
            social: SocialGraph::new(store.clone()),
            tweets: TweetService::new(store.clone()),
            store,
            auth_service,
        }
    }
}

fn redirect(location: &str) -> HttpResponseBuilder {
    let mut builder = HttpResponse::Found();
    builder.insert_header((header::LOCATION, location));
    builder
}

/// Only same-site paths are followed after login
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => url,
        _ => HOME_URL,
    }
}

// ==================== Health Check ====================

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.store.count_users() {
        Ok(users) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "users": users,
            "timestamp": Utc::now().to_rfc3339()
        })),
        Err(e) => {
            log::error!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::error("Database unavailable"))
        }
    }
}

// ==================== Account Endpoints ====================

const SIGNUP_FIELDS: &[&str] = &["username", "email", "password1", "password2"];
const LOGIN_FIELDS: &[&str] = &["username", "password", "next"];
const TWEET_FIELDS: &[&str] = &["content"];

pub async fn signup_page() -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success(FormPage {
        form: "signup",
        fields: SIGNUP_FIELDS,
    }))
}

pub async fn signup(
    state: web::Data<AppState>,
    body: web::Form<SignupRequest>,
) -> AppResult<HttpResponse> {
    let (_, session) = state.auth_service.register(&body)?;
    Ok(redirect(HOME_URL)
        .cookie(state.auth_service.session_cookie(&session))
        .finish())
}

pub async fn login_page() -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success(FormPage {
        form: "login",
        fields: LOGIN_FIELDS,
    }))
}

pub async fn login(
    state: web::Data<AppState>,
    query: web::Query<LoginQuery>,
    body: web::Form<LoginRequest>,
) -> AppResult<HttpResponse> {
    let (_, session) = state.auth_service.login(&body)?;
    // The form's hidden field wins over the query string
    let next = body
        .next
        .as_deref()
        .filter(|n| !n.is_empty())
        .or(query.next.as_deref());
    Ok(redirect(safe_next(next))
        .cookie(state.auth_service.session_cookie(&session))
        .finish())
}

pub async fn logout(state: web::Data<AppState>, req: HttpRequest) -> AppResult<HttpResponse> {
    if let Some(token) = session_token(&req) {
        state.auth_service.logout(&token)?;
    }
    Ok(redirect(LOGIN_URL).cookie(AuthService::removal_cookie()).finish())
}

// ==================== Profile & Follow Endpoints ====================

pub async fn profile(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let page = state.social.profile(&user, &path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn follow(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let edge = state.social.follow(&user, &path)?;
    Ok(redirect(&profile_url(&edge.following.username)).finish())
}

pub async fn unfollow(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let target = state.social.unfollow(&user, &path)?;
    Ok(redirect(&profile_url(&target.username)).finish())
}

pub async fn following_list(
    state: web::Data<AppState>,
    _user: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let page = state.social.following(&path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn follower_list(
    state: web::Data<AppState>,
    _user: CurrentUser,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let page = state.social.followers(&path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

// ==================== Tweet Endpoints ====================

pub async fn home(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let page = state.tweets.home(&user)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn tweet_create_page(_user: CurrentUser) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success(FormPage {
        form: "tweet",
        fields: TWEET_FIELDS,
    }))
}

pub async fn tweet_create(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Form<TweetRequest>,
) -> AppResult<HttpResponse> {
    state.tweets.create(&user, &body)?;
    Ok(redirect(HOME_URL).finish())
}

pub async fn tweet_detail(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let page = state.tweets.detail(&user, path.into_inner())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(page)))
}

pub async fn tweet_delete_page(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let tweet = state.tweets.get_deletable(&user, path.into_inner())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(tweet)))
}

pub async fn tweet_delete(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    state.tweets.delete(&user, path.into_inner())?;
    Ok(redirect(HOME_URL).finish())
}

// ==================== Like Endpoints ====================

pub async fn like(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let count = state.tweets.like(&user, path.into_inner())?;
    Ok(HttpResponse::Ok().json(count))
}

pub async fn unlike(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let count = state.tweets.unlike(&user, path.into_inner())?;
    Ok(HttpResponse::Ok().json(count))
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))

        // Accounts
        .route("/signup", web::get().to(signup_page))
        .route("/signup", web::post().to(signup))
        .route("/login", web::get().to(login_page))
        .route("/login", web::post().to(login))
        .route("/logout", web::post().to(logout))

        // Profiles and the follow graph
        .route("/users/{username}", web::get().to(profile))
        .route("/users/{username}/follow", web::post().to(follow))
        .route("/users/{username}/unfollow", web::post().to(unfollow))
        .route("/users/{username}/following", web::get().to(following_list))
        .route("/users/{username}/followers", web::get().to(follower_list))

        // Tweets ("/tweets/new" must precede "/tweets/{id}")
        .route("/", web::get().to(home))
        .route("/tweets/new", web::get().to(tweet_create_page))
        .route("/tweets/new", web::post().to(tweet_create))
        .route("/tweets/{id}", web::get().to(tweet_detail))
        .route("/tweets/{id}/delete", web::get().to(tweet_delete_page))
        .route("/tweets/{id}/delete", web::post().to(tweet_delete))

        // Likes
        .route("/tweets/{id}/like", web::post().to(like))
        .route("/tweets/{id}/unlike", web::post().to(unlike));
}
