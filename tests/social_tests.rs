use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use actix_web::{cookie::Cookie, test, web, App};
use std::sync::Arc;

use chirp::api::{self, AppState};
use chirp::auth::{AuthService, SESSION_COOKIE};
use chirp::models::User;
use chirp::store::Store;

fn create_services() -> (Arc<Store>, Arc<AuthService>) {
    let store = Arc::new(Store::new(":memory:").unwrap());
    let auth_service = Arc::new(AuthService::new(store.clone()).with_bcrypt_cost(4));
    (store, auth_service)
}

macro_rules! init_app {
    ($store:expr, $auth:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($auth.clone()))
                .app_data(web::Data::new(AppState::new($store.clone(), $auth.clone())))
                .configure(api::configure_routes),
        )
        .await
    };
}

/// Creates two users and a signed-in session cookie for the first
fn two_users(auth_service: &AuthService) -> (User, User, Cookie<'static>) {
    let user1 = auth_service.create_user("test", "test@example.com", "password1").unwrap();
    let user2 = auth_service.create_user("test2", "test2@example.com", "password2").unwrap();
    let session = auth_service.start_session(&user1).unwrap();
    (user1, user2, Cookie::new(SESSION_COOKIE, session.token))
}

fn location<B>(resp: &ServiceResponse<B>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ==================== Profile Tests ====================

#[actix_web::test]
async fn test_profile_page() {
    let (store, auth_service) = create_services();
    let (login_user, target_user, cookie) = two_users(&auth_service);
    store.create_tweet(target_user.id, "tweet1").unwrap();
    store.create_tweet(target_user.id, "tweet2").unwrap();
    store.create_tweet(login_user.id, "tweet3").unwrap();
    store.create_friendship(login_user.id, target_user.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/test2")
        .cookie(cookie)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let page = &resp["data"];

    assert_eq!(page["user"]["username"], "test2");
    assert_eq!(page["user"]["id"], target_user.id);
    assert!(page["user"]["password_hash"].is_null());
    assert!(page["user"]["email"].is_null());
    assert!(page["user"]["last_login"].is_null());
    assert!(page["user"]["is_active"].is_null());
    let tweets = page["tweets"].as_array().unwrap();
    assert_eq!(tweets.len(), 2);
    assert_eq!(tweets[0]["content"], "tweet2");
    assert_eq!(tweets[1]["content"], "tweet1");
    assert_eq!(page["is_following"], true);
    assert_eq!(page["followers_num"], 1);
    assert_eq!(page["following_num"], 0);
}

#[actix_web::test]
async fn test_profile_not_found() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/not_exist_user")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

// ==================== Follow Tests ====================

#[actix_web::test]
async fn test_follow_success() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test2/follow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/users/test2");
    assert!(store.friendship_exists(user1.id, user2.id).unwrap());
}

#[actix_web::test]
async fn test_follow_not_exist_user() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/not_exist_user/follow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    assert_eq!(store.count_friendships().unwrap(), 0);
}

#[actix_web::test]
async fn test_follow_self() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test/follow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "You cannot follow yourself.");
    assert_eq!(body["redirect"], "/users/test");
    assert_eq!(store.count_friendships().unwrap(), 0);
}

#[actix_web::test]
async fn test_follow_twice_is_rejected() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test2/follow")
        .cookie(cookie.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 302);

    let req = test::TestRequest::post()
        .uri("/users/test2/follow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "You already follow this user.");
    assert_eq!(store.count_friendships().unwrap(), 1);
}

// ==================== Unfollow Tests ====================

#[actix_web::test]
async fn test_unfollow_success() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    store.create_friendship(user1.id, user2.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test2/unfollow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), "/users/test2");
    assert_eq!(store.count_friendships().unwrap(), 0);
}

#[actix_web::test]
async fn test_unfollow_not_exist_user() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    store.create_friendship(user1.id, user2.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/not_exist_user/unfollow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    assert!(store.friendship_exists(user1.id, user2.id).unwrap());
}

#[actix_web::test]
async fn test_unfollow_self() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    store.create_friendship(user1.id, user2.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test/unfollow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    assert!(store.friendship_exists(user1.id, user2.id).unwrap());
}

#[actix_web::test]
async fn test_unfollow_without_following() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::post()
        .uri("/users/test2/unfollow")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "You do not follow this user.");
}

// ==================== Follow List Tests ====================

#[actix_web::test]
async fn test_following_list() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    store.create_friendship(user2.id, user1.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/test2/following")
        .cookie(cookie)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    let entries = resp["data"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["following"]["username"], "test");
}

#[actix_web::test]
async fn test_follower_list() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    store.create_friendship(user1.id, user2.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/test2/followers")
        .cookie(cookie)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    let entries = resp["data"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["follower"]["username"], "test");
}

#[actix_web::test]
async fn test_follower_list_most_recent_first() {
    let (store, auth_service) = create_services();
    let (user1, user2, cookie) = two_users(&auth_service);
    let user3 = auth_service.create_user("test3", "test3@example.com", "password3").unwrap();
    store.create_friendship(user1.id, user2.id).unwrap();
    store.create_friendship(user3.id, user2.id).unwrap();
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/test2/followers")
        .cookie(cookie)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    let names: Vec<_> = resp["data"]["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["follower"]["username"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["test3", "test"]);
}

#[actix_web::test]
async fn test_follow_list_unknown_user() {
    let (store, auth_service) = create_services();
    let (_, _, cookie) = two_users(&auth_service);
    let app = init_app!(store, auth_service);

    let req = test::TestRequest::get()
        .uri("/users/ghost/following")
        .cookie(cookie)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

// ==================== Cascade Tests ====================

#[actix_web::test]
async fn test_deleting_user_removes_tweets_and_friendships() {
    let (store, auth_service) = create_services();
    let (user1, user2, _) = two_users(&auth_service);
    store.create_tweet(user1.id, "bye").unwrap();
    store.create_tweet(user2.id, "still here").unwrap();
    store.create_friendship(user1.id, user2.id).unwrap();
    store.create_friendship(user2.id, user1.id).unwrap();

    store.delete_user(user1.id).unwrap();

    assert_eq!(store.count_friendships().unwrap(), 0);
    assert_eq!(store.count_tweets().unwrap(), 1);
    assert_eq!(store.count_followers(user2.id).unwrap(), 0);
}
