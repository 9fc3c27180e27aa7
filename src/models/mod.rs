use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forms::FormErrors;

/// User is the identity root: tweets, likes, sessions and follow edges all hang off it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

/// Session represents an authenticated browser session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Public view of a user, embedded in lists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// FriendShip is a directed follow edge: `follower` follows `following`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendShip {
    pub id: i64,
    pub follower: UserSummary,
    pub following: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// Tweet is a short post owned by one user.
/// `username` and `liked_count` are joined in when the row is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub liked_count: i64,
    pub created_at: DateTime<Utc>,
}

// Form bodies. Every field defaults to empty so that a missing field is
// reported as a validation error instead of a deserialization failure.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Hidden form field carrying the page to return to
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetRequest {
    #[serde(default)]
    pub content: String,
}

// Page contexts returned by the GET endpoints

#[derive(Debug, Serialize)]
pub struct FormPage {
    pub form: &'static str,
    pub fields: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct HomePage {
    pub tweets: Vec<Tweet>,
    pub user_like_list: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct TweetPage {
    pub tweet: Tweet,
    pub is_liked: bool,
    pub liked_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ProfilePage {
    pub user: UserSummary,
    pub tweets: Vec<Tweet>,
    pub is_following: bool,
    pub following_num: i64,
    pub followers_num: i64,
}

#[derive(Debug, Serialize)]
pub struct FollowListPage {
    pub user: UserSummary,
    pub entries: Vec<FriendShip>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LikeCount {
    pub liked_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FormErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: None,
            redirect: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            errors: None,
            redirect: None,
        }
    }

    /// Form re-display: the submission comes back with field errors
    pub fn invalid(errors: FormErrors) -> Self {
        Self {
            success: false,
            data: None,
            error: None,
            errors: Some(errors),
            redirect: None,
        }
    }

    pub fn with_redirect(mut self, url: impl Into<String>) -> Self {
        self.redirect = Some(url.into());
        self
    }
}
