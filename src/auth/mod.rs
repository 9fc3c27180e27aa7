use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{ready, Ready};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::forms::{FormErrors, LoginForm, SignupForm, USERNAME_TAKEN};
use crate::models::{LoginRequest, Session, SignupRequest, User};
use crate::store::{Store, StoreError};

pub const SESSION_COOKIE: &str = "sessionid";
pub const DEFAULT_BCRYPT_COST: u32 = 10;

pub struct AuthService {
    store: Arc<Store>,
    session_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            session_ttl: Duration::days(14),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, self.bcrypt_cost)
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    /// Generate a random session token
    pub fn generate_session_token() -> String {
        use uuid::Uuid;
        format!("{}{}", Uuid::new_v4(), Uuid::new_v4())
            .replace("-", "")
    }

    /// Creates an account without running the signup form rules
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> AppResult<User> {
        let mut user = User {
            id: 0,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: self.hash_password(password)?,
            is_active: true,
            date_joined: Utc::now(),
            last_login: None,
        };
        self.store.create_user(&mut user)?;
        Ok(user)
    }

    /// Validates the signup form, creates the account and signs it in
    pub fn register(&self, req: &SignupRequest) -> AppResult<(User, Session)> {
        let form = SignupForm::clean(req, |username| self.store.username_exists(username))?;
        // Fail before the account exists if no session could be issued for it
        self.session_expiry(Utc::now())?;

        let user = match self.create_user(&form.username, &form.email, &form.password) {
            Ok(user) => user,
            // Lost a race with a concurrent signup for the same name
            Err(AppError::Store(StoreError::Conflict(_))) => {
                let mut errors = FormErrors::new();
                errors.add("username", USERNAME_TAKEN);
                return Err(AppError::Invalid(errors));
            }
            Err(e) => return Err(e),
        };
        log::info!("Registered user {} ({})", user.username, user.id);

        let session = self.start_session(&user)?;
        Ok((user, session))
    }

    /// Returns the user when the credentials match an active account
    pub fn authenticate(&self, username: &str, password: &str) -> AppResult<Option<User>> {
        let user = match self.store.get_user_by_username(username) {
            Ok(u) => u,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !user.is_active {
            return Ok(None);
        }

        if self.verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Validates the login form; any credential mismatch yields one generic error
    pub fn login(&self, req: &LoginRequest) -> AppResult<(User, Session)> {
        let form = LoginForm::clean(req)?;

        let mut user = match self.authenticate(&form.username, &form.password)? {
            Some(user) => user,
            None => {
                log::warn!("Failed login attempt for {:?}", form.username);
                return Err(LoginForm::invalid_login());
            }
        };

        let now = Utc::now();
        self.store.touch_last_login(user.id, now)?;
        user.last_login = Some(now);

        let session = self.start_session(&user)?;
        log::info!("User {} logged in", user.username);
        Ok((user, session))
    }

    fn session_expiry(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        now.checked_add_signed(self.session_ttl).ok_or_else(|| {
            AppError::Internal(format!("Session lifetime {} is out of range", self.session_ttl))
        })
    }

    pub fn start_session(&self, user: &User) -> AppResult<Session> {
        let now = Utc::now();
        let mut session = Session {
            id: 0,
            user_id: user.id,
            token: Self::generate_session_token(),
            expires_at: self.session_expiry(now)?,
            created_at: now,
        };
        self.store.create_session(&mut session)?;
        Ok(session)
    }

    pub fn logout(&self, token: &str) -> AppResult<()> {
        self.store.delete_session(token)?;
        Ok(())
    }

    /// Resolves a session token to its user.
    /// Unknown or expired tokens and inactive accounts resolve to `None`.
    pub fn resolve_session(&self, token: &str) -> AppResult<Option<User>> {
        let session = match self.store.get_session_by_token(token) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if session.is_expired() {
            self.store.delete_session(token)?;
            return Ok(None);
        }

        match self.store.get_user(session.user_id) {
            Ok(user) if user.is_active => Ok(Some(user)),
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes sessions past their expiry; returns how many were dropped
    pub fn purge_expired_sessions(&self) -> AppResult<usize> {
        Ok(self.store.delete_expired_sessions(Utc::now())?)
    }

    pub fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, session.token.clone())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(self.session_ttl.num_seconds()))
            .finish()
    }

    pub fn removal_cookie() -> Cookie<'static> {
        let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").finish();
        cookie.make_removal();
        cookie
    }
}

/// The signed-in user making the request.
///
/// Handlers that take a `CurrentUser` are login-protected: a request without
/// a live session is redirected to the login page with `next` set to the
/// requested path.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(current_user(req))
    }
}

fn current_user(req: &HttpRequest) -> AppResult<CurrentUser> {
    let auth_service = req
        .app_data::<web::Data<AuthService>>()
        .ok_or_else(|| AppError::Internal("AuthService is not registered".to_string()))?;

    let next = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.path().to_string());

    let token = match req.cookie(SESSION_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => return Err(AppError::Unauthenticated { next }),
    };

    match auth_service.resolve_session(&token)? {
        Some(user) => Ok(CurrentUser(user)),
        None => Err(AppError::Unauthenticated { next }),
    }
}

/// The session token carried by the request, if any
pub fn session_token(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE).map(|c| c.value().to_string())
}
