//! Form validation for signup, login and tweet submission.
//!
//! Each form cleans its raw request into a typed value or returns
//! `AppError::Invalid` carrying per-field messages. Password rules are
//! reported on `password2`, the confirmation field.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::AppError;
use crate::models::{LoginRequest, SignupRequest, TweetRequest};
use crate::store::StoreResult;

/// Key for errors that belong to the whole form rather than one field
pub const NON_FIELD_ERRORS: &str = "__all__";

pub const FIELD_REQUIRED: &str = "This field is required.";
pub const USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const USERNAME_INVALID: &str =
    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
pub const EMAIL_INVALID: &str = "Enter a valid email address.";
pub const PASSWORD_MISMATCH: &str = "The two password fields didn't match.";
pub const PASSWORD_ENTIRELY_NUMERIC: &str = "This password is entirely numeric.";
pub const INVALID_LOGIN: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

pub const USERNAME_MAX_LENGTH: usize = 150;
pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const TWEET_MAX_LENGTH: usize = 200;
const EMAIL_MAX_LENGTH: usize = 320;
const MAX_SIMILARITY: f64 = 0.7;

/// Field name -> messages, in field order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, field: &str, message: &str) -> bool {
        self.get(field).iter().any(|m| m == message)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, AppError> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(AppError::Invalid(self))
        }
    }
}

pub fn max_length_message(max: usize, actual: usize) -> String {
    format!(
        "Ensure this value has at most {} characters (it has {}).",
        max, actual
    )
}

pub fn password_too_short_message(min: usize) -> String {
    format!(
        "This password is too short. It must contain at least {} characters.",
        min
    )
}

pub fn password_too_similar_message(attribute: &str) -> String {
    format!("The password is too similar to the {}.", attribute)
}

// ==================== Signup ====================

#[derive(Debug, Clone)]
pub struct SignupForm {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignupForm {
    /// `username_taken` is consulted only once the username is otherwise valid.
    pub fn clean<F>(req: &SignupRequest, username_taken: F) -> Result<Self, AppError>
    where
        F: FnOnce(&str) -> StoreResult<bool>,
    {
        let mut errors = FormErrors::new();
        let username = req.username.trim();
        let email = req.email.trim();

        if username.is_empty() {
            errors.add("username", FIELD_REQUIRED);
        } else {
            let len = username.chars().count();
            if len > USERNAME_MAX_LENGTH {
                errors.add("username", max_length_message(USERNAME_MAX_LENGTH, len));
            }
            if !is_valid_username(username) {
                errors.add("username", USERNAME_INVALID);
            }
            if !errors.has_field("username") && username_taken(username)? {
                errors.add("username", USERNAME_TAKEN);
            }
        }

        if email.is_empty() {
            errors.add("email", FIELD_REQUIRED);
        } else if !is_valid_email(email) {
            errors.add("email", EMAIL_INVALID);
        }

        if req.password1.is_empty() {
            errors.add("password1", FIELD_REQUIRED);
        }
        if req.password2.is_empty() {
            errors.add("password2", FIELD_REQUIRED);
        }

        if !req.password1.is_empty() && !req.password2.is_empty() {
            if req.password1 != req.password2 {
                errors.add("password2", PASSWORD_MISMATCH);
            } else {
                let mut attributes = Vec::new();
                if !errors.has_field("username") {
                    attributes.push(("username", username));
                }
                if !errors.has_field("email") {
                    attributes.push(("email address", email));
                }
                for message in validate_password(&req.password2, &attributes) {
                    errors.add("password2", message);
                }
            }
        }

        errors.finish(|| Self {
            username: username.to_string(),
            email: email.to_string(),
            password: req.password1.clone(),
        })
    }
}

/// Runs every password rule and returns all failures.
/// `attributes` pairs a human-readable name with the user's value for it.
pub fn validate_password(password: &str, attributes: &[(&str, &str)]) -> Vec<String> {
    let mut failures = Vec::new();

    if password.chars().count() < PASSWORD_MIN_LENGTH {
        failures.push(password_too_short_message(PASSWORD_MIN_LENGTH));
    }

    for (name, value) in attributes {
        if is_too_similar(password, value) {
            failures.push(password_too_similar_message(name));
        }
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        failures.push(PASSWORD_ENTIRELY_NUMERIC.to_string());
    }

    failures
}

fn is_too_similar(password: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let password = password.to_lowercase();
    let value = value.to_lowercase();

    let mut parts: Vec<&str> = value
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|p| !p.is_empty())
        .collect();
    parts.push(&value);

    parts.into_iter().any(|part| {
        !exceeds_length_ratio(&password, part) && quick_ratio(&password, part) >= MAX_SIMILARITY
    })
}

// A part far shorter than the password cannot make it similar
fn exceeds_length_ratio(password: &str, part: &str) -> bool {
    let pwd_len = password.chars().count();
    let part_len = part.chars().count();
    pwd_len >= 10 * part_len && (part_len as f64) < MAX_SIMILARITY / 2.0 * pwd_len as f64
}

/// Upper bound on the Ratcliff/Obershelp similarity of `a` and `b`:
/// twice the size of their character multiset intersection over the total length.
pub fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_insert(0) += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(n) = available.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }

    2.0 * matches as f64 / total as f64
}

fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '+' | '-'))
}

pub fn is_valid_email(email: &str) -> bool {
    if email.len() > EMAIL_MAX_LENGTH {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    is_valid_local_part(local) && is_valid_domain(domain)
}

fn is_valid_local_part(local: &str) -> bool {
    const SPECIALS: &str = "!#$%&'*+/=?^_`{}|~-";
    !local.is_empty()
        && local.split('.').all(|atom| {
            !atom.is_empty()
                && atom
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || SPECIALS.contains(c))
        })
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    let Some((tld, hosts)) = labels.split_last() else {
        return false;
    };
    if hosts.is_empty() {
        return false;
    }

    let label_ok = |label: &str| {
        (1..=63).contains(&label.len())
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };

    hosts.iter().all(|l| label_ok(l)) && label_ok(tld) && tld.len() >= 2
}

// ==================== Login ====================

#[derive(Debug, Clone)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn clean(req: &LoginRequest) -> Result<Self, AppError> {
        let mut errors = FormErrors::new();
        let username = req.username.trim();

        if username.is_empty() {
            errors.add("username", FIELD_REQUIRED);
        }
        if req.password.is_empty() {
            errors.add("password", FIELD_REQUIRED);
        }

        errors.finish(|| Self {
            username: username.to_string(),
            password: req.password.clone(),
        })
    }

    /// The single error reported for any credential mismatch
    pub fn invalid_login() -> AppError {
        let mut errors = FormErrors::new();
        errors.add(NON_FIELD_ERRORS, INVALID_LOGIN);
        AppError::Invalid(errors)
    }
}

// ==================== Tweet ====================

#[derive(Debug, Clone)]
pub struct TweetForm {
    pub content: String,
}

impl TweetForm {
    pub fn clean(req: &TweetRequest) -> Result<Self, AppError> {
        let mut errors = FormErrors::new();
        let content = req.content.trim();

        if content.is_empty() {
            errors.add("content", FIELD_REQUIRED);
        } else {
            let len = content.chars().count();
            if len > TWEET_MAX_LENGTH {
                errors.add("content", max_length_message(TWEET_MAX_LENGTH, len));
            }
        }

        errors.finish(|| Self {
            content: content.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str, email: &str, password1: &str, password2: &str) -> SignupRequest {
        SignupRequest {
            username: username.to_string(),
            email: email.to_string(),
            password1: password1.to_string(),
            password2: password2.to_string(),
        }
    }

    fn signup_errors(req: &SignupRequest) -> FormErrors {
        match SignupForm::clean(req, |_| Ok(false)) {
            Err(AppError::Invalid(errors)) => errors,
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("form should be invalid"),
        }
    }

    #[test]
    fn test_valid_signup() {
        let req = signup("testuser", "test@test.com", "testpassword", "testpassword");
        let form = SignupForm::clean(&req, |_| Ok(false)).unwrap();
        assert_eq!(form.username, "testuser");
        assert_eq!(form.password, "testpassword");
    }

    #[test]
    fn test_empty_signup_requires_every_field() {
        let errors = signup_errors(&signup("", "", "", ""));
        for field in ["username", "email", "password1", "password2"] {
            assert!(errors.contains(field, FIELD_REQUIRED), "{} should be required", field);
        }
    }

    #[test]
    fn test_taken_username() {
        let req = signup("testuser", "test@test.com", "testpassword", "testpassword");
        match SignupForm::clean(&req, |name| Ok(name == "testuser")) {
            Err(AppError::Invalid(errors)) => assert!(errors.contains("username", USERNAME_TAKEN)),
            _ => panic!("taken username should be rejected"),
        }
    }

    #[test]
    fn test_invalid_username_characters() {
        let errors = signup_errors(&signup("bad name!", "test@test.com", "testpassword", "testpassword"));
        assert!(errors.contains("username", USERNAME_INVALID));
    }

    #[test]
    fn test_invalid_email() {
        let errors = signup_errors(&signup("testuser", "test@test", "testpassword", "testpassword"));
        assert!(errors.contains("email", EMAIL_INVALID));
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("test@test.com"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(is_valid_email("root@localhost"));
        assert!(!is_valid_email("test@test"));
        assert!(!is_valid_email("@test.com"));
        assert!(!is_valid_email("test.com"));
        assert!(!is_valid_email("a..b@test.com"));
        assert!(!is_valid_email("test@-bad.com"));
        assert!(!is_valid_email("test@test.c"));
    }

    #[test]
    fn test_short_password() {
        let errors = signup_errors(&signup("testuser", "test@test.com", "djan", "djan"));
        assert!(errors.contains("password2", &password_too_short_message(8)));
    }

    #[test]
    fn test_password_similar_to_username() {
        let errors = signup_errors(&signup("testuser", "test@test.com", "testusera", "testusera"));
        assert!(errors.contains("password2", &password_too_similar_message("username")));
    }

    #[test]
    fn test_numeric_password() {
        let errors = signup_errors(&signup("testuser", "test@test.com", "10293847", "10293847"));
        assert!(errors.contains("password2", PASSWORD_ENTIRELY_NUMERIC));
        assert_eq!(errors.get("password2").len(), 1);
    }

    #[test]
    fn test_password_mismatch_skips_other_rules() {
        let errors = signup_errors(&signup("testuser", "test@test.com", "testpassword", "differentpassword"));
        assert_eq!(errors.get("password2"), &[PASSWORD_MISMATCH.to_string()]);
    }

    #[test]
    fn test_quick_ratio() {
        assert_eq!(quick_ratio("abc", "abc"), 1.0);
        assert_eq!(quick_ratio("abc", "xyz"), 0.0);
        // 6 shared characters over 20 total
        assert!((quick_ratio("testpassword", "testuser") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_login_form_requires_fields() {
        let req = LoginRequest {
            username: "testuser".to_string(),
            password: String::new(),
            ..Default::default()
        };
        match LoginForm::clean(&req) {
            Err(AppError::Invalid(errors)) => {
                assert!(errors.contains("password", FIELD_REQUIRED));
                assert!(!errors.has_field("username"));
            }
            _ => panic!("empty password should be rejected"),
        }
    }

    #[test]
    fn test_tweet_length_boundary() {
        let ok = TweetRequest {
            content: "a".repeat(200),
        };
        assert!(TweetForm::clean(&ok).is_ok());

        let long = TweetRequest {
            content: "a".repeat(201),
        };
        match TweetForm::clean(&long) {
            Err(AppError::Invalid(errors)) => {
                assert!(errors.contains("content", &max_length_message(200, 201)));
            }
            _ => panic!("201 characters should be rejected"),
        }
    }

    #[test]
    fn test_tweet_length_counts_characters() {
        let req = TweetRequest {
            content: "あ".repeat(200),
        };
        assert!(TweetForm::clean(&req).is_ok());
    }

    #[test]
    fn test_empty_tweet() {
        let req = TweetRequest {
            content: "   ".to_string(),
        };
        match TweetForm::clean(&req) {
            Err(AppError::Invalid(errors)) => assert!(errors.contains("content", FIELD_REQUIRED)),
            _ => panic!("blank content should be rejected"),
        }
    }
}
