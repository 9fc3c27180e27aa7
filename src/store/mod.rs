use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const TWEET_COLUMNS: &str = r#"t.id, t.user_id, u.username, t.content, t.created_at,
    (SELECT COUNT(*) FROM likes l WHERE l.target_id = t.id) AS liked_count"#;

const FRIENDSHIP_COLUMNS: &str = r#"f.id, f.created_at,
    f.follower_id, fr.username AS follower_username,
    f.following_id, fg.username AS following_username"#;

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                date_joined TEXT NOT NULL,
                last_login TEXT
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                token TEXT UNIQUE NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS friendships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                follower_id INTEGER NOT NULL,
                following_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (following_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT follow_unique UNIQUE (following_id, follower_id)
            );

            CREATE TABLE IF NOT EXISTS tweets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS likes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (target_id) REFERENCES tweets(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT like_unique UNIQUE (target_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token);
            CREATE INDEX IF NOT EXISTS idx_tweets_user_id ON tweets(user_id);
            CREATE INDEX IF NOT EXISTS idx_tweets_created_at ON tweets(created_at);
            CREATE INDEX IF NOT EXISTS idx_friendships_follower ON friendships(follower_id);
            CREATE INDEX IF NOT EXISTS idx_likes_user_id ON likes(user_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Inserts the user and fills in `id` and `date_joined`.
    /// A taken username surfaces as `StoreError::Conflict`.
    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn()?;
        user.date_joined = Utc::now();

        conn.execute(
            r#"INSERT INTO users (username, email, password_hash, is_active, date_joined, last_login)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &user.username,
                &user.email,
                &user.password_hash,
                user.is_active,
                format_datetime(&user.date_joined),
                user.last_login.as_ref().map(format_datetime),
            ],
        )
        .map_err(|e| unique_violation(e, format!("User {}", user.username)))?;
        user.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_user(&self, id: i64) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![id],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("User {}", username))
            }
            _ => StoreError::Database(e),
        })
    }

    pub fn username_exists(&self, username: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_users(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn touch_last_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    /// Deletes the user together with their sessions, tweets, likes and
    /// follow edges in both directions.
    pub fn delete_user(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    // ==================== Session Operations ====================

    pub fn create_session(&self, session: &mut Session) -> StoreResult<()> {
        let conn = self.conn()?;
        session.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO sessions (user_id, token, expires_at, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![
                session.user_id,
                &session.token,
                format_datetime(&session.expires_at),
                format_datetime(&session.created_at),
            ],
        )?;
        session.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_session_by_token(&self, token: &str) -> StoreResult<Session> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    token: row.get("token")?,
                    expires_at: parse_datetime(row.get::<_, String>("expires_at")?),
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Session".to_string()),
            _ => StoreError::Database(e),
        })
    }

    pub fn delete_session(&self, token: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }

    /// Returns the number of sessions removed
    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![format_datetime(&now)],
        )?;
        Ok(rows)
    }

    // ==================== Friendship Operations ====================

    /// Inserts the edge `follower -> following`.
    /// An existing edge surfaces as `StoreError::Conflict`.
    pub fn create_friendship(&self, follower_id: i64, following_id: i64) -> StoreResult<FriendShip> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                r#"INSERT INTO friendships (follower_id, following_id, created_at)
                   VALUES (?1, ?2, ?3)"#,
                params![follower_id, following_id, format_datetime(&Utc::now())],
            )
            .map_err(|e| {
                unique_violation(e, format!("Friendship {} -> {}", follower_id, following_id))
            })?;
            conn.last_insert_rowid()
        };
        self.get_friendship(id)
    }

    pub fn get_friendship(&self, id: i64) -> StoreResult<FriendShip> {
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM friendships f
               JOIN users fr ON fr.id = f.follower_id
               JOIN users fg ON fg.id = f.following_id
               WHERE f.id = ?1"#,
            FRIENDSHIP_COLUMNS
        );
        conn.query_row(&sql, params![id], row_to_friendship)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Friendship {}", id))
                }
                _ => StoreError::Database(e),
            })
    }

    pub fn friendship_exists(&self, follower_id: i64, following_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM friendships WHERE follower_id = ?1 AND following_id = ?2",
                params![follower_id, following_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns whether an edge was removed
    pub fn delete_friendship(&self, follower_id: i64, following_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM friendships WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
        )?;
        Ok(rows > 0)
    }

    /// Edges where `user_id` is the follower, most recent first
    pub fn list_following(&self, user_id: i64) -> StoreResult<Vec<FriendShip>> {
        self.list_friendships("f.follower_id = ?1", user_id)
    }

    /// Edges where `user_id` is being followed, most recent first
    pub fn list_followers(&self, user_id: i64) -> StoreResult<Vec<FriendShip>> {
        self.list_friendships("f.following_id = ?1", user_id)
    }

    fn list_friendships(&self, filter: &str, user_id: i64) -> StoreResult<Vec<FriendShip>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM friendships f
               JOIN users fr ON fr.id = f.follower_id
               JOIN users fg ON fg.id = f.following_id
               WHERE {}
               ORDER BY f.created_at DESC, f.id DESC"#,
            FRIENDSHIP_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![user_id], row_to_friendship)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_following(&self, user_id: i64) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM friendships WHERE follower_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_followers(&self, user_id: i64) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM friendships WHERE following_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_friendships(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM friendships", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Tweet Operations ====================

    pub fn create_tweet(&self, user_id: i64, content: &str) -> StoreResult<Tweet> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO tweets (user_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, content, format_datetime(&Utc::now())],
            )?;
            conn.last_insert_rowid()
        };
        self.get_tweet(id)
    }

    pub fn get_tweet(&self, id: i64) -> StoreResult<Tweet> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM tweets t JOIN users u ON u.id = t.user_id WHERE t.id = ?1",
            TWEET_COLUMNS
        );
        conn.query_row(&sql, params![id], row_to_tweet)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("Tweet {}", id))
                }
                _ => StoreError::Database(e),
            })
    }

    /// All tweets, or one author's tweets, most recent first
    pub fn list_tweets(&self, author_id: Option<i64>) -> StoreResult<Vec<Tweet>> {
        let conn = self.conn()?;
        let mut tweets = Vec::new();

        if let Some(author_id) = author_id {
            let sql = format!(
                r#"SELECT {} FROM tweets t JOIN users u ON u.id = t.user_id
                   WHERE t.user_id = ?1
                   ORDER BY t.created_at DESC, t.id DESC"#,
                TWEET_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![author_id], row_to_tweet)?;
            for row in rows {
                tweets.push(row?);
            }
        } else {
            let sql = format!(
                r#"SELECT {} FROM tweets t JOIN users u ON u.id = t.user_id
                   ORDER BY t.created_at DESC, t.id DESC"#,
                TWEET_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_tweet)?;
            for row in rows {
                tweets.push(row?);
            }
        }

        Ok(tweets)
    }

    /// Deletes the tweet and, through the foreign key, its likes
    pub fn delete_tweet(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM tweets WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Tweet {}", id)));
        }
        Ok(())
    }

    pub fn count_tweets(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tweets", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Like Operations ====================

    /// Returns whether a new like was recorded; an existing one is left alone
    pub fn create_like(&self, user_id: i64, target_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r#"INSERT OR IGNORE INTO likes (target_id, user_id, created_at)
               VALUES (?1, ?2, ?3)"#,
            params![target_id, user_id, format_datetime(&Utc::now())],
        )?;
        Ok(rows > 0)
    }

    /// Returns whether a like was removed
    pub fn delete_like(&self, user_id: i64, target_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM likes WHERE target_id = ?1 AND user_id = ?2",
            params![target_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn has_liked(&self, user_id: i64, target_id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM likes WHERE target_id = ?1 AND user_id = ?2",
                params![target_id, user_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_likes(&self, target_id: i64) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE target_id = ?1",
            params![target_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_all_likes(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM likes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Ids of every tweet the user has liked
    pub fn liked_tweet_ids(&self, user_id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT target_id FROM likes WHERE user_id = ?1 ORDER BY target_id")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let last_login: Option<String> = row.get("last_login")?;
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        is_active: row.get("is_active")?,
        date_joined: parse_datetime(row.get::<_, String>("date_joined")?),
        last_login: last_login.map(parse_datetime),
    })
}

fn row_to_tweet(row: &rusqlite::Row) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        content: row.get("content")?,
        liked_count: row.get("liked_count")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_friendship(row: &rusqlite::Row) -> rusqlite::Result<FriendShip> {
    Ok(FriendShip {
        id: row.get("id")?,
        follower: UserSummary {
            id: row.get("follower_id")?,
            username: row.get("follower_username")?,
        },
        following: UserSummary {
            id: row.get("following_id")?,
            username: row.get("following_username")?,
        },
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn unique_violation(e: rusqlite::Error, what: String) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Conflict(what)
        }
        _ => StoreError::Database(e),
    }
}

// Fixed-width UTC timestamps keep lexical order equal to time order
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("Unparseable timestamp {:?} in database: {}, using now", s, e);
            Utc::now()
        })
}
