// SQLite persistence layer for users and their profiles.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use crate::model::{
    Gender, NewUser, User, UserFilter, UserProfile, DEFAULT_LANGUAGE, DEFAULT_TIMEZONE,
};

/// Ordered schema migrations. `PRAGMA user_version` records how many have
/// been applied.
const MIGRATIONS: &[&str] = &[
    // 1: users + profiles
    "
    CREATE TABLE users (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        username        TEXT NOT NULL UNIQUE,
        email           TEXT NOT NULL UNIQUE,
        password_hash   TEXT NOT NULL,
        nickname        TEXT NOT NULL DEFAULT '',
        avatar          TEXT,
        phone_number    TEXT UNIQUE,
        birth_date      TEXT,
        bio             TEXT NOT NULL DEFAULT '',
        timezone        TEXT NOT NULL,
        language        TEXT NOT NULL,
        user_type       TEXT NOT NULL DEFAULT 'regular',
        status          TEXT NOT NULL DEFAULT 'active',
        is_staff        INTEGER NOT NULL DEFAULT 0,
        is_superuser    INTEGER NOT NULL DEFAULT 0,
        email_verified  INTEGER NOT NULL DEFAULT 0,
        phone_verified  INTEGER NOT NULL DEFAULT 0,
        last_login      TEXT,
        last_login_ip   TEXT,
        registration_ip TEXT,
        metadata        TEXT NOT NULL DEFAULT '{}',
        is_deleted      INTEGER NOT NULL DEFAULT 0,
        deleted_at      TEXT,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    );

    CREATE INDEX idx_users_created_at ON users(created_at);
    CREATE INDEX idx_users_status ON users(status);
    CREATE INDEX idx_users_is_deleted ON users(is_deleted);

    CREATE TABLE user_profiles (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        gender           TEXT,
        occupation       TEXT NOT NULL DEFAULT '',
        company          TEXT NOT NULL DEFAULT '',
        address          TEXT NOT NULL DEFAULT '',
        website          TEXT NOT NULL DEFAULT '',
        social_links     TEXT NOT NULL DEFAULT '{}',
        interests        TEXT NOT NULL DEFAULT '',
        tags             TEXT NOT NULL DEFAULT '[]',
        privacy_settings TEXT NOT NULL DEFAULT '{}',
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );
    ",
];

pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

const USER_COLUMNS: &str = "id, username, email, password_hash, nickname, avatar, phone_number,
    birth_date, bio, timezone, language, user_type, status, is_staff, is_superuser,
    email_verified, phone_verified, last_login, last_login_ip, registration_ip, metadata,
    is_deleted, deleted_at, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, user_id, gender, occupation, company, address, website,
    social_links, interests, tags, privacy_settings, created_at, updated_at";

/// SQLite-backed store for user accounts and profiles.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and bring its schema up
    /// to date. Pass `":memory:"` for an ephemeral database (tests).
    pub fn open(path: &str) -> Result<Self> {
        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        Self::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply every migration past the stored `user_version`, each in its own
    /// transaction.
    fn migrate(conn: &mut Connection) -> Result<()> {
        let current: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("failed to read schema version")?;

        if current > SCHEMA_VERSION {
            bail!(
                "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
            );
        }

        for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = index as u32 + 1;
            let tx = conn
                .transaction()
                .context("failed to begin migration transaction")?;
            tx.execute_batch(sql)
                .with_context(|| format!("failed to apply migration {version}"))?;
            tx.pragma_update(None, "user_version", version)
                .context("failed to record schema version")?;
            tx.commit()
                .with_context(|| format!("failed to commit migration {version}"))?;
            tracing::info!("applied database migration {version}");
        }
        Ok(())
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    pub fn schema_version(&self) -> Result<u32> {
        self.conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("failed to read schema version")
    }

    /// Liveness probe used by the health endpoints.
    pub fn ping(&self) -> Result<()> {
        let one: i64 = self
            .conn()
            .query_row("SELECT 1", [], |row| row.get(0))
            .context("database ping failed")?;
        if one != 1 {
            bail!("database ping returned {one}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users: create / read
    // ------------------------------------------------------------------

    /// Insert a user row. Optional fields missing from `user` take their
    /// column defaults; the caller has already validated and hashed.
    pub fn insert_user(
        &self,
        user: &NewUser,
        password_hash: &str,
        registration_ip: Option<&str>,
    ) -> Result<User> {
        let conn = self.conn();
        let now = timestamp(Utc::now());
        let sql = format!(
            "INSERT INTO users
                (username, email, password_hash, nickname, phone_number, birth_date, bio,
                 timezone, language, user_type, is_staff, is_superuser, registration_ip,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             RETURNING {USER_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                user.username,
                user.email,
                password_hash,
                user.nickname.as_deref().unwrap_or(""),
                user.phone_number,
                user.birth_date.map(date_string),
                user.bio.as_deref().unwrap_or(""),
                user.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE),
                user.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
                user.user_type.as_str(),
                user.is_staff,
                user.is_superuser,
                registration_ip,
                now,
            ],
            user_from_row,
        )
        .map_err(unique_violation)
        .with_context(|| format!("failed to insert user {}", user.username))
    }

    /// Fetch a user by id, deleted or not.
    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.find_user_where("id = ?1", Value::Integer(id), true)
    }

    pub fn find_user_by_username(
        &self,
        username: &str,
        include_deleted: bool,
    ) -> Result<Option<User>> {
        self.find_user_where("username = ?1", Value::Text(username.to_string()), include_deleted)
    }

    pub fn find_user_by_email(&self, email: &str, include_deleted: bool) -> Result<Option<User>> {
        self.find_user_where("email = ?1", Value::Text(email.to_string()), include_deleted)
    }

    pub fn find_user_by_phone(&self, phone: &str, include_deleted: bool) -> Result<Option<User>> {
        self.find_user_where("phone_number = ?1", Value::Text(phone.to_string()), include_deleted)
    }

    fn find_user_where(
        &self,
        predicate: &str,
        value: Value,
        include_deleted: bool,
    ) -> Result<Option<User>> {
        let conn = self.conn();
        let deleted_clause = if include_deleted {
            ""
        } else {
            " AND is_deleted = 0"
        };
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}{deleted_clause}");
        conn.query_row(&sql, [value], user_from_row)
            .optional()
            .context("failed to query user")
    }

    /// Uniqueness probes. These see deleted rows too, because the columns
    /// are unique across the whole table. `exclude_id` skips the user being
    /// updated.
    pub fn username_exists(&self, username: &str) -> Result<bool> {
        self.exists("username", username, None)
    }

    pub fn email_exists(&self, email: &str, exclude_id: Option<i64>) -> Result<bool> {
        self.exists("email", email, exclude_id)
    }

    pub fn phone_exists(&self, phone: &str, exclude_id: Option<i64>) -> Result<bool> {
        self.exists("phone_number", phone, exclude_id)
    }

    fn exists(&self, column: &str, value: &str, exclude_id: Option<i64>) -> Result<bool> {
        let conn = self.conn();
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM users WHERE {column} = ?1 AND id != ?2)"
        );
        conn.query_row(&sql, params![value, exclude_id.unwrap_or(-1)], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to check {column} uniqueness"))
    }

    pub fn count_users(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("failed to count users")?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Users: write
    // ------------------------------------------------------------------

    /// Persist every mutable field of `user` and bump `updated_at`.
    /// Returns the row as stored.
    pub fn update_user(&self, user: &User) -> Result<User> {
        let conn = self.conn();
        let metadata =
            serde_json::to_string(&user.metadata).context("failed to serialize user metadata")?;
        let sql = format!(
            "UPDATE users SET
                email = ?2, nickname = ?3, avatar = ?4, phone_number = ?5, birth_date = ?6,
                bio = ?7, timezone = ?8, language = ?9, user_type = ?10, status = ?11,
                is_staff = ?12, is_superuser = ?13, email_verified = ?14, phone_verified = ?15,
                metadata = ?16, updated_at = ?17
             WHERE id = ?1
             RETURNING {USER_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                user.id,
                user.email,
                user.nickname,
                user.avatar,
                user.phone_number,
                user.birth_date.map(date_string),
                user.bio,
                user.timezone,
                user.language,
                user.user_type.as_str(),
                user.status.as_str(),
                user.is_staff,
                user.is_superuser,
                user.email_verified,
                user.phone_verified,
                metadata,
                timestamp(Utc::now()),
            ],
            user_from_row,
        )
        .map_err(unique_violation)
        .with_context(|| format!("failed to update user {}", user.id))
    }

    pub fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<()> {
        self.touch(
            "password_hash = ?2",
            id,
            Value::Text(password_hash.to_string()),
            "password",
        )
        .map(|_| ())
    }

    pub fn set_email_verified(&self, id: i64, verified: bool) -> Result<bool> {
        self.touch(
            "email_verified = ?2",
            id,
            Value::Integer(verified.into()),
            "email verification",
        )
    }

    pub fn set_phone_verified(&self, id: i64, verified: bool) -> Result<bool> {
        self.touch(
            "phone_verified = ?2",
            id,
            Value::Integer(verified.into()),
            "phone verification",
        )
    }

    /// Set one column and `updated_at`. Returns whether a row matched.
    fn touch(&self, assignment: &str, id: i64, value: Value, what: &str) -> Result<bool> {
        let conn = self.conn();
        let sql = format!("UPDATE users SET {assignment}, updated_at = ?3 WHERE id = ?1");
        let changed = conn
            .execute(&sql, params![id, value, timestamp(Utc::now())])
            .with_context(|| format!("failed to update {what} for user {id}"))?;
        Ok(changed > 0)
    }

    pub fn record_login(&self, id: i64, ip: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE users SET last_login = ?2, last_login_ip = ?3 WHERE id = ?1",
            params![id, timestamp(at), ip],
        )
        .with_context(|| format!("failed to record login for user {id}"))?;
        Ok(())
    }

    /// Soft delete: flag the row, stamp `deleted_at`, move status to
    /// `deleted`. Returns whether a live row was changed.
    pub fn set_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn();
        let stamp = timestamp(at);
        let changed = conn
            .execute(
                "UPDATE users SET is_deleted = 1, deleted_at = ?2, status = 'deleted',
                    updated_at = ?2
                 WHERE id = ?1 AND is_deleted = 0",
                params![id, stamp],
            )
            .with_context(|| format!("failed to soft delete user {id}"))?;
        Ok(changed > 0)
    }

    /// Undo a soft delete and reactivate the account.
    pub fn restore(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE users SET is_deleted = 0, deleted_at = NULL, status = 'active',
                    updated_at = ?2
                 WHERE id = ?1",
                params![id, timestamp(Utc::now())],
            )
            .with_context(|| format!("failed to restore user {id}"))?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Users: listing and search
    // ------------------------------------------------------------------

    /// One page of non-deleted users matching `filter`, newest first, plus
    /// the total number of matches. `page` is 1-based.
    pub fn list_users(
        &self,
        filter: &UserFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<User>, u64)> {
        let mut clauses = vec!["is_deleted = 0".to_string()];
        let mut values: Vec<Value> = Vec::new();

        for (column, needle) in [
            ("username", &filter.username),
            ("email", &filter.email),
            ("nickname", &filter.nickname),
        ] {
            if let Some(needle) = needle.as_deref().filter(|s| !s.is_empty()) {
                values.push(Value::Text(like_pattern(needle)));
                clauses.push(format!("{column} LIKE ?{} ESCAPE '\\'", values.len()));
            }
        }
        if let Some(user_type) = filter.user_type {
            values.push(Value::Text(user_type.as_str().to_string()));
            clauses.push(format!("user_type = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(verified) = filter.email_verified {
            values.push(Value::Integer(verified.into()));
            clauses.push(format!("email_verified = ?{}", values.len()));
        }
        if let Some(verified) = filter.phone_verified {
            values.push(Value::Integer(verified.into()));
            clauses.push(format!("phone_verified = ?{}", values.len()));
        }
        if let Some(start) = filter.created_at_start {
            values.push(Value::Text(timestamp(start)));
            clauses.push(format!("created_at >= ?{}", values.len()));
        }
        if let Some(end) = filter.created_at_end {
            values.push(Value::Text(timestamp(end)));
            clauses.push(format!("created_at <= ?{}", values.len()));
        }

        let where_sql = clauses.join(" AND ");
        let conn = self.conn();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM users WHERE {where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .context("failed to count filtered users")?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let limit_index = values.len() + 1;
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {where_sql}
             ORDER BY created_at DESC, id DESC
             LIMIT ?{limit_index} OFFSET ?{}",
            limit_index + 1
        );
        values.push(Value::Integer(i64::from(page_size)));
        values.push(Value::Integer(offset));

        let mut stmt = conn
            .prepare(&sql)
            .context("failed to prepare list_users query")?;
        let users = stmt
            .query_map(params_from_iter(values.iter()), user_from_row)
            .context("failed to query users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;

        Ok((users, total as u64))
    }

    /// Case-insensitive substring search over username, email, nickname and
    /// phone number. Deleted users are skipped.
    pub fn search_users(&self, query: &str, limit: u32) -> Result<Vec<User>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE is_deleted = 0
               AND (username LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'
                    OR nickname LIKE ?1 ESCAPE '\\' OR phone_number LIKE ?1 ESCAPE '\\')
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        );
        let mut stmt = conn
            .prepare(&sql)
            .context("failed to prepare search_users query")?;
        let users = stmt
            .query_map(params![like_pattern(query), limit], user_from_row)
            .context("failed to search users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Return the profile for `user_id`, creating an empty one if missing.
    pub fn get_or_create_profile(&self, user_id: i64) -> Result<UserProfile> {
        let conn = self.conn();
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO user_profiles (user_id, created_at, updated_at)
             VALUES (?1, ?2, ?2)",
            params![user_id, now],
        )
        .with_context(|| format!("failed to create profile for user {user_id}"))?;

        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?1"),
            params![user_id],
            profile_from_row,
        )
        .with_context(|| format!("failed to load profile for user {user_id}"))
    }

    pub fn update_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
        let conn = self.conn();
        let social_links = serde_json::to_string(&profile.social_links)
            .context("failed to serialize social links")?;
        let tags = serde_json::to_string(&profile.tags).context("failed to serialize tags")?;
        let privacy = serde_json::to_string(&profile.privacy_settings)
            .context("failed to serialize privacy settings")?;

        conn.query_row(
            &format!(
                "UPDATE user_profiles SET
                    gender = ?2, occupation = ?3, company = ?4, address = ?5, website = ?6,
                    social_links = ?7, interests = ?8, tags = ?9, privacy_settings = ?10,
                    updated_at = ?11
                 WHERE user_id = ?1
                 RETURNING {PROFILE_COLUMNS}"
            ),
            params![
                profile.user_id,
                profile.gender.map(|g| g.as_str()),
                profile.occupation,
                profile.company,
                profile.address,
                profile.website,
                social_links,
                profile.interests,
                tags,
                privacy,
                timestamp(Utc::now()),
            ],
            profile_from_row,
        )
        .with_context(|| format!("failed to update profile for user {}", profile.user_id))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// RFC 3339 with microseconds and a `Z` suffix, so text order matches time
/// order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Wrap `needle` for a `LIKE` substring match, escaping wildcards.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// A write collided with a UNIQUE column of `users`. Surfaced through
/// `anyhow` so callers can `downcast_ref` it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DuplicateUser {
    #[error("username already exists")]
    Username,
    #[error("email already exists")]
    Email,
    #[error("phone number already exists")]
    PhoneNumber,
}

/// Turn SQLite's `UNIQUE constraint failed: users.<column>` into a
/// `DuplicateUser`; every other error passes through.
fn unique_violation(err: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            let duplicate = match message.rsplit("users.").next() {
                Some("username") => Some(DuplicateUser::Username),
                Some("email") => Some(DuplicateUser::Email),
                Some("phone_number") => Some(DuplicateUser::PhoneNumber),
                _ => None,
            };
            if let Some(duplicate) = duplicate {
                return duplicate.into();
            }
        }
    }
    err.into()
}

fn conversion_error<E>(row: &Row<'_>, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parsed<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| conversion_error(row, column, e))
}

fn time(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, column, e))
}

fn optional_time(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(row, column, e))
    })
    .transpose()
}

fn json<T: serde::de::DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, column, e))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let birth_date: Option<String> = row.get("birth_date")?;
    let birth_date = birth_date
        .map(|raw| NaiveDate::from_str(&raw).map_err(|e| conversion_error(row, "birth_date", e)))
        .transpose()?;

    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        nickname: row.get("nickname")?,
        avatar: row.get("avatar")?,
        phone_number: row.get("phone_number")?,
        birth_date,
        bio: row.get("bio")?,
        timezone: row.get("timezone")?,
        language: row.get("language")?,
        user_type: parsed(row, "user_type")?,
        status: parsed(row, "status")?,
        is_staff: row.get("is_staff")?,
        is_superuser: row.get("is_superuser")?,
        email_verified: row.get("email_verified")?,
        phone_verified: row.get("phone_verified")?,
        last_login: optional_time(row, "last_login")?,
        last_login_ip: row.get("last_login_ip")?,
        registration_ip: row.get("registration_ip")?,
        metadata: json(row, "metadata")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: optional_time(row, "deleted_at")?,
        created_at: time(row, "created_at")?,
        updated_at: time(row, "updated_at")?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    let gender: Option<String> = row.get("gender")?;
    let gender = gender
        .map(|raw| {
            raw.parse::<Gender>()
                .map_err(|e| conversion_error(row, "gender", e))
        })
        .transpose()?;

    Ok(UserProfile {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        gender,
        occupation: row.get("occupation")?,
        company: row.get("company")?,
        address: row.get("address")?,
        website: row.get("website")?,
        social_links: json(row, "social_links")?,
        interests: row.get("interests")?,
        tags: json(row, "tags")?,
        privacy_settings: json(row, "privacy_settings")?,
        created_at: time(row, "created_at")?,
        updated_at: time(row, "updated_at")?,
    })
}
