// Authentication: credential checks, JWT issue / refresh / revocation and
// the password reset flow.
//
// Cache keys:
//   refresh_token:<user_id>   the one refresh token currently accepted
//   blacklist_token:<jti>     revoked token ids, kept until the token expires
//   password_reset:<user_id>  the one reset token currently accepted

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::Config;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::mailer::{Email, Mailer};
use crate::model::User;
use crate::password;
use crate::token::{looks_like_jwt, Claims, TokenCodec, TokenError, TokenKind};
use crate::user_service::UserService;
use crate::validate::mask_email;

pub const TOKEN_TYPE: &str = "Bearer";

/// Reply to `/auth/password/reset`, identical whether or not the address
/// belongs to an account.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If the email address exists, a password reset email has been sent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: i64,
}

/// A freshly minted access token, returned by refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub struct AuthService {
    db: Arc<Database>,
    cache: Arc<TtlCache>,
    users: Arc<UserService>,
    mailer: Arc<dyn Mailer>,
    codec: TokenCodec,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    reset_lifetime: Duration,
    from_email: String,
}

impl AuthService {
    pub fn new(
        db: Arc<Database>,
        cache: Arc<TtlCache>,
        users: Arc<UserService>,
        mailer: Arc<dyn Mailer>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let codec = TokenCodec::new(config.jwt_secret(), &config.jwt.algorithm)
            .context("failed to build token codec")?;
        Ok(Self {
            db,
            cache,
            users,
            mailer,
            codec,
            access_lifetime: hours(config.jwt.access_token_hours),
            refresh_lifetime: days(config.jwt.refresh_token_days),
            reset_lifetime: hours(config.jwt.reset_token_hours),
            from_email: config.app.default_from_email.clone(),
        })
    }

    fn expires_in(&self) -> i64 {
        self.access_lifetime.as_secs() as i64
    }

    // ------------------------------------------------------------------
    // Issue / verify
    // ------------------------------------------------------------------

    /// Issue an access + refresh pair. The refresh token replaces any
    /// previous one for this user.
    pub fn generate_tokens(&self, user: &User) -> ServiceResult<TokenPair> {
        let (access_token, _) = self.issue(user.id, TokenKind::Access, self.access_lifetime)?;
        let (refresh_token, _) =
            self.issue(user.id, TokenKind::Refresh, self.refresh_lifetime)?;

        self.cache.set(
            &refresh_key(user.id),
            refresh_token.clone(),
            self.refresh_lifetime,
        );
        info!(user_id = user.id, "tokens issued: {}", user.username);

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.expires_in(),
            user_id: user.id,
        })
    }

    fn issue(
        &self,
        user_id: i64,
        kind: TokenKind,
        lifetime: Duration,
    ) -> ServiceResult<(String, Claims)> {
        self.codec
            .issue(user_id, kind, lifetime)
            .map_err(|e| ServiceError::Internal(anyhow::Error::new(e)))
    }

    /// Claims of a usable access token: well formed, signed, unexpired,
    /// not revoked, and belonging to an active, non-deleted user.
    pub fn verify_access(&self, token: &str) -> Option<Claims> {
        if !looks_like_jwt(token) {
            return None;
        }
        let claims = match self.codec.decode_kind(token, TokenKind::Access) {
            Ok(claims) => claims,
            Err(e) => {
                log_rejected("access", &e);
                return None;
            }
        };
        if self.is_revoked(&claims.jti) {
            warn!(user_id = claims.user_id, "revoked access token presented");
            return None;
        }
        match self.db.get_user(claims.user_id) {
            Ok(Some(user)) if user.can_authenticate() => Some(claims),
            Ok(_) => {
                warn!(user_id = claims.user_id, "token user missing or inactive");
                None
            }
            Err(e) => {
                warn!("token user lookup failed: {e:#}");
                None
            }
        }
    }

    /// User id behind a usable access token.
    pub fn verify_token(&self, token: &str) -> Option<i64> {
        self.verify_access(token).map(|claims| claims.user_id)
    }

    /// Expiry of a usable access token.
    pub fn token_expiry(&self, token: &str) -> Option<DateTime<Utc>> {
        self.verify_access(token)
            .and_then(|claims| DateTime::from_timestamp(claims.exp, 0))
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.cache.contains(&blacklist_key(jti))
    }

    /// Mint a new access token from the current refresh token.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Option<AccessToken> {
        let claims = match self.codec.decode_kind(refresh_token, TokenKind::Refresh) {
            Ok(claims) => claims,
            Err(e) => {
                log_rejected("refresh", &e);
                return None;
            }
        };
        if self.is_revoked(&claims.jti) {
            warn!(user_id = claims.user_id, "revoked refresh token presented");
            return None;
        }
        let user = match self.db.get_user(claims.user_id) {
            Ok(Some(user)) if user.can_authenticate() => user,
            Ok(_) => {
                warn!(user_id = claims.user_id, "refresh token user missing or inactive");
                return None;
            }
            Err(e) => {
                warn!("refresh token user lookup failed: {e:#}");
                return None;
            }
        };
        if self.cache.get(&refresh_key(user.id)).as_deref() != Some(refresh_token) {
            warn!(user_id = user.id, "refresh token is not the current one");
            return None;
        }

        let (access_token, _) = self
            .codec
            .issue(user.id, TokenKind::Access, self.access_lifetime)
            .map_err(|e| warn!("failed to sign access token: {e}"))
            .ok()?;
        info!(user_id = user.id, "access token refreshed: {}", user.username);
        Some(AccessToken {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.expires_in(),
        })
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Check `password` against the account named by `identifier`, tried as
    /// username, then email, then phone number. Accounts that are not
    /// active are refused even with the right password.
    pub fn authenticate_user(&self, identifier: &str, password: &str) -> ServiceResult<Option<User>> {
        let identifier = identifier.trim();
        let candidates = [
            self.db
                .find_user_by_username(&identifier.to_lowercase(), false)?,
            self.db.find_user_by_email(identifier, false)?,
            self.db.find_user_by_phone(identifier, false)?,
        ];

        let matched = candidates
            .into_iter()
            .flatten()
            .find(|user| password::verify_password(password, &user.password_hash));

        match matched {
            Some(user) if user.can_authenticate() => {
                info!(user_id = user.id, "authenticated: {}", user.username);
                Ok(Some(user))
            }
            Some(user) => {
                warn!(
                    user_id = user.id,
                    "authentication refused, account status {}",
                    user.status.as_str()
                );
                Ok(None)
            }
            None => {
                warn!("authentication failed for {}", mask_identifier(identifier));
                Ok(None)
            }
        }
    }

    /// Full login: authenticate, issue tokens, record time and address.
    pub fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: Option<&str>,
    ) -> ServiceResult<TokenPair> {
        let user = self
            .authenticate_user(identifier, password)?
            .ok_or_else(|| ServiceError::validation("Invalid username or password"))?;
        let tokens = self.generate_tokens(&user)?;
        self.db.record_login(user.id, ip, Utc::now())?;
        info!(user_id = user.id, "login: {}", user.username);
        Ok(tokens)
    }

    // ------------------------------------------------------------------
    // Revocation
    // ------------------------------------------------------------------

    /// Forget the current refresh token and, when one is given, blacklist
    /// it until it would have expired.
    pub fn logout_user(&self, user_id: i64, refresh_token: Option<&str>) -> bool {
        self.cache.delete(&refresh_key(user_id));
        if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
            match self.codec.decode(token) {
                Ok(claims) => self.blacklist(&claims),
                Err(e) => debug!("logout refresh token ignored: {e}"),
            }
        }
        info!(user_id, "logged out");
        true
    }

    /// Blacklist an access token so the same bearer stops working.
    pub fn revoke_access_token(&self, token: &str) {
        if let Ok(claims) = self.codec.decode_kind(token, TokenKind::Access) {
            self.blacklist(&claims);
        }
    }

    fn blacklist(&self, claims: &Claims) {
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining > 0 {
            self.cache.set(
                &blacklist_key(&claims.jti),
                "1",
                Duration::from_secs(remaining as u64),
            );
        }
    }

    // ------------------------------------------------------------------
    // Password reset / change
    // ------------------------------------------------------------------

    /// Issue a reset token for `user`; it replaces any earlier one.
    pub fn generate_password_reset_token(&self, user: &User) -> ServiceResult<String> {
        let (token, _) = self.issue(user.id, TokenKind::Reset, self.reset_lifetime)?;
        self.cache
            .set(&reset_key(user.id), token.clone(), self.reset_lifetime);
        info!(user_id = user.id, "password reset token issued: {}", user.username);
        Ok(token)
    }

    /// The account a reset token is good for. The token must be the latest
    /// one issued and not yet used.
    pub fn verify_password_reset_token(&self, token: &str) -> Option<User> {
        let claims = match self.codec.decode_kind(token, TokenKind::Reset) {
            Ok(claims) => claims,
            Err(e) => {
                log_rejected("reset", &e);
                return None;
            }
        };
        if self.cache.get(&reset_key(claims.user_id)).as_deref() != Some(token) {
            warn!(user_id = claims.user_id, "reset token is not the current one");
            return None;
        }
        match self.db.get_user(claims.user_id) {
            Ok(Some(user)) if !user.is_deleted => Some(user),
            Ok(_) => {
                warn!(user_id = claims.user_id, "reset token user does not exist");
                None
            }
            Err(e) => {
                warn!("reset token user lookup failed: {e:#}");
                None
            }
        }
    }

    /// Set a new password with a reset token. Consumes the token and ends
    /// every session of the account.
    pub fn reset_user_password(&self, token: &str, new_password: &str) -> ServiceResult<()> {
        let user = self.verify_password_reset_token(token).ok_or_else(|| {
            ServiceError::validation("Password reset failed, the token may have expired")
        })?;
        self.users.set_password(&user, new_password)?;
        self.cache.delete(&reset_key(user.id));
        self.logout_user(user.id, None);
        info!(user_id = user.id, "password reset: {}", user.username);
        Ok(())
    }

    /// Mail a reset link when `email` belongs to an account. The reply is
    /// the same either way.
    pub fn request_password_reset(&self, email: &str, base_url: &str) -> ServiceResult<&'static str> {
        let Some(user) = self.users.get_user_by_email(email)? else {
            info!("password reset requested for unknown {}", mask_email(email));
            return Ok(RESET_REQUESTED_MESSAGE);
        };

        let token = self.generate_password_reset_token(&user)?;
        let link = format!(
            "{}/auth/password/reset/confirm?token={token}",
            base_url.trim_end_matches('/')
        );
        let mail = Email {
            from: self.from_email.clone(),
            to: user.email.clone(),
            subject: "Password reset request".to_string(),
            body: format!("Follow this link to reset your password: {link}"),
        };
        match self.mailer.send(&mail) {
            Ok(()) => info!("password reset mail sent to {}", mask_email(&user.email)),
            Err(e) => warn!(
                "password reset mail to {} failed: {e:#}",
                mask_email(&user.email)
            ),
        }
        Ok(RESET_REQUESTED_MESSAGE)
    }

    /// Change the password of a signed-in user, then log them out
    /// everywhere.
    pub fn change_password(
        &self,
        user: &User,
        old_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        self.users.update_password(user, old_password, new_password)?;
        self.logout_user(user.id, None);
        Ok(())
    }
}

fn hours(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 3600)
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 86_400)
}

fn refresh_key(user_id: i64) -> String {
    format!("refresh_token:{user_id}")
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist_token:{jti}")
}

fn reset_key(user_id: i64) -> String {
    format!("password_reset:{user_id}")
}

fn log_rejected(kind: &str, err: &TokenError) {
    match err {
        TokenError::Expired => warn!("{kind} token expired"),
        other => warn!("{kind} token rejected: {other}"),
    }
}

fn mask_identifier(identifier: &str) -> String {
    if identifier.contains('@') {
        mask_email(identifier)
    } else {
        identifier.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::MemoryMailer;
    use crate::model::{NewUser, UserStatus};

    struct Fixture {
        auth: AuthService,
        users: Arc<UserService>,
        db: Arc<Database>,
        cache: Arc<TtlCache>,
        mailer: Arc<MemoryMailer>,
    }

    fn fixture() -> Fixture {
        let config = Config::for_tests();
        let db = Arc::new(Database::open(":memory:").expect("in-memory database should open"));
        let cache = Arc::new(TtlCache::new());
        let mailer = Arc::new(MemoryMailer::new());
        let users = Arc::new(UserService::new(db.clone(), mailer.clone(), &config));
        let auth = AuthService::new(
            db.clone(),
            cache.clone(),
            users.clone(),
            mailer.clone(),
            &config,
        )
        .unwrap();
        Fixture {
            auth,
            users,
            db,
            cache,
            mailer,
        }
    }

    fn create(fx: &Fixture, username: &str) -> User {
        fx.users
            .create_user(
                NewUser {
                    username: username.into(),
                    email: format!("{username}@example.com"),
                    password: "testpassword123".into(),
                    phone_number: Some("13812345678".into()),
                    ..NewUser::default()
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn generated_access_token_verifies() {
        let fx = fixture();
        let user = create(&fx, "tokenuser");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 24 * 3600);
        assert_eq!(fx.auth.verify_token(&pair.access_token), Some(user.id));
        // A refresh token is not an access token.
        assert_eq!(fx.auth.verify_token(&pair.refresh_token), None);
        assert_eq!(
            fx.cache.get("refresh_token:1").as_deref(),
            Some(pair.refresh_token.as_str())
        );
    }

    #[test]
    fn malformed_tokens_fail_quietly() {
        let fx = fixture();
        assert_eq!(fx.auth.verify_token("invalid.token.here"), None);
        assert_eq!(fx.auth.verify_token("nonsense"), None);
        assert!(fx.auth.refresh_access_token("nonsense").is_none());
        assert!(fx.auth.token_expiry("a.b.c").is_none());
    }

    #[test]
    fn inactive_user_token_is_rejected() {
        let fx = fixture();
        let mut user = create(&fx, "sleepy");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        user.status = UserStatus::Suspended;
        fx.db.update_user(&user).unwrap();
        assert_eq!(fx.auth.verify_token(&pair.access_token), None);
        assert!(fx.auth.refresh_access_token(&pair.refresh_token).is_none());
    }

    #[test]
    fn only_latest_refresh_token_is_accepted() {
        let fx = fixture();
        let user = create(&fx, "refresher");
        let first = fx.auth.generate_tokens(&user).unwrap();
        let second = fx.auth.generate_tokens(&user).unwrap();

        assert!(fx.auth.refresh_access_token(&first.refresh_token).is_none());
        let fresh = fx.auth.refresh_access_token(&second.refresh_token).unwrap();
        assert_eq!(fx.auth.verify_token(&fresh.access_token), Some(user.id));
    }

    #[test]
    fn authenticate_by_username_email_or_phone() {
        let fx = fixture();
        let user = create(&fx, "multi");
        for identifier in ["multi", "MULTI", "multi@example.com", "13812345678"] {
            let found = fx
                .auth
                .authenticate_user(identifier, "testpassword123")
                .unwrap();
            assert_eq!(found.map(|u| u.id), Some(user.id), "identifier {identifier}");
        }
        assert!(fx
            .auth
            .authenticate_user("multi", "wrongpassword")
            .unwrap()
            .is_none());
        assert!(fx
            .auth
            .authenticate_user("nobody", "testpassword123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn deleted_user_cannot_authenticate() {
        let fx = fixture();
        let user = create(&fx, "deleted");
        fx.users.soft_delete_user(&user).unwrap();
        assert!(fx
            .auth
            .authenticate_user("deleted", "testpassword123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn login_records_last_login() {
        let fx = fixture();
        let user = create(&fx, "loginuser");
        let pair = fx
            .auth
            .login("loginuser", "testpassword123", Some("198.51.100.4"))
            .unwrap();
        assert_eq!(pair.user_id, user.id);
        let stored = fx.db.get_user(user.id).unwrap().unwrap();
        assert!(stored.last_login.is_some());
        assert_eq!(stored.last_login_ip.as_deref(), Some("198.51.100.4"));

        let err = fx.auth.login("loginuser", "nope-nope", None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid username or password");
    }

    #[test]
    fn logout_blacklists_refresh_and_drops_cache() {
        let fx = fixture();
        let user = create(&fx, "leaver");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        assert!(fx.auth.logout_user(user.id, Some(&pair.refresh_token)));
        assert!(fx.cache.get("refresh_token:1").is_none());
        assert!(fx.auth.refresh_access_token(&pair.refresh_token).is_none());

        // Even re-caching the same token does not revive it.
        fx.cache.set(
            "refresh_token:1",
            pair.refresh_token.clone(),
            Duration::from_secs(60),
        );
        assert!(fx.auth.refresh_access_token(&pair.refresh_token).is_none());
    }

    #[test]
    fn revoked_access_token_stops_working() {
        let fx = fixture();
        let user = create(&fx, "revoked");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        fx.auth.revoke_access_token(&pair.access_token);
        assert_eq!(fx.auth.verify_token(&pair.access_token), None);
    }

    #[test]
    fn reset_token_is_single_use() {
        let fx = fixture();
        let user = create(&fx, "forgetful");
        let token = fx.auth.generate_password_reset_token(&user).unwrap();
        assert_eq!(
            fx.auth.verify_password_reset_token(&token).map(|u| u.id),
            Some(user.id)
        );

        fx.auth
            .reset_user_password(&token, "newsecurepassword123")
            .unwrap();
        assert!(fx
            .auth
            .authenticate_user("forgetful", "newsecurepassword123")
            .unwrap()
            .is_some());

        let err = fx
            .auth
            .reset_user_password(&token, "anothersecurepassword9")
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn reset_with_weak_password_keeps_token() {
        let fx = fixture();
        let user = create(&fx, "weakreset");
        let token = fx.auth.generate_password_reset_token(&user).unwrap();
        assert!(fx.auth.reset_user_password(&token, "short").is_err());
        assert!(fx.auth.verify_password_reset_token(&token).is_some());
    }

    #[test]
    fn reset_request_reply_does_not_leak_existence() {
        let fx = fixture();
        create(&fx, "mailme");
        let known = fx
            .auth
            .request_password_reset("mailme@example.com", "http://testserver/")
            .unwrap();
        let unknown = fx
            .auth
            .request_password_reset("ghost@example.com", "http://testserver/")
            .unwrap();
        assert_eq!(known, unknown);

        let mail = fx.mailer.last_to("mailme@example.com").unwrap();
        assert!(mail
            .body
            .contains("http://testserver/auth/password/reset/confirm?token="));
        assert!(fx.mailer.last_to("ghost@example.com").is_none());
    }

    #[test]
    fn change_password_logs_out() {
        let fx = fixture();
        let user = create(&fx, "changer");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        fx.auth
            .change_password(&user, "testpassword123", "newsecurepassword123")
            .unwrap();
        assert!(fx.auth.refresh_access_token(&pair.refresh_token).is_none());
    }

    #[test]
    fn token_expiry_matches_lifetime() {
        let fx = fixture();
        let user = create(&fx, "expiring");
        let pair = fx.auth.generate_tokens(&user).unwrap();
        let expires_at = fx.auth.token_expiry(&pair.access_token).unwrap();
        let remaining = expires_at - Utc::now();
        assert!(remaining.num_hours() >= 23 && remaining.num_hours() <= 24);
    }

    #[test]
    fn lifetimes_are_computed_without_overflow() {
        let mut config = Config::for_tests();
        config.jwt.refresh_token_days = u32::MAX;
        let db = Arc::new(Database::open(":memory:").unwrap());
        let mailer = Arc::new(MemoryMailer::new());
        let users = Arc::new(UserService::new(db.clone(), mailer.clone(), &config));
        let auth =
            AuthService::new(db, Arc::new(TtlCache::new()), users, mailer, &config).unwrap();
        assert_eq!(
            auth.refresh_lifetime,
            Duration::from_secs(u64::from(u32::MAX) * 86_400)
        );
        assert_eq!(days(7), hours(7 * 24));
    }
}
