// User account operations: registration, updates, soft deletion, lookup,
// listing and profile management.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{Database, DuplicateUser};
use crate::error::{ServiceError, ServiceResult};
use crate::mailer::{Email, Mailer};
use crate::model::{
    NewUser, Page, ProfileUpdate, User, UserFilter, UserProfile, UserType, UserUpdate,
};
use crate::password::{self, PasswordError};
use crate::validate::{self, mask_email, mask_phone};

/// Business logic over the `users` and `user_profiles` tables.
pub struct UserService {
    db: Arc<Database>,
    mailer: Arc<dyn Mailer>,
    from_email: String,
    default_page_size: u32,
    max_page_size: u32,
}

impl UserService {
    pub fn new(db: Arc<Database>, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        Self {
            db,
            mailer,
            from_email: config.app.default_from_email.clone(),
            default_page_size: config.app.page_size,
            max_page_size: config.app.max_page_size,
        }
    }

    pub fn default_page_size(&self) -> u32 {
        self.default_page_size
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new account. Validates every field, rejects duplicates,
    /// creates the empty profile and sends a welcome mail.
    pub fn create_user(&self, new: NewUser, registration_ip: Option<&str>) -> ServiceResult<User> {
        let username = validate::normalize_username(&new.username)?;
        let email = validate::normalize_email(&new.email)?;
        let phone_number = normalize_phone(new.phone_number.as_deref())?;
        if let Some(nickname) = &new.nickname {
            validate::max_chars("Nickname", nickname, validate::NICKNAME_MAX)?;
        }
        if let Some(bio) = &new.bio {
            validate::max_chars("Bio", bio, validate::BIO_MAX)?;
        }

        password::validate_password(&new.password, Some(&username), Some(&email))
            .map_err(password_error)?;

        if self.db.username_exists(&username)? {
            warn!("registration rejected, username {username} taken");
            return Err(ServiceError::validation(format!(
                "Username '{username}' already exists"
            )));
        }
        if self.db.email_exists(&email, None)? {
            warn!("registration rejected, email {} taken", mask_email(&email));
            return Err(ServiceError::validation(format!(
                "Email '{email}' already exists"
            )));
        }
        if let Some(phone) = &phone_number {
            if self.db.phone_exists(phone, None)? {
                return Err(ServiceError::validation("Phone number already exists"));
            }
        }

        let hash = password::hash_password(&new.password).map_err(password_error)?;
        let record = NewUser {
            username,
            email,
            phone_number,
            ..new
        };
        let user = self
            .db
            .insert_user(&record, &hash, registration_ip)
            .map_err(|e| duplicate_error(e, &record.username, &record.email))?;
        self.db.get_or_create_profile(user.id)?;

        info!(user_id = user.id, "user created: {}", user.username);
        self.send_welcome(&user);
        Ok(user)
    }

    /// Create a staff superuser, for the command line.
    pub fn create_superuser(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> ServiceResult<User> {
        let user = self.create_user(
            NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
                user_type: UserType::Superuser,
                is_staff: true,
                is_superuser: true,
                ..NewUser::default()
            },
            None,
        )?;
        info!(user_id = user.id, "superuser created: {}", user.username);
        Ok(user)
    }

    fn send_welcome(&self, user: &User) {
        let email = Email {
            from: self.from_email.clone(),
            to: user.email.clone(),
            subject: "Welcome!".to_string(),
            body: format!(
                "Dear {}, welcome to the platform! Your account is ready.",
                user.display_name()
            ),
        };
        match self.mailer.send(&email) {
            Ok(()) => info!("welcome mail sent to {}", mask_email(&user.email)),
            Err(e) => warn!("welcome mail to {} failed: {e:#}", mask_email(&user.email)),
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply the provided fields of `update` to `user`. A changed email
    /// clears `email_verified`; a changed phone clears `phone_verified`.
    pub fn update_user(&self, user: &User, update: UserUpdate) -> ServiceResult<User> {
        let mut next = user.clone();
        let mut changed: Vec<&str> = Vec::new();

        if let Some(nickname) = update.nickname {
            validate::max_chars("Nickname", &nickname, validate::NICKNAME_MAX)?;
            next.nickname = nickname;
            changed.push("nickname");
        }
        if let Some(email) = update.email {
            let email = validate::normalize_email(&email)?;
            if email != user.email {
                if self.db.email_exists(&email, Some(user.id))? {
                    return Err(ServiceError::validation(format!(
                        "Email '{email}' already exists"
                    )));
                }
                info!(
                    user_id = user.id,
                    "email changed: {} -> {}",
                    mask_email(&user.email),
                    mask_email(&email)
                );
                next.email = email;
                next.email_verified = false;
                changed.push("email");
            }
        }
        if let Some(phone) = update.phone_number {
            let phone = normalize_phone(Some(&phone))?;
            if phone != user.phone_number {
                if let Some(p) = &phone {
                    if self.db.phone_exists(p, Some(user.id))? {
                        return Err(ServiceError::validation("Phone number already exists"));
                    }
                }
                info!(
                    user_id = user.id,
                    "phone changed: {} -> {}",
                    user.phone_number.as_deref().map(mask_phone).unwrap_or_default(),
                    phone.as_deref().map(mask_phone).unwrap_or_default()
                );
                next.phone_number = phone;
                next.phone_verified = false;
                changed.push("phone_number");
            }
        }
        if let Some(birth_date) = update.birth_date {
            next.birth_date = Some(birth_date);
            changed.push("birth_date");
        }
        if let Some(bio) = update.bio {
            validate::max_chars("Bio", &bio, validate::BIO_MAX)?;
            next.bio = bio;
            changed.push("bio");
        }
        if let Some(timezone) = update.timezone.filter(|s| !s.trim().is_empty()) {
            next.timezone = timezone;
            changed.push("timezone");
        }
        if let Some(language) = update.language.filter(|s| !s.trim().is_empty()) {
            next.language = language;
            changed.push("language");
        }
        if let Some(avatar) = update.avatar {
            next.avatar = Some(avatar).filter(|s| !s.is_empty());
            changed.push("avatar");
        }

        if changed.is_empty() {
            return Ok(next);
        }
        let stored = self
            .db
            .update_user(&next)
            .map_err(|e| duplicate_error(e, &next.username, &next.email))?;
        info!(user_id = user.id, "user updated: {}, fields {changed:?}", user.username);
        Ok(stored)
    }

    /// Change a password after checking the current one.
    pub fn update_password(&self, user: &User, old: &str, new: &str) -> ServiceResult<()> {
        if !password::verify_password(old, &user.password_hash) {
            warn!(user_id = user.id, "password change rejected, wrong current password");
            return Err(ServiceError::validation("Current password is incorrect"));
        }
        self.set_password(user, new)?;
        info!(user_id = user.id, "password updated: {}", user.username);
        Ok(())
    }

    /// Validate, hash and store `new` without checking the old password.
    pub fn set_password(&self, user: &User, new: &str) -> ServiceResult<()> {
        password::validate_password(new, Some(&user.username), Some(&user.email))
            .map_err(password_error)?;
        let hash = password::hash_password(new).map_err(password_error)?;
        self.db.set_password_hash(user.id, &hash)?;
        Ok(())
    }

    pub fn soft_delete_user(&self, user: &User) -> ServiceResult<()> {
        if !self.db.set_deleted(user.id, Utc::now())? {
            return Err(ServiceError::not_found("User not found"));
        }
        info!(user_id = user.id, "user soft deleted: {}", user.username);
        Ok(())
    }

    /// Undo a soft delete. Works on deleted users by id.
    pub fn restore_user(&self, user_id: i64) -> ServiceResult<User> {
        if !self.db.restore(user_id)? {
            return Err(ServiceError::not_found("User not found"));
        }
        let user = self.load(user_id)?;
        info!(user_id, "user restored: {}", user.username);
        Ok(user)
    }

    pub fn verify_email(&self, user: &User) -> ServiceResult<User> {
        self.db.set_email_verified(user.id, true)?;
        info!(user_id = user.id, "email verified: {}", user.username);
        self.load(user.id)
    }

    pub fn verify_phone(&self, user: &User) -> ServiceResult<User> {
        self.db.set_phone_verified(user.id, true)?;
        info!(user_id = user.id, "phone verified: {}", user.username);
        self.load(user.id)
    }

    fn load(&self, user_id: i64) -> ServiceResult<User> {
        self.db
            .get_user(user_id)?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn get_user_by_username(&self, username: &str) -> ServiceResult<Option<User>> {
        Ok(self
            .db
            .find_user_by_username(&username.trim().to_lowercase(), false)?)
    }

    pub fn get_user_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
        Ok(self.db.find_user_by_email(email.trim(), false)?)
    }

    pub fn get_user_by_phone(&self, phone: &str) -> ServiceResult<Option<User>> {
        Ok(self.db.find_user_by_phone(phone.trim(), false)?)
    }

    /// A user that exists and is not soft deleted.
    pub fn get_active_user(&self, user_id: i64) -> ServiceResult<User> {
        match self.db.get_user(user_id)? {
            Some(user) if !user.is_deleted => Ok(user),
            _ => Err(ServiceError::not_found("User not found")),
        }
    }

    /// Any user by id, deleted ones included.
    pub fn get_user_any(&self, user_id: i64) -> ServiceResult<User> {
        self.load(user_id)
    }

    pub fn search_users(&self, query: &str, limit: u32) -> ServiceResult<Vec<User>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, self.max_page_size);
        Ok(self.db.search_users(query, limit)?)
    }

    /// One page of users matching `filter`. `page` starts at 1.
    pub fn list_users(
        &self,
        filter: &UserFilter,
        page: u32,
        page_size: u32,
    ) -> ServiceResult<Page<User>> {
        if page == 0 {
            return Err(ServiceError::validation("page must be at least 1"));
        }
        if page_size == 0 || page_size > self.max_page_size {
            return Err(ServiceError::validation(format!(
                "page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        let (items, total) = self.db.list_users(filter, page, page_size)?;
        Ok(Page::new(items, total, page, page_size))
    }

    // ------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------

    pub fn get_profile(&self, user: &User) -> ServiceResult<UserProfile> {
        Ok(self.db.get_or_create_profile(user.id)?)
    }

    pub fn update_profile(&self, user: &User, update: ProfileUpdate) -> ServiceResult<UserProfile> {
        let mut profile = self.db.get_or_create_profile(user.id)?;
        let mut changed: Vec<&str> = Vec::new();

        if let Some(gender) = update.gender {
            profile.gender = Some(gender);
            changed.push("gender");
        }
        if let Some(occupation) = update.occupation {
            validate::max_chars("Occupation", &occupation, validate::OCCUPATION_MAX)?;
            profile.occupation = occupation;
            changed.push("occupation");
        }
        if let Some(company) = update.company {
            validate::max_chars("Company", &company, validate::COMPANY_MAX)?;
            profile.company = company;
            changed.push("company");
        }
        if let Some(address) = update.address {
            validate::max_chars("Address", &address, validate::ADDRESS_MAX)?;
            profile.address = address;
            changed.push("address");
        }
        if let Some(website) = update.website {
            validate::validate_website(&website)?;
            profile.website = website;
            changed.push("website");
        }
        if let Some(interests) = update.interests {
            validate::max_chars("Interests", &interests, validate::INTERESTS_MAX)?;
            profile.interests = interests;
            changed.push("interests");
        }
        if let Some(links) = update.social_links {
            profile.social_links = links;
            changed.push("social_links");
        }
        if let Some(tags) = update.tags {
            profile.tags = tags;
            changed.push("tags");
        }
        if let Some(privacy) = update.privacy_settings {
            profile.privacy_settings = privacy;
            changed.push("privacy_settings");
        }

        if changed.is_empty() {
            return Ok(profile);
        }
        let stored = self.db.update_profile(&profile)?;
        info!(user_id = user.id, "profile updated: {}, fields {changed:?}", user.username);
        Ok(stored)
    }
}

/// Blank phone input means "no phone".
fn normalize_phone(phone: Option<&str>) -> ServiceResult<Option<String>> {
    match phone.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => {
            validate::validate_phone(p)?;
            Ok(Some(p.to_string()))
        }
        None => Ok(None),
    }
}

/// A concurrent writer can claim a username, email or phone between the
/// existence check and the write; report that the same way as the check.
fn duplicate_error(err: anyhow::Error, username: &str, email: &str) -> ServiceError {
    match err.downcast_ref::<DuplicateUser>() {
        Some(DuplicateUser::Username) => {
            ServiceError::validation(format!("Username '{username}' already exists"))
        }
        Some(DuplicateUser::Email) => {
            ServiceError::validation(format!("Email '{email}' already exists"))
        }
        Some(DuplicateUser::PhoneNumber) => {
            ServiceError::validation("Phone number already exists")
        }
        None => ServiceError::Internal(err),
    }
}

fn password_error(err: PasswordError) -> ServiceError {
    match err {
        PasswordError::Hash(msg) => ServiceError::Internal(anyhow!("password hashing failed: {msg}")),
        other => ServiceError::Validation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::MemoryMailer;
    use crate::model::{Gender, UserStatus};

    fn service() -> (UserService, Arc<MemoryMailer>) {
        let db = Arc::new(Database::open(":memory:").expect("in-memory database should open"));
        let mailer = Arc::new(MemoryMailer::new());
        let svc = UserService::new(db, mailer.clone(), &Config::for_tests());
        (svc, mailer)
    }

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "testpassword123".to_string(),
            ..NewUser::default()
        }
    }

    #[test]
    fn create_user_normalizes_and_sends_welcome() {
        let (svc, mailer) = service();
        let user = svc
            .create_user(
                NewUser {
                    username: "NewUser".into(),
                    email: "NewUser@Example.COM".into(),
                    nickname: Some("Newbie".into()),
                    ..new_user("ignored")
                },
                Some("192.0.2.1"),
            )
            .unwrap();

        assert_eq!(user.username, "newuser");
        assert_eq!(user.email, "NewUser@example.com");
        assert_eq!(user.nickname, "Newbie");
        assert_ne!(user.password_hash, "testpassword123");
        assert!(password::verify_password("testpassword123", &user.password_hash));

        let welcome = mailer.last_to("NewUser@example.com").unwrap();
        assert_eq!(welcome.subject, "Welcome!");
        assert!(welcome.body.contains("Newbie"));
        // Profile exists right away.
        assert_eq!(svc.get_profile(&user).unwrap().user_id, user.id);
    }

    #[test]
    fn duplicate_username_is_case_insensitive() {
        let (svc, _) = service();
        svc.create_user(new_user("dupe"), None).unwrap();
        let err = svc
            .create_user(
                NewUser {
                    email: "other@example.com".into(),
                    ..new_user("DUPE")
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Username 'dupe' already exists");
    }

    #[test]
    fn duplicate_email_and_phone_are_rejected() {
        let (svc, _) = service();
        svc.create_user(
            NewUser {
                phone_number: Some("13812345678".into()),
                ..new_user("first")
            },
            None,
        )
        .unwrap();

        let err = svc
            .create_user(
                NewUser {
                    email: "first@example.com".into(),
                    ..new_user("second")
                },
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let err = svc
            .create_user(
                NewUser {
                    phone_number: Some("13812345678".into()),
                    ..new_user("third")
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Phone number already exists");
    }

    #[test]
    fn weak_password_is_a_validation_error() {
        let (svc, _) = service();
        let err = svc
            .create_user(
                NewUser {
                    password: "123".into(),
                    ..new_user("weakling")
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn blank_phone_is_stored_as_none() {
        let (svc, _) = service();
        let a = svc
            .create_user(
                NewUser {
                    phone_number: Some("  ".into()),
                    ..new_user("blank_a")
                },
                None,
            )
            .unwrap();
        let b = svc
            .create_user(
                NewUser {
                    phone_number: Some(String::new()),
                    ..new_user("blank_b")
                },
                None,
            )
            .unwrap();
        assert!(a.phone_number.is_none());
        assert!(b.phone_number.is_none());
    }

    #[test]
    fn changing_email_resets_verification() {
        let (svc, _) = service();
        let user = svc.create_user(new_user("verified"), None).unwrap();
        let user = svc.verify_email(&user).unwrap();
        assert!(user.email_verified);

        let same = svc
            .update_user(
                &user,
                UserUpdate {
                    email: Some("verified@example.com".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();
        assert!(same.email_verified);

        let moved = svc
            .update_user(
                &user,
                UserUpdate {
                    email: Some("moved@example.com".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(moved.email, "moved@example.com");
        assert!(!moved.email_verified);
    }

    #[test]
    fn changing_phone_resets_verification() {
        let (svc, _) = service();
        let user = svc
            .create_user(
                NewUser {
                    phone_number: Some("13812345678".into()),
                    ..new_user("phoney")
                },
                None,
            )
            .unwrap();
        let user = svc.verify_phone(&user).unwrap();
        let updated = svc
            .update_user(
                &user,
                UserUpdate {
                    phone_number: Some("13987654321".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.phone_number.as_deref(), Some("13987654321"));
        assert!(!updated.phone_verified);
    }

    #[test]
    fn update_with_no_fields_is_a_no_op() {
        let (svc, _) = service();
        let user = svc.create_user(new_user("idle"), None).unwrap();
        let same = svc.update_user(&user, UserUpdate::default()).unwrap();
        assert_eq!(same, user);
    }

    #[test]
    fn update_password_checks_old_password() {
        let (svc, _) = service();
        let user = svc.create_user(new_user("pwuser"), None).unwrap();

        let err = svc
            .update_password(&user, "wrongpassword", "newsecurepassword123")
            .unwrap_err();
        assert_eq!(err.to_string(), "Current password is incorrect");

        svc.update_password(&user, "testpassword123", "newsecurepassword123")
            .unwrap();
        let stored = svc.get_active_user(user.id).unwrap();
        assert!(password::verify_password("newsecurepassword123", &stored.password_hash));
    }

    #[test]
    fn soft_delete_then_restore() {
        let (svc, _) = service();
        let user = svc.create_user(new_user("ghost"), None).unwrap();
        svc.soft_delete_user(&user).unwrap();

        assert!(svc.get_user_by_username("ghost").unwrap().is_none());
        assert!(matches!(
            svc.get_active_user(user.id),
            Err(ServiceError::NotFound(_))
        ));
        assert!(svc.soft_delete_user(&user).is_err());

        let restored = svc.restore_user(user.id).unwrap();
        assert_eq!(restored.status, UserStatus::Active);
        assert!(!restored.is_deleted);
        assert!(svc.restore_user(9999).is_err());
    }

    #[test]
    fn list_users_validates_paging() {
        let (svc, _) = service();
        for name in ["list_a", "list_b", "list_c"] {
            svc.create_user(new_user(name), None).unwrap();
        }
        let page = svc.list_users(&UserFilter::default(), 1, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);

        assert!(svc.list_users(&UserFilter::default(), 0, 2).is_err());
        assert!(svc.list_users(&UserFilter::default(), 1, 0).is_err());
        assert!(svc.list_users(&UserFilter::default(), 1, 101).is_err());
    }

    #[test]
    fn search_ignores_blank_queries() {
        let (svc, _) = service();
        svc.create_user(new_user("findable"), None).unwrap();
        assert!(svc.search_users("   ", 20).unwrap().is_empty());
        assert_eq!(svc.search_users("FINDABLE", 20).unwrap().len(), 1);
    }

    #[test]
    fn profile_update_validates_and_persists() {
        let (svc, _) = service();
        let user = svc.create_user(new_user("profiled"), None).unwrap();

        let err = svc
            .update_profile(
                &user,
                ProfileUpdate {
                    website: Some("not a url".into()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let profile = svc
            .update_profile(
                &user,
                ProfileUpdate {
                    gender: Some(Gender::M),
                    occupation: Some("Engineer".into()),
                    tags: Some(vec!["rust".into()]),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(profile.gender, Some(Gender::M));
        assert_eq!(profile.occupation, "Engineer");
        assert_eq!(svc.get_profile(&user).unwrap().tags, vec!["rust"]);
    }

    #[test]
    fn superuser_has_admin_flags() {
        let (svc, _) = service();
        let admin = svc
            .create_superuser("root", "root@example.com", "testpassword123")
            .unwrap();
        assert_eq!(admin.user_type, UserType::Superuser);
        assert!(admin.is_staff && admin.is_superuser);
        assert!(admin.is_admin());
    }
}
