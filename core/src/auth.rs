/// Signed-in identity and the login/registration form rules
///
/// Credential storage and verification belong to an `AuthProvider`; this
/// module validates what the user typed and turns provider error codes into
/// messages.
use crate::error::BackendError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern is valid"));

/// The authenticated user a feed session acts on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
        }
    }

    /// Identity with a stable uid derived from the email address
    pub fn from_email(email: &str, display_name: Option<String>) -> Self {
        let normalized = email.trim().to_lowercase();
        let uid = Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes()).to_string();
        Self {
            uid,
            email: Some(normalized),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name stamped on new posts: display name, else email local part
    pub fn author_display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("Anonymous")
            .to_string()
    }
}

/// Per-field messages from form validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.confirm_password.is_none()
    }

    /// Field messages in form order
    pub fn messages(&self) -> Vec<&str> {
        [
            &self.username,
            &self.email,
            &self.password,
            &self.confirm_password,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect()
    }
}

fn check_email(email: &str) -> Option<String> {
    if email.trim().is_empty() {
        Some("Email is required".to_string())
    } else if !EMAIL_REGEX.is_match(email.trim()) {
        Some("Email is invalid".to_string())
    } else {
        None
    }
}

fn check_password(password: &str) -> Option<String> {
    if password.trim().is_empty() {
        Some("Password is required".to_string())
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        Some(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> FormErrors {
        FormErrors {
            email: check_email(&self.email),
            password: check_password(&self.password),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    pub fn validate(&self) -> FormErrors {
        let username = if self.username.trim().is_empty() {
            Some("Username is required".to_string())
        } else {
            None
        };

        let confirm_password = if self.confirm_password.trim().is_empty() {
            Some("Please confirm your password".to_string())
        } else if self.password != self.confirm_password {
            Some("Passwords do not match".to_string())
        } else {
            None
        };

        FormErrors {
            username,
            email: check_email(&self.email),
            password: check_password(&self.password),
            confirm_password,
        }
    }
}

/// Account sign-up and sign-in. Errors carry provider codes such as
/// `auth/wrong-password`; see [`auth_error_message`].
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Create an account and return the signed-in user, display name set to
    /// the chosen username
    async fn sign_up(&self, form: &RegistrationForm) -> Result<CurrentUser, BackendError>;

    async fn sign_in(&self, form: &LoginForm) -> Result<CurrentUser, BackendError>;
}

/// Which auth flow produced an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlow {
    Login,
    Register,
}

/// Message shown for an auth provider error code
pub fn auth_error_message(flow: AuthFlow, code: &str) -> &'static str {
    match (flow, code) {
        (_, "auth/invalid-email") => "Invalid email address.",
        (_, "auth/network-request-failed") => "Network error. Please check your connection.",
        (AuthFlow::Login, "auth/user-not-found") => "No account found with this email.",
        (AuthFlow::Login, "auth/wrong-password") => "Incorrect password.",
        (AuthFlow::Login, "auth/too-many-requests") => {
            "Too many failed attempts. Please try again later."
        }
        (AuthFlow::Register, "auth/email-already-in-use") => {
            "An account with this email already exists."
        }
        (AuthFlow::Register, "auth/weak-password") => {
            "Password is too weak. Please choose a stronger password."
        }
        (AuthFlow::Login, _) => "Login failed. Please try again.",
        (AuthFlow::Register, _) => "Registration failed. Please try again.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_is_stable_per_email() {
        let a = CurrentUser::from_email("Alice@Example.com", None);
        let b = CurrentUser::from_email("alice@example.com ", None);
        assert_eq!(a.uid, b.uid);
        assert_ne!(a.uid, CurrentUser::from_email("bob@example.com", None).uid);
    }

    #[test]
    fn test_author_display_name_fallbacks() {
        let named = CurrentUser::from_email("alice@example.com", Some("Alice".into()));
        assert_eq!(named.author_display_name(), "Alice");

        let unnamed = CurrentUser::from_email("alice@example.com", Some("  ".into()));
        assert_eq!(unnamed.author_display_name(), "alice");

        assert_eq!(CurrentUser::new("u1").author_display_name(), "Anonymous");
    }

    #[test]
    fn test_login_form() {
        let form = LoginForm {
            email: "not-an-email".into(),
            password: "123".into(),
        };
        let errors = form.validate();
        assert_eq!(errors.email.as_deref(), Some("Email is invalid"));
        assert_eq!(
            errors.password.as_deref(),
            Some("Password must be at least 6 characters")
        );

        let ok = LoginForm {
            email: "a@b.co".into(),
            password: "secret1".into(),
        };
        assert!(ok.validate().is_empty());
    }

    #[test]
    fn test_registration_form_mismatch() {
        let form = RegistrationForm {
            username: "".into(),
            email: "a@b.co".into(),
            password: "secret1".into(),
            confirm_password: "secret2".into(),
        };
        let errors = form.validate();
        assert_eq!(errors.username.as_deref(), Some("Username is required"));
        assert_eq!(
            errors.confirm_password.as_deref(),
            Some("Passwords do not match")
        );
        assert!(errors.email.is_none());
        assert_eq!(
            errors.messages(),
            vec!["Username is required", "Passwords do not match"]
        );
    }

    #[test]
    fn test_auth_error_messages() {
        assert_eq!(
            auth_error_message(AuthFlow::Login, "auth/wrong-password"),
            "Incorrect password."
        );
        assert_eq!(
            auth_error_message(AuthFlow::Register, "auth/wrong-password"),
            "Registration failed. Please try again."
        );
    }
}
