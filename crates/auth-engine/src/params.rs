//! Request parameters for the public auth operations.

use serde::Serialize;

/// Email or phone identifier for password and OTP flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl Identifier {
    pub(crate) fn apply(&self, body: &mut serde_json::Map<String, serde_json::Value>) {
        match self {
            Identifier::Email(email) => {
                body.insert("email".to_string(), email.clone().into());
            }
            Identifier::Phone(phone) => {
                body.insert("phone".to_string(), phone.clone().into());
            }
        }
    }
}

/// Parameters for creating a new account.
#[derive(Debug, Clone)]
pub struct SignUpParams {
    pub identifier: Identifier,
    pub password: String,
    /// Initial `user_metadata`.
    pub data: Option<serde_json::Value>,
    /// Where the confirmation link should land.
    pub redirect_to: Option<String>,
    pub captcha_token: Option<String>,
}

impl SignUpParams {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Identifier::Email(email.into()), password)
    }

    pub fn phone(phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Identifier::Phone(phone.into()), password)
    }

    fn new(identifier: Identifier, password: impl Into<String>) -> Self {
        Self {
            identifier,
            password: password.into(),
            data: None,
            redirect_to: None,
            captcha_token: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_redirect_to(mut self, redirect_to: impl Into<String>) -> Self {
        self.redirect_to = Some(redirect_to.into());
        self
    }
}

/// Parameters for password sign-in.
#[derive(Debug, Clone)]
pub struct SignInWithPasswordParams {
    pub identifier: Identifier,
    pub password: String,
    pub captcha_token: Option<String>,
}

impl SignInWithPasswordParams {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: Identifier::Email(email.into()),
            password: password.into(),
            captcha_token: None,
        }
    }

    pub fn phone(phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: Identifier::Phone(phone.into()),
            password: password.into(),
            captcha_token: None,
        }
    }
}

/// Parameters for sending a one-time password or magic link.
#[derive(Debug, Clone)]
pub struct OtpParams {
    pub identifier: Identifier,
    /// Create the user if it does not exist yet.
    pub should_create_user: bool,
    pub data: Option<serde_json::Value>,
    pub redirect_to: Option<String>,
    pub captcha_token: Option<String>,
}

impl OtpParams {
    pub fn email(email: impl Into<String>) -> Self {
        Self::new(Identifier::Email(email.into()))
    }

    pub fn phone(phone: impl Into<String>) -> Self {
        Self::new(Identifier::Phone(phone.into()))
    }

    fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            should_create_user: true,
            data: None,
            redirect_to: None,
            captcha_token: None,
        }
    }

    pub fn without_user_creation(mut self) -> Self {
        self.should_create_user = false;
        self
    }
}

/// Kind of one-time password being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    Email,
    Sms,
    PhoneChange,
}

/// What the OTP was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpTarget {
    Email(String),
    Phone(String),
    /// Hashed token from an email link; no separate token is needed.
    TokenHash(String),
}

/// Parameters for verifying a one-time password.
#[derive(Debug, Clone)]
pub struct VerifyOtpParams {
    pub target: OtpTarget,
    pub token: Option<String>,
    pub otp_type: OtpType,
    pub redirect_to: Option<String>,
    pub captcha_token: Option<String>,
}

impl VerifyOtpParams {
    pub fn email(email: impl Into<String>, token: impl Into<String>, otp_type: OtpType) -> Self {
        Self::new(OtpTarget::Email(email.into()), Some(token.into()), otp_type)
    }

    pub fn phone(phone: impl Into<String>, token: impl Into<String>, otp_type: OtpType) -> Self {
        Self::new(OtpTarget::Phone(phone.into()), Some(token.into()), otp_type)
    }

    pub fn token_hash(token_hash: impl Into<String>, otp_type: OtpType) -> Self {
        Self::new(OtpTarget::TokenHash(token_hash.into()), None, otp_type)
    }

    fn new(target: OtpTarget, token: Option<String>, otp_type: OtpType) -> Self {
        Self {
            target,
            token,
            otp_type,
            redirect_to: None,
            captcha_token: None,
        }
    }
}

/// Options for building an OAuth authorize URL.
#[derive(Debug, Clone, Default)]
pub struct OAuthOptions {
    pub redirect_to: Option<String>,
    /// Space-separated provider scopes.
    pub scopes: Option<String>,
    pub query_params: Vec<(String, String)>,
}

/// Attributes accepted by `update_user`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Reauthentication nonce required by some password changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Replacement `user_metadata`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Which sessions `sign_out` invalidates server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignOutScope {
    /// Every session of the user.
    #[default]
    Global,
    /// Only this client's session.
    Local,
    /// Every session except this client's; local state is kept.
    Others,
}

impl SignOutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignOutScope::Global => "global",
            SignOutScope::Local => "local",
            SignOutScope::Others => "others",
        }
    }
}
