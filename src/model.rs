//! Users and roles.

use crate::{dataplane::Document, unix_now};
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Stored user record. `password` holds the Argon2id PHC string.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub username: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub claims: Map<String, Value>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub created: i64,
}

impl User {
    #[must_use]
    pub fn new(username: &str, password_hash: String, roles: Vec<String>) -> Self {
        Self {
            username: username.to_string(),
            password_hash,
            roles,
            claims: Map::new(),
            profile: Profile::default(),
            org: None,
            created: unix_now(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl Document for User {
    const KIND: &'static str = "user";

    fn key(&self) -> &str {
        &self.username
    }
}

/// User as returned by the API, without the password hash.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserView {
    pub username: String,
    pub roles: Vec<String>,
    #[schema(value_type = Object)]
    pub claims: Map<String, Value>,
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub created: i64,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            roles: user.roles,
            claims: user.claims,
            profile: user.profile,
            org: user.org,
            created: user.created,
        }
    }
}

/// Incoming user payload. The password is hashed before anything is stored.
#[derive(ToSchema, Deserialize, Debug)]
pub struct NewUser {
    pub username: String,
    #[schema(value_type = String, format = Password)]
    pub password: SecretString,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub claims: Map<String, Value>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub org: Option<String>,
}

impl NewUser {
    /// Turn the request into a stored record once the password is hashed.
    #[must_use]
    pub fn into_user(self, password_hash: String) -> User {
        User {
            username: self.username.trim().to_string(),
            password_hash,
            roles: self.roles,
            claims: self.claims,
            profile: self.profile,
            org: self.org,
            created: unix_now(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub created: i64,
}

const fn default_active() -> bool {
    true
}

impl Role {
    #[must_use]
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            active: true,
            created: unix_now(),
        }
    }
}

impl Document for Role {
    const KIND: &'static str = "role";

    fn key(&self) -> &str {
        &self.name
    }
}

/// Usernames may be plain names or email addresses.
#[must_use]
pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.@+-]{1,128}$").is_ok_and(|re| re.is_match(username))
}

#[must_use]
pub fn valid_role_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").is_ok_and(|re| re.is_match(name))
}
