//! Customers as referenced by orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::PhoneNumber;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole { #[default] Client, Admin, Animateur }

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Client => "CLIENT", Self::Admin => "ADMIN", Self::Animateur => "ANIMATEUR" }
    }
}

impl FromStr for UserRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLIENT" => Ok(Self::Client),
            "ADMIN" => Ok(Self::Admin),
            "ANIMATEUR" => Ok(Self::Animateur),
            other => Err(format!("unknown role {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<PhoneNumber>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Guest customer keyed by phone number, with no email and no credentials.
    pub fn guest(first_name: impl Into<String>, last_name: impl Into<String>, phone_number: PhoneNumber) -> Self {
        Self {
            id: Uuid::now_v7(), first_name: first_name.into(), last_name: last_name.into(), email: None,
            phone_number: Some(phone_number), role: UserRole::Client, created_at: Utc::now(),
        }
    }
}
