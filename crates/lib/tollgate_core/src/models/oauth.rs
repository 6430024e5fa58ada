//! Registered OAuth clients.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthClientType {
    Public,
    Confidential,
}

impl OAuthClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthClientType::Public => "public",
            OAuthClientType::Confidential => "confidential",
        }
    }
}

impl FromStr for OAuthClientType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(OAuthClientType::Public),
            "confidential" => Ok(OAuthClientType::Confidential),
            other => Err(UnknownVariant {
                kind: "oauth client type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    None,
    ClientSecretBasic,
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenEndpointAuthMethod::None => "none",
            TokenEndpointAuthMethod::ClientSecretBasic => "client_secret_basic",
            TokenEndpointAuthMethod::ClientSecretPost => "client_secret_post",
        }
    }
}

impl FromStr for TokenEndpointAuthMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TokenEndpointAuthMethod::None),
            "client_secret_basic" => Ok(TokenEndpointAuthMethod::ClientSecretBasic),
            "client_secret_post" => Ok(TokenEndpointAuthMethod::ClientSecretPost),
            other => Err(UnknownVariant {
                kind: "token endpoint auth method",
                value: other.to_string(),
            }),
        }
    }
}

/// OAuth client registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClientRecord {
    pub client_id: String,
    pub name: String,
    pub client_type: OAuthClientType,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub is_first_party: bool,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl OAuthClientRecord {
    pub fn is_enabled(&self) -> bool {
        self.disabled_at.is_none()
    }
}
