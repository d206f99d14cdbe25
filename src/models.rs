//! Data models for portal authentication

use crate::crypto::{derive_key, encrypt_field, SHARED_KEY};
use crate::error::PortalError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// ISP uplink an account authenticates against. Discriminants are the
/// portal's own codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum Isp {
    Internal = 1,
    Mobile = 2,
    Telecom = 3,
    Unicom = 4,
    #[default]
    Unknown = 0,
}

impl Isp {
    /// Accepts config identifiers and the channel names the portal reports.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "internal" | "校园网" => Isp::Internal,
            "mobile" | "中国移动" => Isp::Mobile,
            "telecom" | "中国电信" => Isp::Telecom,
            "unicom" | "中国联通" => Isp::Unicom,
            _ => Isp::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Isp::Internal => "internal",
            Isp::Mobile => "mobile",
            Isp::Telecom => "telecom",
            Isp::Unicom => "unicom",
            Isp::Unknown => "unknown",
        }
    }
}

impl From<String> for Isp {
    fn from(name: String) -> Self {
        Isp::parse(&name)
    }
}

impl fmt::Display for Isp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Portal account bound to one network interface
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub isp: Isp,
}

/// ISP to channel id, as reported by the portal for one signin
pub type ChannelMapping = HashMap<Isp, i64>;

pub const DISCOVERY_CHANNEL: &str = "_GET";
pub const DISCOVERY_SIGN: &str = "firstauth";
pub const SIGNIN_SIGN: &str = "secondauth";
const STATE_QUERY: &str = "on_or_off";

/// Body of `POST /api/v1/login`, used for both channel discovery and signin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub ifautologin: String,
    pub channel: String,
    pub pagesign: String,
    pub usripadd: String,
}

impl LoginRequest {
    fn base(account: &Account, addr: Ipv4Addr) -> Self {
        Self {
            username: account.username.clone(),
            password: account.password.clone(),
            ifautologin: "0".to_string(),
            channel: String::new(),
            pagesign: String::new(),
            usripadd: addr.to_string(),
        }
    }

    /// Channel discovery ("firstauth"), sent in the clear
    pub fn discovery(account: &Account, addr: Ipv4Addr) -> Self {
        Self {
            channel: DISCOVERY_CHANNEL.to_string(),
            pagesign: DISCOVERY_SIGN.to_string(),
            ..Self::base(account, addr)
        }
    }

    /// Signin ("secondauth"), still in plaintext; call [`Self::encrypt`] before sending
    pub fn signin(account: &Account, channel: i64, addr: Ipv4Addr) -> Self {
        Self {
            channel: channel.to_string(),
            pagesign: SIGNIN_SIGN.to_string(),
            ..Self::base(account, addr)
        }
    }

    /// The username goes under the shared key so the portal can derive the
    /// per-user key that protects every other field.
    pub fn encrypt(&self) -> Result<Self, PortalError> {
        let key = derive_key(&self.username);
        Ok(Self {
            username: encrypt_field(SHARED_KEY, &self.username)?,
            password: encrypt_field(&key, &self.password)?,
            ifautologin: encrypt_field(&key, &self.ifautologin)?,
            channel: encrypt_field(&key, &self.channel)?,
            pagesign: encrypt_field(&key, &self.pagesign)?,
            usripadd: encrypt_field(&key, &self.usripadd)?,
        })
    }
}

/// Body of `POST /api/v1/pre_login`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateQueryRequest {
    pub getuseronlinestate: String,
    pub user_ipadress: String,
}

impl StateQueryRequest {
    pub fn encrypted(addr: Ipv4Addr) -> Result<Self, PortalError> {
        Ok(Self {
            getuseronlinestate: encrypt_field(SHARED_KEY, STATE_QUERY)?,
            user_ipadress: encrypt_field(SHARED_KEY, &addr.to_string())?,
        })
    }
}

/// Code and message shared by every portal response
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseStatus {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelListResponse {
    pub data: ChannelList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelList {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigninResponse {
    #[serde(default)]
    pub data: SigninSession,
}

/// Session details returned on signin; only logged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigninSession {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub balance: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub outport: String,
    #[serde(default)]
    pub totaltimespan: String,
    #[serde(default)]
    pub usripadd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateQueryResponse {
    pub data: OnlineStateData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnlineStateData {
    #[serde(rename = "useronlinestate")]
    pub online_state: String,
}
