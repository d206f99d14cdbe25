//! Portal response parsing
//!
//! Every response shares a `{code, message, data}` envelope, but `data` has
//! an unrelated shape per endpoint. The status is checked first so failure
//! responses with an empty or odd `data` are reported by code, not as
//! decode errors.

use crate::error::PortalError;
use crate::models::{
    ChannelListResponse, ChannelMapping, Isp, ResponseStatus, SigninResponse, SigninSession,
    StateQueryResponse,
};

/// Codes accepted for channel discovery
const DISCOVERY_CODES: [i64; 3] = [200, 201, 202];
const SUCCESS_CODE: i64 = 200;

fn check_status(body: &str, accepted: &[i64]) -> Result<(), PortalError> {
    let status: ResponseStatus = serde_json::from_str(body)?;
    if !accepted.contains(&status.code) {
        tracing::debug!("Portal answered {}: {}", status.code, status.message);
        return Err(PortalError::UnexpectedCode(status.code));
    }
    Ok(())
}

/// Parse the channel list of a discovery response. A non-integer channel id
/// fails the whole response.
pub fn parse_channel_mapping(body: &str) -> Result<ChannelMapping, PortalError> {
    check_status(body, &DISCOVERY_CODES)?;
    let resp: ChannelListResponse = serde_json::from_str(body)?;

    let mut mapping = ChannelMapping::with_capacity(resp.data.channels.len());
    for channel in resp.data.channels {
        let id = channel
            .id
            .trim()
            .parse::<i64>()
            .map_err(|source| PortalError::InvalidChannelId {
                raw: channel.id.clone(),
                source,
            })?;
        mapping.insert(Isp::parse(&channel.name), id);
    }
    Ok(mapping)
}

pub fn parse_signin(body: &str) -> Result<SigninSession, PortalError> {
    check_status(body, &[SUCCESS_CODE])?;
    let resp: SigninResponse = serde_json::from_str(body)?;
    Ok(resp.data)
}

/// `true` for "on", `false` for "off"; anything else is an error
pub fn parse_online_state(body: &str) -> Result<bool, PortalError> {
    check_status(body, &[SUCCESS_CODE])?;
    let resp: StateQueryResponse = serde_json::from_str(body)?;
    match resp.data.online_state.as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(PortalError::UnknownOnlineState(other.to_string())),
    }
}
