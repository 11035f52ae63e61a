//! Server and invitation addresses.
//!
//! Addresses use the custom `parsec3://` scheme, which always means TLS
//! unless the `no_ssl=true` query parameter is present. Because mail clients
//! rarely make custom schemes clickable, invitation links are also available
//! as plain HTTP(S) redirection URLs pointing to the server:
//!
//! ```text
//! parsec3://host[:port]/<org>?a=claim_user&p=<token>
//! https://host[:port]/redirect/<org>?a=claim_user&p=<token>
//! ```
//!
//! `p` is the URL-safe, unpadded base64 encoding of the 16 token bytes.

use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::{
    errors::{ProtocolError, Result},
    ids::{InvitationToken, OrganizationId},
    invite::InvitationType,
};

/// URL scheme of protocol addresses.
pub const SCHEME: &str = "parsec3";

const PARAM_ACTION: &str = "a";
const PARAM_PAYLOAD: &str = "p";
const PARAM_NO_SSL: &str = "no_ssl";
const REDIRECT_SEGMENT: &str = "redirect";
const SSL_DEFAULT_PORT: u16 = 443;
const NO_SSL_DEFAULT_PORT: u16 = 80;

/// Address of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    hostname: String,
    port: u16,
    use_ssl: bool,
}

impl ServerAddr {
    /// Create an address. `port = None` selects the scheme default.
    pub fn new(hostname: impl Into<String>, port: Option<u16>, use_ssl: bool) -> Self {
        let default_port = if use_ssl { SSL_DEFAULT_PORT } else { NO_SSL_DEFAULT_PORT };
        Self { hostname: hostname.into(), port: port.unwrap_or(default_port), use_ssl }
    }

    /// Host name.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Port, defaulted from the scheme if not explicit.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether TLS is used.
    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    fn is_default_port(&self) -> bool {
        self.port == if self.use_ssl { SSL_DEFAULT_PORT } else { NO_SSL_DEFAULT_PORT }
    }

    fn authority(&self) -> String {
        if self.is_default_port() {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// `http(s)://host[:port]`, without trailing slash.
    pub fn to_http_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.authority())
    }

    /// `parsec3://host[:port]`, with `?no_ssl=true` when TLS is disabled.
    pub fn to_url(&self) -> String {
        let mut url = format!("{SCHEME}://{}", self.authority());
        if !self.use_ssl {
            url.push_str(&format!("?{PARAM_NO_SSL}=true"));
        }
        url
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for ServerAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = ParsedUrl::parse(s)?;
        if !parsed.path.is_empty() {
            return Err(ProtocolError::InvalidAddr(format!("unexpected path in {s:?}")));
        }
        Ok(parsed.server)
    }
}

/// Capability link handed to a claimer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvitationAddr {
    server: ServerAddr,
    organization_id: OrganizationId,
    invitation_type: InvitationType,
    token: InvitationToken,
}

impl InvitationAddr {
    /// Build an invitation address.
    pub fn new(
        server: ServerAddr,
        organization_id: OrganizationId,
        invitation_type: InvitationType,
        token: InvitationToken,
    ) -> Self {
        Self { server, organization_id, invitation_type, token }
    }

    /// Server the invitation lives on.
    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    /// Organization.
    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    /// Invitation type.
    pub fn invitation_type(&self) -> InvitationType {
        self.invitation_type
    }

    /// Invitation token.
    pub fn token(&self) -> InvitationToken {
        self.token
    }

    fn query(&self) -> String {
        format!(
            "{PARAM_ACTION}={}&{PARAM_PAYLOAD}={}",
            self.invitation_type.claim_action(),
            URL_SAFE_NO_PAD.encode(self.token.as_bytes())
        )
    }

    /// `parsec3://` form.
    pub fn to_url(&self) -> String {
        let mut url =
            format!("{SCHEME}://{}/{}?{}", self.server.authority(), self.organization_id, self.query());
        if !self.server.use_ssl {
            url.push_str(&format!("&{PARAM_NO_SSL}=true"));
        }
        url
    }

    /// HTTP(S) redirection form, suitable for emails.
    pub fn to_http_redirection_url(&self) -> String {
        format!(
            "{}/{REDIRECT_SEGMENT}/{}?{}",
            self.server.to_http_url(),
            self.organization_id,
            self.query()
        )
    }
}

impl fmt::Display for InvitationAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for InvitationAddr {
    type Err = ProtocolError;

    /// Accept both the `parsec3://` and the HTTP redirection forms.
    fn from_str(s: &str) -> Result<Self> {
        let parsed = ParsedUrl::parse(s)?;

        let org = match (parsed.redirection, parsed.path.as_slice()) {
            (false, [org]) => org,
            (true, [redirect, org]) if redirect == REDIRECT_SEGMENT => org,
            _ => return Err(ProtocolError::InvalidAddr(format!("unexpected path in {s:?}"))),
        };
        let organization_id = OrganizationId::new(org.as_str())?;

        let action = parsed.param(PARAM_ACTION)?;
        let invitation_type = InvitationType::from_claim_action(action).ok_or_else(|| {
            ProtocolError::InvalidAddr(format!(
                "expected `{PARAM_ACTION}=claim_user`, `{PARAM_ACTION}=claim_device` or \
                 `{PARAM_ACTION}=claim_shamir_recovery`"
            ))
        })?;

        let payload = URL_SAFE_NO_PAD
            .decode(parsed.param(PARAM_PAYLOAD)?)
            .map_err(|e| ProtocolError::InvalidAddr(format!("bad `{PARAM_PAYLOAD}`: {e}")))?;
        let token = InvitationToken::from_slice(&payload)?;

        Ok(Self { server: parsed.server, organization_id, invitation_type, token })
    }
}

struct ParsedUrl {
    server: ServerAddr,
    redirection: bool,
    path: Vec<String>,
    query: Vec<(String, String)>,
}

impl ParsedUrl {
    fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ProtocolError::InvalidAddr(format!("missing scheme in {url:?}")))?;

        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let query: Vec<(String, String)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();

        let no_ssl = query.iter().any(|(k, v)| k == PARAM_NO_SSL && v == "true");
        let (use_ssl, redirection) = match scheme {
            SCHEME => (!no_ssl, false),
            "https" => (true, true),
            "http" => (false, true),
            other => {
                return Err(ProtocolError::InvalidAddr(format!("unsupported scheme {other:?}")));
            },
        };

        let (authority, path) = location.split_once('/').unwrap_or((location, ""));
        let (hostname, port) = split_host_port(authority)
            .ok_or_else(|| ProtocolError::InvalidAddr(format!("bad port in {url:?}")))?;
        let port = port
            .map(str::parse::<u16>)
            .transpose()
            .map_err(|_| ProtocolError::InvalidAddr(format!("bad port in {url:?}")))?;
        if hostname.is_empty() || hostname == "[]" {
            return Err(ProtocolError::InvalidAddr(format!("missing host in {url:?}")));
        }

        let path = path.split('/').filter(|seg| !seg.is_empty()).map(str::to_string).collect();

        Ok(Self {
            server: ServerAddr::new(hostname, port, use_ssl),
            redirection,
            path,
            query: query.into_iter().filter(|(k, _)| k != PARAM_NO_SSL).collect(),
        })
    }

    fn param(&self, name: &str) -> Result<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| ProtocolError::InvalidAddr(format!("missing `{name}` parameter")))
    }
}

/// Split `host[:port]`. A bracketed IPv6 literal keeps its brackets and its
/// colons; only a `:` after the closing bracket starts the port. `None` when
/// something other than a port follows the literal.
fn split_host_port(authority: &str) -> Option<(&str, Option<&str>)> {
    if authority.starts_with('[') {
        let end = authority.find(']')? + 1;
        let (host, rest) = authority.split_at(end);
        return match rest {
            "" => Some((host, None)),
            _ => rest.strip_prefix(':').map(|port| (host, Some(port))),
        };
    }
    Some(match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    })
}
