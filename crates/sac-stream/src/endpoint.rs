//! Stream endpoint description: target URL plus auth-token placement.

/// Where the auth token is carried on connect.
///
/// WebSocket endpoints embed the token as a query parameter (browsers
/// cannot set headers on WebSocket upgrades, and the backend keeps that
/// contract); streaming-HTTP endpoints use a request header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthToken {
    /// No authentication.
    None,
    /// Token appended to the URL query string, e.g. `?token=<value>`.
    Query { param: String, token: String },
    /// Token carried in a request header, e.g. `Authorization: Bearer <value>`.
    Header { name: String, value: String },
}

impl AuthToken {
    /// Query-parameter token with the platform's default parameter name.
    pub fn query(token: impl Into<String>) -> Self {
        Self::Query {
            param: "token".to_string(),
            token: token.into(),
        }
    }

    /// Bearer-token authorization header.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Header {
            name: "authorization".to_string(),
            value: format!("Bearer {}", token.into()),
        }
    }
}

/// A stream endpoint: URL plus auth placement.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Target URL (`ws://`/`wss://` for WebSocket, `http(s)://` for
    /// streaming HTTP).
    pub url: String,
    /// Auth token placement.
    pub auth: AuthToken,
}

impl Endpoint {
    /// Create an unauthenticated endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: AuthToken::None,
        }
    }

    /// Set the auth token.
    #[must_use]
    pub fn auth(mut self, auth: AuthToken) -> Self {
        self.auth = auth;
        self
    }

    /// The URL to actually connect to, with any query-parameter token
    /// appended.
    pub fn request_url(&self) -> String {
        match &self.auth {
            AuthToken::Query { param, token } => {
                let mut url = self.url.clone();
                append_query_pair(&mut url, param, token);
                url
            }
            _ => self.url.clone(),
        }
    }

    /// The header to set on connect, if the token rides in a header.
    pub fn auth_header(&self) -> Option<(&str, &str)> {
        match &self.auth {
            AuthToken::Header { name, value } => Some((name.as_str(), value.as_str())),
            _ => None,
        }
    }
}

fn append_query_pair(url: &mut String, param: &str, value: &str) {
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(param);
    url.push('=');
    url.push_str(value);
}
