//! Route templates for the WebDriver front door
//!
//! Templates are slash-separated; a segment starting with `:` matches any
//! single segment and captures it. A path matches a template only when the
//! segment counts are equal.

use std::collections::HashMap;

use axum::http::Method;

/// Path prefix of every WebDriver route
pub const WD_PREFIX: &str = "/wd/hub";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route template such as `/wd/hub/session/:sessionId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    template: String,
    segments: Vec<Segment>,
}

impl RouteTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = split_path(template)
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();

        Self {
            template: template.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Captured parameters when `path` matches
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Commands handled by the orchestrator itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Status,
    ListSessions,
    CreateSession,
    GetSession,
    DeleteSession,
    ListDevices,
    RecoverDevice,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::ListSessions => "list_sessions",
            Self::CreateSession => "create_session",
            Self::GetSession => "get_session",
            Self::DeleteSession => "delete_session",
            Self::ListDevices => "list_devices",
            Self::RecoverDevice => "recover_device",
        }
    }
}

/// A matched local route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub endpoint: Endpoint,
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Ordered table of local routes
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(Method, RouteTemplate, Endpoint)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn route(mut self, method: Method, template: &str, endpoint: Endpoint) -> Self {
        self.routes.push((method, RouteTemplate::parse(template), endpoint));
        self
    }

    /// The orchestrator's own commands
    pub fn webdriver() -> Self {
        Self::new()
            .route(Method::GET, "/wd/hub/status", Endpoint::Status)
            .route(Method::GET, "/wd/hub/sessions", Endpoint::ListSessions)
            .route(Method::POST, "/wd/hub/session", Endpoint::CreateSession)
            .route(Method::GET, "/wd/hub/session/:sessionId", Endpoint::GetSession)
            .route(Method::DELETE, "/wd/hub/session/:sessionId", Endpoint::DeleteSession)
            .route(Method::GET, "/wd/hub/devices", Endpoint::ListDevices)
            .route(Method::POST, "/wd/hub/devices/:deviceId/recover", Endpoint::RecoverDevice)
    }

    /// First route matching method and path
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|(m, _, _)| m == method)
            .find_map(|(_, template, endpoint)| {
                template.matches(path).map(|params| RouteMatch {
                    endpoint: *endpoint,
                    params,
                })
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::webdriver()
    }
}

/// Session id of a command under `/wd/hub/session/:sessionId/...`
///
/// Only paths with at least one segment after the id are forwarded; the
/// bare session path is handled locally.
pub fn forwarded_session(path: &str) -> Option<&str> {
    let mut parts = split_path(path);
    let prefix_ok = parts.next() == Some("wd") && parts.next() == Some("hub") && parts.next() == Some("session");
    if !prefix_ok {
        return None;
    }
    let id = parts.next()?;
    parts.next().map(|_| id)
}
