//! Remote gateway capability
//!
//! The sync engine reaches the server only through [`RemoteGateway`]. An
//! entity holds an explicit handle to a gateway; nothing else gets access to
//! the session behind it.

use serde_json::Value;
use std::fmt;

use super::document::Document;
use super::error::TransportResult;

/// HTTP method of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Record-level actions used by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Create a record; answers with `id` and `revision`
    Create,
    /// Read a record by `id`
    Show,
    /// Write a record; answers with `id` and the new `revision`
    Update,
    /// Delete a record by `id`
    Delete,
    /// List all records of a kind
    List,
}

impl Action {
    /// Action name as it appears in the API path
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Show => "show",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::List => "list",
        }
    }

    /// HTTP method the action is issued with
    pub fn method(&self) -> Method {
        match self {
            Action::Create | Action::Show => Method::Post,
            Action::Update => Method::Patch,
            Action::Delete => Method::Delete,
            Action::List => Method::Get,
        }
    }

    /// API path for a record kind (`password/show`)
    pub fn path(&self, kind: &str) -> String {
        format!("{}/{}", kind, self.name())
    }
}

/// Performs one authenticated remote call.
///
/// Returns the decoded response document, or a [`TransportError`] when the
/// call itself could not complete. A response that decodes fine but lacks
/// expected fields is returned as-is; interpreting it is the caller's job.
///
/// [`TransportError`]: super::error::TransportError
pub trait RemoteGateway: Send + Sync {
    /// Issue `method` on `action` (a path relative to the API root) with `body`.
    fn call(&self, method: Method, action: &str, body: &Document) -> TransportResult<Value>;
}
