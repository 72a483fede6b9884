//! Protocol messages exchanged with the remote host.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::ResponseFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent to the remote host.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRequest {
    /// `pushFile`: write one file on a server.
    PushFile(PushFile),
    /// `getAllFiles`: list files together with their content.
    GetAllFiles(ListFilesRequest),
    /// `getDefinitionFile`: fetch the script API type definitions.
    GetDefinitionFile,
    /// `fullReload`: notification, no reply expected.
    FullReload,
}

impl RemoteRequest {
    /// Returns the JSON-RPC method name.
    pub fn method(&self) -> &'static str {
        match self {
            RemoteRequest::PushFile(_) => "pushFile",
            RemoteRequest::GetAllFiles(_) => "getAllFiles",
            RemoteRequest::GetDefinitionFile => "getDefinitionFile",
            RemoteRequest::FullReload => "fullReload",
        }
    }

    /// Returns the JSON-RPC params, if the method takes any.
    pub fn params(&self) -> ProtocolResult<Option<Value>> {
        let params = match self {
            RemoteRequest::PushFile(push) => Some(serde_json::to_value(push)?),
            RemoteRequest::GetAllFiles(req) => Some(serde_json::to_value(req)?),
            RemoteRequest::GetDefinitionFile | RemoteRequest::FullReload => None,
        };
        Ok(params)
    }
}

/// Push-file message.
///
/// `sourcemap` is only put on the wire when set, so plain script pushes
/// carry exactly `filename`, `content` and `server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFile {
    /// Remote filename.
    pub filename: String,
    /// File content.
    pub content: String,
    /// Destination server.
    pub server: String,
    /// True if the content is a source map.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sourcemap: bool,
}

impl PushFile {
    /// Creates a new push-file message.
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            server: server.into(),
            sourcemap: false,
        }
    }

    /// Marks the pushed content as a source map.
    pub fn with_sourcemap(mut self, sourcemap: bool) -> Self {
        self.sourcemap = sourcemap;
        self
    }
}

/// Push acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAck {
    /// Filename that was acknowledged.
    pub filename: String,
}

impl PushAck {
    /// Interprets the reply to a `pushFile` request.
    pub fn from_response(filename: impl Into<String>, frame: ResponseFrame) -> ProtocolResult<Self> {
        frame.into_result()?;
        Ok(Self {
            filename: filename.into(),
        })
    }
}

/// List-files request, scoped to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesRequest {
    /// Server to list.
    pub server: String,
}

impl ListFilesRequest {
    /// Creates a new list-files request.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }
}

/// A file stored on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Remote filename.
    pub filename: String,
    /// File content.
    pub content: String,
}

/// List-files response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListFilesResponse {
    /// Files found on the server.
    pub files: Vec<RemoteFile>,
}

impl ListFilesResponse {
    /// Interprets the reply to a `getAllFiles` request.
    pub fn from_response(frame: ResponseFrame) -> ProtocolResult<Self> {
        let files = serde_json::from_value(frame.into_result()?)?;
        Ok(Self { files })
    }
}

/// Script API definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionFile {
    /// Definition file content.
    pub content: String,
}

impl DefinitionFile {
    /// Interprets the reply to a `getDefinitionFile` request.
    pub fn from_response(frame: ResponseFrame) -> ProtocolResult<Self> {
        match frame.into_result()? {
            Value::String(content) => Ok(Self { content }),
            other => Err(ProtocolError::invalid_frame(format!(
                "definition file is not a string: {other}"
            ))),
        }
    }
}
