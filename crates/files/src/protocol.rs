//! Wire shapes of the files stream.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Optional request metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Opaque correlation value, echoed back verbatim.
    #[serde(default)]
    pub request_id: Option<Value>,
    /// `"base64"` switches `write` to base64-decoding `content`.
    #[serde(default)]
    pub encoding: Option<String>,
}

impl RequestData {
    pub fn is_base64(&self) -> bool {
        self.encoding.as_deref() == Some("base64")
    }
}

/// One client request, keyed by `action`. `path` defaults to empty, which
/// normalizes to `/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FileRequest {
    List {
        #[serde(default)]
        path: String,
    },
    Cat {
        #[serde(default)]
        path: String,
    },
    Read {
        #[serde(default)]
        path: String,
        #[serde(default)]
        data: Option<RequestData>,
    },
    Write {
        #[serde(default)]
        path: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        data: Option<RequestData>,
    },
    Rm {
        #[serde(default)]
        path: String,
    },
    Mkdir {
        #[serde(default)]
        path: String,
    },
    Rename {
        #[serde(default)]
        path: String,
        #[serde(rename = "newPath")]
        new_path: String,
    },
    Copy {
        #[serde(default)]
        path: String,
        #[serde(rename = "newPath")]
        new_path: String,
    },
    Stats {
        #[serde(default)]
        path: String,
    },
    Diskusage {
        #[serde(default)]
        path: String,
    },
}

impl FileRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Cat { .. } => "cat",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Rm { .. } => "rm",
            Self::Mkdir { .. } => "mkdir",
            Self::Rename { .. } => "rename",
            Self::Copy { .. } => "copy",
            Self::Stats { .. } => "stats",
            Self::Diskusage { .. } => "diskusage",
        }
    }
}

/// A frame that didn't decode into a [`FileRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// The raw `action` string, `"unknown"` when absent.
    pub action: String,
    pub message: String,
}

/// Decode a text frame. On failure the raw action is kept so the error
/// reply can still name it.
pub fn decode_request(text: &str) -> Result<FileRequest, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError {
        action: "unknown".into(),
        message: format!("invalid request: {e}"),
    })?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    serde_json::from_value(value).map_err(|e| DecodeError {
        action,
        message: format!("invalid request: {e}"),
    })
}

/// One entry of a `list` reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub is_dir: bool,
    pub size: u64,
    pub mode: String,
    #[serde(rename = "mod")]
    pub modified: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirStats {
    pub file_count: u64,
    pub folder_count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskReport {
    pub used_percent: f64,
    pub used_str: String,
    pub total_str: String,
    pub free_str: String,
}

/// `data` field of a reply; its shape depends on the action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Entries(Vec<EntryInfo>),
    Base64(String),
    Stats(DirStats),
    Disk(DiskReport),
}

/// Reply frame. Absent fields are omitted from the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileResponse {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl FileResponse {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn ok(action: impl Into<String>) -> Self {
        Self::new(action).success(true)
    }

    pub fn failed(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(action).success(false).error(error)
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn data(mut self, data: ResponseData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl From<DecodeError> for FileResponse {
    fn from(err: DecodeError) -> Self {
        Self::new(err.action).error(err.message)
    }
}
