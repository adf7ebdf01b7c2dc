use serde::{Deserialize, Serialize};

/// Generic response envelope used by the EasySight backend.
///
/// Business failures can arrive with HTTP 200 and `success == false`;
/// the request layer surfaces those as errors.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    #[serde(default)]
    pub pages: i64,
}

/// Error body shape for non-2xx responses.
///
/// FastAPI-style: `detail` is either a plain message or, for 422,
/// a list of `{loc, msg, type}` items.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    /// Flatten the detail field into a single display message.
    /// Field-level validation messages are joined with ", ".
    pub fn display_message(&self) -> Option<String> {
        match &self.detail {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.join(", "))
                }
            }
            _ => None,
        }
    }
}
