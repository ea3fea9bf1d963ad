//! Realtime protocol types.
//!
//! Every frame in both directions is `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::ChatMessage;
use crate::workspace::DirectoryListing;

// ============================================================================
// Requests (Client -> Server)
// ============================================================================

/// Named requests a client may send over its session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    /// List the immediate children of a directory.
    #[serde(rename = "getDirectory")]
    GetDirectory(String),

    /// Create a directory and its missing ancestors.
    #[serde(rename = "makeDirectory")]
    MakeDirectory(String),

    /// Recursively delete a directory.
    #[serde(rename = "deleteDirectory")]
    DeleteDirectory(String),

    /// Stream a chat completion for the given transcript.
    #[serde(rename = "promptAI")]
    PromptAi(Vec<ChatMessage>),

    /// Fetch a page and extract the text between two delimiters.
    #[serde(rename = "scrape")]
    Scrape(ScrapeRequest),

    /// Run an allow-listed diagnostic command.
    #[serde(rename = "exec")]
    Exec(ExecRequest),

    /// Ask for the host's LAN address.
    #[serde(rename = "getIP")]
    GetIp,
}

impl ClientRequest {
    /// Event name, used for replies and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::GetDirectory(_) => "getDirectory",
            ClientRequest::MakeDirectory(_) => "makeDirectory",
            ClientRequest::DeleteDirectory(_) => "deleteDirectory",
            ClientRequest::PromptAi(_) => "promptAI",
            ClientRequest::Scrape(_) => "scrape",
            ClientRequest::Exec(_) => "exec",
            ClientRequest::GetIp => "getIP",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(alias = "html1")]
    pub start_delim: String,
    #[serde(alias = "html2")]
    pub end_delim: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub cmd: String,
    #[serde(default)]
    pub value: String,
}

// ============================================================================
// Events (Server -> Client)
// ============================================================================

/// Events emitted to a single session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Session registered.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },

    /// Keepalive.
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "getDirectory")]
    Directory(DirectoryListing),

    /// One generated fragment, or the finish sentinel.
    #[serde(rename = "promptAI")]
    Chunk(String),

    #[serde(rename = "scrape")]
    Scraped(String),

    #[serde(rename = "exec")]
    ExecOutput(String),

    #[serde(rename = "getIP")]
    LocalIp(String),

    /// A request failed in a way the client should know about.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Name of the request that failed
    pub request: String,
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::DirectoryEntry;
    use serde_json::json;

    #[test]
    fn test_parse_path_requests() {
        let req: ClientRequest =
            serde_json::from_value(json!({"event": "getDirectory", "data": "/Home"})).unwrap();
        assert!(matches!(req, ClientRequest::GetDirectory(ref p) if p == "/Home"));
        assert_eq!(req.name(), "getDirectory");

        let req: ClientRequest =
            serde_json::from_value(json!({"event": "deleteDirectory", "data": "tmp/x"})).unwrap();
        assert!(matches!(req, ClientRequest::DeleteDirectory(_)));
    }

    #[test]
    fn test_parse_prompt_transcript() {
        let req: ClientRequest = serde_json::from_value(json!({
            "event": "promptAI",
            "data": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }))
        .unwrap();
        match req {
            ClientRequest::PromptAi(messages) => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].content, "hi");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_parse_scrape_accepts_legacy_field_names() {
        let modern: ClientRequest = serde_json::from_value(json!({
            "event": "scrape",
            "data": {"url": "https://a", "startDelim": "<a>", "endDelim": "</a>"}
        }))
        .unwrap();
        let legacy: ClientRequest = serde_json::from_value(json!({
            "event": "scrape",
            "data": {"url": "https://a", "html1": "<a>", "html2": "</a>"}
        }))
        .unwrap();
        for req in [modern, legacy] {
            match req {
                ClientRequest::Scrape(s) => {
                    assert_eq!(s.start_delim, "<a>");
                    assert_eq!(s.end_delim, "</a>");
                }
                other => panic!("unexpected request: {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_exec_and_get_ip() {
        let req: ClientRequest = serde_json::from_value(json!({
            "event": "exec",
            "data": {"cmd": "ping", "value": "-c 1 localhost"}
        }))
        .unwrap();
        assert!(matches!(req, ClientRequest::Exec(ref e) if e.cmd == "ping"));

        let req: ClientRequest = serde_json::from_value(json!({"event": "getIP"})).unwrap();
        assert!(matches!(req, ClientRequest::GetIp));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(
            serde_json::from_value::<ClientRequest>(json!({"event": "rmrf", "data": "/"})).is_err()
        );
    }

    #[test]
    fn test_serialize_events() {
        let listing = DirectoryListing {
            path: "docs".to_string(),
            entries: vec![DirectoryEntry {
                name: "a".to_string(),
                is_directory: true,
            }],
        };
        assert_eq!(
            serde_json::to_value(ServerEvent::Directory(listing)).unwrap(),
            json!({
                "event": "getDirectory",
                "data": {"path": "docs", "entries": [{"name": "a", "isDirectory": true}]}
            })
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::Chunk("<finish>".to_string())).unwrap(),
            json!({"event": "promptAI", "data": "<finish>"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::Ping).unwrap(),
            json!({"event": "ping"})
        );
    }
}
