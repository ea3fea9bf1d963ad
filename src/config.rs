use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Companion server configuration.
///
/// Loaded once at startup and shared read-only with every handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Version string reported by `GET /api?fn=version`
    #[serde(default = "default_editor_version")]
    pub editor_version: String,

    /// Emit `error` events to the client in addition to logging
    #[serde(default = "default_report_errors")]
    pub report_errors: bool,

    /// Maximum size of a single uploaded file (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Request path rewrites applied before static lookup
    #[serde(default = "default_path_aliases")]
    pub path_aliases: HashMap<String, String>,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Language-model runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL of the Ollama-compatible runtime
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    /// Model identifier used for every chat request
    #[serde(default = "default_ai_model")]
    pub model: String,
}

/// Diagnostic command gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Closed set of executable names the client may run
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Argument rules per command. A command without an entry accepts
    /// positional arguments only.
    #[serde(default = "default_command_policies")]
    pub policies: HashMap<String, CommandPolicy>,

    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,

    /// Captured stdout and stderr are each cut off at this many bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

/// Which options a client may pass to one command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPolicy {
    /// Options accepted on their own, matched exactly (`-s`, `--head`)
    #[serde(default)]
    pub flags: Vec<String>,

    /// Options that take the next argument as their value (`-c 4`)
    #[serde(default)]
    pub valued_options: Vec<String>,

    /// Positional arguments must be `http://` or `https://` URLs
    #[serde(default)]
    pub http_urls_only: bool,

    /// Arguments always placed before the client's own
    #[serde(default)]
    pub fixed_args: Vec<String>,
}

/// Webpage extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_editor_version() -> String {
    "1.1.2837".to_string()
}

fn default_report_errors() -> bool {
    true
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_path_aliases() -> HashMap<String, String> {
    ["html", "win", "linux"]
        .iter()
        .map(|target| {
            (
                format!("/export/1.1/{target}"),
                format!("/Home/Editor/export/1.1/{target}"),
            )
        })
        .collect()
}

fn default_ai_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ai_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_allowed_commands() -> Vec<String> {
    vec![
        "ping".to_string(),
        "tracert".to_string(),
        "nslookup".to_string(),
        "curl".to_string(),
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_command_policies() -> HashMap<String, CommandPolicy> {
    let ping = CommandPolicy {
        flags: strings(&["-4", "-6"]),
        valued_options: strings(&["-c", "-n", "-w", "-W"]),
        ..CommandPolicy::default()
    };
    let tracert = CommandPolicy {
        flags: strings(&["-d", "-4", "-6"]),
        valued_options: strings(&["-h", "-w"]),
        ..CommandPolicy::default()
    };
    let nslookup = CommandPolicy {
        flags: strings(&[
            "-type=a",
            "-type=aaaa",
            "-type=mx",
            "-type=ns",
            "-type=txt",
            "-type=cname",
            "-type=soa",
            "-type=any",
        ]),
        ..CommandPolicy::default()
    };
    let curl = CommandPolicy {
        flags: strings(&[
            "-s",
            "-S",
            "-sS",
            "-i",
            "-I",
            "-L",
            "-v",
            "--silent",
            "--show-error",
            "--include",
            "--head",
            "--location",
            "--verbose",
            "--compressed",
        ]),
        valued_options: strings(&["-m", "--max-time", "--connect-timeout", "--max-redirs"]),
        http_urls_only: true,
        // -q must come first: it stops curl from reading ~/.curlrc.
        fixed_args: strings(&[
            "-q",
            "--proto",
            "=http,https",
            "--proto-redir",
            "=http,https",
        ]),
    };

    [
        ("ping", ping),
        ("tracert", tracert),
        ("nslookup", nslookup),
        ("curl", curl),
    ]
    .into_iter()
    .map(|(cmd, policy)| (cmd.to_string(), policy))
    .collect()
}

fn default_exec_timeout_secs() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_scrape_timeout_secs() -> u64 {
    20
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            editor_version: default_editor_version(),
            report_errors: default_report_errors(),
            max_upload_size: default_max_upload_size(),
            path_aliases: default_path_aliases(),
            ai: AiConfig::default(),
            exec: ExecConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            policies: default_command_policies(),
            timeout_secs: default_exec_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scrape_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text; missing keys fall back to defaults
    pub fn from_toml(content: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Look up a configured rewrite for a request path
    pub fn alias_for(&self, path: &str) -> Option<&str> {
        self.path_aliases.get(path).map(String::as_str)
    }
}
