//! Credential acquisition through registered messaging sessions
//!
//! The MTProto side (login, opening the mini-app web view) lives in an
//! external session helper executable. This module finds the session files,
//! drives the helper, and pulls the init data token out of the web-view URL
//! it prints.

use crate::config::{Config, RacerApi};
use crate::error::RefreshError;
use crate::types::{Credential, SessionHandle};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const SESSION_PREFIX: &str = "session_";
const SESSION_SUFFIX: &str = ".session";

/// Mints a fresh credential for a session handle
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, handle: &SessionHandle) -> Result<Credential, RefreshError>;
}

/// `session_<name>.session` files in one directory
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    dir: PathBuf,
}

impl SessionDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", SESSION_PREFIX, name, SESSION_SUFFIX))
    }

    /// All registered handles, sorted by file name. A missing directory has
    /// no handles.
    pub fn handles(&self) -> std::io::Result<Vec<SessionHandle>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name
                .strip_prefix(SESSION_PREFIX)
                .and_then(|rest| rest.strip_suffix(SESSION_SUFFIX))
            {
                if entry.file_type()?.is_file() {
                    handles.push(SessionHandle::new(name, entry.path()));
                }
            }
        }
        handles.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(handles)
    }
}

/// Invocation details shared by login and web-view requests
#[derive(Debug, Clone)]
pub struct SessionHelper {
    program: String,
    base_args: Vec<String>,
    api_id: Option<i64>,
    api_hash: Option<String>,
    timeout: Duration,
}

impl SessionHelper {
    pub fn from_config(config: &Config) -> Self {
        let mut parts = config.session_helper.split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_else(|| "racer-session-helper".to_string());
        Self {
            program,
            base_args: parts.collect(),
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            timeout: Duration::from_secs(config.refresh_timeout_secs),
        }
    }

    pub fn new(program: impl Into<String>, base_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            base_args,
            api_id: None,
            api_hash: None,
            timeout,
        }
    }

    fn command(&self, action: &str, session: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args).arg(action).arg(session);
        if let Some(api_id) = self.api_id {
            command.env("API_ID", api_id.to_string());
        }
        if let Some(api_hash) = &self.api_hash {
            command.env("API_HASH", api_hash);
        }
        command.kill_on_drop(true);
        command
    }
}

/// Asks the session helper to open the game web view and extracts the token
pub struct HelperRefresher {
    helper: SessionHelper,
}

impl HelperRefresher {
    pub fn new(helper: SessionHelper) -> Self {
        Self { helper }
    }
}

#[async_trait]
impl CredentialRefresher for HelperRefresher {
    async fn refresh(&self, handle: &SessionHandle) -> Result<Credential, RefreshError> {
        if !handle.path.exists() {
            return Err(RefreshError::MissingSession(handle.path.clone()));
        }

        debug!("Requesting web view for session {}", handle);
        let mut command = self.helper.command("webview", &handle.path);
        command
            .args(["--bot", RacerApi::BOT_USERNAME, "--url", RacerApi::WEBVIEW_URL])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(self.helper.timeout, command.output())
            .await
            .map_err(|_| RefreshError::Timeout(self.helper.timeout.as_secs()))?
            .map_err(RefreshError::Spawn)?;

        if !output.status.success() {
            return Err(helper_failed(output.status, &output.stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.contains("tgWebAppData="))
            .unwrap_or_else(|| stdout.trim());

        let credential = extract_web_app_data(url)?;
        info!("Fetched fresh credential for session {}", handle);
        Ok(credential)
    }
}

/// Interactive registration of a new session
pub struct SessionRegistrar {
    helper: SessionHelper,
    sessions: SessionDirectory,
}

impl SessionRegistrar {
    pub fn new(helper: SessionHelper, sessions: SessionDirectory) -> Self {
        Self { helper, sessions }
    }

    /// Log in with the helper on the operator's terminal and store the session
    /// file as `session_<name>.session`
    pub async fn register(&self, phone: &str, name: &str) -> Result<SessionHandle, RefreshError> {
        let path = self.sessions.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(RefreshError::Spawn)?;
        }

        let mut command = self.helper.command("login", &path);
        command
            .args(["--phone", phone])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = command.status().await.map_err(RefreshError::Spawn)?;
        if !status.success() {
            return Err(helper_failed(status, &[]));
        }
        if !path.exists() {
            return Err(RefreshError::MissingSession(path));
        }

        info!("Registered session {}", name);
        Ok(SessionHandle::new(name, path))
    }
}

fn helper_failed(status: ExitStatus, stderr: &[u8]) -> RefreshError {
    RefreshError::HelperFailed {
        status: status.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

/// Pull the init data out of a mini-app URL:
/// `https://...#tgWebAppData=<encoded>&tgWebAppVersion=...`
pub fn extract_web_app_data(url: &str) -> Result<Credential, RefreshError> {
    let no_data = || RefreshError::NoWebAppData(url.to_string());

    let (_, fragment) = url.split_once("#tgWebAppData=").ok_or_else(no_data)?;
    let encoded = fragment
        .split("&tgWebAppVersion=")
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(no_data)?;

    let decoded = urlencoding::decode(encoded).map_err(|_| no_data())?;
    Ok(Credential::new(decoded.into_owned()))
}
