//! Routes session requests to capability handlers.
//!
//! Each request runs on its own task so a slow handler never holds up
//! other requests or other sessions. Tasks are tied to the session's
//! cancellation token and stop as soon as the client disconnects.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::ai::{ChatMessage, ChatProxy, FINISH_SENTINEL};
use crate::config::Config;
use crate::error::CapabilityError;
use crate::exec::CommandGateway;
use crate::scrape::{EXTRACTION_FAILED, Extractor};
use crate::workspace::{DirectoryListing, Workspace};

use super::hub::SessionHandle;
use super::types::{ClientRequest, ErrorPayload, ExecRequest, ScrapeRequest, ServerEvent};

pub struct Dispatcher {
    workspace: Workspace,
    commands: CommandGateway,
    extractor: Extractor,
    chat: ChatProxy,
    local_ip: String,
    report_errors: bool,
}

impl Dispatcher {
    pub fn new(config: &Config, workspace: Workspace, local_ip: impl Into<String>) -> Self {
        Self {
            workspace,
            commands: CommandGateway::from_config(&config.exec),
            extractor: Extractor::from_config(&config.scrape),
            chat: ChatProxy::from_config(&config.ai),
            local_ip: local_ip.into(),
            report_errors: config.report_errors,
        }
    }

    /// Start handling `request` for `session` in the background.
    pub fn dispatch(self: &Arc<Self>, session: &SessionHandle, request: ClientRequest) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let session = session.clone();
        let cancel = session.child_token();

        tokio::spawn(async move {
            let name = request.name();
            debug!("Session {} -> {}", session.id(), name);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session {} gone, abandoning {}", session.id(), name);
                }
                _ = this.handle(&session, request) => {}
            }
        })
    }

    async fn handle(&self, session: &SessionHandle, request: ClientRequest) {
        match request {
            ClientRequest::GetDirectory(path) => self.get_directory(session, path).await,
            ClientRequest::MakeDirectory(path) => {
                if let Err(e) = self.workspace.create_directory(&path).await {
                    self.report(session, "makeDirectory", e).await;
                }
            }
            ClientRequest::DeleteDirectory(path) => {
                if let Err(e) = self.workspace.delete_directory(&path).await {
                    self.report(session, "deleteDirectory", e).await;
                }
            }
            ClientRequest::PromptAi(messages) => self.prompt_ai(session, messages).await,
            ClientRequest::Scrape(req) => self.scrape(session, req).await,
            ClientRequest::Exec(req) => self.exec(session, req).await,
            ClientRequest::GetIp => {
                session
                    .emit(ServerEvent::LocalIp(self.local_ip.clone()))
                    .await;
            }
        }
    }

    async fn get_directory(&self, session: &SessionHandle, path: String) {
        let listing = match self.workspace.list(&path).await {
            Ok(listing) => listing,
            Err(e @ (CapabilityError::NotFound(_) | CapabilityError::Io(_))) => {
                warn!("Error reading directory {:?}: {}", path, e);
                DirectoryListing::empty(path)
            }
            Err(e) => {
                self.report(session, "getDirectory", e).await;
                return;
            }
        };
        session.emit(ServerEvent::Directory(listing)).await;
    }

    /// Relay generated text, then always finish with the sentinel.
    async fn prompt_ai(&self, session: &SessionHandle, messages: Vec<ChatMessage>) {
        match self.chat.stream_chat(&messages).await {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(text) => {
                            if !session.emit(ServerEvent::Chunk(text)).await {
                                return;
                            }
                        }
                        Err(e) => {
                            self.report(session, "promptAI", e).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => self.report(session, "promptAI", e).await,
        }

        session
            .emit(ServerEvent::Chunk(FINISH_SENTINEL.to_string()))
            .await;
    }

    /// Both a missing match and a failed fetch answer with the failure marker.
    async fn scrape(&self, session: &SessionHandle, req: ScrapeRequest) {
        let reply = match self
            .extractor
            .extract(&req.url, &req.start_delim, &req.end_delim)
            .await
        {
            Ok(text) => text,
            Err(CapabilityError::ExtractionMiss) => {
                debug!("No match between delimiters in {}", req.url);
                EXTRACTION_FAILED.to_string()
            }
            Err(e) => {
                warn!("Error fetching data from {}: {}", req.url, e);
                EXTRACTION_FAILED.to_string()
            }
        };
        session.emit(ServerEvent::Scraped(reply)).await;
    }

    async fn exec(&self, session: &SessionHandle, req: ExecRequest) {
        match self.commands.run(&req.cmd, &req.value).await {
            Ok(output) => {
                if !output.success() {
                    warn!("Command {} exited with {:?}", req.cmd, output.exit_code);
                }
                if !output.stderr.is_empty() {
                    warn!("Stderr from {}: {}", req.cmd, output.stderr.trim_end());
                }
                session.emit(ServerEvent::ExecOutput(output.stdout)).await;
            }
            // Not on the allow-list: dropped without a reply.
            Err(CapabilityError::Disallowed(cmd)) => {
                warn!("Ignoring disallowed command {:?} from session {}", cmd, session.id());
            }
            Err(e) => self.report(session, "exec", e).await,
        }
    }

    async fn report(&self, session: &SessionHandle, request: &str, err: CapabilityError) {
        match &err {
            CapabilityError::Io(_) | CapabilityError::Upstream(_) => {
                error!("{} failed for session {}: {}", request, session.id(), err)
            }
            _ => warn!("{} rejected for session {}: {}", request, session.id(), err),
        }

        if self.report_errors {
            session
                .emit(ServerEvent::Error(ErrorPayload {
                    request: request.to_string(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                }))
                .await;
        }
    }
}
