//! CLI: stdin/stdout REPL over the router for local use.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::router::RequestRouter;

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Quit,
    /// Start a fresh conversation on the next query.
    New,
    Query(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/new" => Self::New,
            query => Self::Query(query.to_string()),
        }
    }
}

/// An interactive session. Keeps the conversation id across turns.
pub struct CliSession {
    router: Arc<RequestRouter>,
    user_id: String,
    conversation_id: Option<String>,
}

impl CliSession {
    pub fn new(router: Arc<RequestRouter>, user_id: impl Into<String>) -> Self {
        Self {
            router,
            user_id: user_id.into(),
            conversation_id: None,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Run against process stdin/stdout until EOF or `/quit`.
    pub async fn run_stdio(&mut self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.run(stdin, &mut stdout).await
    }

    pub async fn run<R, W>(&mut self, reader: R, out: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        eprint!("> ");

        while let Some(line) = lines.next_line().await? {
            match Command::parse(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::New => {
                    self.conversation_id = None;
                    out.write_all(b"Started a new conversation.\n").await?;
                }
                Command::Query(query) => {
                    let text = self.ask(&query).await;
                    out.write_all(text.as_bytes()).await?;
                }
            }
            out.flush().await?;
            eprint!("> ");
        }
        Ok(())
    }

    /// Route one query and render the reply.
    async fn ask(&mut self, query: &str) -> String {
        match self
            .router
            .process_request(query, &self.user_id, self.conversation_id.as_deref(), None)
            .await
        {
            Ok(response) => {
                if !response.conversation_id.is_empty() {
                    self.conversation_id = Some(response.conversation_id.clone());
                }
                let mut text = format!("\n{}\n\n", response.content);
                text.push_str(&format!(
                    "[task: {} | components: {} | conversation: {}]\n",
                    response.task_type,
                    response.components_used.join(", "),
                    response.conversation_id,
                ));
                if let Some(error) = response.error {
                    text.push_str(&format!("[error: {error}]\n"));
                }
                text
            }
            Err(e) => {
                tracing::error!(error = %e, "Request failed");
                format!("\nError: {e}\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityRegistry, ConversationResponder, Dispatcher};
    use crate::classifier::{IntentClassifier, TaskTaxonomy};
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::memory::ConversationMemory;
    use crate::router::{RouterConfig, RouterDeps};
    use crate::store::LibSqlStore;
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let content = if request.messages[0].content.contains("task classifier") {
                r#"{"task": "conversation", "params": {}}"#.to_string()
            } else {
                format!("echo: {}", request.messages[1].content)
            };
            Ok(CompletionResponse {
                content,
                ..Default::default()
            })
        }
    }

    async fn session() -> CliSession {
        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let router = RequestRouter::new(
            RouterConfig::default(),
            RouterDeps {
                memory: Arc::new(ConversationMemory::new(store)),
                classifier: Arc::new(IntentClassifier::new(llm.clone(), TaskTaxonomy::default())),
                dispatcher: Arc::new(Dispatcher::new(Arc::new(CapabilityRegistry::new()))),
                responder: Arc::new(ConversationResponder::new(llm)),
            },
        );
        CliSession::new(Arc::new(router), "local-user")
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse(" /new "), Command::New);
        assert_eq!(Command::parse(" hello "), Command::Query("hello".into()));
    }

    #[tokio::test]
    async fn keeps_conversation_across_turns() {
        let mut session = session().await;
        let mut out = Vec::new();
        session
            .run(&b"hello\n\nsecond\n"[..], &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("echo: hello"));
        assert!(text.contains("echo: second"));

        let id = session.conversation_id().unwrap().to_string();
        let history = session.router.memory().get_history(&id, None).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn new_resets_and_quit_stops() {
        let mut session = session().await;
        let mut out = Vec::new();
        session
            .run(&b"first\n/new\n/quit\nnever sent\n"[..], &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Started a new conversation."));
        assert!(!text.contains("never sent"));
        assert!(session.conversation_id().is_none());
    }
}
