//! Test harness: a live server on an ephemeral port over a temporary
//! database, with a scripted upstream for the proxy route.

use std::sync::{Arc, Mutex};

use futures_util::stream;
use tempfile::TempDir;

use wove_core::llm::{BoxGenerationBackend, ByteStream, GenerationBackend};
use wove_types::config::GlobalConfig;
use wove_types::llm::{GenerationError, GenerationRequest};

use crate::http::router::build_router;
use crate::state::AppState;

pub struct ScriptedUpstream {
    chunks: Option<Vec<String>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedUpstream {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: Some(chunks.iter().map(|c| c.to_string()).collect()),
            requests: Arc::default(),
        }
    }

    /// An upstream that rejects every request before streaming.
    pub fn failing() -> Self {
        Self {
            chunks: None,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<GenerationRequest>>> {
        self.requests.clone()
    }
}

impl GenerationBackend for ScriptedUpstream {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: GenerationRequest) -> Result<ByteStream, GenerationError> {
        self.requests.lock().unwrap().push(request);
        let Some(chunks) = self.chunks.clone() else {
            return Err(GenerationError::Status {
                status: 500,
                message: "upstream down".to_string(),
            });
        };
        let items: Vec<Result<Vec<u8>, GenerationError>> =
            chunks.into_iter().map(|c| Ok(c.into_bytes())).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

pub struct TestServer {
    pub client: reqwest::Client,
    base: String,
    _dir: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

pub async fn spawn_server(upstream: Option<ScriptedUpstream>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut state = AppState::open(dir.path().to_path_buf(), GlobalConfig::default())
        .await
        .unwrap();
    if let Some(upstream) = upstream {
        state = state.with_upstream(BoxGenerationBackend::new(upstream));
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        client: reqwest::Client::new(),
        base: format!("http://{addr}"),
        _dir: dir,
    }
}
