#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use refetch::hooks::{AfterFetchInfo, BeforeFetchInfo, Hooks};
use refetch::http::{RawResponse, RequestInit};
use refetch::transport::{Transport, TransportFuture};
use refetch::{Client, FetchError, NetworkError, ResponseEnvelope};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the scripted transport answers with.
#[derive(Debug, Clone)]
pub enum Canned {
    Reply {
        status: u16,
        content_type: &'static str,
        body: &'static str,
    },
    Fail(&'static str),
}

struct ScriptState {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    canned: Mutex<Canned>,
    delay: Duration,
}

/// A transport that counts calls and answers after a fixed delay.
#[derive(Clone)]
pub struct Scripted {
    state: Arc<ScriptState>,
}

impl Scripted {
    pub fn new(canned: Canned, delay_ms: u64) -> Self {
        Self {
            state: Arc::new(ScriptState {
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                canned: Mutex::new(canned),
                delay: Duration::from_millis(delay_ms),
            }),
        }
    }

    pub fn json(body: &'static str) -> Self {
        Self::new(
            Canned::Reply {
                status: 200,
                content_type: "application/json",
                body,
            },
            10,
        )
    }

    pub fn failing(message: &'static str) -> Self {
        Self::new(Canned::Fail(message), 10)
    }

    pub fn respond_with(&self, canned: Canned) {
        *self.state.canned.lock() = canned;
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.urls.lock().clone()
    }

    /// An isolated client over this transport.
    pub fn client(&self) -> Client {
        Client::builder(self.clone()).isolated().build()
    }
}

impl Transport for Scripted {
    fn perform_network_call(&self, url: &str, _init: &RequestInit) -> TransportFuture {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.urls.lock().push(url.to_owned());
        let canned = self.state.canned.lock().clone();
        let delay = self.state.delay;
        let url = url.to_owned();

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            match canned {
                Canned::Reply {
                    status,
                    content_type,
                    body,
                } => Ok(RawResponse::builder(status)
                    .url(url)
                    .header("Content-Type", content_type)
                    .body(body)
                    .build()),
                Canned::Fail(message) => Err(NetworkError::new(message)),
            }
        })
    }
}

/// Everything a session's hooks observed.
#[derive(Default)]
pub struct Recorded {
    pub before: Mutex<Vec<BeforeFetchInfo>>,
    pub after: Mutex<Vec<AfterFetchInfo>>,
    pub results: Mutex<Vec<(Option<FetchError>, Option<ResponseEnvelope>)>>,
}

impl Recorded {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hooks(self: &Arc<Self>) -> Hooks {
        let before = Arc::clone(self);
        let after = Arc::clone(self);
        let results = Arc::clone(self);
        Hooks::new()
            .on_before_fetch(move |info| before.before.lock().push(info.clone()))
            .on_after_fetch(move |info| after.after.lock().push(info.clone()))
            .on_result(move |error, response| {
                results
                    .results
                    .lock()
                    .push((error.cloned(), response.cloned()));
            })
    }

    pub fn before_count(&self) -> usize {
        self.before.lock().len()
    }

    pub fn after_count(&self) -> usize {
        self.after.lock().len()
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }
}
