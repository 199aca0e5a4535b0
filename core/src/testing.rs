//! In-memory backends for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::http::{ConnectionError, HttpBackend, HttpRequest, HttpResponse};

/// Replays canned results in order; the last one repeats forever.
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Result<HttpResponse, ConnectionError>>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedBackend {
    pub(crate) fn sequence(script: Vec<Result<HttpResponse, ConnectionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(response: HttpResponse) -> Self {
        Self::sequence(vec![Ok(response)])
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl HttpBackend for ScriptedBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError> {
        self.seen.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            return script.pop_front().unwrap();
        }
        script.front().cloned().unwrap()
    }
}

/// Serves `records` through `offset`/`limit`, never more than `cap` per call.
pub(crate) struct PagedBackend {
    records: Vec<Value>,
    cap: usize,
    seen: Mutex<Vec<HttpRequest>>,
}

impl PagedBackend {
    pub(crate) fn new(records: Vec<Value>, cap: usize) -> Self {
        Self {
            records,
            cap,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn numbered(total: usize, cap: usize) -> Self {
        let records = (0..total)
            .map(|i| serde_json::json!({ "id": i.to_string() }))
            .collect();
        Self::new(records, cap)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// `(offset, limit)` of every request seen.
    pub(crate) fn windows(&self) -> Vec<(usize, usize)> {
        self.requests()
            .iter()
            .map(|r| (query_usize(r, "offset"), query_usize(r, "limit")))
            .collect()
    }
}

fn query_usize(request: &HttpRequest, key: &str) -> usize {
    request
        .query
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

impl HttpBackend for PagedBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError> {
        self.seen.lock().unwrap().push(request.clone());
        let offset = query_usize(request, "offset").min(self.records.len());
        let limit = query_usize(request, "limit").min(self.cap);
        let end = (offset + limit).min(self.records.len());
        let page = Value::Array(self.records[offset..end].to_vec());
        Ok(HttpResponse::new(200, serde_json::to_vec(&page).unwrap()))
    }
}
