//! Windowed reads stitched into one JSON array.
//!
//! # Design
//! `PagedFetcher::fetch_all` walks the collection with `offset`/`limit`
//! windows no larger than the service maximum and splices each returned
//! array into a single one at the byte level. Every fragment is still parsed
//! once to count its records, since the stop condition depends on that
//! count. Any failure discards what was accumulated.

use std::fmt;
use std::str::FromStr;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::config::SERVICE_MAX_WINDOW;
use crate::error::{Error, Result, UnknownVariant};
use crate::http::HttpBackend;
use crate::request::RequestDescriptor;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaginationDetails {
    On,
    #[default]
    Off,
}

impl PaginationDetails {
    pub fn as_str(self) -> &'static str {
        match self {
            PaginationDetails::On => "ON",
            PaginationDetails::Off => "OFF",
        }
    }
}

impl FromStr for PaginationDetails {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Ok(PaginationDetails::On),
            "OFF" => Ok(PaginationDetails::Off),
            _ => Err(UnknownVariant {
                kind: "pagination details",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PaginationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetailsLevel {
    #[default]
    Basic,
    Full,
}

impl DetailsLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailsLevel::Basic => "BASIC",
            DetailsLevel::Full => "FULL",
        }
    }
}

impl FromStr for DetailsLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BASIC" => Ok(DetailsLevel::Basic),
            "FULL" => Ok(DetailsLevel::Full),
            _ => Err(UnknownVariant {
                kind: "details level",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DetailsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing parameters supplied by an entity wrapper.
///
/// Filter keys are passed through untouched; validating them is the
/// wrapper's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub filters: Vec<(String, String)>,
    pub offset: usize,
    pub pagination_details: PaginationDetails,
    pub details_level: DetailsLevel,
    pub sort_by: Option<String>,
}

impl PageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn details_level(mut self, level: DetailsLevel) -> Self {
        self.details_level = level;
        self
    }

    pub fn pagination_details(mut self, details: PaginationDetails) -> Self {
        self.pagination_details = details;
        self
    }

    pub fn sort_by(mut self, sort_by: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self
    }

    /// Base GET descriptor for `url`; the fetcher adds `limit` per window.
    pub fn descriptor(&self, url: impl Into<String>) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::get(url);
        for (key, value) in &self.filters {
            descriptor = descriptor.with_param(key, value.as_str());
        }
        descriptor = descriptor
            .with_param("offset", self.offset.to_string())
            .with_param("paginationDetails", self.pagination_details.as_str())
            .with_param("detailsLevel", self.details_level.as_str());
        if let Some(sort_by) = &self.sort_by {
            descriptor = descriptor.with_param("sortBy", sort_by.as_str());
        }
        descriptor
    }
}

/// One bounded `offset`/`limit` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

impl Window {
    /// Window at `offset` asking for `remaining` records (unbounded when
    /// `None`), never more than `max_window`.
    pub fn capped(offset: usize, remaining: Option<usize>, max_window: usize) -> Self {
        let max_window = max_window.clamp(1, SERVICE_MAX_WINDOW);
        let limit = remaining.map_or(max_window, |r| r.clamp(1, max_window));
        Self { offset, limit }
    }

    pub fn apply(&self, base: &RequestDescriptor) -> RequestDescriptor {
        base.with_param("offset", self.offset.to_string())
            .with_param("limit", self.limit.to_string())
    }
}

/// Concatenates JSON array fragments without re-serializing their items.
#[derive(Debug, Default)]
pub struct ArraySplicer {
    interior: Vec<u8>,
    records: usize,
}

impl ArraySplicer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `fragment` as a JSON array, append its items and return how
    /// many it held.
    pub fn push(&mut self, fragment: &[u8]) -> Result<usize> {
        let items: Vec<IgnoredAny> = serde_json::from_slice(fragment)
            .map_err(|e| Error::malformed(format!("expected a JSON array: {e}")))?;

        let trimmed = fragment.trim_ascii();
        let inner = trimmed[1..trimmed.len() - 1].trim_ascii();
        if !inner.is_empty() {
            if !self.interior.is_empty() {
                self.interior.push(b',');
            }
            self.interior.extend_from_slice(inner);
        }
        self.records += items.len();
        Ok(items.len())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.interior.len() + 2);
        out.push(b'[');
        out.extend_from_slice(&self.interior);
        out.push(b']');
        out
    }
}

/// Presents a windowed collection read as one call.
#[derive(Debug)]
pub struct PagedFetcher<'t, B> {
    transport: &'t Transport<B>,
    max_window: usize,
}

impl<'t, B: HttpBackend> PagedFetcher<'t, B> {
    pub fn new(transport: &'t Transport<B>, max_window: usize) -> Self {
        Self {
            transport,
            max_window: max_window.clamp(1, SERVICE_MAX_WINDOW),
        }
    }

    /// Fetch at most `requested` records (all of them when `requested` is
    /// 0), starting at the descriptor's `offset` parameter or 0.
    pub fn fetch_all(&self, base: &RequestDescriptor, requested: usize) -> Result<Vec<u8>> {
        let mut offset = base
            .param("offset")
            .and_then(|o| o.parse::<usize>().ok())
            .unwrap_or(0);
        let mut remaining = (requested > 0).then_some(requested);
        let mut splicer = ArraySplicer::new();

        loop {
            let window = Window::capped(offset, remaining, self.max_window);
            let body = self.transport.execute(&window.apply(base))?;
            let count = splicer.push(&body)?;
            tracing::debug!(
                url = %base.url,
                offset = window.offset,
                limit = window.limit,
                count,
                total = splicer.records(),
                "fetched window"
            );

            if count > window.limit {
                return Err(Error::malformed(format!(
                    "window at offset {} returned {count} records for limit {}",
                    window.offset, window.limit
                )));
            }
            if count < window.limit {
                break;
            }
            if let Some(left) = remaining.as_mut() {
                *left -= window.limit;
                if *left == 0 {
                    break;
                }
            }
            offset += window.limit;
        }

        Ok(splicer.finish())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::config::{Credentials, ServiceConfig};
    use crate::http::HttpResponse;
    use crate::testing::{PagedBackend, ScriptedBackend};

    fn transport<B: HttpBackend>(backend: B) -> Transport<B> {
        let config = ServiceConfig::new("http://localhost:3000", Credentials::new("u", "p"))
            .with_max_attempts(2)
            .with_backoff_unit(Duration::ZERO);
        Transport::new(backend, &config).unwrap()
    }

    fn base() -> RequestDescriptor {
        PageQuery::new().descriptor("http://localhost:3000/api/clients")
    }

    fn ids(body: &[u8]) -> Vec<String> {
        let items: Vec<Value> = serde_json::from_slice(body).unwrap();
        items
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn fetch_everything_with_single_record_windows() {
        let transport = transport(PagedBackend::numbered(4, 1));
        let fetcher = PagedFetcher::new(&transport, 1);

        let body = fetcher.fetch_all(&base(), 0).unwrap();

        assert_eq!(ids(&body), vec!["0", "1", "2", "3"]);
        assert_eq!(
            transport.backend().windows(),
            vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1)]
        );
    }

    #[test]
    fn bounded_fetch_stops_at_requested_count() {
        let transport = transport(PagedBackend::numbered(4, 1));
        let fetcher = PagedFetcher::new(&transport, 1);

        let body = fetcher.fetch_all(&base(), 3).unwrap();

        assert_eq!(ids(&body), vec!["0", "1", "2"]);
        assert_eq!(transport.backend().requests().len(), 3);
    }

    #[test]
    fn bounded_fetch_past_the_end_returns_what_exists() {
        let transport = transport(PagedBackend::numbered(5, 1000));
        let fetcher = PagedFetcher::new(&transport, 2);

        let body = fetcher.fetch_all(&base(), 10).unwrap();

        assert_eq!(ids(&body).len(), 5);
        assert_eq!(transport.backend().windows(), vec![(0, 2), (2, 2), (4, 2)]);
    }

    #[test]
    fn last_window_shrinks_to_remaining() {
        let transport = transport(PagedBackend::numbered(50, 1000));
        let fetcher = PagedFetcher::new(&transport, 20);

        let body = fetcher.fetch_all(&base(), 45).unwrap();

        assert_eq!(ids(&body).len(), 45);
        assert_eq!(
            transport.backend().windows(),
            vec![(0, 20), (20, 20), (40, 5)]
        );
    }

    #[test]
    fn windows_never_exceed_service_maximum() {
        let transport = transport(PagedBackend::numbered(2500, 5000));
        let fetcher = PagedFetcher::new(&transport, 5000);

        let body = fetcher.fetch_all(&base(), 0).unwrap();

        assert_eq!(ids(&body).len(), 2500);
        assert!(transport
            .backend()
            .windows()
            .iter()
            .all(|(_, limit)| *limit <= SERVICE_MAX_WINDOW));
    }

    #[test]
    fn starts_from_caller_offset() {
        let transport = transport(PagedBackend::numbered(6, 1000));
        let fetcher = PagedFetcher::new(&transport, 1000);
        let descriptor = PageQuery::new()
            .offset(4)
            .descriptor("http://localhost:3000/api/clients");

        let body = fetcher.fetch_all(&descriptor, 0).unwrap();

        assert_eq!(ids(&body), vec!["4", "5"]);
    }

    #[test]
    fn empty_collection_yields_empty_array() {
        let transport = transport(PagedBackend::numbered(0, 10));
        let fetcher = PagedFetcher::new(&transport, 10);
        assert_eq!(fetcher.fetch_all(&base(), 0).unwrap(), b"[]".to_vec());
    }

    #[test]
    fn non_array_window_is_malformed() {
        let transport = transport(ScriptedBackend::always(HttpResponse::new(200, r#"{"id":"1"}"#)));
        let fetcher = PagedFetcher::new(&transport, 10);
        let err = fetcher.fetch_all(&base(), 0).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn transport_failure_discards_partial_results() {
        let transport = transport(ScriptedBackend::sequence(vec![
            Ok(HttpResponse::new(200, r#"[{"id":"0"}]"#)),
            Ok(HttpResponse::new(503, "")),
        ]));
        let fetcher = PagedFetcher::new(&transport, 1);
        let err = fetcher.fetch_all(&base(), 0).unwrap_err();
        assert!(matches!(err, Error::Communication { attempts: 2, .. }));
    }

    #[test]
    fn oversized_window_is_rejected() {
        let transport = transport(ScriptedBackend::always(HttpResponse::new(200, "[1, 2, 3]")));
        let fetcher = PagedFetcher::new(&transport, 2);
        assert!(matches!(
            fetcher.fetch_all(&base(), 0),
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[test]
    fn splicer_joins_fragments_and_skips_empty_ones() {
        let mut splicer = ArraySplicer::new();
        assert_eq!(splicer.push(b" [ ] ").unwrap(), 0);
        assert_eq!(splicer.push(br#"[{"a":1}, {"a":[2]}]"#).unwrap(), 2);
        assert_eq!(splicer.push(b"[]").unwrap(), 0);
        assert_eq!(splicer.push(b"\n[3]\n").unwrap(), 1);
        assert_eq!(splicer.records(), 3);

        let joined = splicer.finish();
        let parsed: Value = serde_json::from_slice(&joined).unwrap();
        assert_eq!(parsed, serde_json::json!([{"a":1}, {"a":[2]}, 3]));
    }

    #[test]
    fn splicer_rejects_garbage() {
        let mut splicer = ArraySplicer::new();
        assert!(splicer.push(b"not json").is_err());
        assert!(splicer.push(b"[1, 2").is_err());
        assert!(splicer.push(b"{}").is_err());
    }

    #[test]
    fn page_query_parameters() {
        let descriptor = PageQuery::new()
            .filter("branchId", "B1")
            .details_level(DetailsLevel::Full)
            .pagination_details(PaginationDetails::On)
            .sort_by("lastName:ASC")
            .descriptor("http://localhost:3000/api/clients");

        assert_eq!(descriptor.param("branchId"), Some("B1"));
        assert_eq!(descriptor.param("offset"), Some("0"));
        assert_eq!(descriptor.param("detailsLevel"), Some("FULL"));
        assert_eq!(descriptor.param("paginationDetails"), Some("ON"));
        assert_eq!(descriptor.param("sortBy"), Some("lastName:ASC"));
    }

    #[test]
    fn enumerations_parse_case_insensitively() {
        assert_eq!("full".parse::<DetailsLevel>().unwrap(), DetailsLevel::Full);
        assert_eq!("On".parse::<PaginationDetails>().unwrap(), PaginationDetails::On);
        let err = "MEDIUM".parse::<DetailsLevel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown details level `MEDIUM`");
    }
}
