//! Per-page lookups for the scripted target
//!
//! Pages ask for the advanced rules that apply to their URL. Answers come
//! from the response cache when possible and from the compiled bundle
//! otherwise. A page can send several requests while it navigates; only
//! the response to its newest request is applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cb_compiler::{AdvancedBlockingData, AdvancedRulesIndex};
use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::error::{Result, SyncError};

pub const ADVANCED_BLOCKING_DATA: &str = "advancedBlockingData";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl LookupRequest {
    pub fn advanced_blocking_data(url: impl Into<String>) -> Self {
        Self {
            kind: ADVANCED_BLOCKING_DATA.to_string(),
            url: url.into(),
        }
    }
}

pub trait AdvancedRulesSource: Send + Sync {
    fn lookup(&self, url: &str) -> AdvancedBlockingData;
}

impl AdvancedRulesSource for AdvancedRulesIndex {
    fn lookup(&self, url: &str) -> AdvancedBlockingData {
        AdvancedRulesIndex::lookup(self, url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRequest {
    pub url: String,
    pub request_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResponse {
    pub script: String,
    pub verbose: bool,
    pub request_id: u64,
}

pub struct LookupService {
    source: Arc<dyn AdvancedRulesSource>,
    cache: Arc<ResponseCache<AdvancedBlockingData>>,
    verbose: bool,
}

impl LookupService {
    pub fn new(
        source: Arc<dyn AdvancedRulesSource>,
        cache: Arc<ResponseCache<AdvancedBlockingData>>,
    ) -> Self {
        Self {
            source,
            cache,
            verbose: false,
        }
    }

    /// Ask pages to log what they inject.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache<AdvancedBlockingData>> {
        &self.cache
    }

    /// Answer one lookup. `None` means no advanced rule applies.
    pub fn handle(&self, request: &LookupRequest) -> Result<Option<AdvancedBlockingData>> {
        if request.kind != ADVANCED_BLOCKING_DATA {
            return Err(SyncError::UnsupportedRequest(request.kind.clone()));
        }

        if let Some(data) = self.cache.get(&request.url) {
            log::debug!("Lookup cache hit for {}", request.url);
            return Ok(Some(data));
        }

        let data = self.source.lookup(&request.url);
        if data.is_empty() {
            return Ok(None);
        }
        self.cache.set(request.url.clone(), data.clone());
        Ok(Some(data))
    }

    /// Build the injectable script for a page request.
    pub fn respond(&self, request: &ScriptRequest) -> ScriptResponse {
        let lookup = LookupRequest::advanced_blocking_data(request.url.clone());
        let script = match self.handle(&lookup) {
            Ok(Some(data)) => data.render_script(),
            Ok(None) => String::new(),
            Err(e) => {
                log::warn!("Lookup for {} failed: {}", request.url, e);
                String::new()
            }
        };
        ScriptResponse {
            script,
            verbose: self.verbose,
            request_id: request.request_id,
        }
    }
}

/// Newest request id per page context.
#[derive(Default)]
pub struct PageRequestTracker {
    next_id: AtomicU64,
    newest: Mutex<HashMap<u64, u64>>,
}

impl PageRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request for `page`, superseding any earlier one.
    pub fn begin(&self, page: u64, url: impl Into<String>) -> ScriptRequest {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.newest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page, request_id);
        ScriptRequest {
            url: url.into(),
            request_id,
        }
    }

    /// Returns the response only if it answers the page's newest request.
    pub fn accept(&self, page: u64, response: ScriptResponse) -> Option<ScriptResponse> {
        let newest = self.newest.lock().unwrap_or_else(PoisonError::into_inner);
        if newest.get(&page) == Some(&response.request_id) {
            Some(response)
        } else {
            log::debug!(
                "Dropping stale response {} for page {}",
                response.request_id,
                page
            );
            None
        }
    }

    /// Forget a closed page.
    pub fn end(&self, page: u64) {
        self.newest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::cache::CacheSettings;

    use super::*;

    struct CountingSource {
        index: AdvancedRulesIndex,
        calls: AtomicUsize,
    }

    impl AdvancedRulesSource for CountingSource {
        fn lookup(&self, url: &str) -> AdvancedBlockingData {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.index.lookup(url)
        }
    }

    const BUNDLE: &str = r#"[
        {"trigger":{"url-filter":".*","if-domain":["example.org"]},"action":{"type":"script","script":"window.a = 1;"}},
        {"trigger":{"url-filter":".*"},"action":{"type":"css","css":".ad { display: none !important; }"}}
    ]"#;

    fn service() -> (Arc<CountingSource>, LookupService) {
        let source = Arc::new(CountingSource {
            index: AdvancedRulesIndex::from_bundle(BUNDLE).expect("bundle should load"),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResponseCache::new(CacheSettings::default()));
        (source.clone(), LookupService::new(source, cache))
    }

    #[test]
    fn parses_wire_request() {
        let request: LookupRequest =
            serde_json::from_str(r#"{"type":"advancedBlockingData","url":"https://example.org/"}"#)
                .expect("request should parse");
        assert_eq!(request, LookupRequest::advanced_blocking_data("https://example.org/"));
    }

    #[tokio::test]
    async fn second_lookup_hits_cache() {
        let (source, service) = service();
        let request = LookupRequest::advanced_blocking_data("https://news.example.org/a");

        let first = service.handle(&request).expect("lookup").expect("data");
        assert_eq!(first.scripts, vec!["window.a = 1;"]);
        let second = service.handle(&request).expect("lookup").expect("data");
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_cached() {
        let (source, service) = service();
        let request = LookupRequest::advanced_blocking_data("about:blank");
        assert_eq!(service.handle(&request).expect("lookup"), None);
        assert_eq!(service.handle(&request).expect("lookup"), None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_request_type() {
        let (_, service) = service();
        let request = LookupRequest {
            kind: "blockingData".to_string(),
            url: "https://example.org/".to_string(),
        };
        assert!(matches!(
            service.handle(&request),
            Err(SyncError::UnsupportedRequest(kind)) if kind == "blockingData"
        ));
    }

    #[tokio::test]
    async fn responds_with_rendered_script() {
        let (_, service) = service();
        let service = service.with_verbose(true);
        let response = service.respond(&ScriptRequest {
            url: "https://example.org/".to_string(),
            request_id: 9,
        });
        assert!(response.script.contains("window.a = 1;"));
        assert!(response.verbose);
        assert_eq!(response.request_id, 9);

        let json = serde_json::to_string(&response).expect("serialize");
        assert!(json.contains(r#""requestId":9"#));
    }

    #[test]
    fn only_newest_response_is_applied() {
        let tracker = PageRequestTracker::new();
        let first = tracker.begin(1, "https://example.org/a");
        let second = tracker.begin(1, "https://example.org/b");
        let other_page = tracker.begin(2, "https://example.org/c");

        let response = |request: &ScriptRequest| ScriptResponse {
            script: String::new(),
            verbose: false,
            request_id: request.request_id,
        };
        assert_eq!(tracker.accept(1, response(&first)), None);
        assert!(tracker.accept(1, response(&second)).is_some());
        assert!(tracker.accept(2, response(&other_page)).is_some());

        tracker.end(2);
        assert_eq!(tracker.accept(2, response(&other_page)), None);
    }
}
