//! Search client adapter.
//!
//! [`SearchAdapter`] wraps a [`NearbySearch`] provider with the policies the engine
//! relies on: a call budget checked before every attempt, exponential backoff on
//! `OVER_QUERY_LIMIT`, bounded retries on transport failures and the mandatory wait
//! before asking for a continuation page. All waiting goes through a [`Pause`] so
//! tests and dry runs never sleep for real.

use std::time::Duration;

use gridsweep_places::{NearbyPage, NearbyRequest, NearbySearch, SearchStatus};
use tracing::{debug, trace, warn};

pub use error::{ClientError, Result};

/// The service refuses continuation tokens used sooner than this.
pub const MIN_PAGINATION_WAIT: Duration = Duration::from_secs(2);

mod error {
    use gridsweep_places::SearchStatus;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum ClientError {
        #[error("Call budget exhausted after {used} of {limit} calls")]
        BudgetExhausted { used: u64, limit: u64 },
        #[error("Still rate limited after {attempts} attempts")]
        RateLimited { attempts: u32 },
        #[error("Transport failure after {attempts} attempts: {message}")]
        Transport { attempts: u32, message: String },
        #[error("Search service answered {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
        Service {
            status: SearchStatus,
            message: Option<String>,
        },
    }

    impl ClientError {
        pub fn is_budget_exhausted(&self) -> bool {
            matches!(self, Self::BudgetExhausted { .. })
        }
    }

    pub type Result<T> = std::result::Result<T, ClientError>;
}

/// Something that can block the current thread for a while.
pub trait Pause {
    fn pause(&mut self, duration: Duration);
}

impl<T: Pause + ?Sized> Pause for &mut T {
    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration);
    }
}

impl<T: Pause + ?Sized> Pause for Box<T> {
    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration);
    }
}

/// Real sleeping, for live runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records every requested pause without sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingPause {
    pub pauses: Vec<Duration>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Duration {
        self.pauses.iter().sum()
    }
}

impl Pause for RecordingPause {
    fn pause(&mut self, duration: Duration) {
        self.pauses.push(duration);
    }
}

/// Additive-increase / multiplicative-decrease style backoff state.
///
/// Every rate-limited response sets the delay to `base * 2^failures` capped at
/// `max`; every success halves the current delay (never below `base`) and forgets
/// one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RateController {
    base: Duration,
    max: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl RateController {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            consecutive_failures: 0,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn base_delay(&self) -> Duration {
        self.base
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Register a rate-limited response and return how long to back off.
    pub fn on_rate_limited(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let exponent = self.consecutive_failures.min(31);
        self.current = self.base.saturating_mul(1u32 << exponent).min(self.max);
        self.current
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
        self.current = (self.current / 2).max(self.base);
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Ceiling on provider calls. A limit of zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallBudget {
    limit: Option<u64>,
    used: u64,
}

impl CallBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit: (limit > 0).then_some(limit),
            used: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Fail fast if the ceiling was reached.
    pub fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) if self.used >= limit => Err(ClientError::BudgetExhausted {
                used: self.used,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Reserve one call.
    pub fn acquire(&mut self) -> Result<()> {
        self.check()?;
        self.used += 1;
        Ok(())
    }
}

/// Policy knobs for [`SearchAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub pagination_wait: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_rate_limit_retries: u32,
    pub max_transport_retries: u32,
    /// Zero means unlimited.
    pub call_budget: u64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            pagination_wait: MIN_PAGINATION_WAIT,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_rate_limit_retries: 50,
            max_transport_retries: 2,
            call_budget: 0,
        }
    }
}

/// Budgeted, rate-limit aware access to a nearby-search provider.
pub struct SearchAdapter<P, Z = ThreadPause> {
    provider: P,
    pause: Z,
    rate: RateController,
    budget: CallBudget,
    pagination_wait: Duration,
    max_rate_limit_retries: u32,
    max_transport_retries: u32,
    rate_limited_responses: u64,
    transport_failures: u64,
}

impl<P: NearbySearch, Z: Pause> SearchAdapter<P, Z> {
    pub fn new(provider: P, pause: Z, settings: AdapterSettings) -> Self {
        Self {
            provider,
            pause,
            rate: RateController::new(settings.backoff_base, settings.backoff_max),
            budget: CallBudget::new(settings.call_budget),
            pagination_wait: settings.pagination_wait.max(MIN_PAGINATION_WAIT),
            max_rate_limit_retries: settings.max_rate_limit_retries,
            max_transport_retries: settings.max_transport_retries,
            rate_limited_responses: 0,
            transport_failures: 0,
        }
    }

    /// Fetch the first page of a fresh search.
    pub fn search(&mut self, request: &NearbyRequest) -> Result<NearbyPage> {
        self.execute(request)
    }

    /// Fetch the continuation page identified by `page_token`.
    ///
    /// The budget is checked before waiting so an exhausted run stops without
    /// sleeping first.
    pub fn next_page(&mut self, request: &NearbyRequest, page_token: &str) -> Result<NearbyPage> {
        self.budget.check()?;
        trace!(wait = ?self.pagination_wait, "Waiting before continuation page");
        self.pause.pause(self.pagination_wait);
        self.execute(&request.continuation(page_token))
    }

    /// Courtesy delay between search points.
    pub fn pause(&mut self, duration: Duration) {
        self.pause.pause(duration);
    }

    pub fn calls_made(&self) -> u64 {
        self.budget.used()
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    pub fn rate_controller(&self) -> &RateController {
        &self.rate
    }

    pub fn rate_limited_responses(&self) -> u64 {
        self.rate_limited_responses
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn pauser(&self) -> &Z {
        &self.pause
    }

    pub fn into_parts(self) -> (P, Z) {
        (self.provider, self.pause)
    }

    fn execute(&mut self, request: &NearbyRequest) -> Result<NearbyPage> {
        let mut rate_limit_retries = 0u32;
        let mut transport_retries = 0u32;

        loop {
            self.budget.acquire()?;
            let page = self.provider.nearby(request);

            match &page.status {
                SearchStatus::Ok | SearchStatus::ZeroResults => {
                    self.rate.on_success();
                    debug!(
                        status = %page.status,
                        results = page.results.len(),
                        has_next = page.next_page_token.is_some(),
                        "Nearby search page"
                    );
                    return Ok(page);
                }
                SearchStatus::OverQueryLimit => {
                    self.rate_limited_responses += 1;
                    if rate_limit_retries >= self.max_rate_limit_retries {
                        return Err(ClientError::RateLimited {
                            attempts: rate_limit_retries + 1,
                        });
                    }
                    rate_limit_retries += 1;
                    let delay = self.rate.on_rate_limited();
                    self.budget.check()?;
                    warn!(
                        retry = rate_limit_retries,
                        delay = ?delay,
                        "Rate limited, backing off"
                    );
                    self.pause.pause(delay);
                }
                SearchStatus::RequestFailed => {
                    self.transport_failures += 1;
                    let message = page.error_message.clone().unwrap_or_default();
                    if transport_retries >= self.max_transport_retries {
                        return Err(ClientError::Transport {
                            attempts: transport_retries + 1,
                            message,
                        });
                    }
                    transport_retries += 1;
                    self.budget.check()?;
                    warn!(retry = transport_retries, error = %message, "Request failed, retrying");
                    self.pause.pause(self.rate.base_delay());
                }
                status => {
                    return Err(ClientError::Service {
                        status: status.clone(),
                        message: page.error_message.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use gridsweep_places::{Geometry, LatLng, PlaceResult};

    use super::*;

    /// Replays canned pages and records every request it saw.
    #[derive(Default)]
    struct Scripted {
        pages: VecDeque<NearbyPage>,
        requests: Vec<NearbyRequest>,
    }

    impl Scripted {
        fn new(pages: impl IntoIterator<Item = NearbyPage>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                requests: Vec::new(),
            }
        }
    }

    impl NearbySearch for Scripted {
        fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage {
            self.requests.push(request.clone());
            self.pages
                .pop_front()
                .unwrap_or_else(NearbyPage::zero_results)
        }
    }

    fn place(id: &str) -> PlaceResult {
        PlaceResult {
            place_id: Some(id.to_string()),
            geometry: Some(Geometry {
                location: LatLng::new(52.5, 13.4),
            }),
            ..Default::default()
        }
    }

    fn request() -> NearbyRequest {
        NearbyRequest::new(LatLng::new(52.5, 13.4), 750.0, "physiotherapist")
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_backoff_converges() {
        let mut rate = RateController::default();
        let backoffs: Vec<_> = (0..9).map(|_| rate.on_rate_limited()).collect();
        assert_eq!(
            backoffs,
            [2.0, 4.0, 8.0, 16.0, 32.0, 60.0, 60.0, 60.0, 60.0].map(secs)
        );

        let mut recovered = Vec::new();
        for _ in 0..7 {
            rate.on_success();
            recovered.push(rate.current_delay());
        }
        assert_eq!(
            recovered,
            [30.0, 15.0, 7.5, 3.75, 1.875, 1.0, 1.0].map(secs)
        );
        assert_eq!(rate.consecutive_failures(), 2);
    }

    #[test]
    fn test_first_rate_limit_doubles_resting_delay() {
        let mut rate = RateController::default();
        assert_eq!(rate.current_delay(), secs(1.0));
        assert_eq!(rate.on_rate_limited(), secs(2.0));
        assert_eq!(rate.on_rate_limited(), secs(4.0));
        assert_eq!(rate.on_rate_limited(), secs(8.0));
    }

    #[test]
    fn test_exhausted_budget_skips_backoff() {
        let provider = Scripted::new([NearbyPage::over_query_limit()]);
        let settings = AdapterSettings {
            call_budget: 1,
            ..Default::default()
        };
        let mut adapter = SearchAdapter::new(provider, RecordingPause::new(), settings);

        let err = adapter.search(&request()).unwrap_err();
        assert!(err.is_budget_exhausted());
        assert_eq!(adapter.calls_made(), 1);
        assert!(adapter.pauser().pauses.is_empty());
    }

    #[test]
    fn test_backoff_never_overflows() {
        let mut rate = RateController::default();
        for _ in 0..200 {
            assert!(rate.on_rate_limited() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_budget_accounting() {
        let mut budget = CallBudget::new(2);
        assert_eq!(budget.remaining(), Some(2));
        budget.acquire().unwrap();
        budget.acquire().unwrap();
        assert!(budget.is_exhausted());
        assert_eq!(
            budget.acquire().unwrap_err(),
            ClientError::BudgetExhausted { used: 2, limit: 2 }
        );

        let mut unlimited = CallBudget::unlimited();
        for _ in 0..1000 {
            unlimited.acquire().unwrap();
        }
        assert_eq!(unlimited.remaining(), None);
        assert_eq!(unlimited.used(), 1000);
    }

    #[test]
    fn test_rate_limit_is_retried_with_backoff() {
        let provider = Scripted::new([
            NearbyPage::over_query_limit(),
            NearbyPage::over_query_limit(),
            NearbyPage::ok(vec![place("a")], None),
        ]);
        let mut adapter =
            SearchAdapter::new(provider, RecordingPause::new(), AdapterSettings::default());

        let page = adapter.search(&request()).unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(adapter.calls_made(), 3);
        assert_eq!(adapter.rate_limited_responses(), 2);
        assert_eq!(adapter.pauser().pauses, vec![secs(2.0), secs(4.0)]);
        // One success halves 4 s back towards the base.
        assert_eq!(adapter.rate_controller().current_delay(), secs(2.0));
    }

    #[test]
    fn test_rate_limit_retries_are_bounded() {
        let provider = Scripted::new(std::iter::repeat_n(NearbyPage::over_query_limit(), 10));
        let settings = AdapterSettings {
            max_rate_limit_retries: 3,
            ..Default::default()
        };
        let mut adapter = SearchAdapter::new(provider, RecordingPause::new(), settings);

        let err = adapter.search(&request()).unwrap_err();
        assert_eq!(err, ClientError::RateLimited { attempts: 4 });
        assert_eq!(adapter.calls_made(), 4);
    }

    #[test]
    fn test_budget_counts_every_attempt() {
        let provider = Scripted::new(std::iter::repeat_n(NearbyPage::over_query_limit(), 10));
        let settings = AdapterSettings {
            call_budget: 3,
            ..Default::default()
        };
        let mut adapter = SearchAdapter::new(provider, RecordingPause::new(), settings);

        let err = adapter.search(&request()).unwrap_err();
        assert!(err.is_budget_exhausted());
        assert_eq!(adapter.calls_made(), 3);
        // The last backoff is skipped, the budget already rules out a retry.
        assert_eq!(adapter.pauser().pauses, vec![secs(2.0), secs(4.0)]);
        let (provider, _) = adapter.into_parts();
        assert_eq!(provider.requests.len(), 3);
    }

    #[test]
    fn test_transport_failures_are_retried_then_reported() {
        let provider = Scripted::new([
            NearbyPage::request_failed("connection reset"),
            NearbyPage::request_failed("connection reset"),
            NearbyPage::request_failed("connection reset"),
        ]);
        let mut adapter =
            SearchAdapter::new(provider, RecordingPause::new(), AdapterSettings::default());

        let err = adapter.search(&request()).unwrap_err();
        assert_eq!(
            err,
            ClientError::Transport {
                attempts: 3,
                message: "connection reset".into()
            }
        );
        assert_eq!(adapter.transport_failures(), 3);
    }

    #[test]
    fn test_transport_failure_recovers() {
        let provider = Scripted::new([
            NearbyPage::request_failed("timeout"),
            NearbyPage::zero_results(),
        ]);
        let mut adapter =
            SearchAdapter::new(provider, RecordingPause::new(), AdapterSettings::default());
        let page = adapter.search(&request()).unwrap();
        assert_eq!(page.status, SearchStatus::ZeroResults);
        assert_eq!(adapter.calls_made(), 2);
    }

    #[test]
    fn test_other_statuses_are_terminal() {
        let provider = Scripted::new([NearbyPage {
            error_message: Some("bad key".into()),
            ..NearbyPage::with_status(SearchStatus::Other("REQUEST_DENIED".into()))
        }]);
        let mut adapter =
            SearchAdapter::new(provider, RecordingPause::new(), AdapterSettings::default());
        let err = adapter.search(&request()).unwrap_err();
        assert_eq!(err.to_string(), "Search service answered REQUEST_DENIED: bad key");
        assert_eq!(adapter.calls_made(), 1);
    }

    #[test]
    fn test_continuation_waits_and_sends_token() {
        let provider = Scripted::new([
            NearbyPage::ok(vec![place("a")], Some("tok".into())),
            NearbyPage::ok(vec![place("b")], None),
        ]);
        let settings = AdapterSettings {
            pagination_wait: Duration::from_millis(10),
            ..Default::default()
        };
        let mut adapter = SearchAdapter::new(provider, RecordingPause::new(), settings);

        let first = adapter.search(&request()).unwrap();
        let token = first.next_page_token.clone().unwrap();
        let second = adapter.next_page(&request(), &token).unwrap();
        assert_eq!(second.results[0].place_id.as_deref(), Some("b"));

        // Sub-minimum waits are raised to the service minimum.
        assert_eq!(adapter.pauser().pauses, vec![MIN_PAGINATION_WAIT]);
        let (provider, _) = adapter.into_parts();
        assert_eq!(provider.requests[1].page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_exhausted_budget_skips_pagination_wait() {
        let provider = Scripted::new([NearbyPage::ok(vec![place("a")], Some("tok".into()))]);
        let settings = AdapterSettings {
            call_budget: 1,
            ..Default::default()
        };
        let mut adapter = SearchAdapter::new(provider, RecordingPause::new(), settings);

        adapter.search(&request()).unwrap();
        let err = adapter.next_page(&request(), "tok").unwrap_err();
        assert!(err.is_budget_exhausted());
        assert!(adapter.pauser().pauses.is_empty());
    }
}
