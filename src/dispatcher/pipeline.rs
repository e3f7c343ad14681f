use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, info_span, warn, Span};

use super::core::{panic_message, DispatchRouter};
use crate::config::PipelineConfig;
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, PipelineResult, SUPPORT_ERROR};
use crate::executor::{CoroutineSleeper, RetryExecutor, Sleeper};
use crate::ids::DispatchId;
use crate::outcome::OutcomeProcessor;
use crate::rate_limit::LeakyBucket;
use crate::registry::Registry;
use crate::request::Request;
use crate::security::TokenService;
use crate::transport::{Scope, TransportRequest, TransportResponse, ViewRenderer};

/// Request attribute carrying the dispatch id in and out of [`Dispatcher::dispatch`].
pub const DISPATCH_ID_ATTRIBUTE: &str = "dispatch_id";

/// Entry point of the pipeline. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    tokens: Arc<dyn TokenService>,
    views: Arc<dyn ViewRenderer>,
    bucket: Arc<LeakyBucket>,
    sleeper: Arc<dyn Sleeper>,
    config: Arc<PipelineConfig>,
}

impl Dispatcher {
    /// A dispatcher with a fresh bucket sized by `config.bucket` and
    /// coroutine sleeps between retries.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        tokens: Arc<dyn TokenService>,
        views: Arc<dyn ViewRenderer>,
        config: PipelineConfig,
    ) -> Self {
        let bucket = Arc::new(LeakyBucket::new(config.bucket));
        Self {
            registry,
            tokens,
            views,
            bucket,
            sleeper: Arc::new(CoroutineSleeper),
            config: Arc::new(config),
        }
    }

    /// Share an existing admission gate.
    #[must_use]
    pub fn with_bucket(mut self, bucket: Arc<LeakyBucket>) -> Self {
        self.bucket = bucket;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn bucket(&self) -> &LeakyBucket {
        &self.bucket
    }

    /// Handle one inbound request. Every outcome, failures included, is
    /// written to `res`.
    ///
    /// A valid ULID in the [`DISPATCH_ID_ATTRIBUTE`] request attribute is
    /// used as the dispatch id; otherwise a new one is minted. Either way the
    /// id is left in that attribute for the view.
    pub fn dispatch(&self, req: &mut dyn TransportRequest, res: &mut dyn TransportResponse) {
        let supplied = req
            .attribute(Scope::Request, DISPATCH_ID_ATTRIBUTE)
            .and_then(Value::as_str);
        let dispatch_id = DispatchId::from_str_or_new(supplied);
        req.set_attribute(
            Scope::Request,
            DISPATCH_ID_ATTRIBUTE,
            Value::String(dispatch_id.to_string()),
        );

        // Entered only around code that cannot park the coroutine: a resumed
        // coroutine may run on another worker thread than the one holding
        // the span stack.
        let span = info_span!(
            "dispatch",
            dispatch_id = %dispatch_id,
            method = %req.method(),
            path = %req.path()
        );
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(&span, &mut *req, &mut *res)));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        span.in_scope(|| match outcome {
            Ok(Ok(status)) => {
                info!(status, duration_ms = elapsed_ms, "dispatch complete");
            }
            Ok(Err(err)) => {
                warn!(
                    status = err.status(),
                    error = %err,
                    duration_ms = elapsed_ms,
                    "dispatch failed"
                );
                self.outcome()
                    .render_error(err.status(), &err.to_string(), &*req, res);
            }
            Err(panic) => {
                error!(
                    panic_message = %panic_message(panic.as_ref()),
                    duration_ms = elapsed_ms,
                    "dispatch panicked"
                );
                self.outcome().render_error(500, SUPPORT_ERROR, &*req, res);
            }
        });
    }

    fn outcome(&self) -> OutcomeProcessor<'_> {
        OutcomeProcessor::new(&self.config, self.views.as_ref())
    }

    fn execute(
        &self,
        span: &Span,
        req: &mut dyn TransportRequest,
        res: &mut dyn TransportResponse,
    ) -> PipelineResult<u16> {
        // parks on the bucket condvar
        if self.config.rate_limit_enabled
            && !self.bucket.acquire_or_wait(self.config.rate_limit_wait())
        {
            return Err(PipelineError::RateLimitExceeded);
        }

        let request = span.in_scope(|| Request::from_transport(&*req, &self.config));
        let endpoint = span.in_scope(|| Endpoint::parse(&request.endpoint))?;

        let router = DispatchRouter::new(&self.registry, self.tokens.as_ref());
        let route = span.in_scope(|| router.prepare(&endpoint, &request))?;

        // handlers and retry backoff may park
        let response = RetryExecutor::new(self.sleeper.as_ref())
            .send_with_retry(&request, |r| router.invoke(route, r));

        span.in_scope(|| {
            self.outcome()
                .process(&endpoint, &request, &response, req, res)
        })?;
        Ok(response.status_code)
    }
}
