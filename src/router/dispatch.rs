use crate::exchange::Exchange;
use crate::handler::{CleanupHook, SharedErrorHandler, SharedHandler};
use crate::status::{Flow, HandlerError};
use std::sync::Arc;

/// The fully assembled execution stack for one invocation.
///
/// `normal` is the success-mode stack: scope-matched global middleware in
/// registration order, then the route-level chain, the terminal handler last.
/// `error` holds the error-class entries (matched globals first, then the
/// route chain's) and is only walked once dispatch switches to error mode.
pub(crate) struct DispatchStack {
    pub(crate) normal: Vec<SharedHandler>,
    pub(crate) error: Vec<SharedErrorHandler>,
}

/// States of the dispatch machine. The cursor indexes into the stack of the
/// current mode; switching to `ErrorRunning` resets it to zero.
#[derive(Debug, PartialEq, Eq)]
enum DispatchState {
    NormalRunning,
    ErrorRunning,
    Done,
}

/// Runs the assembled stack against the exchange until it reaches `Done`.
///
/// # Behavior
/// Entries run strictly in stack order, one at a time; the machine awaits
/// each entry before advancing, so asynchronous work inside an entry is the
/// suspension point. Transition rules:
/// - `Flow::Continue` advances the cursor;
/// - `Flow::Respond(body)` makes the bytes the response body and
///   short-circuits;
/// - an entry that finalized the response accumulator ends dispatch even if
///   it also returned `Continue` (finalization wins);
/// - an error captured in normal mode switches to error mode; error-class
///   entries then run with the captured error, under the same rules;
/// - an error raised while already in error mode is a defect: it is logged,
///   never restarts the chain, and dispatch falls through to the synthesized
///   default response.
///
/// This function never fails: if the error stack is exhausted (or absent)
/// without a finalized response, a default error response is synthesized so
/// every invocation still terminates in exactly one response.
pub(crate) async fn run(stack: &DispatchStack, exchange: &mut Exchange) {
    let mut state = DispatchState::NormalRunning;
    let mut cursor = 0usize;
    let mut captured: Option<HandlerError> = None;

    while state != DispatchState::Done {
        match state {
            DispatchState::NormalRunning => {
                let Some(entry) = stack.normal.get(cursor) else {
                    // terminal handler completed without short-circuiting
                    state = DispatchState::Done;
                    continue;
                };
                log::trace!(
                    "{} normal[{}] '{}' running",
                    exchange.uuid(),
                    cursor,
                    entry.name()
                );
                match entry.exec(exchange).await {
                    Ok(Flow::Respond(body)) => {
                        exchange.response_mut().set_body(body);
                        state = DispatchState::Done;
                    }
                    Ok(Flow::Continue) => {
                        if exchange.response().is_finalized() {
                            log::trace!(
                                "{} response finalized by '{}', short-circuiting",
                                exchange.uuid(),
                                entry.name()
                            );
                            state = DispatchState::Done;
                        } else {
                            cursor += 1;
                        }
                    }
                    Err(error) => {
                        log::debug!(
                            "{} '{}' raised '{}', switching to error mode",
                            exchange.uuid(),
                            entry.name(),
                            error
                        );
                        captured = Some(error);
                        cursor = 0;
                        state = DispatchState::ErrorRunning;
                    }
                }
            }
            DispatchState::ErrorRunning => {
                let Some(entry) = stack.error.get(cursor) else {
                    synthesize_error_response(exchange, captured.as_ref());
                    state = DispatchState::Done;
                    continue;
                };
                let Some(trigger) = captured.as_ref() else {
                    // cannot happen: error mode is only entered with a capture
                    log::error!("{} error mode entered without a captured error", exchange.uuid());
                    synthesize_error_response(exchange, None);
                    state = DispatchState::Done;
                    continue;
                };
                log::trace!(
                    "{} error[{}] '{}' running",
                    exchange.uuid(),
                    cursor,
                    entry.name()
                );
                match entry.exec(trigger, exchange).await {
                    Ok(Flow::Respond(body)) => {
                        exchange.response_mut().set_body(body);
                        state = DispatchState::Done;
                    }
                    Ok(Flow::Continue) => {
                        if exchange.response().is_finalized() {
                            state = DispatchState::Done;
                        } else {
                            cursor += 1;
                        }
                    }
                    Err(defect) => {
                        log::error!(
                            "{} defect: '{}' raised '{}' while already in error mode",
                            exchange.uuid(),
                            entry.name(),
                            defect
                        );
                        synthesize_error_response(exchange, Some(trigger));
                        state = DispatchState::Done;
                    }
                }
            }
            DispatchState::Done => {}
        }
    }
}

/// Default error response used when no error entry finalized one.
///
/// Status comes from the triggering error's hint if present, else an error
/// status (`>= 400`) a prior step already set, else 500. Non-error statuses
/// are deliberately ignored: the accumulator starts at 200, so a 2xx/3xx on
/// it cannot be told apart from the untouched default and is replaced. The
/// body is a generic message/detail pair.
fn synthesize_error_response(exchange: &mut Exchange, error: Option<&HandlerError>) {
    if exchange.response().is_finalized() {
        return;
    }
    let prior = exchange.response().status();
    let status = error
        .and_then(HandlerError::status)
        .unwrap_or(if prior >= 400 { prior } else { 500 });
    let detail = error.map(HandlerError::message).unwrap_or_default();
    let body = serde_json::json!({
        "message": "unhandled error during dispatch",
        "detail": detail,
    });
    log::debug!(
        "{} synthesizing default error response (status {status})",
        exchange.uuid()
    );
    let response = exchange.response_mut();
    response.set_status(status);
    if let Err(err) = response.set_json(&body) {
        log::error!("failed to encode default error body: {err}");
    }
}

/// Post-dispatch finalization, run exactly once per invocation no matter
/// which path produced the response.
///
/// Discards the body for the `HEAD` -> `GET` fallback, invokes the cleanup
/// hook, then finalizes the response. Hook failures are logged but never
/// re-enter the dispatcher; the response already computed is emitted as-is.
pub(crate) async fn finalize(
    exchange: &mut Exchange,
    discard_body: bool,
    cleanup: Option<&Arc<dyn CleanupHook>>,
) {
    if discard_body {
        exchange.response_mut().clear_body();
    }
    if let Some(hook) = cleanup {
        if let Err(error) = hook.run(exchange).await {
            log::error!(
                "{} cleanup hook failed after dispatch: {error}",
                exchange.uuid()
            );
        }
    }
    if !exchange.response().is_finalized() {
        exchange.response_mut().finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::handler::{ErrorHandler, Handler, cleanup_fn};
    use crate::method::Method;
    use crate::request::Request;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn record(trace: &Trace, entry: impl Into<String>) {
        trace.lock().unwrap().push(entry.into());
    }

    struct Step {
        name: String,
        trace: Trace,
        verdict: fn(&mut Exchange) -> Result<Flow, HandlerError>,
    }

    impl Step {
        fn new(
            name: &str,
            trace: &Trace,
            verdict: fn(&mut Exchange) -> Result<Flow, HandlerError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                trace: trace.clone(),
                verdict,
            })
        }
    }

    #[async_trait]
    impl Handler for Step {
        async fn exec(&self, exchange: &mut Exchange) -> Result<Flow, HandlerError> {
            record(&self.trace, self.name.clone());
            (self.verdict)(exchange)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct ErrorStep {
        name: String,
        trace: Trace,
        verdict: fn(&HandlerError, &mut Exchange) -> Result<Flow, HandlerError>,
    }

    impl ErrorStep {
        fn new(
            name: &str,
            trace: &Trace,
            verdict: fn(&HandlerError, &mut Exchange) -> Result<Flow, HandlerError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                trace: trace.clone(),
                verdict,
            })
        }
    }

    #[async_trait]
    impl ErrorHandler for ErrorStep {
        async fn exec(
            &self,
            error: &HandlerError,
            exchange: &mut Exchange,
        ) -> Result<Flow, HandlerError> {
            record(&self.trace, self.name.clone());
            (self.verdict)(error, exchange)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn exchange() -> Exchange {
        Exchange::new(Request::new(Method::Get, "/test"))
    }

    #[tokio::test]
    async fn entries_run_in_stack_order() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![
                Step::new("first", &trace, |_| Ok(Flow::Continue)),
                Step::new("second", &trace, |_| Ok(Flow::Continue)),
                Step::new("terminal", &trace, |_| Ok(Flow::respond("done"))),
            ],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["first", "second", "terminal"]
        );
        assert_eq!(exchange.response().body(), b"done");
    }

    #[tokio::test]
    async fn returned_value_short_circuits_later_entries() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![
                Step::new("gate", &trace, |_| Ok(Flow::respond("blocked"))),
                Step::new("terminal", &trace, |_| Ok(Flow::respond("unreached"))),
            ],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(*trace.lock().unwrap(), vec!["gate"]);
        assert_eq!(exchange.response().body(), b"blocked");
    }

    #[tokio::test]
    async fn finalization_wins_over_continue() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![
                Step::new("finalizer", &trace, |exchange| {
                    exchange.response_mut().set_status(204);
                    exchange.response_mut().finalize();
                    Ok(Flow::Continue)
                }),
                Step::new("terminal", &trace, |_| Ok(Flow::respond("unreached"))),
            ],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(*trace.lock().unwrap(), vec!["finalizer"]);
        assert_eq!(exchange.response().status(), 204);
        assert!(exchange.response().is_finalized());
    }

    #[tokio::test]
    async fn error_mode_runs_only_error_entries() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![
                Step::new("boom", &trace, |_| Err(HandlerError::new("exploded"))),
                Step::new("skipped-normal", &trace, |_| Ok(Flow::Continue)),
            ],
            error: vec![
                ErrorStep::new("rescue-1", &trace, |_, _| Ok(Flow::Continue)),
                ErrorStep::new("rescue-2", &trace, |error, exchange| {
                    exchange.response_mut().set_status(502);
                    Ok(Flow::respond(format!("caught: {error}")))
                }),
            ],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["boom", "rescue-1", "rescue-2"]
        );
        assert_eq!(exchange.response().status(), 502);
        assert_eq!(exchange.response().body(), b"caught: exploded");
    }

    #[tokio::test]
    async fn exhausted_error_stack_synthesizes_a_default_response() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![Step::new("boom", &trace, |_| {
                Err(HandlerError::new("exploded"))
            })],
            error: vec![ErrorStep::new("pass", &trace, |_, _| Ok(Flow::Continue))],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(exchange.response().status(), 500);
        let body: serde_json::Value = serde_json::from_slice(exchange.response().body()).unwrap();
        assert_eq!(body["detail"], "exploded");
    }

    #[tokio::test]
    async fn error_status_hint_drives_the_synthesized_status() {
        let stack = DispatchStack {
            normal: vec![Step::new(
                "boom",
                &Arc::new(Mutex::new(Vec::new())),
                |_| Err(HandlerError::with_status(409, "conflict")),
            )],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(exchange.response().status(), 409);
    }

    #[tokio::test]
    async fn prior_error_status_is_kept_when_the_error_has_no_hint() {
        let stack = DispatchStack {
            normal: vec![Step::new(
                "boom",
                &Arc::new(Mutex::new(Vec::new())),
                |exchange| {
                    exchange.response_mut().set_status(418);
                    Err(HandlerError::new("teapot"))
                },
            )],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(exchange.response().status(), 418);
    }

    #[tokio::test]
    async fn prior_non_error_status_is_replaced_by_500() {
        let stack = DispatchStack {
            normal: vec![Step::new(
                "boom",
                &Arc::new(Mutex::new(Vec::new())),
                |exchange| {
                    exchange.response_mut().set_status(302);
                    Err(HandlerError::new("redirect gone wrong"))
                },
            )],
            error: vec![],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(exchange.response().status(), 500);
    }

    #[tokio::test]
    async fn defect_in_error_mode_does_not_restart_the_chain() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let stack = DispatchStack {
            normal: vec![Step::new("boom", &trace, |_| {
                Err(HandlerError::new("first"))
            })],
            error: vec![
                ErrorStep::new("faulty-rescue", &trace, |_, _| {
                    Err(HandlerError::new("second"))
                }),
                ErrorStep::new("unreached-rescue", &trace, |_, _| Ok(Flow::Continue)),
            ],
        };
        let mut exchange = exchange();
        run(&stack, &mut exchange).await;
        assert_eq!(*trace.lock().unwrap(), vec!["boom", "faulty-rescue"]);
        // synthesized from the original trigger, not the defect
        let body: serde_json::Value = serde_json::from_slice(exchange.response().body()).unwrap();
        assert_eq!(body["detail"], "first");
        assert_eq!(exchange.response().status(), 500);
    }

    #[tokio::test]
    async fn finalize_discards_body_for_head_fallback() {
        let mut exchange = exchange();
        exchange.response_mut().set_status(200);
        exchange.response_mut().set_header("content-type", "text/plain");
        exchange.response_mut().set_body("payload");
        finalize(&mut exchange, true, None).await;
        assert_eq!(exchange.response().body(), b"");
        assert_eq!(exchange.response().header("content-type"), Some("text/plain"));
        assert!(exchange.response().is_finalized());
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_block_emission() {
        let hook: Arc<dyn CleanupHook> = Arc::new(cleanup_fn(|_| {
            Box::pin(async move { Err(HandlerError::new("cleanup blew up")) })
        }));
        let mut exchange = exchange();
        exchange.response_mut().set_body("kept");
        finalize(&mut exchange, false, Some(&hook)).await;
        assert!(exchange.response().is_finalized());
        assert_eq!(exchange.response().body(), b"kept");
    }
}
