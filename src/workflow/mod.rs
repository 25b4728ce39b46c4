//! End-to-end chat interaction: session, configuration, submission,
//! completion, extraction and capture, each bounded and tagged by phase.

pub mod configure;
pub mod request;
pub mod snapshot;

pub use configure::{configure_chat, select_model, set_ephemeral_mode};
pub use request::{
    ChatOptions, InteractionReply, InteractionRequest, InteractionResult, Phase, PhaseFailure,
};
pub use snapshot::capture_page;

use crate::browser::{
    await_quiescence, resolve_trigger_control, QuiescenceSettings, Session, SessionManager,
    TriggerInput, TriggerResolution,
};
use crate::core::{BrowserFactory, BrowserTrait, Config, Credentials, Target, WaitState};
use crate::errors::{AgentError, Result};
use crate::utils::{html_to_text, ScreenshotManager};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Workflow<F: BrowserFactory> {
    factory: F,
    config: Config,
    credentials: Option<Credentials>,
}

impl<F: BrowserFactory> Workflow<F> {
    pub fn new(factory: F, config: Config) -> Self {
        Self {
            factory,
            config,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, request: &InteractionRequest) -> InteractionResult {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one interaction; cancelling `cancel` fails the current phase and
    /// still tears the session down.
    pub async fn run_with_cancel(
        &self,
        request: &InteractionRequest,
        cancel: CancellationToken,
    ) -> InteractionResult {
        let session_id = Uuid::new_v4().to_string();
        let span = info_span!("interaction", session_id = %session_id);
        self.execute(request, &session_id, &cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        request: &InteractionRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> InteractionResult {
        if let Err(err) = self.config.validate().and_then(|()| request.validate()) {
            warn!(phase = %Phase::Validate, error = %err, "request rejected");
            return InteractionResult::Failed(PhaseFailure::new(Phase::Validate, err));
        }

        let timeouts = &request.timeouts;
        let budget = self.config.session_budget();
        if timeouts.establish_session() < budget {
            warn!(
                limit_ms = timeouts.establish_session_ms,
                budget_ms = budget.as_millis() as u64,
                "session phase limit is below the login step budget"
            );
        }
        let manager = SessionManager::new(&self.factory, &self.config, self.credentials.as_ref());
        let session = match run_phase(
            Phase::EstablishSession,
            timeouts.establish_session(),
            cancel,
            manager.obtain(&request.url, session_id),
        )
        .await
        {
            Ok(session) => session,
            Err(failure) => return InteractionResult::Failed(failure),
        };
        info!(origin = ?session.origin(), "session established");

        let outcome = self.drive(&session, request, cancel).await;

        let started = Instant::now();
        match tokio::time::timeout(timeouts.teardown(), session.close()).await {
            Ok(Ok(())) => info!(
                phase = %Phase::Teardown,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "session closed"
            ),
            Ok(Err(err)) => warn!(phase = %Phase::Teardown, error = %err, "teardown failed"),
            Err(_) => warn!(phase = %Phase::Teardown, "teardown timed out"),
        }

        match outcome {
            Ok(reply) => InteractionResult::Completed(reply),
            Err(failure) => InteractionResult::Failed(failure),
        }
    }

    async fn drive(
        &self,
        session: &Session<F::Browser>,
        request: &InteractionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<InteractionReply, PhaseFailure> {
        let config = &self.config;
        let timeouts = &request.timeouts;
        let browser = session.browser();
        let tab = session
            .tab()
            .map_err(|err| PhaseFailure::new(Phase::Configure, err))?;

        run_phase(
            Phase::Configure,
            timeouts.configure(),
            cancel,
            configure_chat(
                browser,
                tab,
                &config.selectors,
                &request.options,
                config.browser.action_timeout(),
            ),
        )
        .await?;

        run_phase(
            Phase::AwaitReady,
            timeouts.await_ready(),
            cancel,
            await_ready(browser, tab, config),
        )
        .await?;

        run_phase(
            Phase::SubmitInput,
            timeouts.submit_input(),
            cancel,
            submit_input(browser, tab, config, request),
        )
        .await?;

        run_phase(
            Phase::AwaitCompletion,
            timeouts.await_completion(),
            cancel,
            await_completion(browser, tab, config, timeouts.response_stage()),
        )
        .await?;

        let text = run_phase(
            Phase::Extract,
            timeouts.extract(),
            cancel,
            extract_reply(browser, tab, config),
        )
        .await?;

        let artifact = run_phase(
            Phase::Capture,
            timeouts.capture(),
            cancel,
            ScreenshotManager::capture_full_page(
                browser,
                tab,
                &request.artifact_path,
                config.timing.settle_before_capture(),
            ),
        )
        .await
        .map(|()| request.artifact_path.clone());

        match artifact {
            Err(failure) if matches!(failure.error, AgentError::Cancelled) => Err(failure),
            artifact => {
                if let Err(failure) = &artifact {
                    warn!(error = %failure, "reply extracted without screenshot");
                }
                Ok(InteractionReply {
                    session_id: session.id().to_string(),
                    origin: session.origin(),
                    text,
                    artifact,
                    completed_at: Utc::now(),
                })
            }
        }
    }
}

/// Run one phase under its time limit, failing early on cancellation.
async fn run_phase<T, Fut>(
    phase: Phase,
    limit: Duration,
    cancel: &CancellationToken,
    work: Fut,
) -> std::result::Result<T, PhaseFailure>
where
    Fut: Future<Output = Result<T>>,
{
    info!(phase = %phase, "phase started");
    let started = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        result = tokio::time::timeout(limit, work) => match result {
            Ok(inner) => inner,
            Err(_) => Err(AgentError::TimeoutError(format!(
                "phase {} exceeded {} ms",
                phase,
                limit.as_millis()
            ))),
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(value) => {
            debug!(phase = %phase, elapsed_ms, "phase completed");
            Ok(value)
        }
        Err(err) => {
            error!(phase = %phase, elapsed_ms, error = %err, "phase failed");
            Err(PhaseFailure::new(phase, err))
        }
    }
}

/// Best-effort network quiescence, then the input control must be visible.
async fn await_ready<B: BrowserTrait>(browser: &B, tab: &B::TabHandle, config: &Config) -> Result<()> {
    match await_quiescence(browser, tab, QuiescenceSettings::from(&config.timing)).await {
        Ok(report) => debug!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            requests = report.requests_started,
            "page settled"
        ),
        Err(AgentError::TimedOut { elapsed_ms }) => {
            warn!(elapsed_ms, "network still busy; continuing")
        }
        Err(err) => return Err(err),
    }

    browser
        .wait_for_selector(
            tab,
            &config.selectors.input,
            WaitState::Visible,
            config.browser.action_timeout(),
        )
        .await
}

async fn submit_input<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    config: &Config,
    request: &InteractionRequest,
) -> Result<()> {
    let input = TriggerInput {
        text: request.message(),
        file_path: request.file_path(),
    };

    match resolve_trigger_control(browser, tab, config, input).await? {
        TriggerResolution::Found(control) => {
            browser.click(tab, &Target::Element(control)).await?;
            info!("input submitted");
            Ok(())
        }
        TriggerResolution::NotFound => Err(AgentError::SubmissionFailed(
            "no disabled control became enabled after input".to_string(),
        )),
    }
}

/// The three observable signs of a finished reply, in order.
async fn await_completion<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    config: &Config,
    stage_timeout: Duration,
) -> Result<()> {
    let selectors = &config.selectors;
    let stages = [
        ("send control reset", &selectors.disabled, WaitState::Attached),
        ("generation indicator", &selectors.stop_generating, WaitState::Detached),
        ("response container", &selectors.response, WaitState::Attached),
    ];

    for (stage, selector, state) in stages {
        browser
            .wait_for_selector(tab, selector, state, stage_timeout)
            .await
            .map_err(|err| match err {
                AgentError::TimeoutError(_) => AgentError::ResponseTimeout {
                    stage: stage.to_string(),
                    timeout_ms: stage_timeout.as_millis() as u64,
                },
                other => other,
            })?;
        debug!(stage, "completion stage reached");
    }
    Ok(())
}

async fn extract_reply<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    config: &Config,
) -> Result<String> {
    let selector = &config.selectors.response;
    // Chats that keep history render one container per reply; the newest is last.
    let last = browser
        .query_all(tab, selector)
        .await?
        .pop()
        .ok_or_else(|| AgentError::ElementNotFound(selector.clone()))?;

    let html = browser.inner_html(tab, &Target::Element(last)).await?;
    let text = html_to_text(&html)?;
    info!(chars = text.chars().count(), "reply extracted");
    Ok(text)
}
