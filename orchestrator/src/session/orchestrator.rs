//! The owned deployment session

use std::sync::{Arc, Mutex};

use cloud_api::{Compilation, CompilationOutput};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::compile::artifact::{BuildArtifact, PreCompileOutput};
use crate::compile::fsm::{CompileEvent, CompileFsm, CompileState};
use crate::compile::job::{CommandType, CompileJob, CompileJobManager, CompilePayload};
use crate::compile::stream::{StreamConsumer, StreamEnd};
use crate::console::ResponseStream;
use crate::errors::OrchestratorError;
use crate::http::agent::AgentService;
use crate::http::builder::BuildService;
use crate::http::iot::IotService;
use crate::http::ota::OtaService;
use crate::notify::{
    AnalyticsEvent, EventBus, Notification, SessionEvent, ERROR_CODE_ABORTED, ERROR_CODE_UPLOAD_FAILED,
};
use crate::ota::fsm::{OtaPhase, OtaSession};
use crate::ota::session::{AbortOutcome, OtaSessionManager, READY_MESSAGE};
use crate::readiness::cert::{GateDecision, ReadinessGate, SketchWorkspace};
use crate::readiness::ReadinessState;
use crate::session::cache::{SessionCache, SessionStore};
use crate::session::request::{DeployRequest, DeploymentTarget, SketchRef};
use crate::status::{DeploymentStatus, StatusHub};
use crate::transport::agent::LocalAgentUploader;
use crate::transport::dispatcher::{DispatchOutcome, TransportDispatcher};
use crate::transport::{HostCapability, UploadStatus, Uploader};
use crate::utils::generate_uuid;
use crate::workers::{ota_poller, reconnect};

/// External collaborators of a session
#[derive(Clone)]
pub struct SessionServices {
    pub builder: Arc<dyn BuildService>,
    pub ota: Arc<dyn OtaService>,
    pub iot: Arc<dyn IotService>,
    pub agent: Arc<dyn AgentService>,
    pub serial: Arc<dyn Uploader>,
    pub workspace: Arc<dyn SketchWorkspace>,
    pub store: Arc<dyn SessionStore>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub capability: HostCapability,
    pub reconnect: reconnect::Options,
    pub ota_poll: ota_poller::Options,
    pub console_backlog: usize,
}

/// Result of the startup resume attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    NothingCached,
    /// The cached job was dropped: wrong board, dead or unknown remotely
    Discarded,
    Resumed { id: String, command_type: CommandType },
}

enum FlowStart {
    New(CommandType),
    Resume { compilation: Compilation, command_type: CommandType },
    OtaPoll { ota_id: String },
}

struct Flow {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    builder: Arc<dyn BuildService>,
    cache: Arc<SessionCache>,
    jobs: CompileJobManager,
    streams: StreamConsumer,
    gate: ReadinessGate,
    ota: Arc<OtaSessionManager>,
    dispatcher: TransportDispatcher,
    console: ResponseStream,
    events: EventBus,
    status: StatusHub,
    compile: Mutex<CompileFsm>,
    artifact: watch::Sender<BuildArtifact>,
}

/// Owns every subsystem of one deployment session.
///
/// Created with [`OrchestratorSession::new`] and torn down with
/// [`OrchestratorSession::shutdown`]. At most one flow runs at a time; every
/// start cancels the previous flow, waits for it, cancels its compile job and
/// clears the session cache before anything new begins.
pub struct OrchestratorSession {
    inner: Arc<Inner>,
    flow: AsyncMutex<Option<Flow>>,
}

impl OrchestratorSession {
    pub fn new(services: SessionServices, options: SessionOptions) -> Self {
        let backlog = if options.console_backlog == 0 { 1000 } else { options.console_backlog };
        let console = ResponseStream::new(backlog);
        let events = EventBus::default();
        let status = StatusHub::new();
        let cache = Arc::new(SessionCache::new(services.store.clone()));

        let ota = Arc::new(OtaSessionManager::new(
            services.ota.clone(),
            services.iot.clone(),
            events.clone(),
            console.clone(),
            status.clone(),
        ));
        let agent_uploader: Arc<dyn Uploader> =
            Arc::new(LocalAgentUploader::new(services.agent.clone(), options.reconnect.clone()));
        let dispatcher = TransportDispatcher::new(
            services.builder.clone(),
            agent_uploader,
            services.serial.clone(),
            ota.clone(),
            options.capability,
            options.ota_poll.clone(),
            status.clone(),
        );
        let gate = ReadinessGate::new(
            services.iot.clone(),
            services.workspace.clone(),
            events.clone(),
            status.clone(),
        );
        let (artifact, _) = watch::channel(BuildArtifact::default());

        let inner = Inner {
            builder: services.builder.clone(),
            jobs: CompileJobManager::new(services.builder.clone(), cache.clone()),
            streams: StreamConsumer::new(services.builder),
            cache,
            gate,
            ota,
            dispatcher,
            console,
            events,
            status,
            compile: Mutex::new(CompileFsm::new()),
            artifact,
        };

        Self {
            inner: Arc::new(inner),
            flow: AsyncMutex::new(None),
        }
    }

    /// Compile the sketch without uploading it
    pub async fn verify(&self, request: DeployRequest) -> Result<(), OrchestratorError> {
        self.start(request, FlowStart::New(CommandType::Verify)).await
    }

    /// Compile the sketch and deliver it to the target
    pub async fn upload(&self, request: DeployRequest) -> Result<(), OrchestratorError> {
        self.start(request, FlowStart::New(CommandType::Upload)).await
    }

    /// Interrupt the running flow and cancel its compile job
    pub async fn cancel(&self) -> Result<(), OrchestratorError> {
        let mut flow = self.flow.lock().await;
        let was_compiling = self.inner.compile_state().is_active();

        if let Some(mut current) = flow.take() {
            current.token.cancel();
            let remote = self.inner.jobs.cancel().await;
            if let Some(handle) = current.handle.take() {
                if let Err(e) = handle.await {
                    error!("Flow task failed: {}", e);
                }
            }
            self.inner.cancel_leftover_job().await;
            self.inner.settle_cancelled();

            if was_compiling {
                match &remote {
                    Ok(()) => self.inner.events.notify(Notification::VerifyInterrupted),
                    Err(e) => self.inner.events.notify(Notification::VerifyNotInterrupted {
                        message: e.to_string(),
                    }),
                }
            }
            return remote;
        }

        self.inner.jobs.cancel().await
    }

    /// Resume the compile job left by a previous process, at most once per session.
    ///
    /// The cached job is discarded when it was compiled for another board or
    /// the build service reports it failed or cancelled.
    pub async fn resume_from_cache(
        &self,
        target: DeploymentTarget,
        sketch: SketchRef,
    ) -> Result<ResumeOutcome, OrchestratorError> {
        let Some(handle) = self.inner.cache.take_for_resume().await? else {
            return Ok(ResumeOutcome::NothingCached);
        };

        if handle.fqbn != target.fqbn {
            info!(
                "Cached compilation {} targets {}, not {}; discarding",
                handle.id, handle.fqbn, target.fqbn
            );
            self.inner.cache.clear().await?;
            return Ok(ResumeOutcome::Discarded);
        }

        let compilation = match self.inner.builder.get_compilation(&handle.id).await {
            Ok(compilation) => compilation,
            Err(e) => {
                warn!("Unable to look up cached compilation {}: {}", handle.id, e);
                self.inner.cache.clear().await?;
                return Ok(ResumeOutcome::Discarded);
            }
        };
        if compilation.status.is_dead() {
            info!("Cached compilation {} is {:?}; discarding", handle.id, compilation.status);
            self.inner.cache.clear().await?;
            return Ok(ResumeOutcome::Discarded);
        }

        let request = DeployRequest {
            target,
            sketch,
            verbose: false,
        };
        let id = compilation.id.clone();
        self.start(
            request,
            FlowStart::Resume {
                compilation,
                command_type: handle.command_type,
            },
        )
        .await?;
        Ok(ResumeOutcome::Resumed {
            id,
            command_type: handle.command_type,
        })
    }

    /// Follow an OTA already running on the target device
    pub async fn resume_ongoing_ota(
        &self,
        target: DeploymentTarget,
        sketch: SketchRef,
    ) -> Result<Option<OtaSession>, OrchestratorError> {
        let Some(device_id) = target.device_id.clone().filter(|_| target.is_iot) else {
            return Ok(None);
        };

        let mut flow = self.flow.lock().await;
        self.teardown(&mut flow).await;

        let Some(session) = self.inner.ota.resume_ongoing(&device_id).await? else {
            return Ok(None);
        };
        let request = DeployRequest {
            target,
            sketch,
            verbose: false,
        };
        *flow = Some(self.spawn(
            request,
            FlowStart::OtaPoll {
                ota_id: session.id.clone(),
            },
        ));
        Ok(Some(session))
    }

    /// Abort the OTA while it is still pending
    pub async fn abort_ota(&self) -> Result<AbortOutcome, OrchestratorError> {
        self.inner.ota.abort_pending().await
    }

    pub fn status(&self) -> DeploymentStatus {
        self.inner.status.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DeploymentStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_artifact(&self) -> watch::Receiver<BuildArtifact> {
        self.inner.artifact.subscribe()
    }

    pub fn artifact(&self) -> BuildArtifact {
        self.inner.artifact.borrow().clone()
    }

    pub fn console(&self) -> &ResponseStream {
        &self.inner.console
    }

    pub fn compile_state(&self) -> CompileState {
        self.inner.compile_state()
    }

    pub fn ota_phase(&self) -> OtaPhase {
        self.inner.ota.phase()
    }

    pub fn current_job(&self) -> Option<CompileJob> {
        self.inner.jobs.current()
    }

    /// Wait until the running flow, if any, has finished
    pub async fn wait_idle(&self) {
        let handle = {
            let mut flow = self.flow.lock().await;
            flow.as_mut().and_then(|f| f.handle.take())
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Flow task failed: {}", e);
            }
        }
    }

    /// Stop the running flow. The compile job and its cached handle are kept
    /// so the next process can resume them.
    pub async fn shutdown(&self) {
        info!("Shutting down deployment session...");
        let mut flow = self.flow.lock().await;
        if let Some(mut current) = flow.take() {
            current.token.cancel();
            if let Some(handle) = current.handle.take() {
                if let Err(e) = handle.await {
                    error!("Flow task failed: {}", e);
                }
            }
        }
    }

    async fn start(&self, request: DeployRequest, start: FlowStart) -> Result<(), OrchestratorError> {
        let mut flow = self.flow.lock().await;
        self.teardown(&mut flow).await;
        *flow = Some(self.spawn(request, start));
        Ok(())
    }

    /// Cancel and await the previous flow, cancel its job, clear the cache
    async fn teardown(&self, flow: &mut Option<Flow>) {
        if let Some(mut previous) = flow.take() {
            debug!("Tearing down previous flow");
            previous.token.cancel();
            if let Err(e) = self.inner.jobs.cancel().await {
                warn!("Unable to cancel previous compilation: {}", e);
            }
            if let Some(handle) = previous.handle.take() {
                if let Err(e) = handle.await {
                    error!("Flow task failed: {}", e);
                }
            }
        }
        self.inner.cancel_leftover_job().await;
        if let Err(e) = self.inner.cache.clear().await {
            warn!("Unable to clear the session cache: {}", e);
        }
        self.inner.reset();
    }

    fn spawn(&self, request: DeployRequest, start: FlowStart) -> Flow {
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let flow_token = token.clone();
        let span = info_span!("flow", id = %generate_uuid(), sketch = %request.sketch.name);
        let handle = tokio::spawn(
            async move {
                inner.run(request, start, flow_token).await;
            }
            .instrument(span),
        );
        Flow {
            token,
            handle: Some(handle),
        }
    }
}

impl Inner {
    fn compile_state(&self) -> CompileState {
        self.compile
            .lock()
            .map(|fsm| fsm.state().clone())
            .unwrap_or_default()
    }

    fn compile_event(&self, event: CompileEvent) {
        let state = match self.compile.lock() {
            Ok(mut fsm) => {
                if let Err(e) = fsm.process(event) {
                    warn!("{}", e);
                    return;
                }
                fsm.state().clone()
            }
            Err(e) => {
                error!("Compile state lock poisoned: {}", e);
                return;
            }
        };
        self.status.update(|inputs| inputs.compile = state);
    }

    fn set_readiness(&self, readiness: ReadinessState) {
        self.status.update(|inputs| inputs.readiness = readiness);
    }

    /// Local state after a flow was interrupted
    fn settle_cancelled(&self) {
        if self.compile_state().is_active() {
            self.compile_event(CompileEvent::Cancel);
        }
        if self.ota.phase().is_active() {
            if let Err(e) = self.ota.reset() {
                warn!("Unable to reset OTA session: {}", e);
            }
        }
        self.status.update(|inputs| {
            if inputs.readiness.is_checking() {
                inputs.readiness = ReadinessState::Idle;
            }
            if inputs.upload.is_active() {
                inputs.upload = UploadStatus::Idle;
            }
        });
    }

    fn reset(&self) {
        if let Ok(mut fsm) = self.compile.lock() {
            *fsm = CompileFsm::new();
        }
        if let Err(e) = self.ota.reset() {
            warn!("Unable to reset OTA session: {}", e);
        }
        self.status.update(|inputs| {
            inputs.readiness = ReadinessState::Idle;
            inputs.compile = CompileState::Idle;
            inputs.upload = UploadStatus::Idle;
        });
        self.artifact.send_replace(BuildArtifact::default());
        self.console.clear();
    }

    /// A job created after its flow was cancelled
    async fn cancel_leftover_job(&self) {
        if self.jobs.current().is_some() {
            if let Err(e) = self.jobs.cancel().await {
                warn!("Unable to cancel leftover compilation: {}", e);
            }
        }
    }

    async fn run(&self, request: DeployRequest, start: FlowStart, token: CancellationToken) {
        match start {
            FlowStart::New(command_type) => self.run_new(&request, command_type, &token).await,
            FlowStart::Resume {
                compilation,
                command_type,
            } => {
                let payload = compile_payload(&request, command_type);
                let job = match self.jobs.resume_by_id(&compilation, payload).await {
                    Ok(job) => job,
                    Err(e) => {
                        warn!("Unable to resume compilation {}: {}", compilation.id, e);
                        return;
                    }
                };
                self.compile_event(CompileEvent::Resume);
                self.follow(&request, job, None, &token).await;
            }
            FlowStart::OtaPoll { ota_id } => {
                let phase =
                    ota_poller::run(&self.ota_poll_options(), &self.ota, &ota_id, tokio::time::sleep, &token)
                        .await;
                self.record_dispatch(&request, Ok(DispatchOutcome::Ota(phase)));
            }
        }
    }

    fn ota_poll_options(&self) -> ota_poller::Options {
        self.dispatcher.ota_poll_options().clone()
    }

    async fn run_new(&self, request: &DeployRequest, command_type: CommandType, token: &CancellationToken) {
        let target = &request.target;
        let mut pre_compile = None;

        if target.is_iot {
            match self.check_iot_readiness(request, command_type).await {
                Some(pre) => pre_compile = pre,
                None => return,
            }
        }
        if token.is_cancelled() {
            return;
        }

        self.compile_event(CompileEvent::Create);
        let job = match self.jobs.create(compile_payload(request, command_type)).await {
            Ok(job) => job,
            Err(OrchestratorError::Cancelled) => return,
            Err(e) => {
                error!("Unable to create compilation: {}", e);
                self.compile_event(CompileEvent::CreateFailed(e.to_string()));
                self.events.notify(Notification::CompileFailed {
                    message: e.to_string(),
                });
                self.abandon_ota();
                return;
            }
        };
        self.compile_event(CompileEvent::Created);
        self.follow(request, job, pre_compile, token).await;
    }

    /// Certificate gate, then OTA readiness for uploads. `None` stops the flow;
    /// otherwise carries the output to show before compilation.
    async fn check_iot_readiness(
        &self,
        request: &DeployRequest,
        command_type: CommandType,
    ) -> Option<Option<PreCompileOutput>> {
        let target = &request.target;
        let Some(thing_id) = target.thing_id.as_deref() else {
            self.events.notify(Notification::IncompleteTarget {
                missing: "thing_id".to_string(),
            });
            return None;
        };

        let decision = self
            .gate
            .check_certificate(thing_id, &request.sketch, target.properties_path.as_deref())
            .await;
        if decision == GateDecision::Blocked {
            return None;
        }
        if command_type == CommandType::Verify {
            return Some(None);
        }

        let Some(device_id) = target.device_id.as_deref() else {
            self.set_readiness(ReadinessState::Failed);
            self.events.notify(Notification::IncompleteTarget {
                missing: "device_id".to_string(),
            });
            return None;
        };

        self.set_readiness(ReadinessState::CheckingDevice);
        match self.ota.check_readiness(thing_id, device_id).await {
            Ok(OtaPhase::Ready) => {}
            Ok(_) | Err(_) => {
                self.set_readiness(ReadinessState::Failed);
                return None;
            }
        }
        if let Err(e) = self.ota.begin_compile() {
            warn!("{}", e);
            self.set_readiness(ReadinessState::Failed);
            return None;
        }
        self.set_readiness(ReadinessState::Passed);
        self.console.publish(READY_MESSAGE);
        Some(Some(PreCompileOutput::stdout(READY_MESSAGE)))
    }

    /// Consume the job's stream and, for uploads, dispatch the result
    async fn follow(
        &self,
        request: &DeployRequest,
        job: CompileJob,
        pre_compile: Option<PreCompileOutput>,
        token: &CancellationToken,
    ) {
        let outcome = match self
            .streams
            .consume(&job, pre_compile, &self.artifact, &self.console, token)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Unable to follow compilation {}: {}", job.id, e);
                self.compile_event(CompileEvent::StreamErrored(e.to_string()));
                self.events.notify(Notification::StreamFailed {
                    message: e.to_string(),
                });
                self.finish_job().await;
                self.abandon_ota();
                return;
            }
        };

        match outcome.end {
            StreamEnd::Cancelled => return,
            StreamEnd::Closed => {
                self.compile_event(CompileEvent::Closed);
                self.finish_job().await;
                self.abandon_ota();
                return;
            }
            StreamEnd::Errored(message) => {
                self.compile_event(CompileEvent::StreamErrored(message.clone()));
                self.events.notify(Notification::StreamFailed { message });
                self.finish_job().await;
                self.abandon_ota();
                return;
            }
            StreamEnd::Settled => {}
        }

        self.finish_job().await;
        let artifact = outcome.artifact;
        if artifact.failed {
            self.compile_event(CompileEvent::Settled { failed: true });
            self.events.notify(Notification::CompileFailed {
                message: artifact.result_messages.clone().unwrap_or_default(),
            });
            self.abandon_ota();
            return;
        }

        if job.command_type == CommandType::Verify {
            self.compile_event(CompileEvent::Settled { failed: false });
            self.events
                .track(AnalyticsEvent::success(CommandType::Verify.as_str(), &job.fqbn));
            return;
        }

        let output = match self.fetch_output(request, &job, token).await {
            Some(output) => output,
            None => return,
        };

        let result = self
            .dispatcher
            .dispatch(
                &request.target,
                &request.sketch,
                Some(&output),
                request.verbose,
                &self.console,
                token,
            )
            .await;
        self.record_dispatch(request, result);
    }

    async fn fetch_output(
        &self,
        request: &DeployRequest,
        job: &CompileJob,
        token: &CancellationToken,
    ) -> Option<CompilationOutput> {
        let output = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            output = self.builder.compilation_output(&job.id) => output,
        };

        match output {
            Ok(output) => {
                // settle and start computing in one step
                if let Ok(mut fsm) = self.compile.lock() {
                    if let Err(e) = fsm.process(CompileEvent::Settled { failed: false }) {
                        warn!("{}", e);
                    }
                }
                let state = self.compile_state();
                let wired = !request.target.is_iot;
                self.status.update(|inputs| {
                    inputs.compile = state;
                    if wired {
                        inputs.upload = UploadStatus::Computing;
                    }
                });
                Some(output)
            }
            Err(e) => {
                error!("Unable to fetch output of compilation {}: {}", job.id, e);
                self.compile_event(CompileEvent::Settled { failed: false });
                self.compile_event(CompileEvent::OutputFailed(e.to_string()));
                self.events.notify(Notification::CompileOutputUnavailable {
                    message: e.to_string(),
                });
                self.abandon_ota();
                None
            }
        }
    }

    fn record_dispatch(&self, request: &DeployRequest, result: Result<DispatchOutcome, OrchestratorError>) {
        let action = CommandType::Upload.as_str();
        let fqbn = &request.target.fqbn;

        match result {
            Ok(DispatchOutcome::Uploaded(outcome)) => {
                info!("Upload finished: {:?}", outcome);
                self.events.track(AnalyticsEvent::success(action, fqbn));
            }
            Ok(DispatchOutcome::Ota(OtaPhase::Succeeded)) => {
                self.events.track(AnalyticsEvent::success(action, fqbn));
            }
            Ok(DispatchOutcome::Ota(OtaPhase::Aborted)) => {
                self.events
                    .track(AnalyticsEvent::failure(action, fqbn, ERROR_CODE_ABORTED, "aborted"));
            }
            Ok(DispatchOutcome::Ota(OtaPhase::Failed { reason })) => {
                let reason = reason.unwrap_or_else(|| "failed".to_string());
                self.events
                    .track(AnalyticsEvent::failure(action, fqbn, ERROR_CODE_UPLOAD_FAILED, &reason));
            }
            Ok(DispatchOutcome::Ota(phase)) => debug!("OTA polling stopped in {:?}", phase),
            Err(OrchestratorError::Cancelled) => {}
            Err(OrchestratorError::IncompleteTarget(missing)) => {
                warn!("Upload skipped, target incomplete: {}", missing);
                self.status.update(|inputs| inputs.upload = UploadStatus::Idle);
                self.events.notify(Notification::IncompleteTarget { missing });
            }
            Err(e) => {
                // OTA failures are reported by the OTA session manager
                if !request.target.is_iot {
                    self.events.notify(Notification::UploadFailed {
                        message: e.to_string(),
                    });
                }
                self.events.track(AnalyticsEvent::failure(
                    action,
                    fqbn,
                    ERROR_CODE_UPLOAD_FAILED,
                    &e.to_string(),
                ));
            }
        }
    }

    async fn finish_job(&self) {
        if let Err(e) = self.jobs.complete().await {
            warn!("Unable to clear the session cache: {}", e);
        }
    }

    fn abandon_ota(&self) {
        if let Err(e) = self.ota.abandon_compile() {
            warn!("{}", e);
        }
    }
}

fn compile_payload(request: &DeployRequest, command_type: CommandType) -> CompilePayload {
    CompilePayload {
        fqbn: request.target.fqbn.clone(),
        board_type: request.target.board_type.clone(),
        sketch_id: request.sketch.id.clone(),
        sketch_name: request.sketch.name.clone(),
        command_type,
        should_cache: true,
        verbose: request.verbose,
        ota: request.target.is_iot && command_type == CommandType::Upload,
        secrets_include_injected: request.sketch.secrets_include_injected,
    }
}
