//! Recording fakes of the remote services used by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloud_api::{
    CertCheckResponse, Compilation, CompilationOutput, CompilationStatus, ComputeResponse,
    CreateCompilationRequest, Diagnostic, Ota, OtaState, OtaStatus, OtaStep, RequiredAction,
    ShowOtaResponse, ThingDevice,
};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use sketchdeploy::compile::stream::StreamFrame;
use sketchdeploy::console::ResponseStream;
use sketchdeploy::errors::OrchestratorError;
use sketchdeploy::http::agent::{AgentService, AgentUploadRequest, AgentUploadResponse};
use sketchdeploy::http::builder::BuildService;
use sketchdeploy::http::iot::IotService;
use sketchdeploy::http::ota::{OtaService, SortOrder};
use sketchdeploy::notify::{AnalyticsEvent, Notification, SessionEvent};
use sketchdeploy::readiness::cert::{SketchStamps, SketchWorkspace};
use sketchdeploy::session::cache::MemorySessionStore;
use sketchdeploy::session::{
    DeployRequest, DeploymentTarget, OrchestratorSession, SessionOptions, SessionServices, SketchRef,
};
use sketchdeploy::transport::{UploadOutcome, UploadPayload, Uploader};

pub const UNO: &str = "arduino:avr:uno";
pub const MKR: &str = "arduino:samd:mkrwifi1010";

pub fn http_error(status: u16) -> OrchestratorError {
    OrchestratorError::HttpStatus {
        status,
        body: String::new(),
    }
}

fn record(calls: &Mutex<Vec<String>>, call: String) {
    calls.lock().unwrap().push(call);
}

/// Build service fake. Compilations are numbered `C1`, `C2`, ...
pub struct FakeBuilder {
    calls: Mutex<Vec<String>>,
    created: AtomicU32,
    create_gate: Mutex<Option<Arc<Notify>>>,
    create_failure: Mutex<Option<u16>>,
    compilations: Mutex<HashMap<String, CompilationStatus>>,
    frames: Mutex<HashMap<String, Vec<StreamFrame>>>,
    hold_open: AtomicBool,
    open_senders: Mutex<Vec<mpsc::Sender<StreamFrame>>>,
    cancel_failure: Mutex<Option<u16>>,
    output_failure: Mutex<Option<u16>>,
    output: Mutex<CompilationOutput>,
}

impl Default for FakeBuilder {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            created: AtomicU32::new(0),
            create_gate: Mutex::new(None),
            create_failure: Mutex::new(None),
            compilations: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
            hold_open: AtomicBool::new(false),
            open_senders: Mutex::new(Vec::new()),
            cancel_failure: Mutex::new(None),
            output_failure: Mutex::new(None),
            output: Mutex::new(CompilationOutput {
                name: "Blink.ino".to_string(),
                hex: Some("OjEwMDAwMDAw".to_string()),
                ota_key: Some("ota/blink.bin".to_string()),
                ..Default::default()
            }),
        }
    }
}

impl FakeBuilder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Frames delivered by the stream of `id`
    pub fn script(&self, id: &str, frames: Vec<StreamFrame>) {
        self.frames.lock().unwrap().insert(id.to_string(), frames);
    }

    /// Keep streams open after their scripted frames
    pub fn hold_streams_open(&self) {
        self.hold_open.store(true, Ordering::SeqCst);
    }

    /// Block creation until the returned gate is notified
    pub fn gate_creation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_creation(&self, status: u16) {
        *self.create_failure.lock().unwrap() = Some(status);
    }

    pub fn fail_cancel(&self, status: u16) {
        *self.cancel_failure.lock().unwrap() = Some(status);
    }

    pub fn fail_output(&self, status: u16) {
        *self.output_failure.lock().unwrap() = Some(status);
    }

    pub fn known(&self, id: &str, status: CompilationStatus) {
        self.compilations.lock().unwrap().insert(id.to_string(), status);
    }
}

#[async_trait]
impl BuildService for FakeBuilder {
    async fn create_compilation(
        &self,
        request: &CreateCompilationRequest,
    ) -> Result<Compilation, OrchestratorError> {
        record(&self.calls, format!("create:{}", request.fqbn));
        let gate = self.create_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(status) = *self.create_failure.lock().unwrap() {
            return Err(http_error(status));
        }

        let id = format!("C{}", self.created.fetch_add(1, Ordering::SeqCst) + 1);
        self.known(&id, CompilationStatus::Created);
        Ok(Compilation {
            id,
            status: CompilationStatus::Created,
            fqbn: Some(request.fqbn.clone()),
            sketch_name: Some(request.sketch_name.clone()),
            created_at: None,
        })
    }

    async fn get_compilation(&self, id: &str) -> Result<Compilation, OrchestratorError> {
        record(&self.calls, format!("get:{id}"));
        let status = self.compilations.lock().unwrap().get(id).copied();
        match status {
            Some(status) => Ok(Compilation {
                id: id.to_string(),
                status,
                fqbn: None,
                sketch_name: None,
                created_at: None,
            }),
            None => Err(http_error(404)),
        }
    }

    async fn cancel_compilation(&self, id: &str) -> Result<(), OrchestratorError> {
        record(&self.calls, format!("cancel:{id}"));
        match *self.cancel_failure.lock().unwrap() {
            Some(status) => Err(http_error(status)),
            None => Ok(()),
        }
    }

    async fn compilation_output(&self, id: &str) -> Result<CompilationOutput, OrchestratorError> {
        record(&self.calls, format!("output:{id}"));
        if let Some(status) = *self.output_failure.lock().unwrap() {
            return Err(http_error(status));
        }
        Ok(self.output.lock().unwrap().clone())
    }

    async fn compute(&self, fqbn: &str, os: &str) -> Result<ComputeResponse, OrchestratorError> {
        record(&self.calls, format!("compute:{fqbn}:{os}"));
        Ok(ComputeResponse {
            commandline: "\"{runtime.tools.avrdude.path}/bin/avrdude\" -p{build.mcu}".to_string(),
            ..Default::default()
        })
    }

    async fn open_stream(&self, id: &str) -> Result<mpsc::Receiver<StreamFrame>, OrchestratorError> {
        record(&self.calls, format!("stream:{id}"));
        let (tx, rx) = mpsc::channel(64);
        let frames = self.frames.lock().unwrap().get(id).cloned().unwrap_or_default();
        for frame in frames {
            let _ = tx.try_send(frame);
        }
        if self.hold_open.load(Ordering::SeqCst) {
            self.open_senders.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

pub fn successful_build() -> Vec<StreamFrame> {
    vec![
        StreamFrame::Status("running".to_string()),
        StreamFrame::Stdout("Sketch uses 924 bytes (2%) of program storage space.\n".to_string()),
        StreamFrame::Progress(100),
        StreamFrame::Result {
            diagnostics: None,
            builder_error: None,
        },
    ]
}

pub fn failed_build() -> Vec<StreamFrame> {
    vec![
        StreamFrame::Stderr("/tmp/Blink/Blink.ino:3:1: error: expected ';' before '}' token\n".to_string()),
        StreamFrame::Result {
            diagnostics: Some(vec![Diagnostic {
                file: "Blink.ino".to_string(),
                message: "expected ';' before '}' token".to_string(),
                line: Some(3),
                column: Some(1),
                severity: Some("error".to_string()),
            }]),
            builder_error: None,
        },
    ]
}

/// OTA service fake
pub struct FakeOta {
    calls: Mutex<Vec<String>>,
    create_failure: Mutex<Option<u16>>,
    create_status: Mutex<OtaStatus>,
    latest: Mutex<Vec<Ota>>,
    shows: Mutex<VecDeque<ShowOtaResponse>>,
    cancel_failure: Mutex<Option<u16>>,
    cancel_gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for FakeOta {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            create_failure: Mutex::new(None),
            create_status: Mutex::new(OtaStatus::Pending),
            latest: Mutex::new(Vec::new()),
            shows: Mutex::new(VecDeque::new()),
            cancel_failure: Mutex::new(None),
            cancel_gate: Mutex::new(None),
        }
    }
}

impl FakeOta {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn fail_creation(&self, status: u16) {
        *self.create_failure.lock().unwrap() = Some(status);
    }

    pub fn fail_cancel(&self, status: u16) {
        *self.cancel_failure.lock().unwrap() = Some(status);
    }

    /// Hold cancel requests until the returned gate is notified
    pub fn gate_cancel(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.cancel_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn latest(&self, ota: Ota) {
        self.latest.lock().unwrap().push(ota);
    }

    /// Responses of successive polls; the last one repeats
    pub fn polls(&self, responses: Vec<ShowOtaResponse>) {
        *self.shows.lock().unwrap() = responses.into();
    }
}

#[async_trait]
impl OtaService for FakeOta {
    async fn create_ota(&self, device_id: &str, binary_key: &str) -> Result<Ota, OrchestratorError> {
        record(&self.calls, format!("create:{device_id}:{binary_key}"));
        if let Some(status) = *self.create_failure.lock().unwrap() {
            return Err(http_error(status));
        }
        Ok(ota("O-new", *self.create_status.lock().unwrap()))
    }

    async fn show_ota(&self, id: &str, _all_progress: bool) -> Result<ShowOtaResponse, OrchestratorError> {
        record(&self.calls, format!("show:{id}"));
        let mut shows = self.shows.lock().unwrap();
        let response = if shows.len() > 1 {
            shows.pop_front()
        } else {
            shows.front().cloned()
        };
        response.ok_or_else(|| http_error(404))
    }

    async fn list_device_ota(
        &self,
        device_id: &str,
        limit: u32,
        _order: SortOrder,
    ) -> Result<Vec<Ota>, OrchestratorError> {
        record(&self.calls, format!("list:{device_id}:{limit}"));
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn cancel_ota(&self, id: &str) -> Result<(), OrchestratorError> {
        record(&self.calls, format!("cancel:{id}"));
        let gate = self.cancel_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match *self.cancel_failure.lock().unwrap() {
            Some(status) => Err(http_error(status)),
            None => Ok(()),
        }
    }
}

pub fn ota(id: &str, status: OtaStatus) -> Ota {
    Ota {
        id: id.to_string(),
        device_id: Some("D1".to_string()),
        status,
        started_at: None,
        ended_at: None,
        error_reason: None,
        firmware_size: Some(1000),
    }
}

pub fn show(id: &str, status: OtaStatus, states: &[(OtaStep, &str, Option<&str>)]) -> ShowOtaResponse {
    ShowOtaResponse {
        ota: ota(id, status),
        states: states
            .iter()
            .map(|(step, timestamp, data)| OtaState {
                state: *step,
                state_data: data.map(str::to_string),
                timestamp: timestamp.parse().unwrap(),
            })
            .collect(),
    }
}

/// IoT service fake
pub struct FakeIot {
    calls: Mutex<Vec<String>>,
    action: Mutex<RequiredAction>,
    cert_failure: Mutex<Option<u16>>,
    device: Mutex<ThingDevice>,
}

impl Default for FakeIot {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            action: Mutex::new(RequiredAction::None),
            cert_failure: Mutex::new(None),
            device: Mutex::new(ThingDevice {
                id: "D1".to_string(),
                fqbn: Some(MKR.to_string()),
                ota_compatible: true,
                ota_available: true,
                wifi_fw_version: Some("1.4.8".to_string()),
                required_wifi_fw_version: Some("1.4.8".to_string()),
            }),
        }
    }
}

impl FakeIot {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn require(&self, action: RequiredAction) {
        *self.action.lock().unwrap() = action;
    }

    pub fn fail_cert_check(&self, status: u16) {
        *self.cert_failure.lock().unwrap() = Some(status);
    }

    pub fn edit_device(&self, edit: impl FnOnce(&mut ThingDevice)) {
        edit(&mut self.device.lock().unwrap());
    }
}

#[async_trait]
impl IotService for FakeIot {
    async fn check_thing_cert(&self, thing_id: &str) -> Result<CertCheckResponse, OrchestratorError> {
        record(&self.calls, format!("cert:{thing_id}"));
        if let Some(status) = *self.cert_failure.lock().unwrap() {
            return Err(http_error(status));
        }
        Ok(CertCheckResponse {
            required_action: *self.action.lock().unwrap(),
        })
    }

    async fn thing_device(&self, thing_id: &str) -> Result<ThingDevice, OrchestratorError> {
        record(&self.calls, format!("device:{thing_id}"));
        Ok(self.device.lock().unwrap().clone())
    }
}

/// Local agent fake. The first `unreachable_probes` version calls fail.
#[derive(Default)]
pub struct FakeAgent {
    pub unreachable_probes: AtomicU32,
    pub probes: AtomicU32,
    stays_up: AtomicBool,
    uploads: Mutex<Vec<AgentUploadRequest>>,
    upload_failure: Mutex<Option<u16>>,
}

impl FakeAgent {
    pub fn unreachable_for(probes: u32) -> Self {
        let agent = Self::default();
        agent.unreachable_probes.store(probes, Ordering::SeqCst);
        agent
    }

    /// An agent whose uploads never restart anything
    pub fn staying_up() -> Self {
        let agent = Self::default();
        agent.stays_up.store(true, Ordering::SeqCst);
        agent
    }

    pub fn uploads(&self) -> Vec<AgentUploadRequest> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn fail_upload(&self, status: u16) {
        *self.upload_failure.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl AgentService for FakeAgent {
    async fn version(&self) -> Result<String, OrchestratorError> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        if probe <= self.unreachable_probes.load(Ordering::SeqCst) {
            return Err(OrchestratorError::UploadError("connection refused".to_string()));
        }
        Ok("1.6.1".to_string())
    }

    async fn upload(&self, request: &AgentUploadRequest) -> Result<AgentUploadResponse, OrchestratorError> {
        self.uploads.lock().unwrap().push(request.clone());
        if let Some(status) = *self.upload_failure.lock().unwrap() {
            return Err(http_error(status));
        }
        Ok(AgentUploadResponse {
            output: vec!["avrdude done.  Thank you.".to_string()],
            restarting: !self.stays_up.load(Ordering::SeqCst),
        })
    }
}

/// Serial bridge fake
#[derive(Default)]
pub struct FakeSerial {
    pub uploads: AtomicU32,
}

#[async_trait]
impl Uploader for FakeSerial {
    fn name(&self) -> &'static str {
        "fake serial bridge"
    }

    async fn upload(
        &self,
        payload: &UploadPayload,
        console: &ResponseStream,
        _cancel: &CancellationToken,
    ) -> Result<UploadOutcome, OrchestratorError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        console.publish(&format!("Flashing {} on {}", payload.sketch_name, payload.port));
        Ok(UploadOutcome::Success)
    }
}

/// Workspace fake handing out scripted stamps
#[derive(Default)]
pub struct FakeWorkspace {
    stamps: Mutex<VecDeque<SketchStamps>>,
    pub refreshes: AtomicU32,
}

impl FakeWorkspace {
    pub fn with_stamps(stamps: Vec<SketchStamps>) -> Self {
        Self {
            stamps: Mutex::new(stamps.into()),
            refreshes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SketchWorkspace for FakeWorkspace {
    async fn stamps(
        &self,
        _sketch: &SketchRef,
        _properties_path: Option<&str>,
    ) -> Result<SketchStamps, OrchestratorError> {
        Ok(self.stamps.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn refresh_sketch(&self, _sketch: &SketchRef) -> Result<(), OrchestratorError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh_file(&self, _sketch: &SketchRef, _path: &str) -> Result<(), OrchestratorError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn stamps(secrets: &str, content: &str) -> SketchStamps {
    SketchStamps {
        secrets: Some(secrets.to_string()),
        content: Some(content.to_string()),
    }
}

/// Every fake wired into one session
pub struct Harness {
    pub builder: Arc<FakeBuilder>,
    pub ota: Arc<FakeOta>,
    pub iot: Arc<FakeIot>,
    pub agent: Arc<FakeAgent>,
    pub serial: Arc<FakeSerial>,
    pub workspace: Arc<FakeWorkspace>,
    pub store: Arc<MemorySessionStore>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            builder: Arc::new(FakeBuilder::default()),
            ota: Arc::new(FakeOta::default()),
            iot: Arc::new(FakeIot::default()),
            agent: Arc::new(FakeAgent::default()),
            serial: Arc::new(FakeSerial::default()),
            workspace: Arc::new(FakeWorkspace::default()),
            store: Arc::new(MemorySessionStore::default()),
        }
    }
}

impl Harness {
    pub fn with_cached(record: &str) -> Self {
        Self {
            store: Arc::new(MemorySessionStore::with_record(record)),
            ..Self::default()
        }
    }

    pub fn session(&self) -> OrchestratorSession {
        self.session_with(SessionOptions::default())
    }

    pub fn session_with(&self, options: SessionOptions) -> OrchestratorSession {
        let services = SessionServices {
            builder: self.builder.clone(),
            ota: self.ota.clone(),
            iot: self.iot.clone(),
            agent: self.agent.clone(),
            serial: self.serial.clone(),
            workspace: self.workspace.clone(),
            store: self.store.clone(),
        };
        OrchestratorSession::new(services, options)
    }
}

pub fn sketch() -> SketchRef {
    SketchRef {
        id: "sk-1".to_string(),
        name: "Blink".to_string(),
        path: None,
        secrets_include_injected: false,
    }
}

pub fn wired_target(fqbn: &str) -> DeploymentTarget {
    DeploymentTarget {
        fqbn: fqbn.to_string(),
        port: Some("/dev/ttyACM0".to_string()),
        ..Default::default()
    }
}

pub fn iot_target() -> DeploymentTarget {
    DeploymentTarget {
        fqbn: MKR.to_string(),
        is_iot: true,
        device_id: Some("D1".to_string()),
        thing_id: Some("T1".to_string()),
        ..Default::default()
    }
}

pub fn request(target: DeploymentTarget) -> DeployRequest {
    DeployRequest {
        target,
        sketch: sketch(),
        verbose: false,
    }
}

/// Split the events received so far into notifications and analytics
pub fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> (Vec<Notification>, Vec<AnalyticsEvent>) {
    let mut notifications = Vec::new();
    let mut analytics = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            SessionEvent::Notification(n) => notifications.push(n),
            SessionEvent::Analytics(a) => analytics.push(a),
        }
    }
    (notifications, analytics)
}
