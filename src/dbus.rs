//! dbus surface.
//!
//! Thin `zbus` adapters over `VoiceController`/`Call`: every method here
//! deserialises arguments, calls into the core, and converts `VoiceError`
//! into a `zbus::fdo::Error`. No protocol framing or object-path routing
//! beyond what the `#[interface]` macro generates lives in this module.
//! Grounded on `examples/catacombing-epitaph`'s `dbus/modem_manager.rs`
//! for `zbus` usage conventions (that module is a proxy/client; this one
//! is the mirror-image server side exposing the voice subsystem's bus
//! surface).

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::OwnedObjectPath;
use zbus::{fdo, interface, Connection};

use crate::call::Call;
use crate::controller::VoiceController;
use crate::errors::VoiceError;
use crate::events::VoiceEvent;
use crate::types::{CallId, CallProperties, Direction};

fn to_fdo_error(err: VoiceError) -> fdo::Error {
    fdo::Error::Failed(err.to_wire_string())
}

fn id_from_path(path: &OwnedObjectPath) -> fdo::Result<CallId> {
    path.as_str()
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| CallId(s.to_string()))
        .ok_or_else(|| fdo::Error::InvalidArgs(format!("malformed call path: {path}")))
}

/// The per-modem `Voice` interface.
pub struct VoiceInterface {
    controller: Arc<VoiceController>,
}

impl VoiceInterface {
    pub fn new(controller: Arc<VoiceController>) -> Self {
        Self { controller }
    }
}

#[interface(name = "org.freedesktop.ModemManager1.Modem.Voice")]
impl VoiceInterface {
    async fn create_call(&self, properties: HashMap<String, String>) -> fdo::Result<OwnedObjectPath> {
        let props = CallProperties::from_dict(&properties).map_err(to_fdo_error)?;
        let call = self.controller.create_call(props).await.map_err(to_fdo_error)?;
        OwnedObjectPath::try_from(call.id().object_path())
            .map_err(|e| fdo::Error::Failed(format!("invalid object path: {e}")))
    }

    async fn delete_call(&self, path: OwnedObjectPath) -> fdo::Result<()> {
        let id = id_from_path(&path)?;
        self.controller.delete_call(&id).await.map_err(to_fdo_error)
    }

    async fn list_calls(&self) -> Vec<OwnedObjectPath> {
        self.controller
            .list_calls()
            .await
            .into_iter()
            .filter_map(|p| OwnedObjectPath::try_from(p).ok())
            .collect()
    }

    async fn hold_and_accept(&self) -> fdo::Result<()> {
        self.controller.hold_and_accept().await.map_err(to_fdo_error)
    }

    async fn hangup_and_accept(&self) -> fdo::Result<()> {
        self.controller.hangup_and_accept().await.map_err(to_fdo_error)
    }

    async fn hangup_all(&self) -> fdo::Result<()> {
        self.controller.hangup_all().await.map_err(to_fdo_error)
    }

    async fn transfer(&self) -> fdo::Result<()> {
        self.controller.transfer().await.map_err(to_fdo_error)
    }

    async fn call_waiting_setup(&self, enable: bool) -> fdo::Result<()> {
        self.controller.call_waiting_setup(enable).await.map_err(to_fdo_error)
    }

    async fn call_waiting_query(&self) -> fdo::Result<bool> {
        self.controller.call_waiting_query().await.map_err(to_fdo_error)
    }

    #[zbus(property)]
    async fn calls(&self) -> Vec<OwnedObjectPath> {
        self.list_calls().await
    }

    #[zbus(property)]
    async fn emergency_only(&self) -> bool {
        self.controller.emergency_only()
    }

    #[zbus(signal)]
    async fn call_added(emitter: &SignalEmitter<'_>, call: OwnedObjectPath) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn call_deleted(emitter: &SignalEmitter<'_>, call: OwnedObjectPath) -> zbus::Result<()>;
}

/// The per-call `Call` interface. Every mutating method routes through
/// `VoiceController` rather than the `Call` object directly, so the
/// controller's admission checks, capability negotiation and in-call
/// resource re-evaluation all run on the bus-facing path too.
pub struct CallInterface {
    call: Arc<Call>,
    controller: Arc<VoiceController>,
}

impl CallInterface {
    pub fn new(call: Arc<Call>, controller: Arc<VoiceController>) -> Self {
        Self { call, controller }
    }
}

#[interface(name = "org.freedesktop.ModemManager1.Call")]
impl CallInterface {
    async fn start(&self) -> fdo::Result<()> {
        self.controller.start_call(&self.call).await.map_err(to_fdo_error)
    }

    async fn accept(&self) -> fdo::Result<()> {
        self.controller.accept_call(&self.call).await.map_err(to_fdo_error)
    }

    async fn deflect(&self, number: String) -> fdo::Result<()> {
        self.controller.deflect_call(&self.call, &number).await.map_err(to_fdo_error)
    }

    async fn hangup(&self) -> fdo::Result<()> {
        self.controller.hangup_call(&self.call).await.map_err(to_fdo_error)
    }

    async fn send_dtmf(&self, tones: String) -> fdo::Result<()> {
        self.controller.send_dtmf(&self.call, &tones).await.map_err(to_fdo_error)
    }

    #[zbus(property)]
    async fn state(&self) -> String {
        self.call.state().await.to_string()
    }

    #[zbus(property)]
    async fn state_reason(&self) -> String {
        self.call.state_reason().await.to_string()
    }

    #[zbus(property)]
    async fn direction(&self) -> String {
        match self.call.direction() {
            Direction::Unknown => "unknown".to_string(),
            Direction::Incoming => "incoming".to_string(),
            Direction::Outgoing => "outgoing".to_string(),
        }
    }

    #[zbus(property)]
    async fn number(&self) -> String {
        self.call.number().await
    }

    #[zbus(property)]
    async fn multiparty(&self) -> bool {
        self.call.multiparty().await
    }

    #[zbus(property)]
    async fn audio_port(&self) -> String {
        self.call.audio().await.map(|a| a.port).unwrap_or_default()
    }

    #[zbus(property)]
    async fn audio_format(&self) -> HashMap<String, String> {
        match self.call.audio().await {
            Some(a) => HashMap::from([
                ("encoding".to_string(), a.format.encoding),
                ("resolution".to_string(), a.format.resolution),
                ("rate".to_string(), a.format.rate.to_string()),
            ]),
            None => HashMap::new(),
        }
    }

    #[zbus(signal)]
    async fn state_changed(
        emitter: &SignalEmitter<'_>,
        old: String,
        new: String,
        reason: String,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn dtmf_received(emitter: &SignalEmitter<'_>, tone: String) -> zbus::Result<()>;
}

/// Drives the bus surface end to end: exports the `Voice` interface at
/// the modem's object path, exports/unexports `Call` interfaces as
/// calls come and go, and relays `VoiceEvent`s onto the matching dbus
/// signals. No business logic lives here — every branch either exports
/// or unexports an interface, or forwards an already-decided event.
pub struct BusGateway {
    connection: Connection,
    controller: Arc<VoiceController>,
    modem_path: OwnedObjectPath,
}

impl BusGateway {
    pub async fn connect(
        connection: Connection,
        controller: Arc<VoiceController>,
        modem_path: OwnedObjectPath,
    ) -> zbus::Result<Arc<Self>> {
        let gateway = Arc::new(Self { connection, controller, modem_path });
        gateway
            .connection
            .object_server()
            .at(&gateway.modem_path, VoiceInterface::new(gateway.controller.clone()))
            .await?;
        Ok(gateway)
    }

    /// Relays controller events onto the bus until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.controller.events().subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "bus gateway dropped events under load");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn handle_event(&self, event: VoiceEvent) {
        let server = self.connection.object_server();
        match event {
            VoiceEvent::CallAdded { call_id } => {
                let Some(call) = self.controller.call_list().get(&call_id) else { return };
                let Ok(path) = OwnedObjectPath::try_from(call_id.object_path()) else { return };
                let iface = CallInterface::new(call, self.controller.clone());
                if let Err(e) = server.at(&path, iface).await {
                    warn!(error = %e, "failed to export call on the bus");
                    return;
                }
                self.emit_call_added(path).await;
            }
            VoiceEvent::CallDeleted { call_id } => {
                let Ok(path) = OwnedObjectPath::try_from(call_id.object_path()) else { return };
                let _ = server.remove::<CallInterface, _>(&path).await;
                self.emit_call_deleted(path).await;
            }
            VoiceEvent::StateChanged { call_id, old, new, reason } => {
                let Ok(path) = OwnedObjectPath::try_from(call_id.object_path()) else { return };
                if let Ok(emitter) = SignalEmitter::new(&self.connection, path) {
                    let _ = CallInterface::state_changed(&emitter, old.to_string(), new.to_string(), reason.to_string())
                        .await;
                }
            }
            VoiceEvent::DtmfReceived { call_id, tone } => {
                let Ok(path) = OwnedObjectPath::try_from(call_id.object_path()) else { return };
                if let Ok(emitter) = SignalEmitter::new(&self.connection, path) {
                    let _ = CallInterface::dtmf_received(&emitter, tone.to_string()).await;
                }
            }
            VoiceEvent::EmergencyOnlyChanged { .. }
            | VoiceEvent::AudioChannelOpened { .. }
            | VoiceEvent::AudioChannelClosed => {
                // Property-only updates: zbus re-reads `EmergencyOnly` /
                // `AudioPort` / `AudioFormat` on next property get. There
                // is no dedicated signal for these.
            }
        }
    }

    async fn emit_call_added(&self, path: OwnedObjectPath) {
        if let Ok(emitter) = SignalEmitter::new(&self.connection, self.modem_path.clone()) {
            let _ = VoiceInterface::call_added(&emitter, path).await;
        }
    }

    async fn emit_call_deleted(&self, path: OwnedObjectPath) {
        if let Ok(emitter) = SignalEmitter::new(&self.connection, self.modem_path.clone()) {
            let _ = VoiceInterface::call_deleted(&emitter, path).await;
        }
    }
}
