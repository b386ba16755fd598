//! Demo binary: wires an in-memory `VoicePlugin` to a `VoiceController`
//! and exports it on a dbus session bus. Exists to give the crate a
//! runnable entry point; production use wires a real modem plugin in
//! its place. Grounded on `infra-common/src/logging/setup.rs`'s
//! `LoggingConfig`/`setup_logging` pattern for the logging setup (the
//! one component in this binary, not the library, allowed to install a
//! global `tracing` subscriber) and on `rvoip_session_core`'s own
//! `src/bin/*.rs` demos for the overall shape of a small `clap`-driven
//! binary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use mm_voice_core::controller::AllowAll;
use mm_voice_core::dbus::BusGateway;
use mm_voice_core::errors::Result as VResult;
use mm_voice_core::plugin::{AudioChannel, PluginCall, VoiceCapability, VoicePlugin};
use mm_voice_core::types::{AudioFormat, CallInfo, Direction};
use mm_voice_core::{VoiceConfig, VoiceController};

#[derive(Parser, Debug)]
#[command(author, version, about = "Demo voice-subsystem daemon over dbus", long_about = None)]
struct Args {
    /// Object path this modem's Voice/Call interfaces are exported under.
    #[arg(long, default_value = "/org/freedesktop/ModemManager1/Modem/0")]
    modem_path: String,

    /// Well-known name to request on the session bus.
    #[arg(long, default_value = "org.freedesktop.ModemManager1.Demo")]
    bus_name: String,

    /// Log level for the demo's own `tracing` subscriber.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let config = Arc::new(VoiceConfig::default());
    let plugin: Arc<dyn VoicePlugin> = Arc::new(MockModemPlugin::default());
    let controller = VoiceController::new(plugin, config, Arc::new(AllowAll));

    let cancel = CancellationToken::new();
    controller.spawn_background_tasks(cancel.clone());

    let connection = Connection::session().await?;
    connection.request_name(args.bus_name.as_str()).await?;
    let modem_path = OwnedObjectPath::try_from(args.modem_path.clone())?;
    let gateway = BusGateway::connect(connection, controller.clone(), modem_path).await?;
    tokio::spawn(gateway.run(cancel.clone()));

    info!(path = %args.modem_path, name = %args.bus_name, "voice demo exported, awaiting ctrl-c");
    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    Ok(())
}

fn setup_logging(level: &str) {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    fmt::Subscriber::builder().with_env_filter(filter).init();
}

/// Minimal in-memory modem plugin: every call succeeds immediately and
/// reports a synthetic audio channel. Distinct from the crate's test
/// `MockPlugin` (`tests/common/mock_plugin.rs`), which is scriptable per
/// scenario; this one is just enough to make the demo binary runnable.
#[derive(Default)]
struct MockModemPlugin {
    next_index: AtomicU32,
}

#[async_trait]
impl VoicePlugin for MockModemPlugin {
    async fn check_voice_support(&self) -> VResult<bool> {
        Ok(true)
    }

    fn supports(&self, capability: VoiceCapability) -> bool {
        !matches!(capability, VoiceCapability::LoadCallList)
    }

    async fn create_call(&self, _direction: Direction, _number: &str) -> VResult<Box<dyn PluginCall>> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockPluginCall { index }))
    }

    async fn load_call_list(&self, _cancel: CancellationToken) -> VResult<Vec<CallInfo>> {
        Ok(Vec::new())
    }

    async fn hold_and_accept(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn hangup_and_accept(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn hangup_all(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn transfer(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn join_multiparty(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn leave_multiparty(&self, _call_index: u32, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn call_waiting_setup(&self, _enabled: bool, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn call_waiting_query(&self, _cancel: CancellationToken) -> VResult<bool> {
        Ok(false)
    }

    async fn setup_in_call_unsolicited_events(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn cleanup_in_call_unsolicited_events(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn setup_in_call_audio_channel(&self, _cancel: CancellationToken) -> VResult<AudioChannel> {
        Ok(AudioChannel {
            port: "demo-audio0".to_string(),
            format: AudioFormat { encoding: "pcm".to_string(), resolution: "s16le".to_string(), rate: 8000 },
        })
    }

    async fn cleanup_in_call_audio_channel(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    fn dtmf_accept_len(&self) -> usize {
        1
    }

    fn default_dtmf_tone_duration(&self) -> Duration {
        Duration::from_millis(100)
    }
}

struct MockPluginCall {
    index: u32,
}

#[async_trait]
impl PluginCall for MockPluginCall {
    async fn start(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn accept(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn deflect(&self, _number: &str, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn hangup(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    async fn send_dtmf(&self, tones: &str, _cancel: CancellationToken) -> VResult<usize> {
        Ok(tones.chars().count().min(1))
    }

    async fn stop_dtmf(&self, _cancel: CancellationToken) -> VResult<()> {
        Ok(())
    }

    fn supports_dialling_to_ringing(&self) -> bool {
        false
    }

    fn supports_ringing_to_active(&self) -> bool {
        true
    }

    fn skip_incoming_timeout(&self) -> bool {
        false
    }
}
