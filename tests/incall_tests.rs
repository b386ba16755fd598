mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mm_voice_core::controller::AllowAll;
use mm_voice_core::types::CallProperties;
use mm_voice_core::{VoiceConfig, VoiceController};

use common::mock_plugin::MockPlugin;

/// Starting an outgoing call drives it into the in-call set, which the
/// controller's background in-call manager picks up and wires an audio
/// channel onto the call exactly once; hanging up tears it down.
#[tokio::test]
async fn starting_a_call_opens_audio_and_hangup_closes_it() {
    let plugin = Arc::new(MockPlugin::new());
    let controller = VoiceController::new(plugin.clone(), Arc::new(VoiceConfig::default()), Arc::new(AllowAll));
    let cancel = CancellationToken::new();
    controller.spawn_background_tasks(cancel.clone());
    controller.set_registration(true).await;

    let call = controller
        .create_call(CallProperties { number: "15551234".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&call).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(call.audio().await.is_some());
    assert_eq!(plugin.setups.load(Ordering::SeqCst), 1);

    controller.hangup_call(&call).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plugin.cleanups.load(Ordering::SeqCst), 1);
    assert!(call.audio().await.is_none());
    cancel.cancel();
}

/// A setup failure is swallowed and logged, never surfaced to the
/// client; it leaves the call without an audio path but otherwise
/// running normally, and the manager is ready to retry on the next
/// re-evaluation.
#[tokio::test]
async fn audio_setup_failure_is_swallowed_and_leaves_call_without_audio() {
    let plugin = Arc::new(MockPlugin::new());
    plugin.setup_failures.store(1, Ordering::SeqCst);
    let controller = VoiceController::new(plugin.clone(), Arc::new(VoiceConfig::default()), Arc::new(AllowAll));
    let cancel = CancellationToken::new();
    controller.spawn_background_tasks(cancel.clone());
    controller.set_registration(true).await;

    let call = controller
        .create_call(CallProperties { number: "15551234".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&call).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(call.audio().await.is_none());
    assert_eq!(plugin.setups.load(Ordering::SeqCst), 0);

    cancel.cancel();
}

/// Two concurrently in-call calls share a single setup/cleanup cycle:
/// the manager opens audio once for the pair and only tears it down
/// once both have left the in-call set.
#[tokio::test]
async fn two_concurrent_calls_share_one_setup_and_one_cleanup() {
    let plugin = Arc::new(MockPlugin::new());
    let controller = VoiceController::new(plugin.clone(), Arc::new(VoiceConfig::default()), Arc::new(AllowAll));
    let cancel = CancellationToken::new();
    controller.spawn_background_tasks(cancel.clone());
    controller.set_registration(true).await;

    let a = controller
        .create_call(CallProperties { number: "15551111".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plugin.setups.load(Ordering::SeqCst), 1);

    let b = controller
        .create_call(CallProperties { number: "15552222".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plugin.setups.load(Ordering::SeqCst), 1, "second call joining the in-call set should not re-trigger setup");

    controller.hangup_call(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plugin.cleanups.load(Ordering::SeqCst), 0, "b is still in-call, cleanup must wait");

    controller.hangup_call(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plugin.cleanups.load(Ordering::SeqCst), 1);

    cancel.cancel();
}
