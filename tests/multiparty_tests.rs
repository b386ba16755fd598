mod common;

use std::sync::Arc;

use mm_voice_core::controller::AllowAll;
use mm_voice_core::types::{CallId, CallProperties, CallState, StateReason};
use mm_voice_core::{VoiceConfig, VoiceController};

use common::mock_plugin::MockPlugin;

fn controller() -> Arc<VoiceController> {
    VoiceController::new(Arc::new(MockPlugin::new()), Arc::new(VoiceConfig::default()), Arc::new(AllowAll))
}

/// `JoinMultiparty`/`LeaveMultiparty` against an unknown call id are
/// `not_found`, not a panic — the controller resolves the id before
/// ever consulting the coordinator.
#[tokio::test]
async fn join_and_leave_on_unknown_call_are_not_found() {
    let controller = controller();
    let bogus = CallId("call_does_not_exist".to_string());
    assert_eq!(controller.join_multiparty(&bogus).await.unwrap_err().category(), "not_found");
    assert_eq!(controller.leave_multiparty(&bogus).await.unwrap_err().category(), "not_found");
}

/// Two held calls joined into a multiparty both become active and
/// flagged; one of them leaving hands the other back to itself, no
/// longer flagged multiparty.
#[tokio::test]
async fn join_then_leave_round_trips_two_calls_through_the_controller() {
    let controller = controller();
    controller.set_registration(true).await;

    let a = controller
        .create_call(CallProperties { number: "15551111".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&a).await.unwrap();
    a.transition(CallState::Active, StateReason::Accepted, controller.events()).await.unwrap();
    a.transition(CallState::Held, StateReason::Unknown, controller.events()).await.unwrap();

    let b = controller
        .create_call(CallProperties { number: "15552222".to_string(), dtmf_tone_duration_ms: None })
        .await
        .unwrap();
    controller.start_call(&b).await.unwrap();
    b.transition(CallState::Active, StateReason::Accepted, controller.events()).await.unwrap();
    b.transition(CallState::Held, StateReason::Unknown, controller.events()).await.unwrap();

    controller.join_multiparty(a.id()).await.unwrap();
    assert!(a.multiparty().await);
    assert_eq!(a.state().await, CallState::Active);

    controller.leave_multiparty(a.id()).await.unwrap();
    assert!(!a.multiparty().await);
    assert!(!b.multiparty().await);
    assert_eq!(b.state().await, CallState::Held);
}
