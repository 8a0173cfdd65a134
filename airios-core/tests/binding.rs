//! Integration tests for bind sessions and the bind flow.

mod common;

use std::time::Duration;

use airios_core::flow::{AccessoryForm, ControllerForm};
use airios_core::{
    BindFailure, BindFlow, BindRequest, BindRole, BindTiming, BindingOrchestrator, BindingRecord,
    BindingStatus, ClientError, Coordinator, CoreError, FlowStep, RfAddress, SessionProgress,
};
use common::{Call, MockHandle, VMD02_PID, VMN_PID, addr, identity};

async fn orchestrator(mock: &MockHandle) -> BindingOrchestrator {
    let coordinator = Coordinator::start(mock.bus(), Duration::from_secs(30))
        .await
        .expect("coordinator should start");
    BindingOrchestrator::new(coordinator, BindTiming::default())
}

fn controller_request() -> BindRequest {
    BindRequest::Controller {
        product_id: VMD02_PID,
        rf_address: None,
    }
}

fn accessory_request() -> BindRequest {
    BindRequest::Accessory {
        controller: addr(2),
        product_id: VMN_PID,
    }
}

async fn run(orchestrator: &BindingOrchestrator, request: BindRequest) -> SessionProgress {
    let mut handle = orchestrator.start_bind_session(request).unwrap();
    handle.wait().await
}

#[tokio::test(start_paused = true)]
async fn test_controller_bind_success() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.statuses.extend([
            BindingStatus::OutgoingBindingInitialized,
            BindingStatus::OutgoingBindingInitialized,
            BindingStatus::OutgoingBindingCompleted,
        ]);
        s.identities.insert(addr(3), identity(VMD02_PID, 0xABCDEF));
    });
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Succeeded(node) = run(&orchestrator, controller_request()).await else {
        panic!("bind should succeed");
    };
    assert_eq!(node.role, BindRole::Controller);
    assert_eq!(node.address, addr(3));
    assert_eq!(node.rf_address, RfAddress(0xABCDEF));
    assert!(
        mock.calls()
            .contains(&Call::BindController(addr(3), VMD02_PID, None))
    );
    assert_eq!(mock.count(|c| *c == Call::QueryStatus), 3);
    assert!(mock.unbinds().is_empty());

    // Success triggers an early refresh.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.fetches(), 2);
    assert!(!orchestrator.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_allocation_skips_bound_addresses() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.bound = vec![addr(2), addr(3), addr(4), addr(207)];
        s.statuses.push_back(BindingStatus::OutgoingBindingCompleted);
        s.identities.insert(addr(5), identity(VMD02_PID, 0x000005));
    });
    let orchestrator = orchestrator(&mock).await;

    let progress = run(&orchestrator, controller_request()).await;
    assert!(matches!(progress, SessionProgress::Succeeded(node) if node.address == addr(5)));
}

#[tokio::test(start_paused = true)]
async fn test_address_exhausted() {
    let mock = MockHandle::default();
    mock.script(|s| s.bound = (2..=199).map(addr).collect());
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, controller_request()).await else {
        panic!("bind should fail");
    };
    assert_eq!(failure.reason, BindFailure::AddressExhausted);
    assert_eq!(failure.address, None);
    assert!(failure.released);
    assert_eq!(mock.count(|c| matches!(c, Call::BindController(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_unbinds_before_reporting() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.statuses
            .push_back(BindingStatus::OutgoingBindingFailedNoAnswer)
    });
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, controller_request()).await else {
        panic!("bind should fail");
    };
    assert_eq!(
        failure.reason,
        BindFailure::Status(BindingStatus::OutgoingBindingFailedNoAnswer)
    );
    assert_eq!(failure.address, Some(addr(3)));
    assert!(failure.released);
    assert_eq!(mock.unbinds(), vec![addr(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_accessory_timeout() {
    let mock = MockHandle::default();
    mock.script(|s| s.idle_status = BindingStatus::IncomingBindingActive);
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, accessory_request()).await else {
        panic!("bind should time out");
    };
    assert_eq!(failure.reason, BindFailure::Timeout { polls: 500 });
    assert_eq!(mock.count(|c| *c == Call::QueryStatus), 500);
    assert!(
        mock.calls()
            .contains(&Call::BindAccessory(addr(2), addr(3), VMN_PID))
    );
    assert_eq!(mock.unbinds(), vec![addr(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_post_bind_verification() {
    let mock = MockHandle::default();
    mock.script(|s| s.statuses.push_back(BindingStatus::IncomingBindingCompleted));
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, accessory_request()).await else {
        panic!("bind without identity should fail");
    };
    assert_eq!(failure.reason, BindFailure::PostBindVerificationFailed);
    assert!(mock.calls().contains(&Call::ReadIdentity(addr(3))));
    assert_eq!(mock.unbinds(), vec![addr(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_unbind_retries_then_reports_leak() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.statuses
            .push_back(BindingStatus::OutgoingBindingFailedNodeListFull);
        s.unbinds.extend([
            Ok(false),
            Err(ClientError::Timeout),
            Err(ClientError::Timeout),
        ]);
    });
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, controller_request()).await else {
        panic!("bind should fail");
    };
    assert!(!failure.released);
    assert_eq!(mock.unbinds(), vec![addr(3); 3]);
}

#[tokio::test(start_paused = true)]
async fn test_status_transport_failure_unbinds_before_reporting() {
    let mock = MockHandle::default();
    mock.script(|s| s.status_failure = Some(ClientError::Connection("reset".to_string())));
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, controller_request()).await else {
        panic!("bind should fail");
    };
    assert_eq!(
        failure.reason,
        BindFailure::Transport(ClientError::Connection("reset".to_string()))
    );
    assert_eq!(failure.address, Some(addr(3)));
    assert!(failure.released);

    let calls = mock.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[Call::QueryStatus, Call::Unbind(addr(3))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_command_needs_no_cleanup() {
    let mock = MockHandle::default();
    mock.script(|s| s.bind_sent = Ok(false));
    let orchestrator = orchestrator(&mock).await;

    let SessionProgress::Failed(failure) = run(&orchestrator, controller_request()).await else {
        panic!("bind should fail");
    };
    assert_eq!(failure.reason, BindFailure::CommandRejected);
    assert_eq!(failure.address, Some(addr(3)));
    assert!(mock.unbinds().is_empty());
    assert_eq!(mock.count(|c| *c == Call::QueryStatus), 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_session_at_a_time() {
    let mock = MockHandle::default();
    mock.script(|s| s.idle_status = BindingStatus::OutgoingBindingInitialized);
    let orchestrator = orchestrator(&mock).await;

    let first = orchestrator.start_bind_session(controller_request()).unwrap();
    assert!(orchestrator.is_busy());
    assert!(matches!(
        orchestrator.start_bind_session(accessory_request()),
        Err(CoreError::BindBusy)
    ));
    assert_eq!(orchestrator.poll_session(&first), SessionProgress::InProgress);

    let id = first.id();
    orchestrator.abandon(first);
    assert!(orchestrator.reap().is_empty());

    // 80 polls at 250 ms.
    tokio::time::sleep(Duration::from_secs(25)).await;
    let reaped = orchestrator.reap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].0, id);
    assert!(matches!(
        &reaped[0].1,
        SessionProgress::Failed(f) if f.reason == BindFailure::Timeout { polls: 80 }
    ));
    assert_eq!(mock.unbinds(), vec![addr(3)]);

    assert!(!orchestrator.is_busy());
    mock.script(|s| s.idle_status = BindingStatus::NotAvailable);
    let second = orchestrator.start_bind_session(controller_request());
    assert!(second.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_abandoned_session() {
    let mock = MockHandle::default();
    mock.script(|s| s.idle_status = BindingStatus::IncomingBindingActive);
    let orchestrator = orchestrator(&mock).await;

    let handle = orchestrator.start_bind_session(accessory_request()).unwrap();
    let id = handle.id();
    tokio::time::sleep(Duration::from_secs(1)).await;
    orchestrator.abandon(handle);

    let reaped = orchestrator.shutdown().await;
    orchestrator.coordinator().shutdown().await.unwrap();

    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].0, id);
    assert!(matches!(
        &reaped[0].1,
        SessionProgress::Failed(f) if f.reason == BindFailure::Timeout { polls: 500 } && f.released
    ));
    assert!(orchestrator.reap().is_empty());

    // Every poll and the cleanup ran before the bus was closed.
    let calls = mock.calls();
    assert_eq!(calls.last(), Some(&Call::Close));
    assert_eq!(calls.iter().filter(|c| **c == Call::QueryStatus).count(), 500);
    assert_eq!(calls[calls.len() - 2], Call::Unbind(addr(3)));

    assert!(matches!(
        orchestrator.start_bind_session(controller_request()),
        Err(CoreError::Shutdown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_when_idle() {
    let mock = MockHandle::default();
    let orchestrator = orchestrator(&mock).await;

    assert!(orchestrator.shutdown().await.is_empty());
    // A second call is a no-op.
    assert!(orchestrator.shutdown().await.is_empty());
    assert_eq!(mock.count(|c| *c == Call::ListBound), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flow_records_binding() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.statuses.push_back(BindingStatus::OutgoingBindingCompleted);
        s.identities.insert(addr(3), identity(VMD02_PID, 0x00C0DE));
    });
    let orchestrator = orchestrator(&mock).await;
    let models = common_models(&orchestrator);

    let mut flow = BindFlow::controller(
        &models,
        ControllerForm {
            name: "  Living room  ".to_string(),
            product: "Siber DF Optima 2".to_string(),
            rf_address: None,
        },
    )
    .unwrap();
    assert_eq!(flow.step(), FlowStep::Progress);
    flow.start(&orchestrator).unwrap();

    let FlowStep::Done(record) = flow.wait().await else {
        panic!("flow should complete");
    };
    assert_eq!(
        record,
        BindingRecord {
            name: "Living room".to_string(),
            role: BindRole::Controller,
            address: addr(3),
            product_id: VMD02_PID,
            rf_address: RfAddress(0x00C0DE),
        }
    );

    // An accessory can now be paired with the recorded controller.
    let accessory = BindFlow::accessory(
        &models,
        &[record],
        AccessoryForm {
            name: "Remote".to_string(),
            controller: addr(3),
            product: "Siber 4 button remote".to_string(),
        },
    )
    .unwrap();
    assert_eq!(accessory.request().role(), BindRole::Accessory);
}

#[tokio::test(start_paused = true)]
async fn test_flow_abort_mentions_leaked_slot() {
    let mock = MockHandle::default();
    mock.script(|s| {
        s.statuses
            .push_back(BindingStatus::OutgoingBindingFailedIncompatibleDevice);
        s.unbinds.extend([Ok(false), Ok(false), Ok(false)]);
    });
    let orchestrator = orchestrator(&mock).await;
    let models = common_models(&orchestrator);

    let mut flow = BindFlow::controller(
        &models,
        ControllerForm {
            name: "Attic".to_string(),
            product: "ClimaRad Ventura V1".to_string(),
            rf_address: Some(RfAddress(0x123456)),
        },
    )
    .unwrap();
    flow.start(&orchestrator).unwrap();

    let FlowStep::Abort(reason) = flow.wait().await else {
        panic!("flow should abort");
    };
    assert_eq!(reason.code, "OUTGOING_BINDING_FAILED_INCOMPATIBLE_DEVICE");
    assert!(reason.message.contains("manual unbind"));
}

fn common_models(orchestrator: &BindingOrchestrator) -> airios_core::ModelDirectory {
    orchestrator.coordinator().models().clone()
}
