use gamepad_jogging::cell::{prepare_motion_group, CellConfig, StaticCell};
use gamepad_jogging::controller::{EventCode, InputBatch, InputEvent};
use gamepad_jogging::jogging::{JoggingController, JoggingSettings, LifecycleError, Vector3d};
use gamepad_jogging::transport::loopback::LoopbackTransport;
use gamepad_jogging::transport::{CommandFrame, ResponseMessage, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(1);

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<CommandFrame>) -> CommandFrame {
    tokio::time::timeout(TIMEOUT, frames.recv())
        .await
        .expect("no frame transmitted")
        .expect("frame log closed")
}

fn setup() -> (
    JoggingController<LoopbackTransport>,
    Arc<LoopbackTransport>,
    mpsc::UnboundedReceiver<CommandFrame>,
    mpsc::Sender<InputBatch>,
) {
    let (transport, frames) = LoopbackTransport::new(16);
    let transport = Arc::new(transport);
    let (input, input_rx) = mpsc::channel(16);
    let controller = JoggingController::new(transport.clone(), input_rx, JoggingSettings::default());
    (controller, transport, frames, input)
}

#[tokio::test]
async fn gamepad_session_from_cell_to_frames() {
    let (controller, _transport, mut frames, input) = setup();
    let cell = StaticCell::new(CellConfig::default());

    let motion_group = prepare_motion_group(&cell).await.unwrap();
    controller.activate(motion_group.clone()).await.unwrap();

    let zero = next_frame(&mut frames).await;
    assert_eq!(zero.motion_group, motion_group);
    assert_eq!(zero.position_velocity, 0.0);

    // Left stick fully right
    input
        .send(vec![InputEvent::absolute(EventCode::AbsX, 32767)])
        .await
        .unwrap();
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.position_direction, Vector3d::new(1.0, 0.0, 0.0));
    assert!((frame.position_velocity - 57.735).abs() < 1e-3);
    assert_eq!(frame.response_rate, 1000);

    // Right trigger fully pressed, then left shoulder
    input
        .send(vec![InputEvent::absolute(EventCode::AbsRz, 255)])
        .await
        .unwrap();
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.position_direction, Vector3d::new(1.0, 0.0, 1.0));
    assert!((frame.position_velocity - 100.0 * 2f64.sqrt() / 3f64.sqrt()).abs() < 1e-9);

    input
        .send(vec![InputEvent::key(EventCode::BtnTl, true)])
        .await
        .unwrap();
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.rotation_direction, Vector3d::new(0.0, 0.0, -1.0));
    assert!((frame.rotation_velocity - 0.5 / 3f64.sqrt()).abs() < 1e-9);

    let report = controller.deactivate().await.unwrap().expect("session report");
    assert_eq!(report.frames_sent, 4);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn session_can_be_restarted_after_deactivate() {
    let (controller, transport, mut frames, input) = setup();
    let cell = StaticCell::new(CellConfig::default());
    let motion_group = prepare_motion_group(&cell).await.unwrap();

    for _ in 0..2 {
        controller.activate(motion_group.clone()).await.unwrap();
        next_frame(&mut frames).await;
        input
            .send(vec![InputEvent::absolute(EventCode::AbsY, -32767)])
            .await
            .unwrap();
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame.position_direction, Vector3d::new(0.0, -1.0, 0.0));
        controller.deactivate().await.unwrap();
    }

    assert_eq!(transport.sessions_opened(), 2);
}

#[tokio::test]
async fn responses_and_protocol_noise_do_not_disturb_the_stream() {
    let (controller, transport, mut frames, input) = setup();
    controller
        .activate(gamepad_jogging::transport::MotionGroupId::new("0@ur"))
        .await
        .unwrap();
    next_frame(&mut frames).await;

    transport
        .inject(Ok(ResponseMessage::new("state", b"{}".to_vec())))
        .await;
    transport
        .inject(Err(StreamError::Protocol("unexpected payload".into())))
        .await;

    input
        .send(vec![InputEvent::absolute(EventCode::AbsRy, 32767)])
        .await
        .unwrap();
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.rotation_direction, Vector3d::new(-1.0, 0.0, 0.0));
    assert!(controller.is_running());

    // Give the observer a moment to drain the acknowledgements
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = controller.deactivate().await.unwrap().unwrap();
    assert_eq!(report.frames_sent, 2);
    // Acks for both frames plus the injected response
    assert!(report.responses_received >= 2);
}

#[tokio::test]
async fn lost_connection_ends_the_session() {
    let (controller, transport, mut frames, _input) = setup();
    controller
        .activate(gamepad_jogging::transport::MotionGroupId::new("0@ur"))
        .await
        .unwrap();
    next_frame(&mut frames).await;

    transport
        .inject(Err(StreamError::Connection("link down".into())))
        .await;
    tokio::time::timeout(TIMEOUT, controller.stopped())
        .await
        .expect("session kept running");

    assert!(matches!(
        controller.deactivate().await,
        Err(LifecycleError::Stream(StreamError::Connection(_)))
    ));
    assert!(controller.deactivate().await.unwrap().is_none());
}
