//! End-to-end runs: model text through the parser, executor and handlers
//! down to the simulated body, with results decoded from the report channel.

use super::ResponseParser;
use crate::body::{BodyEvent, SimulatedBody, TextPlayer};
use crate::command::handlers::{ChassisProvider, CommandRegistry, SpeechProvider};
use crate::command::BatchExecutor;
use crate::config::MotionConfig;
use crate::report::ChannelReporter;
use async_trait::async_trait;
use picar_shared::codec::ResultDecoder;
use picar_shared::state_machine::ExecutorState;
use picar_shared::{BatchReason, BatchResult, BatchStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records finished utterances; each takes `delay` to play
#[derive(Default)]
struct QuietPlayer {
    delay: Duration,
    spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl TextPlayer for QuietPlayer {
    async fn play(&self, text: &str) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct Robot {
    parser: ResponseParser,
    executor: Arc<BatchExecutor>,
    body: Arc<SimulatedBody>,
    player: Arc<QuietPlayer>,
    results: mpsc::Receiver<String>,
    decoder: ResultDecoder,
}

impl Robot {
    fn new() -> Self {
        Self::with_player(QuietPlayer::default())
    }

    fn with_player(player: QuietPlayer) -> Self {
        let body = Arc::new(SimulatedBody::new(100.0));
        let player = Arc::new(player);

        let mut registry = CommandRegistry::new();
        registry.register_provider(&ChassisProvider::new(body.clone(), MotionConfig::default()));
        registry.register_provider(&SpeechProvider::new(player.clone()));

        let (reporter, results) = ChannelReporter::new(8);
        let executor = Arc::new(BatchExecutor::new(
            registry,
            body.clone(),
            Arc::new(reporter),
            Duration::from_secs(5),
        ));
        let parser = ResponseParser::new(executor.clone()).unwrap();

        Self {
            parser,
            executor,
            body,
            player,
            results,
            decoder: ResultDecoder::new().unwrap(),
        }
    }

    async fn next_result(&mut self) -> BatchResult {
        let message = self.results.recv().await.unwrap();
        self.decoder.decode(&message).unwrap()
    }

    /// Shut the executor down and return anything else that was reported
    async fn drain(mut self) -> Vec<BatchResult> {
        self.executor.shutdown().await.unwrap();
        let mut rest = Vec::new();
        while let Ok(message) = self.results.try_recv() {
            rest.push(self.decoder.decode(&message).unwrap());
        }
        rest
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_forward_batch_reports_ok() {
    let mut robot = Robot::new();
    robot.parser.add("[COMMANDS id=7]\n>FORWARD 50\n");
    assert!(!robot.parser.finish());

    assert_eq!(robot.next_result().await, BatchResult::ok(7));
    assert_eq!(
        robot.body.events(),
        vec![BodyEvent::Steering(0.0), BodyEvent::Power(80), BodyEvent::Stop]
    );
    assert!(robot.drain().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_command_without_header_never_runs() {
    let mut robot = Robot::new();
    robot.parser.add(">FORWARD 10\n");
    robot.parser.finish();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(robot.body.events().is_empty());
    assert_eq!(robot.executor.state(), ExecutorState::Idle);
    assert!(robot.drain().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_batch_preempts_running_forward() {
    let mut robot = Robot::new();
    robot.parser.add("[COMMANDS id=1]\n>FORWARD 200\n>BACK 50\n");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(robot.body.power(), 80);

    robot.parser.add("[COMMANDS id=2]\n>STOP\n");
    assert_eq!(robot.body.power(), 0);
    assert_eq!(robot.executor.executing_batch(), Some(2));

    robot.parser.add(">CAMERA 10 20\n");
    robot.parser.finish();

    assert_eq!(robot.next_result().await, BatchResult::ok(2));
    assert!(!robot.body.events().contains(&BodyEvent::Power(-80)));
    assert!(robot
        .body
        .events()
        .contains(&BodyEvent::Camera { pan: 10.0, tilt: 20.0 }));

    // Batch 1 is discarded, never reported
    assert!(robot.drain().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_without_leading_stop_is_ignored() {
    let mut robot = Robot::new();
    robot.parser.add("[COMMANDS id=1]\n>FORWARD 100\n");
    tokio::time::sleep(Duration::from_millis(200)).await;

    robot.parser.add("[COMMANDS id=2]\n>SAY hi\n>STOP\n");
    robot.parser.finish();

    assert_eq!(robot.next_result().await, BatchResult::ok(1));
    assert!(robot.player.spoken.lock().unwrap().is_empty());
    assert!(robot.drain().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_fails_batch() {
    let mut robot = Robot::new();
    robot
        .parser
        .add("[COMMANDS id=4]\n>SPIN 5\n>FORWARD 10\n");
    robot.parser.finish();

    let result = robot.next_result().await;
    assert_eq!(result.batch_id, 4);
    assert_eq!(result.status, BatchStatus::Failed);
    assert_eq!(result.reason, BatchReason::ParseError);
    assert!(robot.body.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_camera_then_continue() {
    let mut robot = Robot::new();
    robot.parser.add("[COMMANDS id=9]\n>CAMERA 0 30\n>CONTINUE\n");
    assert!(robot.parser.finish());

    assert_eq!(robot.next_result().await, BatchResult::ok(9));
    assert_eq!(
        robot.body.events(),
        vec![BodyEvent::Camera { pan: 0.0, tilt: 30.0 }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_speech_completes_before_result() {
    let mut robot = Robot::new();
    robot
        .parser
        .add("[COMMANDS id=3]\n>SAY hello there\n>RIGHT 30\n");
    robot.parser.finish();

    assert_eq!(robot.next_result().await, BatchResult::ok(3));
    assert_eq!(
        robot.player.spoken.lock().unwrap().clone(),
        vec!["hello there".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_over_limit_drive_is_refused() {
    let mut robot = Robot::new();
    robot.parser.add("[COMMANDS id=11]\n>FORWARD 1000\n>LEFT 90\n");
    robot.parser.finish();

    let result = robot.next_result().await;
    assert_eq!(result.status, BatchStatus::Failed);
    assert_eq!(result.reason, BatchReason::Safety);
    assert!(robot.body.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_obstacle_reports_interrupted() {
    let mut robot = Robot::new();
    robot.body.set_distance(10.0);
    robot.parser.add("[COMMANDS id=12]\n>FORWARD 30\n");
    robot.parser.finish();

    let result = robot.next_result().await;
    assert_eq!(result.status, BatchStatus::Interrupted);
    assert_eq!(result.reason, BatchReason::Obstacle);
}

#[tokio::test(start_paused = true)]
async fn test_stop_preempts_batch_waiting_on_speech() {
    let mut robot = Robot::with_player(QuietPlayer {
        delay: Duration::from_secs(5),
        ..Default::default()
    });
    robot.parser.add("[COMMANDS id=1]\n>SAY a long story\n");
    robot.parser.finish();

    // Batch 1 has no commands left and waits for the utterance to end
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(robot.executor.executing_batch(), Some(1));

    robot.parser.add("[COMMANDS id=2]\n>STOP\n>CAMERA 0 10\n");
    robot.parser.finish();

    assert_eq!(robot.next_result().await, BatchResult::ok(2));
    assert!(robot.player.spoken.lock().unwrap().is_empty());
    assert_eq!(robot.executor.state(), ExecutorState::Idle);
    assert!(robot.drain().await.is_empty());
}
