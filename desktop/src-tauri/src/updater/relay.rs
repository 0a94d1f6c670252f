//! Update-lifecycle relay.
//!
//! One task owns the relay and drains two independent channels: host and
//! console inputs on one side, engine events on the other. Nothing else
//! touches the target or the state, so no locking is needed.

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::event::{ContentMessage, UpdateCommand, UpdateEvent};
use super::state::UpdateState;
use super::UpdateEngine;

/// The forwarding target went away (or never existed).
#[derive(Debug, Error)]
#[error("forwarding target `{0}` is unavailable")]
pub struct TargetUnavailable(pub String);

/// The relay task has stopped and no longer accepts input.
#[derive(Debug, Error)]
#[error("update relay is not running")]
pub struct RelayClosed;

/// Non-owning reference to the window receiving update messages.
pub trait RelayTarget: Send + 'static {
    fn id(&self) -> &str;
    fn deliver(&self, message: &ContentMessage) -> Result<(), TargetUnavailable>;
}

/// Native error surface for unpackaged builds, independent of any window.
pub type ErrorDialog = Box<dyn Fn(&str) + Send>;

/// Per-run session settings, fixed once the relay is built.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub auto_download: bool,
    pub dev_mode: bool,
    pub dev_config_path: PathBuf,
}

impl UpdateSession {
    pub fn new(dev_mode: bool, dev_config_path: impl Into<PathBuf>) -> Self {
        Self {
            auto_download: false,
            dev_mode,
            dev_config_path: dev_config_path.into(),
        }
    }
}

pub enum RelayInput<T> {
    Attach(T),
    Detach,
    ContentReady,
    Command(UpdateCommand),
}

pub struct UpdaterRelay<E, T> {
    engine: E,
    target: Option<T>,
    session: UpdateSession,
    state: UpdateState,
    status: watch::Sender<UpdateState>,
    error_dialog: Option<ErrorDialog>,
}

impl<E: UpdateEngine, T: RelayTarget> UpdaterRelay<E, T> {
    /// Builds the relay and configures the engine for this session. The dev
    /// override is applied here, before any check can be issued.
    pub fn new(mut engine: E, session: UpdateSession) -> Self {
        engine.set_auto_download(session.auto_download);
        if session.dev_mode {
            log::info!(
                "[relay] Unpackaged build, using dev update config {}",
                session.dev_config_path.display()
            );
            engine.set_update_config_path(session.dev_config_path.clone());
            engine.force_dev_update_config(true);
        }
        let (status, _) = watch::channel(UpdateState::Idle);
        Self {
            engine,
            target: None,
            session,
            state: UpdateState::Idle,
            status,
            error_dialog: None,
        }
    }

    /// Errors also open a native dialog, in dev mode only.
    pub fn with_error_dialog(mut self, dialog: impl Fn(&str) + Send + 'static) -> Self {
        self.error_dialog = Some(Box::new(dialog));
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Replaces the forwarding target. Nothing is replayed to the new one.
    pub fn attach(&mut self, target: T) {
        match self.target.replace(target) {
            Some(old) => log::info!("[relay] Target replaced (was {})", old.id()),
            None => log::info!("[relay] Target attached"),
        }
    }

    pub fn detach(&mut self) {
        if let Some(old) = self.target.take() {
            log::info!("[relay] Target {} detached", old.id());
        }
    }

    /// Automatic check, once per content load.
    pub fn on_content_ready(&mut self) {
        log::info!(
            "[relay] Content ready ({:?}), checking for updates",
            self.state()
        );
        if let Err(e) = self.engine.check_for_updates() {
            log::error!("[relay] Update check failed: {}", e);
            self.forward(UpdateEvent::UpdateError(e.to_string()));
        }
    }

    pub fn handle_command(&mut self, command: UpdateCommand) {
        self.set_state(self.state.on_command(command));
        let result = match command {
            UpdateCommand::CheckForUpdates => self.engine.check_for_updates(),
            UpdateCommand::StartDownloadUpdate => self.engine.download_update(),
            UpdateCommand::InstallUpdate => self.engine.quit_and_install(),
        };
        if let Err(e) = result {
            log::warn!("[relay] {} failed: {}", command.channel(), e);
            self.forward(UpdateEvent::UpdateError(e.to_string()));
        }
    }

    /// Forwards one engine event to the target. Never fails: a missing or
    /// destroyed target drops the message.
    pub fn forward(&mut self, event: UpdateEvent) {
        self.set_state(self.state.on_event(&event));

        if let (UpdateEvent::UpdateError(message), Some(dialog)) = (&event, &self.error_dialog) {
            if self.session.dev_mode {
                dialog(message);
            }
        }

        let Some(target) = &self.target else {
            log::warn!("[relay] Cannot send {}: no target window", event.channel());
            return;
        };

        let message = match event.to_message() {
            Ok(m) => m,
            Err(e) => {
                log::error!("[relay] Cannot encode {}: {}", event.channel(), e);
                return;
            }
        };
        if let Err(e) = target.deliver(&message) {
            log::warn!("[relay] Cannot send {}: {}", message.channel, e);
        }
    }

    fn set_state(&mut self, next: UpdateState) {
        if next != self.state {
            log::debug!("[relay] State {:?} -> {:?}", self.state, next);
            self.state = next;
            self.status.send_replace(next);
            if next.is_terminal() {
                log::info!("[relay] Installing update, app will restart");
            }
        }
    }

    fn handle_input(&mut self, input: RelayInput<T>) {
        match input {
            RelayInput::Attach(target) => self.attach(target),
            RelayInput::Detach => self.detach(),
            RelayInput::ContentReady => self.on_content_ready(),
            RelayInput::Command(command) => self.handle_command(command),
        }
    }

    /// Splits the relay into a handle and the task driving it. The task
    /// ends once every handle is dropped and the engine stops sending.
    pub fn into_task(
        mut self,
        mut events: mpsc::UnboundedReceiver<UpdateEvent>,
    ) -> (RelayHandle<T>, impl Future<Output = ()> + Send) {
        let (tx, mut inputs) = mpsc::unbounded_channel();
        let handle = RelayHandle {
            inputs: tx,
            status: self.status.subscribe(),
        };
        let task = async move {
            loop {
                tokio::select! {
                    // host inputs first so an attach lands before queued events
                    biased;
                    Some(input) = inputs.recv() => self.handle_input(input),
                    Some(event) = events.recv() => self.forward(event),
                    else => break,
                }
            }
            log::info!("[relay] Stopped");
        };
        (handle, task)
    }
}

/// Sending half of the relay, shared with window hooks and IPC commands.
pub struct RelayHandle<T> {
    inputs: mpsc::UnboundedSender<RelayInput<T>>,
    status: watch::Receiver<UpdateState>,
}

impl<T> Clone for RelayHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inputs: self.inputs.clone(),
            status: self.status.clone(),
        }
    }
}

impl<T> RelayHandle<T> {
    fn send(&self, input: RelayInput<T>) -> Result<(), RelayClosed> {
        self.inputs.send(input).map_err(|_| RelayClosed)
    }

    pub fn attach(&self, target: T) -> Result<(), RelayClosed> {
        self.send(RelayInput::Attach(target))
    }

    pub fn detach(&self) -> Result<(), RelayClosed> {
        self.send(RelayInput::Detach)
    }

    pub fn content_ready(&self) -> Result<(), RelayClosed> {
        self.send(RelayInput::ContentReady)
    }

    pub fn command(&self, command: UpdateCommand) -> Result<(), RelayClosed> {
        self.send(RelayInput::Command(command))
    }

    pub fn status(&self) -> UpdateState {
        *self.status.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::event::{DownloadProgress, UpdateInfo};
    use crate::updater::UpdaterError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AutoDownload(bool),
        ConfigPath(PathBuf),
        ForceDev(bool),
        Check,
        Download,
        Install,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_check: bool,
    }

    impl FakeEngine {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl UpdateEngine for FakeEngine {
        fn set_auto_download(&mut self, enabled: bool) {
            self.record(Call::AutoDownload(enabled));
        }
        fn set_update_config_path(&mut self, path: PathBuf) {
            self.record(Call::ConfigPath(path));
        }
        fn force_dev_update_config(&mut self, force: bool) {
            self.record(Call::ForceDev(force));
        }
        fn check_for_updates(&self) -> Result<(), UpdaterError> {
            self.record(Call::Check);
            if self.fail_check {
                return Err(UpdaterError::Check("feed unreachable".into()));
            }
            Ok(())
        }
        fn download_update(&self) -> Result<(), UpdaterError> {
            self.record(Call::Download);
            Ok(())
        }
        fn quit_and_install(&self) -> Result<(), UpdaterError> {
            self.record(Call::Install);
            Err(UpdaterError::Install("no downloaded update to install".into()))
        }
    }

    #[derive(Clone)]
    struct FakeTarget {
        id: String,
        alive: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<ContentMessage>>>,
    }

    impl FakeTarget {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                alive: Arc::new(AtomicBool::new(true)),
                sent: Arc::default(),
            }
        }

        fn sent(&self) -> Vec<ContentMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl RelayTarget for FakeTarget {
        fn id(&self) -> &str {
            &self.id
        }
        fn deliver(&self, message: &ContentMessage) -> Result<(), TargetUnavailable> {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(TargetUnavailable(self.id.clone()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn recording_dialog() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + 'static) {
        let shown: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = shown.clone();
        (shown, move |message: &str| {
            sink.lock().unwrap().push(message.to_string())
        })
    }

    fn packaged() -> UpdateSession {
        UpdateSession::new(false, "/nonexistent/dev-app-update.yml")
    }

    fn info(version: &str) -> UpdateInfo {
        UpdateInfo {
            version: version.to_string(),
            current_version: "0.1.0".to_string(),
            release_date: None,
            release_notes: None,
        }
    }

    fn all_events() -> Vec<UpdateEvent> {
        vec![
            UpdateEvent::CheckingForUpdate,
            UpdateEvent::UpdateAvailable(info("1.0.3")),
            UpdateEvent::UpdateNotAvailable(Some(info("0.1.0"))),
            UpdateEvent::DownloadProgress(DownloadProgress {
                percent: 42.7,
                bytes_per_second: 1000,
                transferred: 500,
                total: 1200,
            }),
            UpdateEvent::UpdateDownloaded(info("1.0.3")),
            UpdateEvent::UpdateError("boom".into()),
        ]
    }

    #[test]
    fn test_each_event_sends_exactly_one_message() {
        for event in all_events() {
            let target = FakeTarget::new("main");
            let mut relay = UpdaterRelay::new(FakeEngine::default(), packaged());
            relay.attach(target.clone());
            relay.forward(event.clone());

            let sent = target.sent();
            assert_eq!(sent.len(), 1, "event {:?}", event);
            assert_eq!(sent[0], event.to_message().unwrap());
        }
    }

    #[test]
    fn test_progress_forwarded_normalized() {
        let target = FakeTarget::new("main");
        let mut relay = UpdaterRelay::new(FakeEngine::default(), packaged());
        relay.attach(target.clone());
        relay.forward(UpdateEvent::DownloadProgress(DownloadProgress {
            percent: 42.7,
            bytes_per_second: 1000,
            transferred: 500,
            total: 1200,
        }));

        let sent = target.sent();
        assert_eq!(sent[0].channel, "download-progress");
        assert_eq!(
            sent[0].payload,
            json!({"percent": 42, "bytesPerSecond": 1000, "transferred": 500, "total": 1200})
        );
    }

    #[test]
    fn test_reattach_supersedes_old_target() {
        let old = FakeTarget::new("old");
        let new = FakeTarget::new("new");
        let mut relay = UpdaterRelay::new(FakeEngine::default(), packaged());

        relay.attach(old.clone());
        relay.forward(UpdateEvent::CheckingForUpdate);
        relay.attach(new.clone());
        relay.forward(UpdateEvent::UpdateAvailable(info("1.0.3")));

        assert_eq!(old.sent().len(), 1);
        let sent = new.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "update-available");
    }

    #[test]
    fn test_no_target_drops_silently() {
        let mut relay: UpdaterRelay<_, FakeTarget> =
            UpdaterRelay::new(FakeEngine::default(), packaged());
        for event in all_events() {
            relay.forward(event);
        }
        assert_eq!(relay.state(), UpdateState::Error);
    }

    #[test]
    fn test_destroyed_target_drops_silently() {
        let target = FakeTarget::new("main");
        let mut relay = UpdaterRelay::new(FakeEngine::default(), packaged());
        relay.attach(target.clone());
        target.alive.store(false, Ordering::SeqCst);

        for event in all_events() {
            relay.forward(event);
        }
        assert!(target.sent().is_empty());
    }

    #[test]
    fn test_detach_stops_forwarding() {
        let target = FakeTarget::new("main");
        let mut relay = UpdaterRelay::new(FakeEngine::default(), packaged());
        relay.attach(target.clone());
        relay.detach();
        relay.forward(UpdateEvent::CheckingForUpdate);
        assert!(target.sent().is_empty());
    }

    #[test]
    fn test_double_check_is_not_deduplicated() {
        let engine = FakeEngine::default();
        let mut relay: UpdaterRelay<_, FakeTarget> = UpdaterRelay::new(engine.clone(), packaged());
        relay.handle_command(UpdateCommand::CheckForUpdates);
        relay.handle_command(UpdateCommand::CheckForUpdates);

        let checks = engine.calls().into_iter().filter(|c| *c == Call::Check).count();
        assert_eq!(checks, 2);
    }

    #[test]
    fn test_auto_download_disabled_and_no_implicit_download() {
        let engine = FakeEngine::default();
        let target = FakeTarget::new("main");
        let mut relay = UpdaterRelay::new(engine.clone(), packaged());
        relay.attach(target);
        relay.on_content_ready();
        relay.forward(UpdateEvent::UpdateAvailable(info("1.0.3")));

        let calls = engine.calls();
        assert_eq!(calls[0], Call::AutoDownload(false));
        assert!(!calls.contains(&Call::Download));

        relay.handle_command(UpdateCommand::StartDownloadUpdate);
        assert_eq!(engine.calls().last(), Some(&Call::Download));
    }

    #[test]
    fn test_dev_override_applied_before_first_check() {
        let engine = FakeEngine::default();
        let session = UpdateSession::new(true, "/app/dev-app-update.yml");
        let mut relay: UpdaterRelay<_, FakeTarget> = UpdaterRelay::new(engine.clone(), session);
        relay.on_content_ready();

        assert_eq!(
            engine.calls(),
            vec![
                Call::AutoDownload(false),
                Call::ConfigPath(PathBuf::from("/app/dev-app-update.yml")),
                Call::ForceDev(true),
                Call::Check,
            ]
        );
    }

    #[test]
    fn test_packaged_run_skips_dev_override() {
        let engine = FakeEngine::default();
        let mut relay: UpdaterRelay<_, FakeTarget> = UpdaterRelay::new(engine.clone(), packaged());
        relay.on_content_ready();
        assert_eq!(engine.calls(), vec![Call::AutoDownload(false), Call::Check]);
    }

    #[test]
    fn test_content_ready_failure_becomes_error_event() {
        let engine = FakeEngine {
            fail_check: true,
            ..FakeEngine::default()
        };
        let target = FakeTarget::new("main");
        let (shown, dialog) = recording_dialog();
        let mut relay = UpdaterRelay::new(engine, packaged()).with_error_dialog(dialog);
        relay.attach(target.clone());
        relay.on_content_ready();

        let sent = target.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "update-error");
        assert_eq!(sent[0].payload, json!("feed unreachable"));
        assert!(shown.lock().unwrap().is_empty());
    }

    #[test]
    fn test_install_failure_reported_and_dialog_in_dev() {
        let target = FakeTarget::new("main");
        let session = UpdateSession::new(true, "/app/dev-app-update.yml");
        let (shown, dialog) = recording_dialog();
        let mut relay = UpdaterRelay::new(FakeEngine::default(), session).with_error_dialog(dialog);
        relay.attach(target.clone());
        relay.handle_command(UpdateCommand::InstallUpdate);

        assert_eq!(target.sent()[0].channel, "update-error");
        assert_eq!(
            *shown.lock().unwrap(),
            vec!["no downloaded update to install".to_string()]
        );
        assert_eq!(relay.state(), UpdateState::Error);
    }

    #[test]
    fn test_dev_error_dialog_shown_without_target() {
        let session = UpdateSession::new(true, "/app/dev-app-update.yml");
        let (shown, dialog) = recording_dialog();
        let mut relay: UpdaterRelay<_, FakeTarget> =
            UpdaterRelay::new(FakeEngine::default(), session).with_error_dialog(dialog);
        relay.forward(UpdateEvent::UpdateError("signature mismatch".into()));

        assert_eq!(*shown.lock().unwrap(), vec!["signature mismatch".to_string()]);
        assert_eq!(relay.state(), UpdateState::Error);
    }

    #[tokio::test]
    async fn test_task_forwards_in_order_and_publishes_state() {
        let engine = FakeEngine::default();
        let target = FakeTarget::new("main");
        let relay = UpdaterRelay::new(engine.clone(), packaged());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, task) = relay.into_task(events_rx);
        let join = tokio::spawn(task);

        handle.attach(target.clone()).unwrap();
        handle.content_ready().unwrap();
        handle.command(UpdateCommand::CheckForUpdates).unwrap();

        let mut status = handle.status.clone();
        events_tx.send(UpdateEvent::CheckingForUpdate).unwrap();
        events_tx.send(UpdateEvent::UpdateAvailable(info("1.0.3"))).unwrap();

        status
            .wait_for(|s| *s == UpdateState::Available)
            .await
            .unwrap();
        assert_eq!(handle.status(), UpdateState::Available);

        drop(handle);
        drop(events_tx);
        join.await.unwrap();

        let channels: Vec<_> = target.sent().iter().map(|m| m.channel).collect();
        assert_eq!(channels, vec!["checking-for-update", "update-available"]);
        let checks = engine.calls().into_iter().filter(|c| *c == Call::Check).count();
        assert_eq!(checks, 2);
    }
}
