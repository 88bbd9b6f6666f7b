use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{info, warn};
use xybridge_frame::{encode_frame_parts, Command, Frame, MIN_FRAME_SIZE};
use xybridge_layout::Layout;

use crate::engine::{FrameEngine, Session};
use crate::error::{DashboardError, Result};
use crate::store::{InputEvent, OutputWriter, Snapshot, SubscriberId, VariableStore};
use crate::value::OutputValue;

/// How long inbound delivery pauses after answering an output poll.
///
/// The app polls SEND_OUTPUT_VARIABLES in a tight loop; 100ms keeps the
/// display responsive without spinning the connection thread.
pub const OUTPUT_POLL_PAUSE: Duration = Duration::from_millis(100);

/// Acknowledgement for RECEIVE_INPUT_VARIABLES: empty payload, checksum included.
pub const ACK_FRAME: [u8; 6] = [0x55, 0x06, 0x00, 0x80, 0xF0, 0x49];

/// Response to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: Command,
    /// Complete response frame.
    pub bytes: Bytes,
    /// Pause inbound delivery on this connection for this long after writing.
    pub pause: Option<Duration>,
}

/// One dashboard instance: its layout, its variables, and its subscribers.
///
/// All connections of a dashboard share one store; every frame is handled
/// under the store lock, so no connection observes another's half-applied
/// frame. Subscriber callbacks run under the same lock: they write outputs
/// through their [`OutputWriter`], and calls back into the dashboard from a
/// callback fail with [`DashboardError::Reentrant`] instead of blocking.
pub struct Dashboard {
    layout: Arc<Layout>,
    store: Mutex<VariableStore>,
    connections: AtomicUsize,
    next_connection_id: AtomicU64,
}

impl Dashboard {
    pub fn new(layout: Layout) -> Arc<Self> {
        let store = VariableStore::new(&layout);
        Arc::new(Self {
            layout: Arc::new(layout),
            store: Mutex::new(store),
            connections: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Compile configuration text into a ready dashboard.
    ///
    /// A configuration error yields no dashboard at all.
    pub fn from_config_text(text: &str) -> Result<Arc<Self>> {
        let layout = Layout::parse(text)?;
        info!(
            inputs = layout.inputs().len(),
            outputs = layout.outputs().len(),
            input_size = layout.input_size(),
            output_size = layout.output_size(),
            "dashboard configured"
        );
        Ok(Self::new(layout))
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn list_input_names(&self) -> Vec<String> {
        self.layout.input_names()
    }

    pub fn list_output_names(&self) -> Vec<String> {
        self.layout.output_names()
    }

    /// Register a callback for changes of input `index`.
    pub fn subscribe<F>(&self, index: usize, id: impl Into<SubscriberId>, callback: F) -> Result<()>
    where
        F: Fn(&InputEvent, &mut OutputWriter<'_>) + Send + Sync + 'static,
    {
        self.caller_store()?
            .subscribe(index, id, Arc::new(callback))
            .map_err(Into::into)
    }

    pub fn subscribe_by_name<F>(&self, name: &str, id: impl Into<SubscriberId>, callback: F) -> Result<()>
    where
        F: Fn(&InputEvent, &mut OutputWriter<'_>) + Send + Sync + 'static,
    {
        let index = self
            .layout
            .input_index(name)
            .ok_or_else(|| DashboardError::UnknownVariable(name.to_string()))?;
        self.subscribe(index, id, callback)
    }

    /// Remove one subscription. Returns whether it existed.
    ///
    /// Always `false` from inside a subscriber callback.
    pub fn unsubscribe(&self, index: usize, id: impl Into<SubscriberId>) -> bool {
        match self.caller_store() {
            Ok(mut store) => store.unsubscribe(index, &id.into()),
            Err(err) => {
                warn!(error = %err, "unsubscribe ignored");
                false
            }
        }
    }

    /// Drop every subscription held by `id`, e.g. when a subscriber is torn down.
    pub fn unsubscribe_all(&self, id: impl Into<SubscriberId>) -> usize {
        match self.caller_store() {
            Ok(mut store) => store.unsubscribe_all(&id.into()),
            Err(err) => {
                warn!(error = %err, "unsubscribe ignored");
                0
            }
        }
    }

    pub fn write_output(&self, index: usize, value: impl Into<OutputValue>) -> Result<()> {
        self.caller_store()?
            .write_output(index, value)
            .map_err(Into::into)
    }

    pub fn write_output_by_name(&self, name: &str, value: impl Into<OutputValue>) -> Result<()> {
        let index = self
            .layout
            .output_index(name)
            .ok_or_else(|| DashboardError::UnknownVariable(name.to_string()))?;
        self.write_output(index, value)
    }

    pub fn read_input(&self, index: usize) -> Result<u8> {
        self.caller_store()?.read_input(index).map_err(Into::into)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.caller_store()?.snapshot())
    }

    /// Handle one validated frame and build its response.
    pub fn handle_frame(&self, frame: &Frame) -> Result<Reply> {
        let mut store = self.lock_store();
        self.dispatch(&mut store, frame)
    }

    /// Start serving one connection.
    pub fn open_session(self: &Arc<Self>) -> Session {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let count = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("conn-{id}");
        info!(connection = %id, connections = count, "connection opened");
        Session::new(id, Arc::clone(self))
    }

    /// A frame engine for one connection's byte stream.
    pub fn engine(self: &Arc<Self>) -> FrameEngine {
        FrameEngine::new(self.open_session())
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn close_session(&self, id: &str) {
        let count = self.connections.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(connection = %id, connections = count, "connection closed");
    }

    pub(crate) fn lock_store(&self) -> MutexGuard<'_, VariableStore> {
        // A panicking subscriber must not take the whole dashboard down.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store lock for public entry points, refused while this thread is
    /// running this dashboard's subscribers.
    fn caller_store(&self) -> Result<MutexGuard<'_, VariableStore>> {
        if NotifyScope::active(self) {
            return Err(DashboardError::Reentrant);
        }
        Ok(self.lock_store())
    }

    pub(crate) fn dispatch(&self, store: &mut VariableStore, frame: &Frame) -> Result<Reply> {
        let command = frame
            .command()
            .ok_or(DashboardError::UnknownCommand(frame.command))?;

        let reply = match command {
            Command::SendConfig => Reply {
                command,
                bytes: self.layout.config_response().clone(),
                pause: None,
            },
            Command::SendAllVariables => Reply {
                command,
                bytes: encode_variables(command, &[store.input(), store.output()])?,
                pause: None,
            },
            Command::ReceiveInputVariables => {
                let _scope = NotifyScope::enter(self);
                store.apply_input_frame(&frame.payload)?;
                Reply {
                    command,
                    bytes: Bytes::from_static(&ACK_FRAME),
                    pause: None,
                }
            }
            Command::SendOutputVariables => Reply {
                command,
                bytes: encode_variables(command, &[store.output()])?,
                pause: Some(OUTPUT_POLL_PAUSE),
            },
        };
        Ok(reply)
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("inputs", &self.layout.inputs().len())
            .field("outputs", &self.layout.outputs().len())
            .field("connections", &self.connection_count())
            .finish()
    }
}

thread_local! {
    static NOTIFYING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as running one dashboard's subscribers.
struct NotifyScope(usize);

impl NotifyScope {
    fn key(dashboard: &Dashboard) -> usize {
        dashboard as *const Dashboard as usize
    }

    fn enter(dashboard: &Dashboard) -> Self {
        let key = Self::key(dashboard);
        NOTIFYING.with(|keys| keys.borrow_mut().push(key));
        Self(key)
    }

    fn active(dashboard: &Dashboard) -> bool {
        let key = Self::key(dashboard);
        NOTIFYING.with(|keys| keys.borrow().contains(&key))
    }
}

impl Drop for NotifyScope {
    fn drop(&mut self) {
        NOTIFYING.with(|keys| {
            let mut keys = keys.borrow_mut();
            if let Some(pos) = keys.iter().rposition(|&key| key == self.0) {
                keys.remove(pos);
            }
        });
    }
}

fn encode_variables(command: Command, parts: &[&[u8]]) -> Result<Bytes> {
    let size: usize = parts.iter().map(|part| part.len()).sum();
    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + size);
    encode_frame_parts(command.as_byte(), parts, &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use xybridge_frame::{decode_frame, encode_frame};

    use super::*;
    use crate::store::StoreError;

    const SCENARIO: &str = "unsigned char RemoteXY_CONF[] = { 2,1,3,0,10,20,30 };
struct {
  // input variable
  char btn;
  // output variable
  char led; /* =0..255 */
  // other variable
} RemoteXY;";

    fn request(command: Command, payload: &[u8]) -> Frame {
        Frame::new(command.as_byte(), payload.to_vec())
    }

    fn decode_reply(reply: &Reply) -> Frame {
        let mut wire = BytesMut::from(reply.bytes.as_ref());
        let frame = decode_frame(&mut wire, usize::from(u16::MAX))
            .unwrap()
            .unwrap();
        assert!(wire.is_empty());
        frame
    }

    #[test]
    fn ack_frame_is_a_valid_empty_input_frame() {
        let mut expected = BytesMut::new();
        encode_frame(Command::ReceiveInputVariables.as_byte(), &[], &mut expected).unwrap();
        assert_eq!(expected.as_ref(), &ACK_FRAME);
    }

    #[test]
    fn config_error_yields_no_dashboard() {
        let err = Dashboard::from_config_text("nothing here").unwrap_err();
        assert!(matches!(err, DashboardError::Config(_)));
    }

    #[test]
    fn send_config_returns_prebuilt_frame() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let reply = dashboard.handle_frame(&request(Command::SendConfig, &[])).unwrap();

        assert_eq!(&reply.bytes, dashboard.layout().config_response());
        assert_eq!(decode_reply(&reply).payload.as_ref(), &[10, 20, 30]);
        assert_eq!(reply.pause, None);
    }

    #[test]
    fn input_push_notifies_on_change_only() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dashboard
            .subscribe_by_name("btn", "in-node", move |event: &InputEvent, _: &mut OutputWriter<'_>| {
                sink.lock().unwrap().push(event.value)
            })
            .unwrap();

        let push = request(Command::ReceiveInputVariables, &[1, 0]);
        let reply = dashboard.handle_frame(&push).unwrap();
        assert_eq!(reply.bytes.as_ref(), &ACK_FRAME);
        dashboard.handle_frame(&push).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn short_input_push_is_rejected() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let err = dashboard
            .handle_frame(&request(Command::ReceiveInputVariables, &[1]))
            .unwrap_err();
        assert!(matches!(
            err,
            DashboardError::Store(StoreError::ShortPayload { .. })
        ));
        assert_eq!(dashboard.read_input(0).unwrap(), 0);
    }

    #[test]
    fn output_poll_returns_output_buffer_and_pauses() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        dashboard.write_output_by_name("led", 300).unwrap();

        let reply = dashboard
            .handle_frame(&request(Command::SendOutputVariables, &[]))
            .unwrap();
        let frame = decode_reply(&reply);

        assert_eq!(frame.command(), Some(Command::SendOutputVariables));
        assert_eq!(frame.payload.as_ref(), &[255]);
        assert_eq!(reply.pause, Some(OUTPUT_POLL_PAUSE));
    }

    #[test]
    fn send_all_variables_concatenates_buffers() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        dashboard
            .handle_frame(&request(Command::ReceiveInputVariables, &[7, 8]))
            .unwrap();
        dashboard.write_output(0, -10).unwrap();

        let reply = dashboard
            .handle_frame(&request(Command::SendAllVariables, &[]))
            .unwrap();

        assert_eq!(decode_reply(&reply).payload.as_ref(), &[7, 8, 0xF6]);
        assert_eq!(reply.pause, None);
    }

    #[test]
    fn unknown_command_is_reported() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let err = dashboard.handle_frame(&Frame::new(0x11, Bytes::new())).unwrap_err();
        assert!(matches!(err, DashboardError::UnknownCommand(0x11)));
    }

    #[test]
    fn unknown_variable_names() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        assert!(matches!(
            dashboard.write_output_by_name("nope", 1),
            Err(DashboardError::UnknownVariable(_))
        ));
        assert!(matches!(
            dashboard.subscribe_by_name("nope", "x", |_: &InputEvent, _: &mut OutputWriter<'_>| {}),
            Err(DashboardError::UnknownVariable(_))
        ));
        assert_eq!(dashboard.list_input_names(), vec!["btn"]);
        assert_eq!(dashboard.list_output_names(), vec!["led"]);
    }

    #[test]
    fn teardown_removes_subscriber_everywhere() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let noop = |_: &InputEvent, _: &mut OutputWriter<'_>| {};
        dashboard.subscribe(0, "node-1", noop).unwrap();
        dashboard.subscribe(1, "node-1", noop).unwrap();
        dashboard.subscribe(1, "node-2", noop).unwrap();

        assert_eq!(dashboard.unsubscribe_all("node-1"), 2);
        assert!(dashboard.unsubscribe(1, "node-2"));
    }

    #[test]
    fn subscriber_mirrors_input_to_output() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        dashboard
            .subscribe_by_name("btn", "mirror", |event: &InputEvent, outputs: &mut OutputWriter<'_>| {
                outputs.write_output(0, event.value).unwrap();
            })
            .unwrap();

        dashboard
            .handle_frame(&request(Command::ReceiveInputVariables, &[1, 0]))
            .unwrap();
        let reply = dashboard
            .handle_frame(&request(Command::SendOutputVariables, &[]))
            .unwrap();

        assert_eq!(decode_reply(&reply).payload.as_ref(), &[1]);
    }

    #[test]
    fn subscriber_calling_back_into_dashboard_does_not_block() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::downgrade(&dashboard);
        let sink = Arc::clone(&results);
        dashboard
            .subscribe(0, "loopback", move |event: &InputEvent, _: &mut OutputWriter<'_>| {
                let dashboard = handle.upgrade().unwrap();
                let mut sink = sink.lock().unwrap();
                sink.push(matches!(
                    dashboard.write_output(0, event.value),
                    Err(DashboardError::Reentrant)
                ));
                sink.push(matches!(dashboard.snapshot(), Err(DashboardError::Reentrant)));
                sink.push(!dashboard.unsubscribe(0, "loopback"));
            })
            .unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = {
            let dashboard = Arc::clone(&dashboard);
            thread::spawn(move || {
                let reply = dashboard.handle_frame(&request(Command::ReceiveInputVariables, &[1, 0]));
                done_tx.send(reply.is_ok()).unwrap();
            })
        };

        let handled = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("handle_frame blocked inside a subscriber");
        worker.join().unwrap();

        assert!(handled);
        assert_eq!(*results.lock().unwrap(), vec![true, true, true]);
        // Outside the callback the same calls work again.
        dashboard.write_output(0, 9).unwrap();
        assert_eq!(dashboard.snapshot().unwrap().output, vec![9]);
        assert_eq!(dashboard.read_input(0).unwrap(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_poison_dashboard() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        dashboard
            .subscribe(0, "bad", |_: &InputEvent, _: &mut OutputWriter<'_>| {
                panic!("subscriber failure")
            })
            .unwrap();

        let worker = {
            let dashboard = Arc::clone(&dashboard);
            thread::spawn(move || {
                let _ = dashboard.handle_frame(&request(Command::ReceiveInputVariables, &[1, 0]));
            })
        };
        assert!(worker.join().is_err());

        dashboard.write_output(0, 5).unwrap();
        assert_eq!(dashboard.snapshot().unwrap().output, vec![5]);
    }

    #[test]
    fn concurrent_connections_see_whole_frames() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let writers: Vec<_> = (0..4u8)
            .map(|n| {
                let dashboard = Arc::clone(&dashboard);
                thread::spawn(move || {
                    for _ in 0..200 {
                        dashboard
                            .handle_frame(&request(Command::ReceiveInputVariables, &[n, n]))
                            .unwrap();
                        let reply = dashboard
                            .handle_frame(&request(Command::SendAllVariables, &[]))
                            .unwrap();
                        let payload = decode_reply(&reply).payload;
                        assert_eq!(payload[0], payload[1], "torn input buffer");
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn sessions_track_connection_count() {
        let dashboard = Dashboard::from_config_text(SCENARIO).unwrap();
        let first = dashboard.open_session();
        let second = dashboard.engine();
        assert_eq!(dashboard.connection_count(), 2);
        assert_ne!(first.id(), second.id());
        drop(first);
        drop(second);
        assert_eq!(dashboard.connection_count(), 0);
    }
}
