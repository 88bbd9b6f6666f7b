use std::fmt;
use std::sync::Arc;

use tracing::trace;
use xybridge_layout::{Encoding, Layout, OutputVariable};

use crate::value::{clamp_to_signed, to_signed, OutputValue};

/// A change of one input byte, delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub index: usize,
    /// Declared name, `None` for unnamed trailing buffer bytes.
    pub name: Option<Arc<str>>,
    pub value: i8,
}

/// Subscriber callback. Runs synchronously while the store is locked and
/// writes outputs through the [`OutputWriter`] it is handed.
pub type Callback = Arc<dyn Fn(&InputEvent, &mut OutputWriter<'_>) + Send + Sync>;

/// Opaque key identifying one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SubscriberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for SubscriberId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised by variable store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("input index {index} out of range ({len} inputs)")]
    InputIndex { index: usize, len: usize },

    #[error("output index {index} out of range ({len} outputs)")]
    OutputIndex { index: usize, len: usize },

    #[error("input payload has {len} bytes, expected {expected}")]
    ShortPayload { len: usize, expected: usize },

    #[error("output {index} is numeric, cannot store `{value}`")]
    InvalidValue { index: usize, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Copies of both buffers at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

/// Write access to the output buffer of a locked store.
///
/// Subscriber callbacks receive one so they can drive outputs from inputs
/// without locking the dashboard again.
pub struct OutputWriter<'a> {
    output: &'a mut [u8],
    outputs: &'a [OutputVariable],
}

impl OutputWriter<'_> {
    /// Write one output variable.
    ///
    /// Text fields take at most `len - 1` bytes of the value's text (cut at a
    /// character boundary) followed by a zero terminator. Numeric fields take
    /// the value clamped to `[-255, 255]` in their first byte.
    pub fn write_output(&mut self, index: usize, value: impl Into<OutputValue>) -> Result<()> {
        let value = value.into();
        let len = self.outputs.len();
        let var = self
            .outputs
            .get(index)
            .ok_or(StoreError::OutputIndex { index, len })?;
        let field = &mut self.output[var.byte_range()];

        match var.encoding {
            Encoding::Text => {
                let text = value.to_text();
                let mut cut = text.len().min(field.len() - 1);
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                field[..cut].copy_from_slice(&text.as_bytes()[..cut]);
                field[cut] = 0;
            }
            Encoding::Scalar { .. } => {
                let number = value.to_int().ok_or_else(|| StoreError::InvalidValue {
                    index,
                    value: value.to_string(),
                })?;
                field[0] = clamp_to_signed(number);
            }
        }
        trace!(index, name = %var.name, %value, "output written");
        Ok(())
    }

    /// Index of the output variable declared as `name`.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|var| var.name == name)
    }
}

struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

/// Live input/output buffers of one dashboard plus its input subscribers.
pub struct VariableStore {
    input: Vec<u8>,
    output: Vec<u8>,
    input_names: Vec<Option<Arc<str>>>,
    outputs: Vec<OutputVariable>,
    listeners: Vec<Vec<Subscriber>>,
}

impl VariableStore {
    /// Create zeroed buffers sized by `layout`.
    pub fn new(layout: &Layout) -> Self {
        let mut input_names = vec![None; layout.input_size()];
        for var in layout.inputs() {
            input_names[var.index] = Some(Arc::from(var.name.as_str()));
        }

        Self {
            input: vec![0; layout.input_size()],
            output: vec![0; layout.output_size()],
            input_names,
            outputs: layout.outputs().to_vec(),
            listeners: std::iter::repeat_with(Vec::new)
                .take(layout.input_size())
                .collect(),
        }
    }

    pub fn read_input(&self, index: usize) -> Result<u8> {
        self.input
            .get(index)
            .copied()
            .ok_or(StoreError::InputIndex {
                index,
                len: self.input.len(),
            })
    }

    /// Bytes of output variable `index`.
    pub fn read_output(&self, index: usize) -> Result<&[u8]> {
        let var = self.output_var(index)?;
        Ok(&self.output[var.byte_range()])
    }

    /// Store an input push from the app, notifying subscribers of every byte
    /// that changed. Returns the number of changed bytes.
    ///
    /// Bytes past the input buffer are ignored.
    pub fn apply_input_frame(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.len() < self.input.len() {
            return Err(StoreError::ShortPayload {
                len: payload.len(),
                expected: self.input.len(),
            });
        }

        let Self {
            input,
            output,
            input_names,
            outputs,
            listeners,
        } = self;
        let mut writer = OutputWriter { output, outputs };

        let mut changed = 0;
        for (index, (&new, stored)) in payload.iter().zip(input.iter_mut()).enumerate() {
            if *stored == new {
                continue;
            }
            *stored = new;
            changed += 1;

            let event = InputEvent {
                index,
                name: input_names[index].clone(),
                value: to_signed(new),
            };
            trace!(index, value = event.value, "input changed");
            for subscriber in &listeners[index] {
                (subscriber.callback)(&event, &mut writer);
            }
        }
        Ok(changed)
    }

    /// Write one output variable. See [`OutputWriter::write_output`].
    pub fn write_output(&mut self, index: usize, value: impl Into<OutputValue>) -> Result<()> {
        OutputWriter {
            output: &mut self.output,
            outputs: &self.outputs,
        }
        .write_output(index, value)
    }

    /// Register `callback` for changes of input `index`.
    ///
    /// Subscribing again with the same id replaces the callback and keeps its
    /// position in the notification order.
    pub fn subscribe(
        &mut self,
        index: usize,
        id: impl Into<SubscriberId>,
        callback: Callback,
    ) -> Result<()> {
        let len = self.listeners.len();
        let subscribers = self
            .listeners
            .get_mut(index)
            .ok_or(StoreError::InputIndex { index, len })?;
        let id = id.into();

        match subscribers.iter_mut().find(|sub| sub.id == id) {
            Some(existing) => existing.callback = callback,
            None => subscribers.push(Subscriber { id, callback }),
        }
        Ok(())
    }

    /// Remove one subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, index: usize, id: &SubscriberId) -> bool {
        let Some(subscribers) = self.listeners.get_mut(index) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|sub| &sub.id != id);
        subscribers.len() != before
    }

    /// Remove `id` from every input. Returns how many subscriptions went away.
    pub fn unsubscribe_all(&mut self, id: &SubscriberId) -> usize {
        self.listeners
            .iter_mut()
            .map(|subscribers| {
                let before = subscribers.len();
                subscribers.retain(|sub| &sub.id != id);
                before - subscribers.len()
            })
            .sum()
    }

    pub fn subscriber_count(&self, index: usize) -> usize {
        self.listeners.get(index).map_or(0, Vec::len)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }

    /// Live input buffer, for encoding responses under the store lock.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Live output buffer, for encoding responses under the store lock.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    fn output_var(&self, index: usize) -> Result<&OutputVariable> {
        self.outputs.get(index).ok_or(StoreError::OutputIndex {
            index,
            len: self.outputs.len(),
        })
    }
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("input", &self.input)
            .field("output", &self.output)
            .field(
                "subscribers",
                &self.listeners.iter().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const CONFIG: &str = "unsigned char RemoteXY_CONF[] = { 2,8,0,0 };
  // input variables
  char btn;
  // output variables
  char led; /* =0..255 */
  signed char level; /* =-100..100 */
  char label[5]; /* string */
  char tail; /* string */
  // other variable";

    fn store() -> VariableStore {
        VariableStore::new(&Layout::parse(CONFIG).unwrap())
    }

    fn recorder(log: &Arc<Mutex<Vec<(String, usize, i8)>>>, tag: &str) -> Callback {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move |event: &InputEvent, _: &mut OutputWriter<'_>| {
            log.lock().unwrap().push((tag.clone(), event.index, event.value));
        })
    }

    #[test]
    fn buffers_sized_by_layout() {
        let store = store();
        assert_eq!(store.input().len(), 2);
        assert_eq!(store.output().len(), 8);
        assert!(store.snapshot().output.iter().all(|&b| b == 0));
    }

    #[test]
    fn change_fires_listener_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = store();
        store.subscribe(0, "btn-node", recorder(&log, "a")).unwrap();

        assert_eq!(store.apply_input_frame(&[1, 0]).unwrap(), 1);
        assert_eq!(store.apply_input_frame(&[1, 0]).unwrap(), 0);

        assert_eq!(*log.lock().unwrap(), vec![("a".to_string(), 0, 1)]);
        assert_eq!(store.read_input(0).unwrap(), 1);
    }

    #[test]
    fn only_listeners_of_changed_index_fire() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = store();
        store.subscribe(0, "a", recorder(&log, "a")).unwrap();
        store.subscribe(1, "b", recorder(&log, "b")).unwrap();

        store.apply_input_frame(&[0, 200]).unwrap();

        assert_eq!(*log.lock().unwrap(), vec![("b".to_string(), 1, -56)]);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = store();
        store.subscribe(0, "first", recorder(&log, "first")).unwrap();
        store.subscribe(0, "second", recorder(&log, "second")).unwrap();
        store.subscribe(0, "first", recorder(&log, "first-again")).unwrap();

        store.apply_input_frame(&[5, 0]).unwrap();

        let tags: Vec<String> = log.lock().unwrap().iter().map(|e| e.0.clone()).collect();
        assert_eq!(tags, vec!["first-again", "second"]);
        assert_eq!(store.subscriber_count(0), 2);
    }

    #[test]
    fn event_carries_declared_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut store = store();
        store
            .subscribe(
                0,
                1u64,
                Arc::new(move |event: &InputEvent, _: &mut OutputWriter<'_>| {
                    sink.lock().unwrap().push(event.clone())
                }),
            )
            .unwrap();
        store
            .subscribe(
                1,
                1u64,
                Arc::new({
                    let sink = Arc::clone(&seen);
                    move |event: &InputEvent, _: &mut OutputWriter<'_>| {
                        sink.lock().unwrap().push(event.clone())
                    }
                }),
            )
            .unwrap();

        store.apply_input_frame(&[0xFF, 3]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].name.as_deref(), Some("btn"));
        assert_eq!(seen[0].value, -1);
        assert_eq!(seen[1].name, None);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut store = store();
        store.subscribe(0, "a", recorder(&log, "a")).unwrap();
        store.subscribe(1, "a", recorder(&log, "a")).unwrap();

        assert!(store.unsubscribe(0, &"a".into()));
        assert!(!store.unsubscribe(0, &"a".into()));
        assert!(!store.unsubscribe(9, &"a".into()));
        assert_eq!(store.unsubscribe_all(&"a".into()), 1);

        store.apply_input_frame(&[1, 1]).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_drives_output_from_input() {
        let mut store = store();
        store
            .subscribe(
                0,
                "mirror",
                Arc::new(|event: &InputEvent, writer: &mut OutputWriter<'_>| {
                    let led = writer.output_index("led").unwrap();
                    writer.write_output(led, event.value).unwrap();
                    writer.write_output(2, "on").unwrap();
                }),
            )
            .unwrap();

        store.apply_input_frame(&[7, 0]).unwrap();

        assert_eq!(store.read_output(0).unwrap(), &[7]);
        assert_eq!(store.read_output(2).unwrap(), b"on\0\0\0");
        assert_eq!(store.read_input(0).unwrap(), 7);
    }

    #[test]
    fn writer_reports_bad_output_to_listener() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let mut store = store();
        store
            .subscribe(
                1,
                "bad",
                Arc::new(move |_: &InputEvent, writer: &mut OutputWriter<'_>| {
                    sink.lock().unwrap().push(writer.write_output(9, 1).is_err());
                    assert_eq!(writer.output_index("missing"), None);
                }),
            )
            .unwrap();

        store.apply_input_frame(&[0, 1]).unwrap();

        assert_eq!(*errors.lock().unwrap(), vec![true]);
        assert!(store.output().iter().all(|&b| b == 0));
    }

    #[test]
    fn subscribe_out_of_range() {
        let mut store = store();
        let err = store
            .subscribe(2, "x", Arc::new(|_: &InputEvent, _: &mut OutputWriter<'_>| {}))
            .unwrap_err();
        assert!(matches!(err, StoreError::InputIndex { index: 2, len: 2 }));
    }

    #[test]
    fn short_payload_is_rejected_without_changes() {
        let mut store = store();
        let err = store.apply_input_frame(&[1]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ShortPayload {
                len: 1,
                expected: 2
            }
        ));
        assert_eq!(store.read_input(0).unwrap(), 0);
    }

    #[test]
    fn numeric_output_is_clamped() {
        let mut store = store();
        store.write_output(0, 300).unwrap();
        assert_eq!(store.read_output(0).unwrap(), &[255]);
        store.write_output(1, -10).unwrap();
        assert_eq!(store.read_output(1).unwrap(), &[0xF6]);
        store.write_output(0, "17").unwrap();
        assert_eq!(store.output()[0], 17);
    }

    #[test]
    fn numeric_output_rejects_text() {
        let mut store = store();
        let err = store.write_output(0, "bright").unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { index: 0, .. }));
    }

    #[test]
    fn text_output_truncates_with_terminator() {
        let mut store = store();
        store.write_output(2, "hello world").unwrap();
        assert_eq!(store.read_output(2).unwrap(), b"hell\0");
        assert_eq!(store.read_output(3).unwrap(), &[0]);
    }

    #[test]
    fn text_output_never_touches_neighbours() {
        let mut store = store();
        store.write_output(1, 9).unwrap();
        store.write_output(3, "x").unwrap();
        store.write_output(2, "abcdefgh").unwrap();
        assert_eq!(store.output(), &[0, 9, b'a', b'b', b'c', b'd', 0, 0]);
    }

    #[test]
    fn text_output_cuts_at_char_boundary() {
        let mut store = store();
        store.write_output(2, "abcé").unwrap();
        assert_eq!(store.read_output(2).unwrap(), b"abc\0\0");
    }

    #[test]
    fn text_output_accepts_numbers() {
        let mut store = store();
        store.write_output(2, 42).unwrap();
        assert_eq!(&store.read_output(2).unwrap()[..3], b"42\0");
    }

    #[test]
    fn output_index_out_of_range() {
        let mut store = store();
        let err = store.write_output(4, 1).unwrap_err();
        assert!(matches!(err, StoreError::OutputIndex { index: 4, len: 4 }));
        assert!(store.read_output(4).is_err());
        assert!(store.read_input(2).is_err());
    }
}
