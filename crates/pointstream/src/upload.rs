//! Host-to-device transfer plumbing shared by batches and GPU backends.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Where a batch's data lives relative to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum UploadState {
    /// No points loaded yet.
    #[default]
    Empty,
    /// Host data newer than the device copy; waiting for an upload slot.
    PendingUpload,
    /// Transfer submitted, completion not yet observed.
    InFlight,
    /// Device copy matches the host data.
    OnDevice,
}

/// The four per-point channels of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Coarse,
    Medium,
    Fine,
    Color,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Self::Coarse, Self::Medium, Self::Fine, Self::Color];

    pub fn label(self) -> &'static str {
        match self {
            Self::Coarse => "coarse",
            Self::Medium => "medium",
            Self::Fine => "fine",
            Self::Color => "color",
        }
    }
}

/// One value per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChannelSet<T> {
    pub coarse: T,
    pub medium: T,
    pub fine: T,
    pub color: T,
}

impl<T> ChannelSet<T> {
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self {
            coarse: f(Channel::Coarse),
            medium: f(Channel::Medium),
            fine: f(Channel::Fine),
            color: f(Channel::Color),
        }
    }

    pub fn get(&self, channel: Channel) -> &T {
        match channel {
            Channel::Coarse => &self.coarse,
            Channel::Medium => &self.medium,
            Channel::Fine => &self.fine,
            Channel::Color => &self.color,
        }
    }

    pub fn each_ref(&self) -> ChannelSet<&T> {
        ChannelSet {
            coarse: &self.coarse,
            medium: &self.medium,
            fine: &self.fine,
            color: &self.color,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ChannelSet<U> {
        ChannelSet {
            coarse: f(self.coarse),
            medium: f(self.medium),
            fine: f(self.fine),
            color: f(self.color),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

const SIGNAL_PENDING: u8 = 0;
const SIGNAL_DONE: u8 = 1;
const SIGNAL_FAILED: u8 = 2;

/// Observed state of an [`UploadSignal`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    Done,
    Failed(String),
}

/// Completion flag for one submitted transfer.
///
/// The backend flips it from whatever thread the driver calls back on; the
/// update loop only reads it. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct UploadSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    state: AtomicU8,
    error: Mutex<Option<String>>,
}

impl UploadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        let _ = self.inner.state.compare_exchange(
            SIGNAL_PENDING,
            SIGNAL_DONE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn fail(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.inner.error.lock() {
            slot.get_or_insert_with(|| message.into());
        }
        let _ = self.inner.state.compare_exchange(
            SIGNAL_PENDING,
            SIGNAL_FAILED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn state(&self) -> SignalState {
        match self.inner.state.load(Ordering::Acquire) {
            SIGNAL_DONE => SignalState::Done,
            SIGNAL_FAILED => {
                let message = self
                    .inner
                    .error
                    .lock()
                    .ok()
                    .and_then(|slot| slot.clone())
                    .unwrap_or_else(|| "unknown transfer error".to_string());
                SignalState::Failed(message)
            }
            _ => SignalState::Pending,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == SIGNAL_PENDING
    }
}

/// Device side of the transfer: buffer creation plus asynchronous writes.
pub trait TransferQueue {
    type Buffer;

    /// Creates one device buffer able to hold `byte_len` bytes of channel data.
    fn create_channel_buffer(&self, label: &str, byte_len: u64) -> Self::Buffer;

    /// Writes every `src` slice at offset 0 of the matching `dst` buffer and
    /// resolves `signal` once the device has consumed the writes.
    /// Must not block on completion.
    fn upload_channels(&self, dst: &ChannelSet<Self::Buffer>, src: ChannelSet<&[u32]>, signal: UploadSignal);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug)]
    pub struct MockBuffer {
        pub label: String,
        pub byte_len: u64,
    }

    /// Records every transfer; completes them immediately or on demand.
    #[derive(Default)]
    pub struct MockQueue {
        pub auto_complete: bool,
        pub created: RefCell<Vec<String>>,
        /// `(coarse buffer label, points written)` per upload.
        pub submits: RefCell<Vec<(String, usize)>>,
        pub signals: RefCell<Vec<UploadSignal>>,
    }

    impl MockQueue {
        pub fn resolving() -> Self {
            Self {
                auto_complete: true,
                ..Default::default()
            }
        }

        /// Never resolves unless told to.
        pub fn stalled() -> Self {
            Self::default()
        }

        pub fn complete_all(&self) {
            for signal in self.signals.borrow().iter() {
                signal.complete();
            }
        }

        pub fn fail_all(&self, message: &str) {
            for signal in self.signals.borrow().iter() {
                signal.fail(message);
            }
        }

        pub fn submit_count(&self) -> usize {
            self.submits.borrow().len()
        }
    }

    impl TransferQueue for MockQueue {
        type Buffer = MockBuffer;

        fn create_channel_buffer(&self, label: &str, byte_len: u64) -> MockBuffer {
            self.created.borrow_mut().push(label.to_string());
            MockBuffer {
                label: label.to_string(),
                byte_len,
            }
        }

        fn upload_channels(&self, dst: &ChannelSet<MockBuffer>, src: ChannelSet<&[u32]>, signal: UploadSignal) {
            for (channel, data) in src.iter() {
                assert!(data.len() as u64 * 4 <= dst.get(channel).byte_len);
                assert_eq!(data.len(), src.coarse.len());
            }
            self.submits
                .borrow_mut()
                .push((dst.coarse.label.clone(), src.coarse.len()));

            if self.auto_complete {
                signal.complete();
            }
            self.signals.borrow_mut().push(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_resolves_once() {
        let signal = UploadSignal::new();
        let observer = signal.clone();
        assert!(observer.is_pending());

        signal.complete();
        signal.fail("too late");
        assert_eq!(observer.state(), SignalState::Done);
    }

    #[test]
    fn failed_signal_keeps_first_message() {
        let signal = UploadSignal::new();
        signal.fail("device lost");
        signal.fail("second");
        assert_eq!(signal.state(), SignalState::Failed("device lost".into()));
    }

    #[test]
    fn completion_from_another_thread() {
        let signal = UploadSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.complete()).join().unwrap();
        assert_eq!(signal.state(), SignalState::Done);
    }

    #[test]
    fn channel_set_visits_in_order() {
        let set = ChannelSet::from_fn(|c| c.label().len());
        let labels: Vec<_> = set.iter().map(|(c, _)| c.label()).collect();
        assert_eq!(labels, ["coarse", "medium", "fine", "color"]);
        assert_eq!(*set.get(Channel::Color), 5);
    }
}
