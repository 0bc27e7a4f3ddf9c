//! Guarded audio device state.
//!
//! ```text
//! stopped --start(active)--> active
//! stopped --start(idle)----> idle
//! active/idle --update_active_or_idle--> active/idle
//! active/idle --suspend--> suspended --resume--> active/idle
//! active/idle/suspended --stop(error, drain)--> stopped
//! ```
//!
//! The whole `(state, error, suspended-in, draining)` tuple lives in one
//! atomic word, so transitions from the audio thread and the application
//! thread never lose updates. A rejected transition returns `None` and
//! leaves everything untouched.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioState {
    Stopped,
    Idle,
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioError {
    NoError,
    OpenError,
    IoError,
    UnderrunError,
    FatalError,
}

/// Running sub-state requested by `start` and `update_active_or_idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunningState {
    Active,
    Idle,
}

impl RunningState {
    fn audio_state(self) -> AudioState {
        match self {
            Self::Active => AudioState::Active,
            Self::Idle => AudioState::Idle,
        }
    }
}

/// Receives change notifications from an `AudioStateMachine`.
pub trait AudioStateListener: Send + Sync {
    fn state_changed(&self, state: AudioState);
    fn error_changed(&self, error: AudioError);
}

const STATE_MASK: u32 = 0xf;
const ERROR_SHIFT: u32 = 4;
const SUSPENDED_SHIFT: u32 = 8;
const DRAINING_BIT: u32 = 1 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    state: AudioState,
    error: AudioError,
    suspended_in: AudioState,
    draining: bool,
}

impl Snapshot {
    fn pack(self) -> u32 {
        let mut word = state_bits(self.state)
            | (error_bits(self.error) << ERROR_SHIFT)
            | (state_bits(self.suspended_in) << SUSPENDED_SHIFT);
        if self.draining {
            word |= DRAINING_BIT;
        }
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            state: state_from_bits(word & STATE_MASK),
            error: error_from_bits((word >> ERROR_SHIFT) & 0xf),
            suspended_in: state_from_bits((word >> SUSPENDED_SHIFT) & STATE_MASK),
            draining: word & DRAINING_BIT != 0,
        }
    }
}

fn state_bits(state: AudioState) -> u32 {
    match state {
        AudioState::Stopped => 0,
        AudioState::Idle => 1,
        AudioState::Active => 2,
        AudioState::Suspended => 3,
    }
}

fn state_from_bits(bits: u32) -> AudioState {
    match bits {
        1 => AudioState::Idle,
        2 => AudioState::Active,
        3 => AudioState::Suspended,
        _ => AudioState::Stopped,
    }
}

fn error_bits(error: AudioError) -> u32 {
    match error {
        AudioError::NoError => 0,
        AudioError::OpenError => 1,
        AudioError::IoError => 2,
        AudioError::UnderrunError => 3,
        AudioError::FatalError => 4,
    }
}

fn error_from_bits(bits: u32) -> AudioError {
    match bits {
        1 => AudioError::OpenError,
        2 => AudioError::IoError,
        3 => AudioError::UnderrunError,
        4 => AudioError::FatalError,
        _ => AudioError::NoError,
    }
}

/// Thread-safe audio state machine with a drain protocol.
pub struct AudioStateMachine {
    word: AtomicU32,
    listener: Option<Weak<dyn AudioStateListener>>,
    drain_lock: Mutex<()>,
    drained: Condvar,
}

impl AudioStateMachine {
    pub fn new() -> Self {
        Self {
            word: AtomicU32::new(
                Snapshot {
                    state: AudioState::Stopped,
                    error: AudioError::NoError,
                    suspended_in: AudioState::Stopped,
                    draining: false,
                }
                .pack(),
            ),
            listener: None,
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Creates a machine reporting to `listener`.
    ///
    /// Only a weak reference is kept: once the listener is dropped,
    /// notifications stop, including between the state and error
    /// notification of a single transition.
    pub fn with_listener<L: AudioStateListener + 'static>(listener: &Arc<L>) -> Self {
        let listener: Arc<dyn AudioStateListener> = listener.clone();
        Self {
            listener: Some(Arc::downgrade(&listener)),
            ..Self::new()
        }
    }

    fn load(&self) -> Snapshot {
        Snapshot::unpack(self.word.load(Ordering::SeqCst))
    }

    pub fn state(&self) -> AudioState {
        self.load().state
    }

    pub fn error(&self) -> AudioError {
        self.load().error
    }

    pub fn is_draining(&self) -> bool {
        self.load().draining
    }

    pub fn is_active_or_idle(&self) -> bool {
        matches!(self.state(), AudioState::Active | AudioState::Idle)
    }

    /// Starts from `Stopped` into `running`, clearing the error.
    pub fn start(&self, running: RunningState) -> Option<StateChangeNotifier<'_>> {
        self.transition(|s| {
            (s.state == AudioState::Stopped).then_some(Snapshot {
                state: running.audio_state(),
                error: AudioError::NoError,
                ..s
            })
        })
    }

    /// Stops from any non-stopped state, recording `error`.
    ///
    /// With `drain`, an active machine enters draining until `on_drained`.
    pub fn stop(&self, error: AudioError, drain: bool) -> Option<StateChangeNotifier<'_>> {
        self.transition(|s| {
            (s.state != AudioState::Stopped).then_some(Snapshot {
                state: AudioState::Stopped,
                error,
                draining: drain && s.state == AudioState::Active,
                ..s
            })
        })
    }

    /// Failure path for producers and consumers: stops a running machine
    /// with `error`, or only records `error` when already stopped.
    ///
    /// Returns true if the machine was stopped by this call.
    pub fn stop_or_update_error(&self, error: AudioError) -> bool {
        if self.stop(error, false).is_some() {
            return true;
        }
        self.set_error(error);
        false
    }

    /// Suspends an active or idle machine, remembering where it was.
    pub fn suspend(&self) -> Option<StateChangeNotifier<'_>> {
        self.transition(|s| {
            matches!(s.state, AudioState::Active | AudioState::Idle).then_some(Snapshot {
                state: AudioState::Suspended,
                error: AudioError::NoError,
                suspended_in: s.state,
                ..s
            })
        })
    }

    /// Resumes into the state saved by `suspend`.
    pub fn resume(&self) -> Option<StateChangeNotifier<'_>> {
        self.transition(|s| {
            (s.state == AudioState::Suspended).then_some(Snapshot {
                state: s.suspended_in,
                error: AudioError::NoError,
                suspended_in: AudioState::Stopped,
                ..s
            })
        })
    }

    /// Switches between active and idle, setting `error`.
    pub fn update_active_or_idle(
        &self,
        running: RunningState,
        error: AudioError,
    ) -> Option<StateChangeNotifier<'_>> {
        self.transition(|s| {
            matches!(s.state, AudioState::Active | AudioState::Idle).then_some(Snapshot {
                state: running.audio_state(),
                error,
                ..s
            })
        })
    }

    /// Sets the error without touching the state. Notifies immediately.
    pub fn set_error(&self, error: AudioError) -> bool {
        let mut current = self.word.load(Ordering::SeqCst);
        loop {
            let snapshot = Snapshot::unpack(current);
            if snapshot.error == error {
                return false;
            }
            let next = Snapshot { error, ..snapshot }.pack();
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Some(listener) = self.listener() {
            listener.error_changed(error);
        }
        true
    }

    /// Ends draining. Fails if no drain is in progress. Emits nothing.
    pub fn on_drained(&self) -> bool {
        let previous = self.word.fetch_and(!DRAINING_BIT, Ordering::SeqCst);
        if previous & DRAINING_BIT == 0 {
            return false;
        }
        let _guard = self.drain_lock.lock();
        self.drained.notify_all();
        true
    }

    /// Blocks until draining ends or `timeout` elapses.
    ///
    /// Returns whether the machine is no longer draining.
    pub fn wait_for_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.drain_lock.lock();
        while self.is_draining() {
            if self.drained.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_draining();
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn force_set_state(&self, state: AudioState, error: AudioError) {
        let snapshot = Snapshot {
            state,
            error,
            suspended_in: AudioState::Stopped,
            draining: false,
        };
        self.word.store(snapshot.pack(), Ordering::SeqCst);
    }

    fn listener(&self) -> Option<Arc<dyn AudioStateListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }

    fn transition<F>(&self, next: F) -> Option<StateChangeNotifier<'_>>
    where
        F: Fn(Snapshot) -> Option<Snapshot>,
    {
        let mut current = self.word.load(Ordering::SeqCst);
        loop {
            let prev = Snapshot::unpack(current);
            if prev.draining {
                return None;
            }
            let target = next(prev)?;
            match self.word.compare_exchange_weak(
                current,
                target.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(StateChangeNotifier {
                        machine: self,
                        prev_state: prev.state,
                        state: target.state,
                        prev_error: prev.error,
                        error: target.error,
                        draining: target.draining,
                        pending: true,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AudioStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Deferred notification of an applied transition.
///
/// The new state is visible as soon as the transition succeeds; listeners
/// hear about it when the notifier is reset or dropped, exactly once.
#[must_use = "dropping the notifier fires the notification immediately"]
pub struct StateChangeNotifier<'a> {
    machine: &'a AudioStateMachine,
    prev_state: AudioState,
    state: AudioState,
    prev_error: AudioError,
    error: AudioError,
    draining: bool,
    pending: bool,
}

impl StateChangeNotifier<'_> {
    pub fn is_state_changed(&self) -> bool {
        self.prev_state != self.state
    }

    pub fn audio_state(&self) -> AudioState {
        self.state
    }

    pub fn prev_audio_state(&self) -> AudioState {
        self.prev_state
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Fires the pending notifications now.
    pub fn reset(&mut self) {
        if !std::mem::take(&mut self.pending) {
            return;
        }
        if self.state != self.prev_state {
            if let Some(listener) = self.machine.listener() {
                listener.state_changed(self.state);
            }
        }
        if self.error != self.prev_error {
            // re-upgrade: the state handler may have dropped the listener
            if let Some(listener) = self.machine.listener() {
                listener.error_changed(self.error);
            }
        }
    }
}

impl Drop for StateChangeNotifier<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}
