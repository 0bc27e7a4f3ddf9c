//! Shared audio/video resource arbitration.
//!
//! Every client of a `ResourcePolicy` shares one resource set. The first
//! `acquire` asks the arbiter; later clients piggyback on a pending or
//! granted set. The set is released once no client holds it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub type ClientId = u64;

/// Notification delivered on a client's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    Granted,
    Denied,
    Lost,
}

/// Answer of an arbiter to an acquire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
    /// Decided later through `ResourcePolicy::resources_granted` or
    /// `resources_denied`.
    Pending,
}

/// The system-side resource manager.
pub trait ResourceArbiter: Send + Sync {
    fn acquire(&self, video: bool) -> Decision;

    fn release(&self);

    /// Called when the video resource is added to or dropped from the set.
    fn update(&self, _video: bool) {}
}

/// Grants everything immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalArbiter;

impl ResourceArbiter for LocalArbiter {
    fn acquire(&self, _video: bool) -> Decision {
        Decision::Granted
    }

    fn release(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Initial,
    Requested,
    Granted,
}

struct ClientEntry {
    status: Status,
    video: bool,
    events: Sender<ResourceEvent>,
}

struct PolicyState {
    status: Status,
    acquired: usize,
    video: usize,
    next_id: ClientId,
    clients: BTreeMap<ClientId, ClientEntry>,
}

struct PolicyInner {
    arbiter: Box<dyn ResourceArbiter>,
    state: Mutex<PolicyState>,
}

/// Injectable resource policy service. Clones share the same resource set.
#[derive(Clone)]
pub struct ResourcePolicy {
    inner: Arc<PolicyInner>,
}

impl ResourcePolicy {
    pub fn new(arbiter: impl ResourceArbiter + 'static) -> Self {
        Self {
            inner: Arc::new(PolicyInner {
                arbiter: Box::new(arbiter),
                state: Mutex::new(PolicyState {
                    status: Status::Initial,
                    acquired: 0,
                    video: 0,
                    next_id: 0,
                    clients: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn local() -> Self {
        Self::new(LocalArbiter)
    }

    pub fn register(&self) -> ResourceClient {
        let (tx, rx) = unbounded();
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.clients.insert(
            id,
            ClientEntry {
                status: Status::Initial,
                video: false,
                events: tx,
            },
        );
        log::debug!("resource client {} registered", id);
        ResourceClient {
            id,
            policy: self.clone(),
            events: rx,
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.state.lock().clients.len()
    }

    /// Number of clients currently holding the granted set.
    pub fn acquired_count(&self) -> usize {
        self.inner.state.lock().acquired
    }

    /// Arbiter callback: the pending request was granted.
    pub fn resources_granted(&self) {
        let mut state = self.inner.state.lock();
        state.status = Status::Granted;
        let mut granted = 0;
        for (id, entry) in state.clients.iter_mut() {
            if entry.status == Status::Requested {
                entry.status = Status::Granted;
                granted += 1;
                log::debug!("resource client {} granted", id);
                let _ = entry.events.send(ResourceEvent::Granted);
            }
        }
        state.acquired += granted;
    }

    /// Arbiter callback: the pending request was denied.
    pub fn resources_denied(&self) {
        let mut state = self.inner.state.lock();
        state.status = Status::Initial;
        state.acquired = 0;
        for (id, entry) in state.clients.iter_mut() {
            if entry.status == Status::Requested {
                entry.status = Status::Initial;
                log::debug!("resource client {} denied", id);
                let _ = entry.events.send(ResourceEvent::Denied);
            }
        }
    }

    /// Arbiter callback: the manager took the resources back.
    pub fn resources_lost(&self) {
        {
            let mut state = self.inner.state.lock();
            state.status = Status::Initial;
            state.acquired = 0;
            for (id, entry) in state.clients.iter_mut() {
                if entry.status != Status::Initial {
                    entry.status = Status::Initial;
                    log::info!("resource client {} lost its resources", id);
                    let _ = entry.events.send(ResourceEvent::Lost);
                }
            }
        }
        self.inner.arbiter.release();
    }

    fn acquire(&self, id: ClientId) {
        let video = {
            let mut state = self.inner.state.lock();
            let set_status = state.status;
            let Some(entry) = state.clients.get_mut(&id) else {
                return;
            };
            match (entry.status, set_status) {
                (Status::Initial, Status::Requested) => {
                    entry.status = Status::Requested;
                    return;
                }
                (Status::Initial, Status::Granted) => {
                    entry.status = Status::Granted;
                    let _ = entry.events.send(ResourceEvent::Granted);
                    state.acquired += 1;
                    return;
                }
                (Status::Initial, Status::Initial) => {
                    entry.status = Status::Requested;
                }
                _ => return,
            }
            state.status = Status::Requested;
            state.video > 0
        };

        log::debug!("resource client {} asks the arbiter", id);
        match self.inner.arbiter.acquire(video) {
            Decision::Granted => self.resources_granted(),
            Decision::Denied => self.resources_denied(),
            Decision::Pending => {}
        }
    }

    fn release(&self, id: ClientId) {
        let release_set = {
            let mut state = self.inner.state.lock();
            let mut was_granted = false;
            if let Some(entry) = state.clients.get_mut(&id) {
                if entry.status == Status::Granted {
                    entry.status = Status::Initial;
                    was_granted = true;
                }
            }
            if was_granted {
                state.acquired = state.acquired.saturating_sub(1);
            }
            Self::settle_if_unused(&mut state)
        };
        if release_set {
            self.inner.arbiter.release();
        }
    }

    fn unregister(&self, id: ClientId) {
        let (release_set, drop_video) = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.clients.remove(&id) else {
                return;
            };
            if entry.status == Status::Granted {
                state.acquired = state.acquired.saturating_sub(1);
            }
            let mut drop_video = false;
            if entry.video {
                state.video = state.video.saturating_sub(1);
                drop_video = state.video == 0;
            }
            (Self::settle_if_unused(&mut state), drop_video)
        };
        log::debug!("resource client {} unregistered", id);
        if drop_video {
            self.inner.arbiter.update(false);
        }
        if release_set {
            self.inner.arbiter.release();
        }
    }

    /// Returns true when the set should be released.
    fn settle_if_unused(state: &mut PolicyState) -> bool {
        if state.acquired == 0 && state.status == Status::Granted {
            state.status = Status::Initial;
            return true;
        }
        false
    }

    fn set_video_enabled(&self, id: ClientId, enabled: bool) {
        let update = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.clients.get_mut(&id) else {
                return;
            };
            if entry.video == enabled {
                return;
            }
            entry.video = enabled;
            if enabled {
                state.video += 1;
                state.video == 1
            } else {
                state.video = state.video.saturating_sub(1);
                state.video == 0
            }
        };
        if update {
            self.inner.arbiter.update(enabled);
        }
    }

    fn status_of(&self, id: ClientId) -> Option<Status> {
        self.inner.state.lock().clients.get(&id).map(|e| e.status)
    }
}

/// One registered user of a `ResourcePolicy`. Unregisters on drop.
pub struct ResourceClient {
    id: ClientId,
    policy: ResourcePolicy,
    events: Receiver<ResourceEvent>,
}

impl ResourceClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn acquire(&self) {
        self.policy.acquire(self.id);
    }

    pub fn release(&self) {
        self.policy.release(self.id);
    }

    pub fn is_granted(&self) -> bool {
        self.policy.status_of(self.id) == Some(Status::Granted)
    }

    pub fn is_requested(&self) -> bool {
        self.policy.status_of(self.id) == Some(Status::Requested)
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.policy.set_video_enabled(self.id, enabled);
    }

    pub fn events(&self) -> &Receiver<ResourceEvent> {
        &self.events
    }
}

impl Drop for ResourceClient {
    fn drop(&mut self) {
        self.policy.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Leaves every request pending and counts calls.
    #[derive(Default)]
    struct DeferredArbiter {
        acquires: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl ResourceArbiter for DeferredArbiter {
        fn acquire(&self, _video: bool) -> Decision {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Decision::Pending
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DenyingArbiter;

    impl ResourceArbiter for DenyingArbiter {
        fn acquire(&self, _video: bool) -> Decision {
            Decision::Denied
        }

        fn release(&self) {}
    }

    #[test]
    fn local_arbiter_grants_immediately() {
        let policy = ResourcePolicy::local();
        let client = policy.register();
        client.acquire();
        assert!(client.is_granted());
        assert_eq!(client.events().try_recv(), Ok(ResourceEvent::Granted));
        assert_eq!(policy.acquired_count(), 1);

        client.release();
        assert!(!client.is_granted());
        assert_eq!(policy.acquired_count(), 0);
    }

    #[test]
    fn pending_request_is_shared_between_clients() {
        let arbiter = DeferredArbiter::default();
        let acquires = Arc::clone(&arbiter.acquires);
        let policy = ResourcePolicy::new(arbiter);
        let first = policy.register();
        let second = policy.register();

        first.acquire();
        second.acquire();
        assert_eq!(acquires.load(Ordering::SeqCst), 1);
        assert!(first.is_requested() && second.is_requested());

        policy.resources_granted();
        assert!(first.is_granted() && second.is_granted());
        assert_eq!(first.events().try_recv(), Ok(ResourceEvent::Granted));
        assert_eq!(second.events().try_recv(), Ok(ResourceEvent::Granted));
        assert_eq!(policy.acquired_count(), 2);
    }

    #[test]
    fn late_client_joins_a_granted_set() {
        let policy = ResourcePolicy::local();
        let first = policy.register();
        first.acquire();
        let second = policy.register();
        second.acquire();
        assert!(second.is_granted());
        assert_eq!(policy.acquired_count(), 2);
    }

    #[test]
    fn denial_reaches_requesting_clients() {
        let policy = ResourcePolicy::new(DenyingArbiter);
        let client = policy.register();
        client.acquire();
        assert!(!client.is_granted());
        assert!(!client.is_requested());
        assert_eq!(client.events().try_recv(), Ok(ResourceEvent::Denied));
    }

    #[test]
    fn loss_resets_every_holder() {
        let arbiter = DeferredArbiter::default();
        let releases = Arc::clone(&arbiter.releases);
        let policy = ResourcePolicy::new(arbiter);
        let client = policy.register();
        client.acquire();
        policy.resources_granted();
        let _ = client.events().try_recv();

        policy.resources_lost();
        assert!(!client.is_granted());
        assert_eq!(client.events().try_recv(), Ok(ResourceEvent::Lost));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_holder_dropping_releases_the_set() {
        let arbiter = DeferredArbiter::default();
        let releases = Arc::clone(&arbiter.releases);
        let policy = ResourcePolicy::new(arbiter);
        let a = policy.register();
        let b = policy.register();
        a.acquire();
        b.acquire();
        policy.resources_granted();

        drop(a);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(policy.client_count(), 0);
    }
}
