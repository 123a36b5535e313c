//! Session registry plus the single dispatcher task that fans jobs out.
//!
//! Lifecycle is `Stopped → Running → Stopping → Stopped`. Jobs travel over a
//! bounded channel; stopping drops the only sender, so the dispatcher drains
//! whatever was queued before the stop and then exits on its own.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::messages::Join;
use shared::{encode_packet, Visibility, REFUSAL_STOPPING};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RouterError;
use crate::outbound::Outbound;
use crate::registry::{Registry, SessionEntry};

/// Jobs that can wait for the dispatcher before new ones are dropped.
///
/// A dropped job is gone for good, including leave notices, so peers may
/// keep showing a player who left. Drops are counted in
/// [`Router::dropped_jobs`].
pub const JOB_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Stopped,
    Running,
    /// No new jobs are accepted; queued ones are still being delivered.
    Stopping,
}

/// One fan-out request.
///
/// The source's namespace and private group are captured when the job is
/// queued, so a job outlives its source session without widening its
/// audience.
#[derive(Debug, Clone)]
pub struct RouterJob {
    pub from_id: u16,
    /// Room hash for LOCAL, unused otherwise.
    pub to_id: u32,
    pub visibility: Visibility,
    pub data: Bytes,
    /// Deliver to the source as well.
    pub return_flag: bool,
    namespace: u32,
    crypt_hash: u32,
}

impl RouterJob {
    /// Whether `session` is in this job's audience.
    fn reaches(&self, session: &SessionEntry) -> bool {
        if session.id == self.from_id && !self.return_flag {
            return false;
        }
        if session.namespace != self.namespace {
            return false;
        }
        match self.visibility {
            Visibility::Local => session.room_hash == self.to_id,
            Visibility::Global => true,
            Visibility::Crypt => self.crypt_hash != 0 && session.crypt_hash == self.crypt_hash,
            Visibility::Null => false,
        }
    }
}

struct RouterShared {
    state: RouterState,
    registry: Registry,
    jobs: Option<mpsc::Sender<RouterJob>>,
    dropped_jobs: u64,
}

/// Cloneable handle to the router. All clones share one registry.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Mutex<RouterShared>>,
}

impl Router {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RouterShared {
                state: RouterState::Stopped,
                registry: Registry::new(max_sessions),
                jobs: None,
                dropped_jobs: 0,
            })),
        }
    }

    pub fn state(&self) -> RouterState {
        self.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RouterState::Running
    }

    /// Spawns the dispatcher. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<JoinHandle<()>, RouterError> {
        let mut shared = self.shared.lock();
        match shared.state {
            RouterState::Running => return Err(RouterError::AlreadyRunning),
            RouterState::Stopping => return Err(RouterError::Stopping),
            RouterState::Stopped => {}
        }
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        shared.jobs = Some(tx);
        shared.state = RouterState::Running;
        info!("router started");
        Ok(tokio::spawn(run_dispatcher(Arc::clone(&self.shared), rx)))
    }

    /// Stops accepting jobs and tells every session the server is going away.
    ///
    /// Jobs already queued are still delivered; the dispatcher closes all
    /// remaining sessions once the queue is empty.
    pub fn stop(&self) {
        let mut shared = self.shared.lock();
        if shared.state != RouterState::Running {
            return;
        }
        shared.state = RouterState::Stopping;
        let refusal = Bytes::from_static(REFUSAL_STOPPING.as_bytes());
        for session in shared.registry.iter() {
            session.outbound.send_alt(refusal.clone());
        }
        shared.jobs = None;
        info!("router stopping, {} sessions notified", shared.registry.len());
    }

    /// Registers a session, or refuses it when the registry is full.
    pub fn add_session(&self, outbound: Outbound) -> Result<u16, RouterError> {
        let mut shared = self.shared.lock();
        if shared.state == RouterState::Stopping {
            return Err(RouterError::Stopping);
        }
        let max = shared.registry.max_sessions();
        shared
            .registry
            .add_session(outbound)
            .ok_or(RouterError::Capacity { max })
    }

    pub fn remove_session(&self, id: u16) -> bool {
        self.shared.lock().registry.remove_session(id).is_some()
    }

    /// Runs `f` on a session's entry under the registry lock.
    pub fn update_session<R>(&self, id: u16, f: impl FnOnce(&mut SessionEntry) -> R) -> Option<R> {
        self.shared.lock().registry.get_mut(id).map(f)
    }

    pub fn session_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// Queues a fan-out job. Nothing is queued while the router is not
    /// running, or when the source session is unknown. Returns whether the
    /// job was queued.
    pub fn send_to(
        &self,
        from_id: u16,
        to_id: u32,
        visibility: Visibility,
        data: Bytes,
        return_flag: bool,
    ) -> bool {
        let mut shared = self.shared.lock();
        if shared.state != RouterState::Running {
            return false;
        }
        let (Some(jobs), Some(source)) = (shared.jobs.as_ref(), shared.registry.get(from_id)) else {
            return false;
        };

        let job = RouterJob {
            from_id,
            to_id,
            visibility,
            data,
            return_flag,
            namespace: source.namespace,
            crypt_hash: source.crypt_hash,
        };
        let result = jobs.try_send(job);
        match result {
            Ok(()) => true,
            Err(e) => {
                shared.dropped_jobs += 1;
                warn!(
                    "dropping job from session {} ({} dropped so far): {}",
                    from_id, shared.dropped_jobs, e
                );
                false
            }
        }
    }

    /// Jobs refused because the queue was full.
    pub fn dropped_jobs(&self) -> u64 {
        self.shared.lock().dropped_jobs
    }

    /// Join notice plus sticky state of every room-mate of `id`, for replay
    /// to `id` after it enters a room.
    pub fn room_snapshot(&self, id: u16) -> Result<Vec<Bytes>, RouterError> {
        let shared = self.shared.lock();
        let Some(me) = shared.registry.get(id) else {
            return Ok(Vec::new());
        };

        let mut frames = Vec::new();
        for peer in shared.registry.iter() {
            if peer.id == id || peer.room_hash != me.room_hash || peer.namespace != me.namespace {
                continue;
            }
            frames.push(encode_packet(Join { id: peer.id }, None)?);
            frames.extend(peer.sticky.replay());
        }
        Ok(frames)
    }
}

/// Delivers one job to its audience. Returns the number of sessions reached.
fn deliver(registry: &Registry, job: &RouterJob) -> usize {
    let mut delivered = 0;
    for session in registry.iter().filter(|s| job.reaches(s)) {
        let sent = if job.return_flag {
            session.outbound.send_alt(job.data.clone())
        } else {
            session.outbound.send(job.data.clone())
        };
        if sent {
            delivered += 1;
        } else {
            debug!("session {} is behind, dropped {} bytes", session.id, job.data.len());
        }
    }
    delivered
}

async fn run_dispatcher(shared: Arc<Mutex<RouterShared>>, mut jobs: mpsc::Receiver<RouterJob>) {
    while let Some(job) = jobs.recv().await {
        let guard = shared.lock();
        let delivered = deliver(&guard.registry, &job);
        debug!(
            "job from {} [{}] delivered to {} sessions",
            job.from_id,
            job.visibility.name(),
            delivered
        );
    }

    let mut guard = shared.lock();
    for session in guard.registry.iter() {
        session.outbound.close();
    }
    guard.state = RouterState::Stopped;
    info!("router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{OutboundReceiver, Outgoing};
    use shared::REFUSAL_FULL;
    use tokio_test::assert_ok;

    struct Peer {
        id: u16,
        rx: OutboundReceiver,
    }

    fn join(router: &Router, namespace: u32, room_hash: u32, crypt_hash: u32) -> Peer {
        let (outbound, rx) = Outbound::channel();
        let id = router.add_session(outbound).unwrap();
        router.update_session(id, |e| {
            e.namespace = namespace;
            e.room_hash = room_hash;
            e.crypt_hash = crypt_hash;
        });
        Peer { id, rx }
    }

    fn payload(tag: &'static str) -> Bytes {
        Bytes::from_static(tag.as_bytes())
    }

    #[tokio::test]
    async fn test_local_reaches_room_and_namespace_only() {
        let router = Router::new(10);
        let handle = router.start().unwrap();
        let mut a = join(&router, 1, 42, 0);
        let mut b = join(&router, 1, 42, 0);
        let mut other_room = join(&router, 1, 43, 0);
        let mut other_ns = join(&router, 2, 42, 0);

        assert!(router.send_to(a.id, 42, Visibility::Local, payload("move"), false));
        router.stop();
        handle.await.unwrap();

        assert_eq!(b.rx.drain_data(), vec![payload(REFUSAL_STOPPING), payload("move")]);
        assert_eq!(a.rx.drain_data(), vec![payload(REFUSAL_STOPPING)]);
        assert_eq!(other_room.rx.drain_data(), vec![payload(REFUSAL_STOPPING)]);
        assert_eq!(other_ns.rx.drain_data(), vec![payload(REFUSAL_STOPPING)]);
    }

    #[tokio::test]
    async fn test_loopback_includes_source() {
        let router = Router::new(10);
        let handle = router.start().unwrap();
        let mut a = join(&router, 1, 42, 0);
        let mut b = join(&router, 1, 7, 0);

        router.send_to(a.id, 42, Visibility::Local, payload("chat"), true);
        router.send_to(a.id, 0, Visibility::Global, payload("hello"), true);
        router.stop();
        handle.await.unwrap();

        assert_eq!(&a.rx.drain_data()[1..], &[payload("chat"), payload("hello")]);
        assert_eq!(&b.rx.drain_data()[1..], &[payload("hello")]);
    }

    #[tokio::test]
    async fn test_crypt_requires_matching_nonzero_group() {
        let router = Router::new(10);
        let handle = router.start().unwrap();
        let mut c = join(&router, 1, 1, 777);
        let mut same = join(&router, 1, 2, 777);
        let mut other = join(&router, 1, 1, 778);
        let mut none = join(&router, 1, 1, 0);
        let mut none_sender = join(&router, 1, 1, 0);

        router.send_to(c.id, 0, Visibility::Crypt, payload("hi"), true);
        router.send_to(none_sender.id, 0, Visibility::Crypt, payload("lost"), true);
        router.stop();
        handle.await.unwrap();

        assert_eq!(c.rx.drain_data().len(), 2);
        assert_eq!(&same.rx.drain_data()[1..], &[payload("hi")]);
        assert_eq!(other.rx.drain_data().len(), 1);
        assert_eq!(none.rx.drain_data().len(), 1);
        assert_eq!(none_sender.rx.drain_data().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_jobs_then_closes() {
        let router = Router::new(10);
        let handle = router.start().unwrap();
        let a = join(&router, 1, 42, 0);
        let mut b = join(&router, 1, 42, 0);

        for tag in ["j1", "j2", "j3"] {
            assert!(router.send_to(a.id, 42, Visibility::Local, payload(tag), false));
        }
        router.stop();
        assert_eq!(router.state(), RouterState::Stopping);
        assert!(!router.send_to(a.id, 42, Visibility::Local, payload("late"), false));

        handle.await.unwrap();
        assert_eq!(router.state(), RouterState::Stopped);
        assert_eq!(
            b.rx.drain_data(),
            vec![payload(REFUSAL_STOPPING), payload("j1"), payload("j2"), payload("j3")]
        );
        assert_eq!(b.rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_send_to_is_noop_when_stopped() {
        let router = Router::new(10);
        let mut a = join(&router, 1, 42, 0);
        assert!(!router.send_to(a.id, 42, Visibility::Local, payload("x"), true));
        assert_eq!(a.rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_unknown_source_is_ignored() {
        let router = Router::new(10);
        let handle = router.start().unwrap();
        assert!(!router.send_to(999, 0, Visibility::Global, payload("x"), false));
        router.stop();
        handle.await.unwrap();
    }

    #[test]
    fn test_capacity_refuses_without_creating_session() {
        let router = Router::new(100);
        for _ in 0..100 {
            let (outbound, _rx) = Outbound::channel();
            router.add_session(outbound).unwrap();
        }
        let (outbound, _rx) = Outbound::channel();
        assert!(matches!(
            router.add_session(outbound),
            Err(RouterError::Capacity { max: 100 })
        ));
        assert_eq!(router.session_count(), 100);
        assert_ne!(REFUSAL_FULL, REFUSAL_STOPPING);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let router = Router::new(1);
        let handle = assert_ok!(router.start());
        assert!(matches!(router.start(), Err(RouterError::AlreadyRunning)));
        router.stop();
        assert_ok!(handle.await);
        let handle = assert_ok!(router.start());
        router.stop();
        assert_ok!(handle.await);
    }

    #[test]
    fn test_room_snapshot_replays_room_mates() {
        let router = Router::new(10);
        let (me_out, _me_rx) = Outbound::channel();
        let me = router.add_session(me_out).unwrap();
        let mate = join(&router, 5, 42, 0);
        let stranger = join(&router, 6, 42, 0);
        router.update_session(me, |e| {
            e.namespace = 5;
            e.room_hash = 42;
        });
        router.update_session(mate.id, |e| e.sticky.position = Some(payload("pos")));
        router.update_session(stranger.id, |e| e.sticky.position = Some(payload("nope")));

        let frames = router.room_snapshot(me).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], encode_packet(Join { id: mate.id }, None).unwrap());
        assert_eq!(frames[1], payload("pos"));
    }

    #[tokio::test]
    async fn test_dispatcher_closes_sessions_on_exit() {
        let router = Router::new(2);
        let handle = router.start().unwrap();
        let mut a = join(&router, 1, 1, 0);
        router.stop();
        handle.await.unwrap();
        assert_eq!(a.rx.try_recv(), Some(Outgoing::Data(payload(REFUSAL_STOPPING))));
        assert_eq!(a.rx.try_recv(), Some(Outgoing::Close));
    }

    #[tokio::test]
    async fn test_full_job_queue_counts_drops() {
        let router = Router::new(2);
        let handle = assert_ok!(router.start());
        let mut a = join(&router, 1, 1, 0);
        let _b = join(&router, 1, 1, 0);

        // The dispatcher has not been polled yet, so nothing drains the queue.
        for _ in 0..JOB_QUEUE_CAPACITY {
            assert!(router.send_to(a.id, 1, Visibility::Local, payload("x"), false));
        }
        assert!(!router.send_to(a.id, 1, Visibility::Local, payload("x"), false));
        assert!(!router.send_to(a.id, 1, Visibility::Local, payload("x"), false));
        assert_eq!(router.dropped_jobs(), 2);

        router.stop();
        assert_ok!(handle.await);
        assert_eq!(router.dropped_jobs(), 2);
        assert_eq!(a.rx.drain_data(), vec![payload(REFUSAL_STOPPING)]);
    }
}
