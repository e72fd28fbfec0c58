use std::sync::Arc;
use std::thread;
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::index::registration::{IndexExtension, Registered, register};
use crate::storage::layout::StorageLayout;

enum InitState {
    Uninitialized { force_clean: bool },
    // Registration running on the thread that holds the runner lock
    Registering,
    Initializing(Receiver<Result<Registered>>),
    Ready(Arc<Registered>),
    Failed(String),
}

enum Pending {
    Run { force_clean: bool },
    Await(Receiver<Result<Registered>>),
}

/// Shared initialization state of the secondary indices.
///
/// Registration runs at most once. A background run hands its result over
/// through a one-shot channel. Whoever runs or awaits registration holds the
/// runner lock, never the state lock, so `try_get` and friends stay prompt;
/// other callers of `get` queue on the runner lock.
pub struct IndexInit {
    layout: StorageLayout,
    extensions: Arc<[Arc<dyn IndexExtension>]>,
    state: Mutex<InitState>,
    runner: Mutex<()>,
}

impl IndexInit {
    pub fn new(layout: StorageLayout, extensions: Vec<Arc<dyn IndexExtension>>, force_clean: bool) -> Self {
        IndexInit {
            layout,
            extensions: extensions.into(),
            state: Mutex::new(InitState::Uninitialized { force_clean }),
            runner: Mutex::new(()),
        }
    }

    /// Start registration on a worker thread; no-op once started
    pub fn start_background(&self) -> Result<()> {
        let mut state = self.state.lock();
        let InitState::Uninitialized { force_clean } = *state else {
            return Ok(());
        };

        let (tx, rx) = channel::bounded(1);
        let layout = self.layout.clone();
        let extensions = Arc::clone(&self.extensions);
        thread::Builder::new()
            .name("stub-index-registration".to_string())
            .spawn(move || {
                let _ = tx.send(register(&layout, &extensions, force_clean));
            })?;
        *state = InitState::Initializing(rx);
        Ok(())
    }

    /// Registered indices, running or waiting for registration as needed
    pub fn get(&self) -> Result<Arc<Registered>> {
        if let Some(done) = self.finished() {
            return done;
        }
        let _runner = self.runner.lock();

        let pending = {
            let mut state = self.state.lock();
            match &*state {
                InitState::Ready(registered) => return Ok(Arc::clone(registered)),
                InitState::Failed(reason) => {
                    return Err(Error::new(ErrorKind::InitializationFailed, reason.clone()));
                }
                InitState::Uninitialized { force_clean } => {
                    let pending = Pending::Run { force_clean: *force_clean };
                    *state = InitState::Registering;
                    pending
                }
                InitState::Initializing(rx) => Pending::Await(rx.clone()),
                InitState::Registering => {
                    return Err(Error::new(ErrorKind::InvalidState, "registration left unfinished".to_string()));
                }
            }
        };

        let outcome = match pending {
            Pending::Run { force_clean } => register(&self.layout, &self.extensions, force_clean),
            Pending::Await(rx) => rx.recv().unwrap_or_else(|_| Err(Error::new(
                ErrorKind::InitializationFailed,
                "registration thread exited without a result".to_string(),
            ))),
        };

        let mut state = self.state.lock();
        match outcome {
            Ok(registered) => {
                let registered = Arc::new(registered);
                *state = InitState::Ready(Arc::clone(&registered));
                Ok(registered)
            }
            Err(e) => {
                tracing::error!(error = %e, "secondary index registration failed");
                *state = InitState::Failed(e.to_string());
                Err(Error::new(ErrorKind::InitializationFailed, e.to_string()))
            }
        }
    }

    fn finished(&self) -> Option<Result<Arc<Registered>>> {
        match &*self.state.lock() {
            InitState::Ready(registered) => Some(Ok(Arc::clone(registered))),
            InitState::Failed(reason) => Some(Err(Error::new(ErrorKind::InitializationFailed, reason.clone()))),
            _ => None,
        }
    }

    /// Without blocking: the indices if registration has finished
    pub fn try_get(&self) -> Option<Arc<Registered>> {
        match &*self.state.lock() {
            InitState::Ready(registered) => Some(Arc::clone(registered)),
            _ => None,
        }
    }

    /// While nothing has started, switch to a clean registration and report
    /// true; false once registration is under way or done
    pub fn request_clean(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            InitState::Uninitialized { force_clean } => {
                *force_clean = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_started(&self) -> bool {
        !matches!(&*self.state.lock(), InitState::Uninitialized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::index::key::StubIndexKey;
    use crate::index::registration::IndexStatus;
    use crate::index::secondary::ErasedIndex;
    use crate::testing;

    /// Opens its index only after the test lets it
    struct Gated {
        key: StubIndexKey<String>,
        gate: Receiver<()>,
    }

    impl IndexExtension for Gated {
        fn name(&self) -> &str {
            self.key.name()
        }

        fn version(&self) -> u32 {
            self.key.version()
        }

        fn open(&self, layout: &StorageLayout) -> Result<Arc<dyn ErasedIndex>> {
            let _ = self.gate.recv();
            IndexExtension::open(&self.key, layout)
        }
    }

    fn gated(layout: StorageLayout) -> (Arc<IndexInit>, channel::Sender<()>) {
        let (open, gate) = channel::bounded(1);
        let extensions = vec![Arc::new(Gated { key: testing::class_names(), gate }) as Arc<dyn IndexExtension>];
        (Arc::new(IndexInit::new(layout, extensions, false)), open)
    }

    // Runs the non-blocking accessors on another thread and fails instead of
    // hanging when they wait for registration
    fn assert_prompt(init: &Arc<IndexInit>) {
        let (done, finished) = channel::bounded(1);
        let init = Arc::clone(init);
        thread::spawn(move || {
            let _ = done.send((init.try_get().is_none(), init.is_started(), init.request_clean()));
        });
        let (not_ready, started, clean) = finished.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(not_ready);
        assert!(started);
        assert!(!clean);
    }

    #[test]
    fn background_result_is_handed_to_every_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let init = Arc::new(IndexInit::new(layout, testing::keys(1), false));
        init.start_background().unwrap();
        assert!(init.is_started());
        assert!(!init.request_clean());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let init = Arc::clone(&init);
                thread::spawn(move || init.get().unwrap())
            })
            .collect();
        let results: Vec<Arc<Registered>> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert!(init.try_get().is_some());
    }

    #[test]
    fn clean_request_before_start_wipes_at_registration() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        drop(register(&layout, &testing::keys(1), false).unwrap());

        let init = IndexInit::new(layout, testing::keys(1), false);
        assert!(init.try_get().is_none());
        assert!(init.request_clean());
        let registered = init.get().unwrap();
        assert_eq!(registered.result.status(testing::CLASS_NAMES), Some(IndexStatus::InitiallyBuilt));
        assert!(!init.request_clean());
    }

    #[test]
    fn failure_is_sticky() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        std::fs::write(layout.registered_indices_path(), b"[").unwrap();

        let init = IndexInit::new(layout, testing::keys(1), false);
        assert_eq!(init.get().err().unwrap().kind, ErrorKind::InitializationFailed);
        assert_eq!(init.get().err().unwrap().kind, ErrorKind::InitializationFailed);
    }

    #[test]
    fn waiting_for_background_registration_leaves_state_readable() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let (init, open) = gated(layout);
        init.start_background().unwrap();

        let waiter = {
            let init = Arc::clone(&init);
            thread::spawn(move || init.get().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert_prompt(&init);

        open.send(()).unwrap();
        let registered = waiter.join().unwrap();
        assert!(Arc::ptr_eq(&registered, &init.try_get().unwrap()));
        assert!(Arc::ptr_eq(&registered, &init.get().unwrap()));
    }

    #[test]
    fn inline_registration_leaves_state_readable() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let (init, open) = gated(layout);

        let runner = {
            let init = Arc::clone(&init);
            thread::spawn(move || init.get().unwrap())
        };
        for _ in 0..500 {
            if init.is_started() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let second = {
            let init = Arc::clone(&init);
            thread::spawn(move || init.get().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        assert_prompt(&init);

        open.send(()).unwrap();
        let first = runner.join().unwrap();
        assert!(Arc::ptr_eq(&first, &second.join().unwrap()));
        assert_eq!(first.result.status(testing::CLASS_NAMES), Some(IndexStatus::InitiallyBuilt));
    }
}
