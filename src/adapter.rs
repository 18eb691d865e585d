//! Network adapters shared by capture handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::Backend;
use crate::error::{RawcapError, Result};

/// Most handles that may be open on one adapter at a time.
pub const HANDLES_PER_ADAPTER_MAX: usize = 5;

// Handle ids double as buffer lock owners, so they are unique process-wide.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct AdapterState {
    open_handles: usize,
    promiscuous_refs: usize,
}

struct AdapterInner {
    backend: Arc<dyn Backend>,
    state: Mutex<AdapterState>,
}

/// A link that handles capture from and transmit on.
///
/// Cloning is cheap and every clone refers to the same link. Promiscuous
/// mode is adapter-wide and reference counted: it is switched on when the
/// first handle asks for it and stays on until the last one clears it or is
/// dropped.
///
/// # Example
///
/// ```rust
/// use safer_rawcap::backend::LoopbackBackend;
/// use safer_rawcap::{Adapter, Handle};
///
/// let adapter = Adapter::new(LoopbackBackend::new("eth0"));
/// let first = Handle::open(&adapter)?;
/// let second = Handle::open(&adapter)?;
///
/// first.set_promiscuous(true)?;
/// second.set_promiscuous(true)?;
/// first.set_promiscuous(false)?;
/// assert_eq!(second.promiscuous()?, (true, true));
/// assert_eq!(first.promiscuous()?, (false, true));
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

impl Adapter {
    /// Wrap a backend.
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Wrap a backend the caller keeps a reference to.
    pub fn from_shared(backend: Arc<dyn Backend>) -> Self {
        log::debug!(
            target: "safer_rawcap::adapter",
            "adapter {} (mtu {})",
            backend.name(),
            backend.mtu()
        );
        Self {
            inner: Arc::new(AdapterInner {
                backend,
                state: Mutex::new(AdapterState::default()),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, AdapterState>> {
        self.inner.state.lock().map_err(|_| RawcapError::LockPoisoned)
    }

    /// Link name.
    pub fn name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Link MTU in bytes.
    pub fn mtu(&self) -> usize {
        self.inner.backend.mtu()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> Result<usize> {
        Ok(self.lock()?.open_handles)
    }

    /// Whether any handle holds promiscuous mode.
    pub fn is_promiscuous(&self) -> Result<bool> {
        Ok(self.lock()?.promiscuous_refs > 0)
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Reserve a handle slot and open its backend port.
    pub(crate) fn register_handle(&self) -> Result<u64> {
        let mut state = self.lock()?;
        if state.open_handles >= HANDLES_PER_ADAPTER_MAX {
            return Err(RawcapError::LimitReached {
                limit: HANDLES_PER_ADAPTER_MAX,
            });
        }
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.backend.open_port(id)?;
        state.open_handles += 1;
        log::debug!(
            target: "safer_rawcap::adapter",
            "{}: handle {id} opened ({} open)",
            self.name(),
            state.open_handles
        );
        Ok(id)
    }

    pub(crate) fn release_handle(&self, id: u64) {
        self.inner.backend.close_port(id);
        if let Ok(mut state) = self.lock() {
            state.open_handles = state.open_handles.saturating_sub(1);
        }
        log::debug!(target: "safer_rawcap::adapter", "{}: handle {id} closed", self.name());
    }

    /// Take one promiscuous reference, enabling the link on the first.
    pub(crate) fn promiscuous_acquire(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.promiscuous_refs == 0 {
            self.inner.backend.set_promiscuous(true)?;
        }
        state.promiscuous_refs += 1;
        Ok(())
    }

    /// Drop one promiscuous reference, disabling the link on the last.
    pub(crate) fn promiscuous_release(&self) -> Result<()> {
        let mut state = self.lock()?;
        match state.promiscuous_refs {
            0 => Ok(()),
            1 => {
                self.inner.backend.set_promiscuous(false)?;
                state.promiscuous_refs = 0;
                Ok(())
            }
            _ => {
                state.promiscuous_refs -= 1;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.name())
            .field("mtu", &self.mtu())
            .finish()
    }
}
