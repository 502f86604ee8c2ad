//! Per-instance credential refresh engine.

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::admin::{describe_api_error, AdminApi, CreateEphemeralRequest};
use crate::errors::Error;
use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::prelude::{debug, info, warn};
use crate::refresher::data::{EphemeralCert, InstanceData, InstanceMetadata};
use crate::refresher::error::RefreshError;
use crate::refresher::limiter::RateLimiter;
use crate::tls;

/// Delay between a successful refresh and the next scheduled one. The
/// ephemeral certificate is valid for about an hour; refreshing five minutes
/// early leaves margin for a slow control plane.
const REFRESH_INTERVAL: Duration = Duration::from_secs(55 * 60);

/// Minimum spacing between accepted forced refreshes.
const FORCED_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Backoff bounds for repeated refresh failures. The first retry after a
/// failure is immediate; consecutive failures back off exponentially so a
/// persistently failing instance does not hammer the control plane.
const RETRY_MIN_BACKOFF: Duration = Duration::from_secs(1);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(32);

type RefreshResult = Result<Arc<InstanceData>, RefreshError>;
type ResultReceiver = watch::Receiver<Option<RefreshResult>>;

// Lifecycle of a scheduled cycle. A cycle can only be cancelled while it is
// still PENDING (waiting out its delay); once STARTED it runs to completion.
const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

struct ScheduledRefresh {
    id: u64,
    rx: ResultReceiver,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

struct Slot {
    /// Readers wait on this receiver until the backing cycle publishes.
    /// Reassigned, never mutated in place.
    current: ResultReceiver,
    /// The scheduled or running cycle. At most one exists at a time.
    next: Option<ScheduledRefresh>,
    last_id: u64,
    consecutive_failures: u32,
}

/// Keeps one instance's connection credentials continuously fresh.
///
/// The engine owns a double-buffered slot: `current` is what readers see,
/// `next` is the cycle that will replace it. A background task fetches the
/// instance metadata and an ephemeral client certificate, assembles the TLS
/// client configuration, and publishes all three as one [`InstanceData`]
/// snapshot. After a success the follow-up cycle is armed 55 minutes out;
/// after a failure the retry is armed immediately.
///
/// [`InstanceRefresher::current_data`] resolves instantly once a cycle has
/// succeeded; it only awaits network work while the first cycle (or a forced
/// one) is still in flight. [`InstanceRefresher::force_refresh`] invalidates
/// out of band, at most once per minute.
///
/// Engines are created and deduplicated by
/// [`Connector`](crate::Connector); they live until the connector is closed.
pub struct InstanceRefresher {
    name: InstanceName,
    api: Arc<dyn AdminApi>,
    keys: Arc<ClientKeyPair>,
    slot: Mutex<Slot>,
    limiter: RateLimiter,
    shutdown: CancellationToken,
}

impl Debug for InstanceRefresher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRefresher")
            .field("name", &self.name)
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl InstanceRefresher {
    /// Creates the engine and arms the initial refresh at delay zero. The
    /// first reader transparently waits for that cycle's outcome.
    pub(crate) fn new(
        name: InstanceName,
        api: Arc<dyn AdminApi>,
        keys: Arc<ClientKeyPair>,
    ) -> Arc<Self> {
        // Placeholder receiver, replaced with the initial cycle's receiver
        // before the handle is returned.
        let (_tx, rx) = watch::channel::<Option<RefreshResult>>(None);
        let this = Arc::new(Self {
            name,
            api,
            keys,
            slot: Mutex::new(Slot {
                current: rx,
                next: None,
                last_id: 0,
                consecutive_failures: 0,
            }),
            limiter: RateLimiter::new(FORCED_REFRESH_PERIOD),
            shutdown: CancellationToken::new(),
        });
        if let Ok(mut slot) = this.slot.lock() {
            this.schedule_locked(&mut slot, Duration::ZERO);
            if let Some(next) = &slot.next {
                slot.current = next.rx.clone();
            }
        }
        this
    }

    /// The instance this engine refreshes credentials for.
    pub fn name(&self) -> &InstanceName {
        &self.name
    }

    /// Returns the current [`InstanceData`] snapshot.
    ///
    /// Waits until the cycle backing `current` has published. In steady state
    /// that cycle has long resolved and this returns immediately; during the
    /// initial or a forced refresh it awaits the in-flight cycle. If a forced
    /// refresh replaces the awaited cycle before it starts, the wait carries
    /// over to the replacement.
    ///
    /// # Errors
    ///
    /// Propagates the backing cycle's [`RefreshError`] to every waiting
    /// caller, or returns [`Error::Closed`] once the engine is shut down.
    /// A failed cycle is retried automatically; calling again after the retry
    /// yields its outcome.
    pub async fn current_data(&self) -> Result<Arc<InstanceData>, Error> {
        let mut rx = self.latch_current()?;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Closed);
            }
            let waited = { rx.wait_for(|value| value.is_some()).await.map(|value| value.clone()) };
            let outcome = match waited {
                Ok(value) => value,
                Err(_) => {
                    // The latched cycle was cancelled and replaced (a forced
                    // refresh landed while it was still pending). Follow the
                    // slot to the replacement; the contract is that we return
                    // no earlier than the replacement's completion.
                    if self.shutdown.is_cancelled() {
                        return Err(Error::Closed);
                    }
                    let fresh = self.latch_current()?;
                    if fresh.same_channel(&rx) {
                        return Err(Error::internal("refresh cycle abandoned without a result"));
                    }
                    rx = fresh;
                    continue;
                }
            };
            return match outcome {
                Some(Ok(data)) => Ok(data),
                Some(Err(err)) => Err(Error::Refresh(err)),
                None => Err(Error::internal("refresh cycle resolved without a result")),
            };
        }
    }

    fn latch_current(&self) -> Result<ResultReceiver, Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        Ok(self
            .slot
            .lock()
            .map_err(|_| Error::internal("refresh slot mutex poisoned"))?
            .current
            .clone())
    }

    /// Requests an out-of-band refresh.
    ///
    /// Returns `false` when denied by the rate gate (at most one accepted
    /// request per minute) or when the engine is closed; denial has no side
    /// effects. Returns `true` when a refresh is (re)armed: a still-pending
    /// scheduled cycle is cancelled and replaced with an immediate one, a
    /// cycle that already started is left to finish, and in both cases
    /// subsequent [`InstanceRefresher::current_data`] calls wait for that
    /// cycle's outcome.
    ///
    /// Never blocks on network work.
    pub fn force_refresh(self: &Arc<Self>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if !self.limiter.try_acquire() {
            return false;
        }
        let Ok(mut slot) = self.slot.lock() else {
            return false;
        };
        let replace = match &slot.next {
            None => true,
            Some(next) => {
                if next
                    .state
                    .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    next.cancel.cancel();
                    true
                } else {
                    // Already running; its result will serve the force.
                    false
                }
            }
        };
        if replace {
            slot.next = None;
            self.schedule_locked(&mut slot, Duration::ZERO);
        }
        if let Some(next) = &slot.next {
            slot.current = next.rx.clone();
        }
        info!("[{}] forced credential refresh accepted", self.name);
        true
    }

    /// Shuts the engine down: the pending cycle (if any) is cancelled, no new
    /// cycles are armed, and subsequent reads fail with
    /// [`Error::Closed`]. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(next) = slot.next.take() {
                let _ = next.state.compare_exchange(
                    PENDING,
                    CANCELLED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                next.cancel.cancel();
            }
        }
        debug!("[{}] refresher closed", self.name);
    }

    /// Whether [`InstanceRefresher::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Arms a refresh cycle `delay` from now. No-op if a cycle is already
    /// scheduled or the engine is shut down, so at most one cycle exists.
    fn schedule_locked(self: &Arc<Self>, slot: &mut Slot, delay: Duration) {
        if self.shutdown.is_cancelled() || slot.next.is_some() {
            return;
        }
        slot.last_id += 1;
        let id = slot.last_id;
        let (tx, rx) = watch::channel::<Option<RefreshResult>>(None);
        let state = Arc::new(AtomicU8::new(PENDING));
        let cancel = self.shutdown.child_token();

        let task_state = Arc::clone(&state);
        let task_cancel = cancel.clone();
        let weak = Arc::downgrade(self);
        debug!("[{}] refresh scheduled in {:?}", self.name, delay);
        tokio::spawn(async move {
            tokio::select! {
                () = task_cancel.cancelled() => {}
                () = time::sleep(delay) => {}
            }
            // The state word, not the select arm, decides whether this cycle
            // runs: a cancellation that lands after the timer fired loses.
            if task_state
                .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let Some(this) = weak.upgrade() else {
                return;
            };
            let result = this.perform_refresh().await;
            this.complete_refresh(id, &tx, result);
        });

        slot.next = Some(ScheduledRefresh {
            id,
            rx,
            state,
            cancel,
        });
    }

    /// Publishes a cycle's outcome and arms the follow-up, all in one
    /// critical section: readers can never observe a resolved `current`
    /// without the follow-up already scheduled.
    fn complete_refresh(
        self: &Arc<Self>,
        id: u64,
        tx: &watch::Sender<Option<RefreshResult>>,
        result: RefreshResult,
    ) {
        match &result {
            Ok(data) => {
                info!(
                    "[{}] credential refresh complete; client certificate valid until {:?}",
                    self.name,
                    data.certificate().not_after()
                );
            }
            Err(err) => {
                warn!("[{}] credential refresh failed: {err}", self.name);
            }
        }

        let Ok(mut slot) = self.slot.lock() else {
            return;
        };
        let succeeded = result.is_ok();
        let _ = tx.send(Some(result));
        if slot.next.as_ref().is_some_and(|next| next.id == id) {
            slot.next = None;
        }
        if succeeded {
            slot.consecutive_failures = 0;
            slot.current = tx.subscribe();
            self.schedule_locked(&mut slot, REFRESH_INTERVAL);
        } else {
            // Retry right away on the first failure; back off once failures
            // repeat. Readers already waiting on this cycle observe the
            // failure through their own receivers; new readers wait on the
            // retry.
            slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
            let delay = retry_delay(slot.consecutive_failures);
            self.schedule_locked(&mut slot, delay);
            match &slot.next {
                Some(next) => slot.current = next.rx.clone(),
                // Shutting down; serve the failure to anyone still asking.
                None => slot.current = tx.subscribe(),
            }
        }
    }

    /// One refresh cycle: fetch metadata and the ephemeral certificate
    /// concurrently, then assemble the TLS client configuration.
    async fn perform_refresh(&self) -> RefreshResult {
        debug!(
            "[{}] refreshing instance metadata and ephemeral certificate",
            self.name
        );
        let (metadata, certificate) = tokio::try_join!(
            self.fetch_metadata(),
            self.fetch_ephemeral_certificate()
        )?;
        let tls_config = tls::client_config(&self.name, &metadata, &certificate, &self.keys)?;
        Ok(Arc::new(InstanceData::new(metadata, certificate, tls_config)))
    }

    async fn fetch_metadata(&self) -> Result<InstanceMetadata, RefreshError> {
        let info = self
            .api
            .get_instance(self.name.project(), self.name.instance())
            .await
            .map_err(|err| RefreshError::Api {
                message: describe_api_error(&self.name, &err, "failed fetching instance metadata"),
            })?;
        InstanceMetadata::from_api(&self.name, info)
    }

    async fn fetch_ephemeral_certificate(&self) -> Result<EphemeralCert, RefreshError> {
        let request = CreateEphemeralRequest {
            public_key: self.keys.public_key_pem(),
        };
        let response = self
            .api
            .create_ephemeral_cert(self.name.project(), self.name.instance(), request)
            .await
            .map_err(|err| RefreshError::Api {
                message: describe_api_error(
                    &self.name,
                    &err,
                    "failed creating an ephemeral client certificate",
                ),
            })?;
        EphemeralCert::from_pem(&self.name, &response.cert)
    }
}

impl Drop for InstanceRefresher {
    fn drop(&mut self) {
        // Best-effort: pending cycles hold only weak references and stop at
        // the cancelled sleep.
        self.shutdown.cancel();
    }
}

/// Delay before the next retry after `failures` consecutive failures.
fn retry_delay(failures: u32) -> Duration {
    match failures {
        0 | 1 => Duration::ZERO,
        n => {
            let doublings = (n - 2).min(5);
            let backoff = RETRY_MIN_BACKOFF.saturating_mul(1u32 << doublings);
            backoff.min(RETRY_MAX_BACKOFF)
        }
    }
}
