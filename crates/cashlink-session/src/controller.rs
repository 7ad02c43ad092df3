//! # Device Session Controller
//!
//! Single authority for each unit's connectivity, enablement and polling
//! lifecycle, and the gate every device-facing write goes through.
//!
//! ## Unit State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌──────────────┐  connect()   ┌────────────┐  id issued  ┌───────────┐ │
//! │  │ DISCONNECTED │ ───────────► │ CONNECTING │ ──────────► │ CONNECTED │ │
//! │  └──────▲───────┘              └─────┬──────┘             │ disabled  │ │
//! │         │        failure / no id     │                    │    ⇅      │ │
//! │         │◄───────────────────────────┘                    │ enabled   │ │
//! │         │                                                 └─────┬─────┘ │
//! │         │        disconnect() (state cleared regardless)        │       │
//! │         └───────────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shared State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  per unit:  Mutex<UnitState> ──publish──► watch::Sender<UnitView>       │
//! │             WriteGate (FIFO write lock + settle delay)                  │
//! │             Option<PollHandle> (status + snapshot cycles)               │
//! │                                                                         │
//! │  shared:    PollingPolicy   AmountTracker   BaselineStore   ActivityLog │
//! │                                                                         │
//! │  Lock order: policy (copied out) → unit state → tracker → baselines.    │
//! │  The activity log is only taken with nothing else held.                 │
//! │  No std lock is held across an await.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state change is published as a whole new [`UnitView`]; readers
//! never see a half-applied update.

use cashlink_core::validation::validate_dispense;
use cashlink_core::{
    find_denomination_in, ActivityEntry, ActivityLevel, ActivityLog, AmountTracker, BaselineFigures,
    BaselineStore, DenominationAssignment, Money, PollingPolicy, StatusTracker, UnitKind,
    UnitPhase, UnitView,
};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::device::{DeviceApi, DeviceResult};
use crate::error::{SessionError, SessionResult};
use crate::gate::{PollControl, WriteGate};
use crate::poller::{self, PollHandle, PollTarget};

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Unit State
// =============================================================================

#[derive(Debug, Default)]
struct UnitState {
    phase: UnitPhase,
    device_id: Option<String>,
    enabled: bool,
    payout_enabled: bool,
    status: StatusTracker,
    last_status: Option<String>,
    last_event: Option<String>,
    assignments: Vec<DenominationAssignment>,
    /// A gated write is in flight.
    writing: bool,
    /// Disconnect has started; polling must not restart.
    closing: bool,
    polling: Option<PollHandle>,
    /// Last generation handed to a set of polling cycles.
    generation: u64,
}

impl UnitState {
    fn is_connected(&self) -> bool {
        self.phase == UnitPhase::Connected
    }

    /// True if a poll result tagged `generation` may still be published.
    fn accepts_poll(&self, generation: u64) -> bool {
        self.is_connected()
            && !self.writing
            && self
                .polling
                .as_ref()
                .is_some_and(|handle| handle.generation() == generation)
    }

    /// Back to a never-connected unit. Keeps the in-flight write marker and
    /// the generation counter.
    fn clear(&mut self) {
        let writing = self.writing;
        let generation = self.generation;
        if let Some(handle) = self.polling.take() {
            handle.stop();
        }
        *self = UnitState {
            writing,
            generation,
            ..Default::default()
        };
    }
}

/// The two on/off switches a unit exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    Acceptor,
    Payout,
}

impl Switch {
    fn get(self, state: &UnitState) -> bool {
        match self {
            Switch::Acceptor => state.enabled,
            Switch::Payout => state.payout_enabled,
        }
    }

    fn set(self, state: &mut UnitState, on: bool) {
        match self {
            Switch::Acceptor => state.enabled = on,
            Switch::Payout => state.payout_enabled = on,
        }
    }

    fn command(self, on: bool) -> &'static str {
        match (self, on) {
            (Switch::Acceptor, true) => "enable",
            (Switch::Acceptor, false) => "disable",
            (Switch::Payout, true) => "enable_payout",
            (Switch::Payout, false) => "disable_payout",
        }
    }

    fn describe(self, on: bool) -> &'static str {
        match (self, on) {
            (Switch::Acceptor, true) => "acceptor enabled",
            (Switch::Acceptor, false) => "acceptor disabled",
            (Switch::Payout, true) => "payout enabled",
            (Switch::Payout, false) => "payout disabled",
        }
    }

    async fn issue(self, device: &dyn DeviceApi, on: bool) -> DeviceResult<()> {
        match (self, on) {
            (Switch::Acceptor, true) => device.enable().await,
            (Switch::Acceptor, false) => device.disable().await,
            (Switch::Payout, true) => device.enable_payout().await,
            (Switch::Payout, false) => device.disable_payout().await,
        }
    }
}

// =============================================================================
// Shared Inner State
// =============================================================================

struct UnitSlot {
    unit: UnitKind,
    device: Arc<dyn DeviceApi>,
    state: Mutex<UnitState>,
    view: watch::Sender<UnitView>,
    gate: WriteGate,
}

impl UnitSlot {
    fn new(unit: UnitKind, device: Arc<dyn DeviceApi>, config: &SessionConfig) -> Self {
        let (view, _) = watch::channel(UnitView::disconnected(unit));
        UnitSlot {
            unit,
            device,
            state: Mutex::new(UnitState::default()),
            view,
            gate: WriteGate::new(config.settle_delay()),
        }
    }
}

struct Inner {
    me: Weak<Inner>,
    config: SessionConfig,
    runtime: Handle,
    policy: Mutex<PollingPolicy>,
    slots: [UnitSlot; 2],
    tracker: Mutex<AmountTracker>,
    baselines: Mutex<BaselineStore>,
    activity: Mutex<ActivityLog>,
}

impl Inner {
    fn slot(&self, unit: UnitKind) -> &UnitSlot {
        &self.slots[unit.index()]
    }

    /// Appends to the activity log and mirrors the line into tracing.
    fn record(&self, unit: Option<UnitKind>, level: ActivityLevel, message: impl Into<String>) {
        let message = message.into();
        let label = unit.map(|u| u.to_string()).unwrap_or_else(|| "session".into());
        match level {
            ActivityLevel::Info => info!(unit = %label, "{}", message),
            ActivityLevel::Warning => warn!(unit = %label, "{}", message),
            ActivityLevel::Error => error!(unit = %label, "{}", message),
        }
        lock(&self.activity).push(Utc::now(), unit, level, message);
    }

    fn build_view(&self, slot: &UnitSlot, state: &UnitState) -> UnitView {
        if !state.is_connected() {
            return UnitView {
                phase: state.phase,
                ..UnitView::disconnected(slot.unit)
            };
        }

        let tracker = lock(&self.tracker);
        let baselines = lock(&self.baselines);
        UnitView {
            unit: slot.unit,
            phase: state.phase,
            device_id: state.device_id.clone(),
            enabled: state.enabled,
            payout_enabled: state.payout_enabled,
            event_count: state.status.event_count(),
            last_status: state.last_status.clone(),
            last_event: state.last_event.clone(),
            assignments: state.assignments.clone(),
            session: tracker.session_amount(slot.unit),
            baseline: baselines.figures(slot.unit, &state.assignments),
            recent_changes: tracker.recent_changes(slot.unit),
        }
    }

    /// Publishes the view for a state the caller already holds.
    fn publish_locked(&self, slot: &UnitSlot, state: &UnitState) {
        let view = self.build_view(slot, state);
        slot.view.send_replace(view);
    }

    fn publish(&self, unit: UnitKind) {
        let slot = self.slot(unit);
        let state = lock(&slot.state);
        self.publish_locked(slot, &state);
    }

    /// Starts or stops the unit's cycles to match the polling policy.
    fn reconcile(&self, unit: UnitKind) {
        let policy = *lock(&self.policy);
        let slot = self.slot(unit);
        let mut state = lock(&slot.state);

        let connected = state.is_connected() && !state.closing;
        let should_poll = policy.should_poll(unit, connected, state.writing);

        match (should_poll, state.polling.is_some()) {
            (true, false) => {
                state.generation += 1;
                state.polling = Some(poller::spawn_cycles(
                    &self.runtime,
                    self.me.clone(),
                    unit,
                    state.generation,
                    self.config.status_interval(),
                    self.config.snapshot_interval(),
                ));
            }
            (false, true) => {
                if let Some(handle) = state.polling.take() {
                    handle.stop();
                    debug!(unit = %unit, writing = state.writing, "Polling stopped");
                }
            }
            _ => {}
        }
    }

    /// Reconciles the inactive unit first so the two never overlap.
    fn reconcile_all(&self) {
        let active = lock(&self.policy).active;
        for unit in UnitKind::ALL.into_iter().filter(|u| *u != active) {
            self.reconcile(unit);
        }
        self.reconcile(active);
    }

    /// Feeds a full snapshot to the tracker and baseline store and publishes.
    ///
    /// `generation` is `Some` for poll results, which are dropped if their
    /// cycles were stopped meanwhile. Returns true if the snapshot was applied.
    fn apply_snapshot(
        &self,
        unit: UnitKind,
        snapshot: Vec<DenominationAssignment>,
        generation: Option<u64>,
    ) -> bool {
        let now = Utc::now();
        let slot = self.slot(unit);

        let (changes, captured) = {
            let mut state = lock(&slot.state);
            let fresh = match generation {
                Some(generation) => state.accepts_poll(generation),
                None => state.is_connected(),
            };
            if !fresh {
                trace!(unit = %unit, ?generation, "Dropping stale snapshot");
                return false;
            }

            let changes = lock(&self.tracker).update_from_snapshot(unit, &snapshot, now);
            let captured = lock(&self.baselines).capture_if_absent(unit, &snapshot);
            state.assignments = snapshot;
            self.publish_locked(slot, &state);
            (changes, captured)
        };

        for change in changes {
            self.record(
                Some(unit),
                ActivityLevel::Info,
                format!("stock {} {:+}", Money::from_cents(change.value), change.delta),
            );
        }
        if captured {
            let baseline = slot.view.borrow().baseline.baseline_cents;
            self.record(
                Some(unit),
                ActivityLevel::Info,
                format!("baseline captured at {}", Money::from_cents(baseline)),
            );
        }
        true
    }

    /// Installs `snapshot` as both the current state and the zero point.
    fn install_baseline(
        &self,
        unit: UnitKind,
        snapshot: Vec<DenominationAssignment>,
    ) -> BaselineFigures {
        let now = Utc::now();
        let slot = self.slot(unit);
        let mut state = lock(&slot.state);

        {
            let mut tracker = lock(&self.tracker);
            tracker.update_from_snapshot(unit, &snapshot, now);
            tracker.set_baseline(unit, &snapshot);
        }
        lock(&self.baselines).replace(unit, &snapshot);
        state.assignments = snapshot;
        self.publish_locked(slot, &state);
        drop(state);

        slot.view.borrow().baseline
    }

    fn set_switch(&self, unit: UnitKind, switch: Switch, on: bool) {
        let slot = self.slot(unit);
        let mut state = lock(&slot.state);
        if state.is_connected() {
            switch.set(&mut state, on);
            self.publish_locked(slot, &state);
        }
    }
}

impl PollTarget for Inner {
    fn device(&self, unit: UnitKind) -> Arc<dyn DeviceApi> {
        self.slot(unit).device.clone()
    }

    fn on_status(&self, unit: UnitKind, generation: u64, result: DeviceResult<Option<String>>) {
        let status = match result {
            Ok(status) => status,
            Err(e) => {
                self.record(
                    Some(unit),
                    ActivityLevel::Warning,
                    format!("status poll failed: {e}"),
                );
                return;
            }
        };

        let slot = self.slot(unit);
        let transition = {
            let mut state = lock(&slot.state);
            if !state.accepts_poll(generation) {
                trace!(unit = %unit, generation, "Dropping stale status");
                return;
            }
            let transition = state.status.observe(status.as_deref());
            state.last_status = status;
            if let Some(transition) = &transition {
                state.last_event = Some(transition.to_string());
            }
            self.publish_locked(slot, &state);
            transition
        };

        if let Some(transition) = transition {
            self.record(
                Some(unit),
                ActivityLevel::Info,
                format!("status changed: {transition}"),
            );
        }
    }

    fn on_snapshot(
        &self,
        unit: UnitKind,
        generation: u64,
        result: DeviceResult<Vec<DenominationAssignment>>,
    ) {
        match result {
            Ok(snapshot) => {
                self.apply_snapshot(unit, snapshot, Some(generation));
            }
            Err(e) => self.record(
                Some(unit),
                ActivityLevel::Warning,
                format!("snapshot poll failed: {e}"),
            ),
        }
    }
}

/// Pause/resume hooks the gate calls for one unit.
struct UnitPolling<'a> {
    inner: &'a Inner,
    unit: UnitKind,
}

impl PollControl for UnitPolling<'_> {
    fn pause(&self) {
        lock(&self.inner.slot(self.unit).state).writing = true;
        self.inner.reconcile(self.unit);
    }

    fn resume(&self) {
        lock(&self.inner.slot(self.unit).state).writing = false;
        self.inner.reconcile(self.unit);
    }
}

// =============================================================================
// Session Controller
// =============================================================================

/// Handle to the bill and coin sessions.
///
/// Cheap to clone; all clones drive the same units.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("policy", &*lock(&self.inner.policy))
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a controller for one bill and one coin device.
    ///
    /// Must be called from within a tokio runtime; polling tasks are
    /// spawned onto it.
    pub fn new(
        config: SessionConfig,
        bill: Arc<dyn DeviceApi>,
        coin: Arc<dyn DeviceApi>,
    ) -> SessionResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| SessionError::Internal(format!("no tokio runtime: {e}")))?;

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            slots: [
                UnitSlot::new(UnitKind::Bill, bill, &config),
                UnitSlot::new(UnitKind::Coin, coin, &config),
            ],
            policy: Mutex::new(PollingPolicy::default()),
            tracker: Mutex::new(AmountTracker::new(config.journal.recent_change_capacity)),
            baselines: Mutex::new(BaselineStore::new()),
            activity: Mutex::new(ActivityLog::new(config.journal.activity_capacity)),
            runtime,
            config,
        });

        Ok(SessionController { inner })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // =========================================================================
    // Published Views
    // =========================================================================

    /// Watches the unit's published view.
    pub fn subscribe(&self, unit: UnitKind) -> watch::Receiver<UnitView> {
        self.inner.slot(unit).view.subscribe()
    }

    /// Latest published view of the unit.
    pub fn view(&self, unit: UnitKind) -> UnitView {
        self.inner.slot(unit).view.borrow().clone()
    }

    /// Activity journal, oldest first.
    pub fn activity_log(&self) -> Vec<ActivityEntry> {
        lock(&self.inner.activity).entries()
    }

    pub fn is_connected(&self, unit: UnitKind) -> bool {
        lock(&self.inner.slot(unit).state).is_connected()
    }

    /// Returns true if the unit's polling cycles are running.
    pub fn is_polling(&self, unit: UnitKind) -> bool {
        lock(&self.inner.slot(unit).state).polling.is_some()
    }

    pub fn polling_policy(&self) -> PollingPolicy {
        *lock(&self.inner.policy)
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Connects the unit; returns the device identifier.
    ///
    /// Connecting an already connected unit returns its identifier. On
    /// failure the unit stays disconnected and the error is logged.
    pub async fn connect(&self, unit: UnitKind) -> SessionResult<String> {
        let inner = &self.inner;
        let slot = inner.slot(unit);

        {
            let mut state = lock(&slot.state);
            match state.phase {
                UnitPhase::Connected => {
                    if let Some(id) = state.device_id.clone() {
                        return Ok(id);
                    }
                }
                UnitPhase::Connecting => {
                    return Err(SessionError::ConnectionFailed {
                        unit,
                        reason: "connect already in progress".into(),
                    });
                }
                UnitPhase::Disconnected => {}
            }
            state.phase = UnitPhase::Connecting;
            inner.publish_locked(slot, &state);
        }

        info!(unit = %unit, "Connecting");
        let outcome = match tokio::time::timeout(inner.config.connect_timeout(), slot.device.connect())
            .await
        {
            Ok(Ok(Some(id))) => Ok(id),
            Ok(Ok(None)) => Err(SessionError::NoDeviceIdentifier(unit)),
            Ok(Err(e)) => Err(SessionError::ConnectionFailed {
                unit,
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::Timeout(inner.config.device.connect_timeout_secs)),
        };

        let device_id = match outcome {
            Ok(id) => id,
            Err(err) => {
                {
                    let mut state = lock(&slot.state);
                    state.phase = UnitPhase::Disconnected;
                    inner.publish_locked(slot, &state);
                }
                inner.record(Some(unit), ActivityLevel::Error, format!("connect failed: {err}"));
                return Err(err);
            }
        };

        {
            let mut state = lock(&slot.state);
            state.clear();
            state.phase = UnitPhase::Connected;
            state.device_id = Some(device_id.clone());
            inner.publish_locked(slot, &state);
        }
        inner.record(
            Some(unit),
            ActivityLevel::Info,
            format!("connected (device {device_id})"),
        );

        match slot.device.get_currency_assignments().await {
            Ok(snapshot) => {
                inner.apply_snapshot(unit, snapshot, None);
            }
            Err(e) => inner.record(
                Some(unit),
                ActivityLevel::Warning,
                format!("initial snapshot failed: {e}"),
            ),
        }

        inner.reconcile(unit);
        Ok(device_id)
    }

    /// Stops polling, asks the device to disconnect, then clears local state
    /// whatever the device answered.
    ///
    /// A device-side failure is still returned (and logged) after the state
    /// is cleared. A unit still connecting cannot be disconnected yet.
    pub async fn disconnect(&self, unit: UnitKind) -> SessionResult<()> {
        let inner = &self.inner;
        let slot = inner.slot(unit);

        {
            let mut state = lock(&slot.state);
            match state.phase {
                UnitPhase::Connected => {}
                UnitPhase::Disconnected => return Ok(()),
                UnitPhase::Connecting => {
                    return Err(SessionError::ConnectionFailed {
                        unit,
                        reason: "connect in progress, disconnect after it completes".into(),
                    });
                }
            }
            state.closing = true;
            if let Some(handle) = state.polling.take() {
                handle.stop();
            }
        }

        let result = slot.device.disconnect().await;

        {
            let mut state = lock(&slot.state);
            state.clear();
            inner.publish_locked(slot, &state);
        }
        inner.reconcile(unit);

        match result {
            Ok(()) => {
                inner.record(Some(unit), ActivityLevel::Info, "disconnected");
                Ok(())
            }
            Err(e) => {
                let err = SessionError::ConnectionFailed {
                    unit,
                    reason: e.to_string(),
                };
                inner.record(
                    Some(unit),
                    ActivityLevel::Warning,
                    format!("disconnect reported failure, local state cleared: {err}"),
                );
                Err(err)
            }
        }
    }

    // =========================================================================
    // Polling Policy
    // =========================================================================

    /// Declares which unit's polling runs while the view is visible.
    pub fn set_active_unit(&self, unit: UnitKind) {
        lock(&self.inner.policy).active = unit;
        debug!(unit = %unit, "Active unit changed");
        self.inner.reconcile_all();
    }

    /// Global visibility gate for all polling.
    pub fn set_visible(&self, visible: bool) {
        lock(&self.inner.policy).visible = visible;
        debug!(visible, "Visibility changed");
        self.inner.reconcile_all();
    }

    // =========================================================================
    // Gated Writes
    // =========================================================================

    /// Runs `op` under the unit's write gate.
    pub(crate) async fn exclusive_write<Fut, T>(&self, unit: UnitKind, op: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let control = UnitPolling {
            inner: &self.inner,
            unit,
        };
        self.inner
            .slot(unit)
            .gate
            .with_exclusive_write(&control, op)
            .await
    }

    pub async fn enable(&self, unit: UnitKind) -> SessionResult<()> {
        self.switch(unit, Switch::Acceptor, true).await
    }

    pub async fn disable(&self, unit: UnitKind) -> SessionResult<()> {
        self.switch(unit, Switch::Acceptor, false).await
    }

    pub async fn enable_payout(&self, unit: UnitKind) -> SessionResult<()> {
        self.switch(unit, Switch::Payout, true).await
    }

    pub async fn disable_payout(&self, unit: UnitKind) -> SessionResult<()> {
        self.switch(unit, Switch::Payout, false).await
    }

    /// Flips one switch through the gate. Already in the target state is a
    /// no-op success; the flag only changes on confirmed success.
    async fn switch(&self, unit: UnitKind, switch: Switch, on: bool) -> SessionResult<()> {
        let slot = self.inner.slot(unit);
        {
            let state = lock(&slot.state);
            if !state.is_connected() {
                return Err(SessionError::NotConnected(unit));
            }
            if switch.get(&state) == on {
                debug!(unit = %unit, command = switch.command(on), "Already in requested state");
                return Ok(());
            }
        }

        let device = slot.device.clone();
        let result = self
            .exclusive_write(unit, switch.issue(device.as_ref(), on))
            .await;

        match result {
            Ok(()) => {
                self.inner.set_switch(unit, switch, on);
                self.inner
                    .record(Some(unit), ActivityLevel::Info, switch.describe(on));
                Ok(())
            }
            Err(e) => {
                let err = SessionError::rejected(unit, switch.command(on), e);
                self.inner
                    .record(Some(unit), ActivityLevel::Error, err.to_string());
                Err(err)
            }
        }
    }

    /// Pays out one piece of `value`.
    ///
    /// Pre-validates against a freshly fetched snapshot and blocks without
    /// a device call if the denomination is unknown, vaulted, empty or
    /// inhibited. The device remains the final arbiter.
    pub async fn dispense(&self, unit: UnitKind, value: i64) -> SessionResult<()> {
        self.ensure_connected(unit)?;
        let device = self.device(unit);
        let amount = Money::from_cents(value);
        let configured = self.inner.config.currency();

        let result: SessionResult<()> = self
            .exclusive_write(unit, async {
                let snapshot = device
                    .get_currency_assignments()
                    .await
                    .map_err(|e| SessionError::rejected(unit, "get_currency_assignments", e))?;
                let currency = validate_dispense(&snapshot, value, configured)?.currency.clone();
                device
                    .dispense(value, &currency)
                    .await
                    .map_err(|e| SessionError::rejected(unit, &format!("dispense({value})"), e))
            })
            .await;

        match result {
            Ok(()) => {
                self.inner
                    .record(Some(unit), ActivityLevel::Info, format!("dispensed {amount}"));
                let _ = self.refresh_snapshot(unit).await;
                Ok(())
            }
            Err(err) => {
                let level = match err {
                    SessionError::DispenseRejected(_) => ActivityLevel::Warning,
                    _ => ActivityLevel::Error,
                };
                self.inner
                    .record(Some(unit), level, format!("dispense {amount} failed: {err}"));
                Err(err)
            }
        }
    }

    // =========================================================================
    // Snapshot & Baseline
    // =========================================================================

    /// Fetches and applies a snapshot immediately, outside the poll cadence.
    pub async fn refresh_snapshot(&self, unit: UnitKind) -> SessionResult<()> {
        self.ensure_connected(unit)?;
        match self.device(unit).get_currency_assignments().await {
            Ok(snapshot) => {
                self.inner.apply_snapshot(unit, snapshot, None);
                Ok(())
            }
            Err(e) => {
                let err = SessionError::rejected(unit, "get_currency_assignments", e);
                self.inner.record(
                    Some(unit),
                    ActivityLevel::Warning,
                    format!("snapshot refresh failed: {err}"),
                );
                Err(err)
            }
        }
    }

    /// Replaces the unit's zero point with a live snapshot.
    ///
    /// Local accounting only; no command reaches the device.
    pub async fn reset_baseline(&self, unit: UnitKind) -> SessionResult<BaselineFigures> {
        self.ensure_connected(unit)?;
        let snapshot = match self.device(unit).get_currency_assignments().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let err = SessionError::rejected(unit, "get_currency_assignments", e);
                self.inner.record(
                    Some(unit),
                    ActivityLevel::Warning,
                    format!("baseline reset failed: {err}"),
                );
                return Err(err);
            }
        };

        let figures = self.inner.install_baseline(unit, snapshot);
        self.inner.record(
            Some(unit),
            ActivityLevel::Info,
            format!("baseline reset to {}", Money::from_cents(figures.baseline_cents)),
        );
        Ok(figures)
    }

    /// Drops all accounting history and starts counting from the next
    /// snapshot of each connected unit.
    pub async fn start_new_session(&self) -> SessionResult<()> {
        lock(&self.inner.tracker).reset();
        lock(&self.inner.baselines).clear();
        for unit in UnitKind::ALL {
            self.inner.publish(unit);
        }
        self.inner
            .record(None, ActivityLevel::Info, "new session started");

        let mut first_error = None;
        for unit in UnitKind::ALL {
            if !self.is_connected(unit) {
                continue;
            }
            if let Err(e) = self.refresh_snapshot(unit).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stops all polling and disconnects every connected unit.
    pub async fn shutdown(&self) {
        lock(&self.inner.policy).visible = false;
        self.inner.reconcile_all();
        for unit in UnitKind::ALL {
            if self.is_connected(unit) {
                // failures are already in the activity log
                let _ = self.disconnect(unit).await;
            }
        }
        info!("Session controller shut down");
    }

    // =========================================================================
    // Crate-internal Helpers
    // =========================================================================

    pub(crate) fn device(&self, unit: UnitKind) -> Arc<dyn DeviceApi> {
        self.inner.slot(unit).device.clone()
    }

    pub(crate) fn ensure_connected(&self, unit: UnitKind) -> SessionResult<()> {
        if self.is_connected(unit) {
            Ok(())
        } else {
            Err(SessionError::NotConnected(unit))
        }
    }

    /// Currency code recorded for `value` in the latest snapshot.
    ///
    /// Only rows in the configured currency count.
    pub(crate) fn denomination_currency(&self, unit: UnitKind, value: i64) -> SessionResult<String> {
        let state = lock(&self.inner.slot(unit).state);
        find_denomination_in(&state.assignments, value, self.inner.config.currency())
            .map(|a| a.currency.clone())
            .ok_or(SessionError::UnknownDenomination { unit, value })
    }

    pub(crate) fn set_enabled_flag(&self, unit: UnitKind, enabled: bool) {
        self.inner.set_switch(unit, Switch::Acceptor, enabled);
    }

    pub(crate) fn record(
        &self,
        unit: Option<UnitKind>,
        level: ActivityLevel,
        message: impl Into<String>,
    ) {
        self.inner.record(unit, level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{denomination, denomination_in, SimCommand, SimulatedDevice};
    use cashlink_core::DispenseRejection;
    use std::time::Duration;

    struct Fixture {
        controller: SessionController,
        bill: Arc<SimulatedDevice>,
        coin: Arc<SimulatedDevice>,
    }

    fn fixture(bill: SimulatedDevice, coin: SimulatedDevice) -> Fixture {
        let bill = Arc::new(bill);
        let coin = Arc::new(coin);
        let controller =
            SessionController::new(SessionConfig::default(), bill.clone(), coin.clone()).unwrap();
        Fixture {
            controller,
            bill,
            coin,
        }
    }

    fn bill_fixture(bill: SimulatedDevice) -> Fixture {
        fixture(bill, SimulatedDevice::new(Some("C1")))
    }

    fn logged(controller: &SessionController, needle: &str) -> bool {
        controller
            .activity_log()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_flag_follows_confirmed_commands() {
        let f = bill_fixture(SimulatedDevice::new(Some("D1")));
        let c = &f.controller;

        assert!(matches!(
            c.enable(UnitKind::Bill).await,
            Err(SessionError::NotConnected(UnitKind::Bill))
        ));

        assert_eq!(c.connect(UnitKind::Bill).await.unwrap(), "D1");
        assert!(!c.view(UnitKind::Bill).enabled);

        c.enable(UnitKind::Bill).await.unwrap();
        assert!(c.view(UnitKind::Bill).enabled);

        // already enabled: no second device call
        c.enable(UnitKind::Bill).await.unwrap();
        assert_eq!(f.bill.calls(SimCommand::Enable), 1);

        f.bill.fail(SimCommand::Disable);
        assert!(c.disable(UnitKind::Bill).await.is_err());
        assert!(c.view(UnitKind::Bill).enabled);

        f.bill.recover(SimCommand::Disable);
        c.disable(UnitKind::Bill).await.unwrap();
        assert!(!c.view(UnitKind::Bill).enabled);

        c.enable(UnitKind::Bill).await.unwrap();
        c.disconnect(UnitKind::Bill).await.unwrap();
        let view = c.view(UnitKind::Bill);
        assert!(!view.enabled);
        assert_eq!(view.device_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_switch_is_independent() {
        let f = bill_fixture(SimulatedDevice::new(Some("D1")));
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();

        c.enable_payout(UnitKind::Bill).await.unwrap();
        let view = c.view(UnitKind::Bill);
        assert!(view.payout_enabled);
        assert!(!view.enabled);

        c.disable_payout(UnitKind::Bill).await.unwrap();
        assert!(!c.view(UnitKind::Bill).payout_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_leave_unit_disconnected() {
        let failing = SimulatedDevice::new(Some("D1"));
        failing.fail(SimCommand::Connect);
        let f = fixture(failing, SimulatedDevice::new(None));
        let c = &f.controller;

        let err = c.connect(UnitKind::Bill).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectionFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(c.view(UnitKind::Bill).phase, UnitPhase::Disconnected);

        let err = c.connect(UnitKind::Coin).await.unwrap_err();
        assert!(matches!(err, SessionError::NoDeviceIdentifier(UnitKind::Coin)));
        assert!(!c.is_connected(UnitKind::Coin));
        assert!(logged(c, "connect failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_bounded_by_timeout() {
        let slow = SimulatedDevice::new(Some("D1")).with_latency(Duration::from_secs(30));
        let f = bill_fixture(slow);

        let err = f.controller.connect(UnitKind::Bill).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(10)));
        assert_eq!(f.controller.view(UnitKind::Bill).phase, UnitPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_transition_counts_one_event() {
        let device = SimulatedDevice::new(Some("D1")).with_status_script([Some("IDLE"), Some("BUSY")]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.set_visible(true);

        c.connect(UnitKind::Bill).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let view = c.view(UnitKind::Bill);
        assert_eq!(view.last_status.as_deref(), Some("IDLE"));
        assert_eq!(view.event_count, 0);
        assert_eq!(view.last_event, None);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.last_status.as_deref(), Some("BUSY"));
        assert_eq!(view.event_count, 1);
        assert_eq!(view.last_event.as_deref(), Some("IDLE → BUSY"));
        assert!(logged(c, "IDLE → BUSY"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stock_changes_are_recorded() {
        let device = SimulatedDevice::new(Some("D1"))
            .with_assignments(vec![denomination(100, 10, true), denomination(200, 5, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();
        assert_eq!(c.view(UnitKind::Bill).session.total_cents, 2000);

        f.bill.set_stored(100, 8);
        f.bill.set_stored(200, 6);
        c.refresh_snapshot(UnitKind::Bill).await.unwrap();

        let view = c.view(UnitKind::Bill);
        let deltas: Vec<(i64, i64)> = view.recent_changes.iter().map(|r| (r.value, r.delta)).collect();
        assert_eq!(deltas, vec![(100, -2), (200, 1)]);
        assert_eq!(view.session.total_cents, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispense_blocked_on_zero_stock() {
        let device = SimulatedDevice::new(Some("D1")).with_assignments(vec![denomination(500, 0, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();

        let err = c.dispense(UnitKind::Bill, 500).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::DispenseRejected(DispenseRejection::OutOfStock { value: 500 })
        ));
        assert_eq!(f.bill.calls(SimCommand::Dispense), 0);
        assert!(logged(c, "zero stock"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispense_blocked_for_foreign_currency() {
        let device = SimulatedDevice::new(Some("D1"))
            .with_assignments(vec![denomination_in("USD", 500, 3, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();

        let err = c.dispense(UnitKind::Bill, 500).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::DispenseRejected(DispenseRejection::WrongCurrency { value: 500, .. })
        ));
        assert_eq!(f.bill.calls(SimCommand::Dispense), 0);
        assert_eq!(f.bill.assignments()[0].stored, 3);
        assert!(logged(c, "held in USD, not EUR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispense_refreshes_snapshot() {
        let device = SimulatedDevice::new(Some("D1")).with_assignments(vec![denomination(500, 3, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();

        c.dispense(UnitKind::Bill, 500).await.unwrap();
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.assignments[0].stored, 2);
        assert_eq!(view.session.total_cents, 1000);
        assert_eq!(view.recent_changes.last().map(|r| r.delta), Some(-1));

        f.bill.fail(SimCommand::Dispense);
        assert!(matches!(
            c.dispense(UnitKind::Bill, 500).await,
            Err(SessionError::CommandRejected { .. })
        ));
        assert_eq!(c.view(UnitKind::Bill).assignments[0].stored, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_poll_publish_while_gate_held() {
        let f = bill_fixture(SimulatedDevice::new(Some("D1")));
        let c = &f.controller;
        c.set_visible(true);
        c.connect(UnitKind::Bill).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(c.is_polling(UnitKind::Bill));

        let mut rx = c.subscribe(UnitKind::Bill);
        rx.borrow_and_update();

        c.exclusive_write(UnitKind::Bill, async {
            assert!(!c.is_polling(UnitKind::Bill));
            let calls = f.bill.calls(SimCommand::GetStatus);
            f.bill.push_status(Some("BUSY"));
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert_eq!(f.bill.calls(SimCommand::GetStatus), calls);
            assert!(!rx.has_changed().unwrap());
        })
        .await;

        // resumes with an immediate tick, then the held-back BUSY
        assert!(c.is_polling(UnitKind::Bill));
        tokio::time::sleep(Duration::from_millis(700)).await;
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.last_status.as_deref(), Some("BUSY"));
        assert_eq!(view.event_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_poll_results_are_dropped() {
        let device = SimulatedDevice::new(Some("D1")).with_assignments(vec![denomination(500, 2, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        let slot = c.inner.slot(UnitKind::Bill);
        c.set_visible(true);
        c.connect(UnitKind::Bill).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // restart the cycles; results tagged with the old generation are late
        let old = lock(&slot.state).generation;
        c.set_visible(false);
        c.set_visible(true);
        let current = lock(&slot.state).generation;
        assert!(current > old);

        let before = c.view(UnitKind::Bill);
        c.inner.on_status(UnitKind::Bill, old, Ok(Some("JAMMED".into())));
        c.inner.on_snapshot(UnitKind::Bill, old, Ok(vec![denomination(500, 9, true)]));
        assert_eq!(c.view(UnitKind::Bill), before);

        // a result landing while a write is in flight
        lock(&slot.state).writing = true;
        c.inner.on_status(UnitKind::Bill, current, Ok(Some("JAMMED".into())));
        c.inner.on_snapshot(UnitKind::Bill, current, Ok(vec![denomination(500, 9, true)]));
        assert_eq!(c.view(UnitKind::Bill), before);

        lock(&slot.state).writing = false;
        c.inner.on_status(UnitKind::Bill, current, Ok(Some("JAMMED".into())));
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.last_status.as_deref(), Some("JAMMED"));
        assert_eq!(view.event_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_is_refused() {
        let slow = SimulatedDevice::new(Some("D1")).with_latency(Duration::from_secs(1));
        let f = bill_fixture(slow);
        let c = &f.controller;

        let (connected, disconnected) = tokio::join!(c.connect(UnitKind::Bill), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c.disconnect(UnitKind::Bill).await
        });

        assert!(matches!(
            disconnected,
            Err(SessionError::ConnectionFailed { unit: UnitKind::Bill, .. })
        ));
        assert_eq!(connected.unwrap(), "D1");
        assert!(c.is_connected(UnitKind::Bill));

        c.disconnect(UnitKind::Bill).await.unwrap();
        assert!(!c.is_connected(UnitKind::Bill));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_disconnect_still_clears_state() {
        let f = bill_fixture(SimulatedDevice::new(Some("D1")));
        let c = &f.controller;
        c.set_visible(true);
        c.connect(UnitKind::Bill).await.unwrap();
        c.enable(UnitKind::Bill).await.unwrap();

        f.bill.fail(SimCommand::Disconnect);
        assert!(c.disconnect(UnitKind::Bill).await.is_err());

        let view = c.view(UnitKind::Bill);
        assert_eq!(view.phase, UnitPhase::Disconnected);
        assert_eq!(view.device_id, None);
        assert!(!view.enabled);
        assert!(!c.is_polling(UnitKind::Bill));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_and_active_unit_drive_polling() {
        let f = fixture(SimulatedDevice::new(Some("B1")), SimulatedDevice::new(Some("C1")));
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();
        c.connect(UnitKind::Coin).await.unwrap();

        // hidden by default
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.bill.calls(SimCommand::GetStatus), 0);

        c.set_visible(true);
        assert!(c.is_polling(UnitKind::Bill));
        assert!(!c.is_polling(UnitKind::Coin));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.bill.calls(SimCommand::GetStatus) > 0);
        assert_eq!(f.coin.calls(SimCommand::GetStatus), 0);

        c.set_active_unit(UnitKind::Coin);
        assert!(!c.is_polling(UnitKind::Bill));
        assert!(c.is_polling(UnitKind::Coin));
        let bill_calls = f.bill.calls(SimCommand::GetStatus);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.bill.calls(SimCommand::GetStatus), bill_calls);
        assert!(f.coin.calls(SimCommand::GetStatus) > 0);

        c.set_visible(false);
        assert!(!c.is_polling(UnitKind::Coin));
        let coin_calls = f.coin.calls(SimCommand::GetStatus);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.coin.calls(SimCommand::GetStatus), coin_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_do_not_stop_cycle() {
        let f = bill_fixture(SimulatedDevice::new(Some("D1")));
        let c = &f.controller;
        c.set_visible(true);
        f.bill.fail(SimCommand::GetStatus);
        c.connect(UnitKind::Bill).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(logged(c, "status poll failed"));

        f.bill.recover(SimCommand::GetStatus);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(c.view(UnitKind::Bill).last_status.as_deref(), Some("IDLE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_baseline_and_new_session() {
        let device = SimulatedDevice::new(Some("D1")).with_assignments(vec![denomination(500, 2, true)]);
        let f = bill_fixture(device);
        let c = &f.controller;
        c.connect(UnitKind::Bill).await.unwrap();

        f.bill.deposit(500, 3);
        c.refresh_snapshot(UnitKind::Bill).await.unwrap();
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.session.session_cents, 1500);
        assert_eq!(view.baseline.delta_cents, 1500);

        let figures = c.reset_baseline(UnitKind::Bill).await.unwrap();
        assert_eq!(figures.baseline_cents, 2500);
        assert_eq!(figures.delta_cents, 0);
        assert_eq!(c.view(UnitKind::Bill).session.session_cents, 0);
        assert_eq!(f.bill.calls(SimCommand::Enable), 0);

        f.bill.deposit(500, 1);
        c.start_new_session().await.unwrap();
        let view = c.view(UnitKind::Bill);
        assert_eq!(view.session.session_cents, 0);
        assert_eq!(view.session.total_cents, 3000);
        assert!(view.recent_changes.is_empty());
        assert_eq!(view.baseline.baseline_cents, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_everything() {
        let f = fixture(SimulatedDevice::new(Some("B1")), SimulatedDevice::new(Some("C1")));
        let c = &f.controller;
        c.set_visible(true);
        c.connect(UnitKind::Bill).await.unwrap();
        c.connect(UnitKind::Coin).await.unwrap();

        c.shutdown().await;
        assert!(!c.is_connected(UnitKind::Bill));
        assert!(!c.is_connected(UnitKind::Coin));
        assert!(!f.bill.is_connected());
        assert!(!c.polling_policy().visible);
    }
}
