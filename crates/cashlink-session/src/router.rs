//! # Denomination Router
//!
//! Accept / route configuration changes, immediate or buffered.
//!
//! ## Apply Pending Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ── write gate held ───────────────────────────────────────────────     │
//! │  1. disable acceptor          (no deposits mid-change)                  │
//! │  2. fetch assignments                                                   │
//! │  3. plan = current ⊕ pending  (untouched values keep their route)       │
//! │  4. set_routes(plan)          (one combined update)                     │
//! │  5. settle                                                              │
//! │  6. refresh snapshot                                                    │
//! │  7. enable acceptor           (always attempted, even after failure)    │
//! │  ── gate released ─────────────────────────────────────────────────     │
//! │  8. drop applied edits        (only if 1-7 succeeded; later edits stay) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use cashlink_core::{
    plan_route_update, ActivityLevel, Money, PendingRoutes, RouteChangeMode, RouteCode, RoutePlan,
    UnitKind,
};
use std::sync::Mutex;
use tracing::debug;

use crate::controller::{lock, SessionController};
use crate::error::{SessionError, SessionResult};

/// Applies denomination routing and acceptance changes.
///
/// Buffered edits are kept for the bill unit only.
#[derive(Debug)]
pub struct DenominationRouter {
    controller: SessionController,
    pending: Mutex<PendingRoutes>,
}

impl DenominationRouter {
    pub fn new(controller: SessionController) -> Self {
        DenominationRouter {
            controller,
            pending: Mutex::new(PendingRoutes::new()),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Buffered edits not yet applied.
    pub fn pending(&self) -> PendingRoutes {
        lock(&self.pending).clone()
    }

    /// Drops buffered edits (leaving edit mode without applying).
    pub fn discard_pending(&self) {
        let mut pending = lock(&self.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Discarding pending route changes");
            pending.clear();
        }
    }

    /// Routes `value` to payout (`recyclable`) or the vault.
    ///
    /// `Immediate` issues the route command through the write gate and
    /// refreshes the snapshot; `Buffered` only records the wish.
    pub async fn toggle_recyclable(
        &self,
        unit: UnitKind,
        value: i64,
        recyclable: bool,
        mode: RouteChangeMode,
    ) -> SessionResult<()> {
        let route = RouteCode::from_recyclable(recyclable);

        match mode {
            RouteChangeMode::Buffered => {
                if unit != UnitKind::Bill {
                    return Err(SessionError::BufferingUnsupported(unit));
                }
                lock(&self.pending).set(value, recyclable);
                debug!(unit = %unit, value, %route, "Route change buffered");
                Ok(())
            }
            RouteChangeMode::Immediate => {
                self.controller.ensure_connected(unit)?;
                let currency = self.controller.denomination_currency(unit, value)?;
                let device = self.controller.device(unit);

                let result = self
                    .controller
                    .exclusive_write(unit, device.set_denomination_route(value, &currency, route))
                    .await
                    .map_err(|e| {
                        SessionError::rejected(unit, &format!("set_denomination_route({value})"), e)
                    });

                self.finish(
                    unit,
                    result,
                    format!("{} routed to {}", Money::from_cents(value), route),
                )
                .await
            }
        }
    }

    /// Accepts or inhibits deposits of `value`.
    pub async fn toggle_accepted(
        &self,
        unit: UnitKind,
        value: i64,
        accepted: bool,
    ) -> SessionResult<()> {
        self.controller.ensure_connected(unit)?;
        let currency = self.controller.denomination_currency(unit, value)?;
        let device = self.controller.device(unit);

        let result = self
            .controller
            .exclusive_write(
                unit,
                device.set_denomination_inhibit(value, &currency, !accepted),
            )
            .await
            .map_err(|e| {
                SessionError::rejected(unit, &format!("set_denomination_inhibit({value})"), e)
            });

        let verb = if accepted { "accepted" } else { "inhibited" };
        self.finish(unit, result, format!("{} {}", Money::from_cents(value), verb))
            .await
    }

    /// Moves all recyclable stock to the vault.
    pub async fn smart_empty(&self, unit: UnitKind) -> SessionResult<()> {
        self.controller.ensure_connected(unit)?;
        let device = self.controller.device(unit);

        let result = self
            .controller
            .exclusive_write(unit, device.smart_empty())
            .await
            .map_err(|e| SessionError::rejected(unit, "smart_empty", e));

        self.finish(unit, result, "smart empty completed".to_string())
            .await
    }

    /// Applies every buffered route edit in one combined update.
    ///
    /// On failure the pending set is kept for a retry; the acceptor is
    /// re-enabled either way. Edits buffered while the batch runs are not
    /// part of it and stay pending.
    pub async fn apply_pending_routes(&self, unit: UnitKind) -> SessionResult<RoutePlan> {
        if unit != UnitKind::Bill {
            return Err(SessionError::BufferingUnsupported(unit));
        }
        self.controller.ensure_connected(unit)?;

        let pending = self.pending();
        if pending.is_empty() {
            debug!(unit = %unit, "No pending route changes");
            return Ok(RoutePlan::default());
        }

        let controller = &self.controller;
        let device = controller.device(unit);
        let settle = controller.config().settle_delay();
        let currency = controller.config().currency();

        let result = controller
            .exclusive_write(unit, async {
                let applied = async {
                    device
                        .disable()
                        .await
                        .map_err(|e| SessionError::rejected(unit, "disable", e))?;
                    controller.set_enabled_flag(unit, false);

                    let current = device
                        .get_currency_assignments()
                        .await
                        .map_err(|e| SessionError::rejected(unit, "get_currency_assignments", e))?;

                    let plan = plan_route_update(&current, &pending, currency);
                    device
                        .set_routes(&plan.routes)
                        .await
                        .map_err(|e| SessionError::rejected(unit, "set_routes", e))?;

                    tokio::time::sleep(settle).await;
                    controller.refresh_snapshot(unit).await?;
                    Ok::<_, SessionError>(plan)
                }
                .await;

                let reenabled = device.enable().await;
                if reenabled.is_ok() {
                    controller.set_enabled_flag(unit, true);
                }

                match (applied, reenabled) {
                    (Ok(plan), Ok(())) => Ok(plan),
                    (Ok(_), Err(e)) => Err(SessionError::rejected(unit, "enable", e)),
                    (Err(err), Ok(())) => Err(err),
                    (Err(err), Err(e)) => {
                        controller.record(
                            Some(unit),
                            ActivityLevel::Error,
                            format!("acceptor left disabled: {}", SessionError::rejected(unit, "enable", e)),
                        );
                        Err(err)
                    }
                }
            })
            .await;

        match result {
            Ok(plan) => {
                let remaining = {
                    let mut buffered = lock(&self.pending);
                    buffered.remove_applied(&pending);
                    buffered.len()
                };
                if remaining > 0 {
                    debug!(unit = %unit, remaining, "Route edits made during apply stay pending");
                }
                for value in &plan.unknown {
                    controller.record(
                        Some(unit),
                        ActivityLevel::Warning,
                        format!("pending route for unknown denomination {value} skipped"),
                    );
                }
                controller.record(
                    Some(unit),
                    ActivityLevel::Info,
                    format!(
                        "applied {} pending route change(s), {} recyclable denomination(s)",
                        pending.len(),
                        plan.recyclable.len()
                    ),
                );
                Ok(plan)
            }
            Err(err) => {
                controller.record(
                    Some(unit),
                    ActivityLevel::Error,
                    format!("apply pending routes failed, changes kept: {err}"),
                );
                Err(err)
            }
        }
    }

    /// Logs the outcome of a single gated command and refreshes on success.
    async fn finish(
        &self,
        unit: UnitKind,
        result: SessionResult<()>,
        success: String,
    ) -> SessionResult<()> {
        match result {
            Ok(()) => {
                self.controller
                    .record(Some(unit), ActivityLevel::Info, success);
                let _ = self.controller.refresh_snapshot(unit).await;
                Ok(())
            }
            Err(err) => {
                self.controller
                    .record(Some(unit), ActivityLevel::Error, err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::sim::{denomination, denomination_in, SimCommand, SimulatedDevice};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        router: DenominationRouter,
        bill: Arc<SimulatedDevice>,
        coin: Arc<SimulatedDevice>,
    }

    async fn connected(bill: SimulatedDevice) -> Fixture {
        let bill = Arc::new(bill);
        let coin = Arc::new(
            SimulatedDevice::new(Some("C1")).with_assignments(vec![denomination(200, 5, true)]),
        );
        let controller =
            SessionController::new(SessionConfig::default(), bill.clone(), coin.clone()).unwrap();
        controller.connect(UnitKind::Bill).await.unwrap();
        controller.connect(UnitKind::Coin).await.unwrap();
        Fixture {
            router: DenominationRouter::new(controller),
            bill,
            coin,
        }
    }

    fn mixed_bill() -> SimulatedDevice {
        SimulatedDevice::new(Some("D1")).with_assignments(vec![
            denomination(100, 1, true),
            denomination(200, 1, false),
            denomination(500, 1, true),
        ])
    }

    fn recyclable_values(device: &SimulatedDevice) -> BTreeSet<i64> {
        device
            .assignments()
            .iter()
            .filter(|a| a.recyclable)
            .map(|a| a.value)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_route_change_uses_recorded_currency() {
        let f = connected(mixed_bill()).await;

        f.router
            .toggle_recyclable(UnitKind::Bill, 200, true, RouteChangeMode::Immediate)
            .await
            .unwrap();

        assert_eq!(f.bill.calls(SimCommand::SetRoute), 1);
        assert!(f.router.pending().is_empty());
        let view = f.router.controller().view(UnitKind::Bill);
        assert!(view.assignments.iter().find(|a| a.value == 200).unwrap().recyclable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_denomination_is_rejected_before_device() {
        let f = connected(mixed_bill()).await;

        let err = f
            .router
            .toggle_recyclable(UnitKind::Bill, 5000, true, RouteChangeMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnknownDenomination { value: 5000, .. }
        ));
        assert_eq!(f.bill.calls(SimCommand::SetRoute), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_mode_touches_no_device() {
        let f = connected(mixed_bill()).await;

        f.router
            .toggle_recyclable(UnitKind::Bill, 200, true, RouteChangeMode::Buffered)
            .await
            .unwrap();
        assert_eq!(f.router.pending().get(200), Some(true));
        assert_eq!(f.bill.calls(SimCommand::SetRoute), 0);

        let err = f
            .router
            .toggle_recyclable(UnitKind::Coin, 200, false, RouteChangeMode::Buffered)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::BufferingUnsupported(UnitKind::Coin)));

        f.router.discard_pending();
        assert!(f.router.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_pending_failure_keeps_changes_and_reenables() {
        let f = connected(mixed_bill()).await;
        let controller = f.router.controller();
        controller.enable(UnitKind::Bill).await.unwrap();

        for (value, recyclable) in [(200, true), (500, false)] {
            f.router
                .toggle_recyclable(UnitKind::Bill, value, recyclable, RouteChangeMode::Buffered)
                .await
                .unwrap();
        }

        f.bill.fail(SimCommand::SetRoutes);
        assert!(f.router.apply_pending_routes(UnitKind::Bill).await.is_err());

        let expected: PendingRoutes = [(200, true), (500, false)].into_iter().collect();
        assert_eq!(f.router.pending(), expected);
        assert!(f.bill.is_enabled());
        assert!(controller.view(UnitKind::Bill).enabled);
        assert_eq!(recyclable_values(&f.bill), BTreeSet::from([100, 500]));

        f.bill.recover(SimCommand::SetRoutes);
        let plan = f.router.apply_pending_routes(UnitKind::Bill).await.unwrap();

        assert_eq!(plan.recyclable, BTreeSet::from([100, 200]));
        assert_eq!(f.bill.calls(SimCommand::SetRoutes), 2);
        assert!(f.router.pending().is_empty());
        assert!(f.bill.is_enabled());
        assert_eq!(recyclable_values(&f.bill), BTreeSet::from([100, 200]));

        let view = controller.view(UnitKind::Bill);
        let routed: BTreeSet<i64> = view
            .assignments
            .iter()
            .filter(|a| a.recyclable)
            .map(|a| a.value)
            .collect();
        assert_eq!(routed, BTreeSet::from([100, 200]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_buffered_during_apply_stays_pending() {
        let f = connected(mixed_bill()).await;
        f.router
            .toggle_recyclable(UnitKind::Bill, 200, true, RouteChangeMode::Buffered)
            .await
            .unwrap();

        let (applied, _) = tokio::join!(f.router.apply_pending_routes(UnitKind::Bill), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            f.router
                .toggle_recyclable(UnitKind::Bill, 100, false, RouteChangeMode::Buffered)
                .await
                .unwrap();
        });

        let plan = applied.unwrap();
        assert_eq!(plan.recyclable, BTreeSet::from([100, 200, 500]));
        assert_eq!(f.router.pending().get(200), None);
        assert_eq!(f.router.pending().get(100), Some(false));
        assert!(recyclable_values(&f.bill).contains(&100));

        let plan = f.router.apply_pending_routes(UnitKind::Bill).await.unwrap();
        assert_eq!(plan.recyclable, BTreeSet::from([200, 500]));
        assert!(f.router.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_currency_denomination_is_not_routed() {
        let f = connected(SimulatedDevice::new(Some("D1")).with_assignments(vec![
            denomination(100, 1, true),
            denomination_in("USD", 200, 1, false),
        ]))
        .await;

        let err = f
            .router
            .toggle_recyclable(UnitKind::Bill, 200, true, RouteChangeMode::Immediate)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownDenomination { value: 200, .. }));
        assert_eq!(f.bill.calls(SimCommand::SetRoute), 0);

        f.router
            .toggle_recyclable(UnitKind::Bill, 200, true, RouteChangeMode::Buffered)
            .await
            .unwrap();
        let plan = f.router.apply_pending_routes(UnitKind::Bill).await.unwrap();
        assert_eq!(plan.unknown, vec![200]);
        assert_eq!(plan.routes.len(), 1);
        assert!(!f.bill.assignments()[1].recyclable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_pending_skips_unknown_values() {
        let f = connected(mixed_bill()).await;
        f.router
            .toggle_recyclable(UnitKind::Bill, 10000, true, RouteChangeMode::Buffered)
            .await
            .unwrap();

        let plan = f.router.apply_pending_routes(UnitKind::Bill).await.unwrap();
        assert_eq!(plan.unknown, vec![10000]);
        assert!(f.router.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_accepted_and_smart_empty() {
        let f = connected(mixed_bill()).await;
        let controller = f.router.controller();

        f.router
            .toggle_accepted(UnitKind::Coin, 200, false)
            .await
            .unwrap();
        assert!(f.coin.assignments()[0].inhibited);
        assert!(controller.view(UnitKind::Coin).assignments[0].inhibited);

        f.bill.fail(SimCommand::SetInhibit);
        assert!(matches!(
            f.router.toggle_accepted(UnitKind::Bill, 100, false).await,
            Err(SessionError::CommandRejected { .. })
        ));

        f.router.smart_empty(UnitKind::Bill).await.unwrap();
        let stock: Vec<u32> = controller
            .view(UnitKind::Bill)
            .assignments
            .iter()
            .map(|a| a.stored)
            .collect();
        assert_eq!(stock, vec![0, 1, 0]);
    }
}
