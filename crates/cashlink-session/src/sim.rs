//! # Simulated Device
//!
//! In-memory [`DeviceApi`] used by the test suites and the `cashlink-sim`
//! binary.
//!
//! ## Features
//! - fixed or generated device identifier
//! - scripted status sequence (the last value sticks)
//! - mutable stock with deposit / dispense / smart-empty semantics
//! - per-command failure injection and call counters
//! - optional per-call latency so every call is a real suspension point

use async_trait::async_trait;
use cashlink_core::{DenominationAssignment, RouteAssignment, RouteCode};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DEFAULT_CURRENCY;
use crate::device::{DeviceApi, DeviceError, DeviceResult};

/// Commands the simulator counts and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCommand {
    Connect,
    Disconnect,
    Enable,
    Disable,
    EnablePayout,
    DisablePayout,
    GetStatus,
    GetAssignments,
    Dispense,
    SetRoute,
    SetRoutes,
    SetInhibit,
    SmartEmpty,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    enabled: bool,
    payout_enabled: bool,
    statuses: VecDeque<Option<String>>,
    assignments: Vec<DenominationAssignment>,
    failing: HashSet<SimCommand>,
    calls: HashMap<SimCommand, u64>,
}

/// Simulated bill or coin recycler.
#[derive(Debug)]
pub struct SimulatedDevice {
    identifier: Option<String>,
    latency: Duration,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    /// Creates a device that reports `identifier` on connect.
    ///
    /// `None` simulates a connect that completes without issuing an id.
    pub fn new(identifier: Option<&str>) -> Self {
        let state = SimState {
            statuses: VecDeque::from([Some("IDLE".to_string())]),
            ..Default::default()
        };
        SimulatedDevice {
            identifier: identifier.map(str::to_string),
            latency: Duration::ZERO,
            state: Mutex::new(state),
        }
    }

    /// Creates a device with a random `SIM-…` identifier.
    pub fn with_generated_id() -> Self {
        let id = format!("SIM-{}", Uuid::new_v4().simple());
        Self::new(Some(&id))
    }

    /// Replaces the denomination table.
    pub fn with_assignments(self, assignments: Vec<DenominationAssignment>) -> Self {
        self.lock().assignments = assignments;
        self
    }

    /// Replaces the status script; `None` entries simulate an absent status.
    pub fn with_status_script<I, S>(self, script: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.lock().statuses = script.into_iter().map(|s| s.map(Into::into)).collect();
        self
    }

    /// Adds a fixed delay to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Note recycler: 5/10/20 recyclable, 50 to the vault.
    pub fn bill_recycler(currency: &str) -> Self {
        Self::with_generated_id().with_assignments(vec![
            denomination_in(currency, 500, 4, true),
            denomination_in(currency, 1000, 3, true),
            denomination_in(currency, 2000, 2, true),
            denomination_in(currency, 5000, 1, false),
        ])
    }

    /// Coin recycler: 0.10 to 2.00.
    pub fn coin_recycler(currency: &str) -> Self {
        Self::with_generated_id().with_assignments(vec![
            denomination_in(currency, 10, 20, true),
            denomination_in(currency, 20, 20, true),
            denomination_in(currency, 50, 15, true),
            denomination_in(currency, 100, 10, true),
            denomination_in(currency, 200, 8, true),
        ])
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every later `command` call fail.
    pub fn fail(&self, command: SimCommand) {
        self.lock().failing.insert(command);
    }

    /// Undoes [`fail`](Self::fail).
    pub fn recover(&self, command: SimCommand) {
        self.lock().failing.remove(&command);
    }

    /// Number of times `command` was called (failed calls included).
    pub fn calls(&self, command: SimCommand) -> u64 {
        self.lock().calls.get(&command).copied().unwrap_or(0)
    }

    /// Simulates cash inserted by a customer.
    pub fn deposit(&self, value: i64, count: u32) {
        let mut state = self.lock();
        if let Some(a) = state.assignments.iter_mut().find(|a| a.value == value) {
            a.stored += count;
        }
    }

    /// Overwrites the stored count of one denomination.
    pub fn set_stored(&self, value: i64, stored: u32) {
        let mut state = self.lock();
        if let Some(a) = state.assignments.iter_mut().find(|a| a.value == value) {
            a.stored = stored;
        }
    }

    /// Appends a status value to the script.
    pub fn push_status(&self, status: Option<&str>) {
        self.lock().statuses.push_back(status.map(str::to_string));
    }

    pub fn assignments(&self) -> Vec<DenominationAssignment> {
        self.lock().assignments.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Counts the call, applies latency and checks failure injection.
    async fn begin(&self, command: SimCommand) -> DeviceResult<()> {
        let failing = {
            let mut state = self.lock();
            *state.calls.entry(command).or_insert(0) += 1;
            state.failing.contains(&command)
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if failing {
            return Err(DeviceError::Rejected(format!("{:?} failed", command)));
        }
        Ok(())
    }

    fn apply_route(state: &mut SimState, value: i64, route: RouteCode) -> DeviceResult<()> {
        let a = state
            .assignments
            .iter_mut()
            .find(|a| a.value == value)
            .ok_or_else(|| DeviceError::Rejected(format!("unknown denomination {value}")))?;
        a.recyclable = route.is_recyclable();
        a.accept_route = route.device_code().to_string();
        Ok(())
    }
}

/// Builds a denomination row in the default currency.
pub fn denomination(value: i64, stored: u32, recyclable: bool) -> DenominationAssignment {
    denomination_in(DEFAULT_CURRENCY, value, stored, recyclable)
}

/// Builds a denomination row in `currency`.
pub fn denomination_in(
    currency: &str,
    value: i64,
    stored: u32,
    recyclable: bool,
) -> DenominationAssignment {
    DenominationAssignment {
        value,
        currency: currency.to_string(),
        stored,
        recyclable,
        inhibited: false,
        accept_route: RouteCode::from_recyclable(recyclable).device_code().to_string(),
    }
}

#[async_trait]
impl DeviceApi for SimulatedDevice {
    async fn connect(&self) -> DeviceResult<Option<String>> {
        self.begin(SimCommand::Connect)
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        let mut state = self.lock();
        state.connected = self.identifier.is_some();
        Ok(self.identifier.clone())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        self.begin(SimCommand::Disconnect).await?;
        let mut state = self.lock();
        state.connected = false;
        state.enabled = false;
        state.payout_enabled = false;
        Ok(())
    }

    async fn enable(&self) -> DeviceResult<()> {
        self.begin(SimCommand::Enable).await?;
        self.lock().enabled = true;
        Ok(())
    }

    async fn disable(&self) -> DeviceResult<()> {
        self.begin(SimCommand::Disable).await?;
        self.lock().enabled = false;
        Ok(())
    }

    async fn enable_payout(&self) -> DeviceResult<()> {
        self.begin(SimCommand::EnablePayout).await?;
        self.lock().payout_enabled = true;
        Ok(())
    }

    async fn disable_payout(&self) -> DeviceResult<()> {
        self.begin(SimCommand::DisablePayout).await?;
        self.lock().payout_enabled = false;
        Ok(())
    }

    async fn get_status(&self) -> DeviceResult<Option<String>> {
        self.begin(SimCommand::GetStatus).await?;
        let mut state = self.lock();
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front().flatten()
        } else {
            state.statuses.front().cloned().flatten()
        };
        Ok(status)
    }

    async fn get_currency_assignments(&self) -> DeviceResult<Vec<DenominationAssignment>> {
        self.begin(SimCommand::GetAssignments).await?;
        Ok(self.lock().assignments.clone())
    }

    async fn dispense(&self, value: i64, currency: &str) -> DeviceResult<()> {
        self.begin(SimCommand::Dispense).await?;
        let mut state = self.lock();
        let a = state
            .assignments
            .iter_mut()
            .find(|a| a.value == value && a.currency == currency)
            .ok_or_else(|| DeviceError::Rejected(format!("unknown denomination {value}")))?;
        if !a.recyclable || a.stored == 0 {
            return Err(DeviceError::Rejected(format!("cannot pay {value}")));
        }
        a.stored -= 1;
        Ok(())
    }

    async fn set_denomination_route(
        &self,
        value: i64,
        _currency: &str,
        route: RouteCode,
    ) -> DeviceResult<()> {
        self.begin(SimCommand::SetRoute).await?;
        Self::apply_route(&mut self.lock(), value, route)
    }

    async fn set_routes(&self, routes: &[RouteAssignment]) -> DeviceResult<()> {
        self.begin(SimCommand::SetRoutes).await?;
        let mut state = self.lock();
        for entry in routes {
            Self::apply_route(&mut state, entry.value, entry.route)?;
        }
        Ok(())
    }

    async fn set_denomination_inhibit(
        &self,
        value: i64,
        _currency: &str,
        inhibit: bool,
    ) -> DeviceResult<()> {
        self.begin(SimCommand::SetInhibit).await?;
        let mut state = self.lock();
        let a = state
            .assignments
            .iter_mut()
            .find(|a| a.value == value)
            .ok_or_else(|| DeviceError::Rejected(format!("unknown denomination {value}")))?;
        a.inhibited = inhibit;
        Ok(())
    }

    async fn smart_empty(&self) -> DeviceResult<()> {
        self.begin(SimCommand::SmartEmpty).await?;
        let mut state = self.lock();
        for a in state.assignments.iter_mut().filter(|a| a.recyclable) {
            a.stored = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_script_last_value_sticks() {
        let device = SimulatedDevice::new(Some("D1"))
            .with_status_script([Some("IDLE"), None, Some("BUSY")]);
        assert_eq!(device.get_status().await.unwrap().as_deref(), Some("IDLE"));
        assert_eq!(device.get_status().await.unwrap(), None);
        assert_eq!(device.get_status().await.unwrap().as_deref(), Some("BUSY"));
        assert_eq!(device.get_status().await.unwrap().as_deref(), Some("BUSY"));
        assert_eq!(device.calls(SimCommand::GetStatus), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let device = SimulatedDevice::new(Some("D1"));
        device.fail(SimCommand::Enable);
        assert!(device.enable().await.is_err());
        assert!(!device.is_enabled());

        device.recover(SimCommand::Enable);
        device.enable().await.unwrap();
        assert!(device.is_enabled());
        assert_eq!(device.calls(SimCommand::Enable), 2);
    }

    #[tokio::test]
    async fn test_dispense_and_smart_empty() {
        let device = SimulatedDevice::new(Some("D1"))
            .with_assignments(vec![denomination(500, 2, true), denomination(5000, 1, false)]);

        device.dispense(500, "EUR").await.unwrap();
        assert!(device.dispense(5000, "EUR").await.is_err());

        device.smart_empty().await.unwrap();
        let stock: Vec<u32> = device.assignments().iter().map(|a| a.stored).collect();
        assert_eq!(stock, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_default_set_routes_loops_single_routes() {
        struct Counting(SimulatedDevice);

        #[async_trait]
        impl DeviceApi for Counting {
            async fn connect(&self) -> DeviceResult<Option<String>> { self.0.connect().await }
            async fn disconnect(&self) -> DeviceResult<()> { self.0.disconnect().await }
            async fn enable(&self) -> DeviceResult<()> { self.0.enable().await }
            async fn disable(&self) -> DeviceResult<()> { self.0.disable().await }
            async fn enable_payout(&self) -> DeviceResult<()> { self.0.enable_payout().await }
            async fn disable_payout(&self) -> DeviceResult<()> { self.0.disable_payout().await }
            async fn get_status(&self) -> DeviceResult<Option<String>> { self.0.get_status().await }
            async fn get_currency_assignments(&self) -> DeviceResult<Vec<DenominationAssignment>> {
                self.0.get_currency_assignments().await
            }
            async fn dispense(&self, value: i64, currency: &str) -> DeviceResult<()> {
                self.0.dispense(value, currency).await
            }
            async fn set_denomination_route(&self, value: i64, currency: &str, route: RouteCode) -> DeviceResult<()> {
                self.0.set_denomination_route(value, currency, route).await
            }
            async fn set_denomination_inhibit(&self, value: i64, currency: &str, inhibit: bool) -> DeviceResult<()> {
                self.0.set_denomination_inhibit(value, currency, inhibit).await
            }
            async fn smart_empty(&self) -> DeviceResult<()> { self.0.smart_empty().await }
        }

        let device = Counting(SimulatedDevice::new(Some("D1")).with_assignments(vec![
            denomination(100, 1, false),
            denomination(200, 1, false),
        ]));
        let routes: Vec<RouteAssignment> = [100, 200]
            .into_iter()
            .map(|value| RouteAssignment {
                value,
                currency: "EUR".to_string(),
                route: RouteCode::Payout,
            })
            .collect();

        device.set_routes(&routes).await.unwrap();
        assert_eq!(device.0.calls(SimCommand::SetRoute), 2);
        assert!(device.0.assignments().iter().all(|a| a.recyclable));
    }
}
