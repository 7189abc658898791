//! Simulated hardware.
//!
//! All simulated devices share one [`SimHandle`], so a test can script the
//! sensor and inspect what the governor did to the CPU policy.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Backend;
use crate::thermal::{CpuPolicy, GatewayError, PowerControl, TemperatureSensor};

const DEFAULT_FREQUENCIES_KHZ: &[u32] = &[
    300_000, 422_400, 652_800, 729_600, 883_200, 960_000, 1_036_800, 1_190_400, 1_267_200,
    1_497_600, 1_574_400, 1_728_000, 1_958_400, 2_265_600,
];

const DEFAULT_TEMPERATURE_C: i32 = 35;

#[derive(Debug)]
struct SimState {
    temperature_c: i32,
    /// Readings consumed before falling back to `temperature_c`; `None`
    /// entries simulate read failures.
    scripted: VecDeque<Option<i32>>,
    ceilings_khz: Vec<u32>,
    online: Vec<bool>,
    frequencies_khz: Vec<u32>,
    policy_available: bool,
    ceiling_writes: Vec<(usize, u32)>,
    shutdown_requests: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Simulated SoC with `cores` cores, all online at the highest
    /// frequency.
    pub fn new(cores: usize) -> Self {
        let max = DEFAULT_FREQUENCIES_KHZ[DEFAULT_FREQUENCIES_KHZ.len() - 1];
        Self {
            state: Arc::new(Mutex::new(SimState {
                temperature_c: DEFAULT_TEMPERATURE_C,
                scripted: VecDeque::new(),
                ceilings_khz: vec![max; cores],
                online: vec![true; cores],
                frequencies_khz: DEFAULT_FREQUENCIES_KHZ.to_vec(),
                policy_available: true,
                ceiling_writes: Vec::new(),
                shutdown_requests: Vec::new(),
            })),
        }
    }

    pub fn backend(&self) -> Backend {
        Backend {
            sensor: Box::new(SimSensor(self.clone())),
            policy: Box::new(SimPolicy(self.clone())),
            power: Box::new(SimPower(self.clone())),
        }
    }

    pub fn set_temperature(&self, temperature_c: i32) {
        self.state.lock().temperature_c = temperature_c;
    }

    /// Queue readings for upcoming polls. `None` makes that read fail.
    pub fn script<I: IntoIterator<Item = Option<i32>>>(&self, readings: I) {
        self.state.lock().scripted.extend(readings);
    }

    pub fn set_frequencies(&self, frequencies_khz: Vec<u32>) {
        self.state.lock().frequencies_khz = frequencies_khz;
    }

    pub fn set_policy_available(&self, available: bool) {
        self.state.lock().policy_available = available;
    }

    /// Rewrite the ceiling of every core, as a user or another daemon would.
    pub fn set_ceiling_externally(&self, khz: u32) {
        let mut state = self.state.lock();
        state.ceilings_khz.iter_mut().for_each(|c| *c = khz);
    }

    pub fn set_online(&self, core: usize, online: bool) {
        self.state.lock().online[core] = online;
    }

    pub fn ceiling(&self, core: usize) -> u32 {
        self.state.lock().ceilings_khz[core]
    }

    pub fn is_online(&self, core: usize) -> bool {
        self.state.lock().online[core]
    }

    /// Every successful `(core, khz)` ceiling write so far.
    pub fn ceiling_writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().ceiling_writes.clone()
    }

    pub fn shutdown_requests(&self) -> usize {
        self.state.lock().shutdown_requests.len()
    }
}

struct SimSensor(SimHandle);

#[async_trait]
impl TemperatureSensor for SimSensor {
    async fn read_temperature(&mut self, sensor_id: u32) -> Result<i32, GatewayError> {
        let mut state = self.0.state.lock();
        match state.scripted.pop_front() {
            Some(Some(temperature_c)) => Ok(temperature_c),
            Some(None) => Err(GatewayError::Sensor {
                sensor_id,
                reason: "simulated read failure".into(),
            }),
            None => Ok(state.temperature_c),
        }
    }
}

struct SimPolicy(SimHandle);

impl SimPolicy {
    fn check_core(state: &SimState, core: usize) -> Result<(), GatewayError> {
        if !state.policy_available {
            return Err(GatewayError::PolicyUnavailable {
                core,
                reason: "simulated policy outage".into(),
            });
        }
        match state.online.get(core) {
            Some(true) => Ok(()),
            Some(false) => Err(GatewayError::PolicyUnavailable {
                core,
                reason: "core is offline".into(),
            }),
            None => Err(GatewayError::PolicyUnavailable {
                core,
                reason: "no such core".into(),
            }),
        }
    }
}

#[async_trait]
impl CpuPolicy for SimPolicy {
    fn core_count(&self) -> usize {
        self.0.state.lock().online.len()
    }

    async fn ceiling(&mut self, core: usize) -> Result<u32, GatewayError> {
        let state = self.0.state.lock();
        Self::check_core(&state, core)?;
        Ok(state.ceilings_khz[core])
    }

    async fn set_ceiling(&mut self, core: usize, khz: u32) -> Result<(), GatewayError> {
        let mut state = self.0.state.lock();
        Self::check_core(&state, core).map_err(|e| GatewayError::SetCeiling {
            core,
            khz,
            reason: e.to_string(),
        })?;
        state.ceilings_khz[core] = khz;
        state.ceiling_writes.push((core, khz));
        Ok(())
    }

    async fn is_online(&mut self, core: usize) -> Result<bool, GatewayError> {
        let state = self.0.state.lock();
        state
            .online
            .get(core)
            .copied()
            .ok_or_else(|| GatewayError::Online {
                core,
                reason: "no such core".into(),
            })
    }

    async fn bring_online(&mut self, core: usize) -> Result<(), GatewayError> {
        let mut state = self.0.state.lock();
        match state.online.get_mut(core) {
            Some(online) => {
                *online = true;
                Ok(())
            }
            None => Err(GatewayError::Online {
                core,
                reason: "no such core".into(),
            }),
        }
    }

    async fn frequencies(&mut self, core: usize) -> Result<Vec<u32>, GatewayError> {
        let state = self.0.state.lock();
        Self::check_core(&state, core)?;
        Ok(state.frequencies_khz.clone())
    }
}

struct SimPower(SimHandle);

#[async_trait]
impl PowerControl for SimPower {
    async fn request_shutdown(&mut self, reason: &str) -> Result<(), GatewayError> {
        self.0.state.lock().shutdown_requests.push(reason.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_replay_script_then_hold_temperature() {
        let sim = SimHandle::new(1);
        sim.set_temperature(42);
        sim.script([Some(50), None]);
        let mut backend = sim.backend();

        assert_eq!(backend.sensor.read_temperature(0).await.unwrap(), 50);
        assert!(backend.sensor.read_temperature(0).await.is_err());
        assert_eq!(backend.sensor.read_temperature(0).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn should_refuse_policy_access_to_offline_core() {
        let sim = SimHandle::new(2);
        sim.set_online(1, false);
        let mut backend = sim.backend();

        assert!(backend.policy.ceiling(1).await.is_err());
        assert!(backend.policy.set_ceiling(1, 960_000).await.is_err());
        assert!(sim.ceiling_writes().is_empty());
    }
}
