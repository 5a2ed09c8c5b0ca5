use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::batch::BatchError;
use super::batch::BatchReport;
use super::batch::CommandFailure;
use super::batch::FailureReason;
use super::command::has_action;
use super::command::resolve_command;
use super::command::Intent;
use super::device::Device;
use super::filter::Counts;
use super::filter::Filter;
use super::filter::StateFilter;
use super::filter::TypeFilter;
use super::filter::FILTER_ALL;
use super::registry::DeviceRegistry;
use super::selection::SelectionSet;
use super::toggle::PendingIntent;
use super::toggle::ToggleError;
use super::toggle::ToggleOutcome;
use super::view::DeviceView;
use super::view::View;
use crate::remote::HouseApi;
use crate::remote::RemoteError;
use crate::remote::HOUSE_NOT_READY_STATUS;

/// Default bound on a single remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`Engine::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The registry holds a fresh snapshot.
    Updated,
    /// Another refresh was running; nothing was fetched.
    AlreadyInFlight,
    /// The house has never loaded and the remote reports it uninitialized.
    HouseNotReady,
    /// The fetch failed; the previous snapshot is kept.
    Failed,
}

/// Everything the engine mutates, guarded by one lock.
#[derive(Debug, Default)]
struct ControlState {
    registry: DeviceRegistry,
    filter: Filter,
    /// Ids passing `filter`, in snapshot order.
    visible: Vec<String>,
    selection: SelectionSet,
    pending: HashMap<String, PendingIntent>,
    batch_running: bool,
    loading: bool,
    loaded_once: bool,
    awaiting_init: bool,
}

impl ControlState {
    /// Re-run the filter and drop selected ids that are no longer displayed.
    fn refilter(&mut self) {
        self.visible = self
            .filter
            .apply(self.registry.all())
            .into_iter()
            .map(|d| d.id.clone())
            .collect();
        self.selection.retain_visible(&self.visible);
    }

    fn view(&self, house_id: u32) -> View {
        let devices: Vec<DeviceView> = self
            .filter
            .apply(self.registry.all())
            .into_iter()
            .map(|device| {
                let pending = self.pending.get(&device.id);
                DeviceView {
                    id: device.id.clone(),
                    kind: device.kind.clone(),
                    power: device.power,
                    opening: device.opening,
                    label: device.state_label(),
                    on: pending.map_or_else(|| device.is_on(), |p| p.requested),
                    selected: self.selection.contains(&device.id),
                    pending: pending.is_some(),
                    interactive: has_action(&device.available_commands)
                        && !self.batch_running
                        && pending.is_none(),
                }
            })
            .collect();

        let mut types = vec![FILTER_ALL.to_string()];
        types.extend(self.registry.types().iter().cloned());

        View {
            house_id,
            filter: self.filter.clone(),
            types,
            devices,
            selection: self.selection.iter().cloned().collect(),
            counts: Counts::compute(self.registry.all()),
            batch_running: self.batch_running,
            batch_enabled: !self.selection.is_empty() && !self.batch_running,
            select_all_enabled: !self.batch_running && !self.visible.is_empty(),
            loaded: self.loaded_once,
            awaiting_init: self.awaiting_init,
        }
    }
}

/// Operation holding one of the in-flight flags.
enum InFlight {
    Refresh,
    Batch,
    Toggle(String),
}

/// Clears its flag and publishes a new view when dropped, so a cancelled
/// operation never leaves the engine locked.
struct InFlightGuard<'a, A: HouseApi> {
    engine: &'a Engine<A>,
    op: InFlight,
}

impl<A: HouseApi> Drop for InFlightGuard<'_, A> {
    fn drop(&mut self) {
        let mut state = self.engine.lock();
        match &self.op {
            InFlight::Refresh => state.loading = false,
            InFlight::Batch => state.batch_running = false,
            InFlight::Toggle(id) => {
                state.pending.remove(id);
            }
        }
        self.engine.publish(&state);
    }
}

/// Device control orchestrator for one house.
///
/// Owns the registry, the filter and the selection, and is their only
/// mutation surface. Every state change publishes a fresh [`View`] to
/// subscribers. Remote calls are the only suspension points; the state lock
/// is never held across them.
pub struct Engine<A> {
    api: A,
    house_id: u32,
    fetch_timeout: Duration,
    command_timeout: Duration,
    state: Mutex<ControlState>,
    view_tx: watch::Sender<Arc<View>>,
}

impl<A: HouseApi> Engine<A> {
    pub fn new(api: A, house_id: u32) -> Self {
        let state = ControlState::default();
        let (view_tx, _) = watch::channel(Arc::new(state.view(house_id)));
        Self {
            api,
            house_id,
            fetch_timeout: DEFAULT_TIMEOUT,
            command_timeout: DEFAULT_TIMEOUT,
            state: Mutex::new(state),
            view_tx,
        }
    }

    pub fn with_timeouts(mut self, fetch: Duration, command: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.command_timeout = command;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn house_id(&self) -> u32 {
        self.house_id
    }

    /// Receive a new [`View`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<View>> {
        self.view_tx.subscribe()
    }

    /// The latest published view.
    pub fn view(&self) -> Arc<View> {
        self.view_tx.borrow().clone()
    }

    /// The unfiltered registry snapshot.
    pub fn devices(&self) -> Vec<Device> {
        self.lock().registry.all().to_vec()
    }

    /// Devices passing the current filter, in snapshot order.
    pub fn filtered(&self) -> Vec<Device> {
        let state = self.lock();
        let filtered = state.filter.apply(state.registry.all());
        filtered.into_iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ControlState) {
        self.view_tx.send_replace(Arc::new(state.view(self.house_id)));
    }

    fn guard(&self, op: InFlight) -> InFlightGuard<'_, A> {
        InFlightGuard { engine: self, op }
    }

    /// Fetch the device list and install it.
    ///
    /// The registry, the type options, the filtered list and the selection
    /// are updated in one step. A failed fetch leaves all of them untouched.
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = {
            let mut state = self.lock();
            if state.loading {
                debug!("Refresh already in flight");
                return RefreshOutcome::AlreadyInFlight;
            }
            state.loading = true;
            self.guard(InFlight::Refresh)
        };

        let result = match tokio::time::timeout(
            self.fetch_timeout,
            self.api.fetch_devices(self.house_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let mut state = self.lock();
        match result {
            Ok(devices) => {
                info!(
                    "Loaded {} device(s) for house {}",
                    devices.len(),
                    self.house_id
                );
                state.registry.replace(devices);
                state.loaded_once = true;
                state.awaiting_init = false;
                state.refilter();
                RefreshOutcome::Updated
            }
            Err(e) if e.status() == Some(HOUSE_NOT_READY_STATUS) && !state.loaded_once => {
                warn!("House {} is not initialized yet", self.house_id);
                state.awaiting_init = true;
                RefreshOutcome::HouseNotReady
            }
            Err(e) => {
                warn!("Failed to fetch devices of house {}: {}", self.house_id, e);
                RefreshOutcome::Failed
            }
        }
    }

    pub fn set_filter(&self, filter: Filter) {
        let mut state = self.lock();
        state.filter = filter;
        state.refilter();
        self.publish(&state);
    }

    pub fn set_type_filter(&self, kind: TypeFilter) {
        let mut state = self.lock();
        state.filter.kind = kind;
        state.refilter();
        self.publish(&state);
    }

    pub fn set_state_filter(&self, filter: StateFilter) {
        let mut state = self.lock();
        state.filter.state = filter;
        state.refilter();
        self.publish(&state);
    }

    /// Mark a displayed device. Hidden or unknown ids are refused.
    pub fn select(&self, id: &str) -> bool {
        let mut state = self.lock();
        let ControlState {
            selection, visible, ..
        } = &mut *state;
        let accepted = selection.select(id, visible);
        if accepted {
            self.publish(&state);
        }
        accepted
    }

    pub fn deselect(&self, id: &str) -> bool {
        let mut state = self.lock();
        let removed = state.selection.deselect(id);
        if removed {
            self.publish(&state);
        }
        removed
    }

    /// Select every displayed device. Refused while a batch runs or when
    /// nothing is displayed.
    pub fn select_all(&self) -> bool {
        let mut state = self.lock();
        if state.batch_running || state.visible.is_empty() {
            return false;
        }
        let ControlState {
            selection, visible, ..
        } = &mut *state;
        selection.select_all(visible);
        self.publish(&state);
        true
    }

    pub fn clear_selection(&self) {
        let mut state = self.lock();
        state.selection.clear();
        self.publish(&state);
    }

    pub fn selection(&self) -> Vec<String> {
        self.lock().selection.iter().cloned().collect()
    }

    /// Run a batch over the selected devices, in display order.
    pub async fn execute_selected(&self, intent: Intent) -> Result<BatchReport, BatchError> {
        let targets: Vec<String> = {
            let state = self.lock();
            state
                .visible
                .iter()
                .filter(|id| state.selection.contains(id))
                .cloned()
                .collect()
        };
        self.execute_batch(&targets, intent).await
    }

    /// Send `intent` to every target, one at a time.
    ///
    /// A failed target never stops the ones after it. The registry is
    /// refreshed once after the last target, whatever the results.
    pub async fn execute_batch(
        &self,
        targets: &[String],
        intent: Intent,
    ) -> Result<BatchReport, BatchError> {
        let _guard = {
            let mut state = self.lock();
            if targets.is_empty() {
                return Err(BatchError::EmptySelection);
            }
            if state.batch_running {
                return Err(BatchError::AlreadyRunning);
            }
            if let Some(id) = targets.iter().find(|id| state.pending.contains_key(*id)) {
                return Err(BatchError::TogglePending(id.clone()));
            }
            state.batch_running = true;
            self.publish(&state);
            self.guard(InFlight::Batch)
        };

        info!("Batch {}: {} target(s)", intent, targets.len());

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for device_id in targets {
            let command = {
                let state = self.lock();
                state.registry.get(device_id).and_then(|d| {
                    resolve_command(&d.available_commands, intent).map(str::to_string)
                })
            };

            let result = match command {
                Some(command) => self.dispatch(device_id, &command).await,
                None => Err(FailureReason::Unresolvable),
            };

            match result {
                Ok(()) => succeeded += 1,
                Err(reason) => {
                    warn!("Batch {}: {} failed: {}", intent, device_id, reason);
                    failures.push(CommandFailure {
                        device_id: device_id.clone(),
                        reason,
                    });
                }
            }
        }

        self.refresh().await;

        let report = BatchReport {
            intent,
            succeeded,
            total: targets.len(),
            failures,
        };
        info!(
            "Batch {}: {}/{} commands executed",
            intent, report.succeeded, report.total
        );
        Ok(report)
    }

    /// Optimistically switch one device.
    ///
    /// The view shows the requested state and locks the device until the
    /// remote answers. On success the registry is refreshed; on failure the
    /// previous state is displayed again.
    pub async fn toggle(
        &self,
        device_id: &str,
        intent: Intent,
    ) -> Result<ToggleOutcome, ToggleError> {
        let (command, original, guard) = {
            let mut state = self.lock();
            if state.batch_running {
                return Err(ToggleError::BatchInFlight);
            }
            if state.pending.contains_key(device_id) {
                return Err(ToggleError::AlreadyPending(device_id.to_string()));
            }
            let device = state
                .registry
                .get(device_id)
                .ok_or_else(|| ToggleError::UnknownDevice(device_id.to_string()))?;
            let original = device.is_on();

            let Some(command) =
                resolve_command(&device.available_commands, intent).map(str::to_string)
            else {
                warn!("{} has no command for {}", device_id, intent);
                return Ok(ToggleOutcome::RolledBack {
                    device_id: device_id.to_string(),
                    restored: original,
                    reason: FailureReason::Unresolvable,
                });
            };

            state.pending.insert(
                device_id.to_string(),
                PendingIntent {
                    device_id: device_id.to_string(),
                    requested: intent.is_on(),
                    original,
                },
            );
            self.publish(&state);
            (
                command,
                original,
                self.guard(InFlight::Toggle(device_id.to_string())),
            )
        };

        match self.dispatch(device_id, &command).await {
            Ok(()) => {
                let refreshed = self.refresh().await;
                drop(guard);
                // A stale registry still holds the pre-toggle state.
                let on = match refreshed {
                    RefreshOutcome::Updated => self
                        .lock()
                        .registry
                        .get(device_id)
                        .map_or(intent.is_on(), Device::is_on),
                    _ => intent.is_on(),
                };
                Ok(ToggleOutcome::Committed {
                    device_id: device_id.to_string(),
                    on,
                })
            }
            Err(reason) => {
                drop(guard);
                warn!("Command for {} failed: {}", device_id, reason);
                Ok(ToggleOutcome::RolledBack {
                    device_id: device_id.to_string(),
                    restored: original,
                    reason,
                })
            }
        }
    }

    /// Send one resolved command, bounded by the command timeout.
    async fn dispatch(&self, device_id: &str, command: &str) -> Result<(), FailureReason> {
        debug!("Sending {:?} to {}", command, device_id);
        match tokio::time::timeout(
            self.command_timeout,
            self.api.send_command(self.house_id, device_id, command),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FailureReason::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Semaphore;

    use super::*;
    use crate::engine::device::light;
    use crate::engine::device::shutter;
    use crate::remote::mock::MockHouseApi;

    fn sensor(id: &str) -> Device {
        Device {
            id: id.to_string(),
            kind: "sensor".to_string(),
            power: None,
            opening: None,
            available_commands: Vec::new(),
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    async fn loaded(api: MockHouseApi) -> Engine<MockHouseApi> {
        let engine = Engine::new(api, 7);
        assert_eq!(engine.refresh().await, RefreshOutcome::Updated);
        engine
    }

    fn device_view(engine: &Engine<MockHouseApi>, id: &str) -> DeviceView {
        engine
            .view()
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_installs_snapshot() {
        let engine = loaded(MockHouseApi::new(vec![
            shutter("s1", 40),
            light("l1", 0),
            light("l2", 80),
        ]))
        .await;

        let view = engine.view();
        assert!(view.loaded);
        assert_eq!(view.devices.len(), 3);
        assert_eq!(view.types, ["all", "light", "rolling shutter"]);
        assert_eq!(view.counts.lights_on, 1);
        assert_eq!(view.counts.shutters_open, 1);
        assert!(view.select_all_enabled);
        assert!(!view.batch_enabled);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_good() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0), light("l2", 0)])).await;
        let before = engine.devices();

        engine.api().set_devices(vec![light("l3", 0)]);
        engine.api().fail_fetches(Some(503));
        assert_eq!(engine.refresh().await, RefreshOutcome::Failed);
        assert_eq!(engine.devices(), before);

        // A 500 after the first load is an ordinary failure.
        engine.api().fail_fetches(Some(500));
        assert_eq!(engine.refresh().await, RefreshOutcome::Failed);
        assert!(!engine.view().awaiting_init);
    }

    #[tokio::test]
    async fn test_house_not_ready_until_first_load() {
        let api = MockHouseApi::new(vec![light("l1", 0)]);
        api.fail_fetches(Some(500));
        let engine = Engine::new(api, 7);

        assert_eq!(engine.refresh().await, RefreshOutcome::HouseNotReady);
        let view = engine.view();
        assert!(view.awaiting_init);
        assert!(!view.loaded);
        assert_eq!(engine.api().fetch_count(), 1);

        engine.api().fail_fetches(None);
        assert_eq!(engine.refresh().await, RefreshOutcome::Updated);
        let view = engine.view();
        assert!(!view.awaiting_init);
        assert!(view.loaded);
    }

    #[tokio::test]
    async fn test_refresh_is_not_reentrant() {
        let gate = Arc::new(Semaphore::new(0));
        let api = MockHouseApi::new(vec![light("l1", 0)]).with_fetch_gate(gate.clone());
        let engine = Engine::new(api, 7);

        let (first, second) = tokio::join!(engine.refresh(), async {
            wait_until(|| engine.api().fetch_count() == 1).await;
            let second = engine.refresh().await;
            gate.add_permits(1);
            second
        });

        assert_eq!(first, RefreshOutcome::Updated);
        assert_eq!(second, RefreshOutcome::AlreadyInFlight);
        assert_eq!(engine.api().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_timeout_is_a_failure() {
        let gate = Arc::new(Semaphore::new(0));
        let api = MockHouseApi::new(vec![light("l1", 0)]).with_fetch_gate(gate);
        let engine =
            Engine::new(api, 7).with_timeouts(Duration::from_millis(20), DEFAULT_TIMEOUT);

        assert_eq!(engine.refresh().await, RefreshOutcome::Failed);
        assert!(engine.devices().is_empty());
        assert!(!engine.view().loaded);
    }

    #[tokio::test]
    async fn test_filter_change_shrinks_selection() {
        let engine = loaded(MockHouseApi::new(vec![
            light("l1", 50),
            light("l2", 0),
            shutter("s1", 40),
        ]))
        .await;

        assert!(engine.select_all());
        assert_eq!(engine.selection().len(), 3);

        engine.set_state_filter(StateFilter::On);
        assert_eq!(engine.selection(), ["l1"]);
        assert_eq!(engine.view().devices.len(), 1);

        // Hidden devices cannot be selected.
        assert!(!engine.select("s1"));
        assert!(!engine.select("nope"));

        engine.set_filter(Filter {
            kind: TypeFilter::Exact("rolling shutter".to_string()),
            state: StateFilter::All,
        });
        assert!(engine.selection().is_empty());
        assert!(engine.select("s1"));
        assert!(engine.view().batch_enabled);

        engine.clear_selection();
        assert!(!engine.view().batch_enabled);
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_selection() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0), light("l2", 0)])).await;
        assert!(engine.select_all());

        engine.api().set_devices(vec![light("l2", 0)]);
        assert_eq!(engine.refresh().await, RefreshOutcome::Updated);
        assert_eq!(engine.selection(), ["l2"]);
    }

    #[tokio::test]
    async fn test_select_all_needs_visible_devices() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0)])).await;
        engine.set_type_filter(TypeFilter::Exact("garage".to_string()));

        assert!(!engine.select_all());
        assert!(!engine.view().select_all_enabled);
    }

    #[tokio::test]
    async fn test_batch_continues_after_failures() {
        let engine = loaded(MockHouseApi::new(vec![
            light("A", 0),
            sensor("B"),
            light("C", 0),
            light("D", 0),
        ]))
        .await;
        engine.api().reject("D");

        let report = engine
            .execute_batch(&ids(&["A", "B", "C", "D"]), Intent::On)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.total, 4);
        assert_eq!(
            report.failures,
            vec![
                CommandFailure {
                    device_id: "B".to_string(),
                    reason: FailureReason::Unresolvable,
                },
                CommandFailure {
                    device_id: "D".to_string(),
                    reason: FailureReason::Rejected(503),
                },
            ]
        );

        // B never reached the network; C ran after it.
        let attempted: Vec<String> = engine
            .api()
            .attempts()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(attempted, ["A", "C", "D"]);
        assert_eq!(engine.api().attempts()[0].1, "TURN ON");

        // One refresh after the batch picked up the new states.
        assert_eq!(engine.api().fetch_count(), 2);
        assert_eq!(engine.view().counts.lights_on, 2);
        assert!(!engine.view().batch_running);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0)])).await;

        assert_eq!(
            engine.execute_batch(&[], Intent::Off).await,
            Err(BatchError::EmptySelection)
        );
        assert_eq!(
            engine.execute_selected(Intent::Off).await,
            Err(BatchError::EmptySelection)
        );
        assert_eq!(engine.api().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_selected_follows_display_order() {
        let engine = loaded(MockHouseApi::new(vec![
            shutter("s1", 100),
            light("l1", 100),
            light("l2", 100),
        ]))
        .await;
        assert!(engine.select("l2"));
        assert!(engine.select("s1"));

        let report = engine.execute_selected(Intent::Off).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(
            engine.api().attempts(),
            vec![
                ("s1".to_string(), "CLOSE".to_string()),
                ("l2".to_string(), "TURN OFF".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_is_single_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let api = MockHouseApi::new(vec![light("l1", 0), light("l2", 0), light("l3", 0)])
            .with_command_gate(gate.clone());
        let engine = loaded(api).await;

        let targets = ids(&["l1", "l2"]);
        let (first, ()) = tokio::join!(
            engine.execute_batch(&targets, Intent::On),
            async {
                wait_until(|| engine.api().attempts().len() == 1).await;

                let view = engine.view();
                assert!(view.batch_running);
                assert!(!view.batch_enabled);
                assert!(!view.select_all_enabled);
                assert!(view.devices.iter().all(|d| !d.interactive));

                assert_eq!(
                    engine.execute_batch(&ids(&["l3"]), Intent::Off).await,
                    Err(BatchError::AlreadyRunning)
                );
                assert_eq!(
                    engine.toggle("l3", Intent::On).await,
                    Err(ToggleError::BatchInFlight)
                );
                assert!(!engine.select_all());

                gate.add_permits(2);
            }
        );

        let report = first.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.total, 2);
        assert_eq!(engine.api().attempts().len(), 2);
        assert!(!engine.view().batch_running);
    }

    #[tokio::test]
    async fn test_toggle_commits_and_refreshes() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0)])).await;

        let outcome = engine.toggle("l1", Intent::On).await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::Committed {
                device_id: "l1".to_string(),
                on: true,
            }
        );
        assert_eq!(engine.api().fetch_count(), 2);

        let view = device_view(&engine, "l1");
        assert!(view.on);
        assert!(!view.pending);
        assert!(view.interactive);
        assert_eq!(view.power, Some(100));
    }

    #[tokio::test]
    async fn test_toggle_commit_survives_failed_refresh() {
        let engine = loaded(MockHouseApi::new(vec![light("l1", 0)])).await;
        engine.api().fail_fetches(Some(503));

        let outcome = engine.toggle("l1", Intent::On).await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::Committed {
                device_id: "l1".to_string(),
                on: true,
            }
        );
        assert_eq!(engine.api().fetch_count(), 2);
        assert!(!device_view(&engine, "l1").pending);
    }

    #[tokio::test]
    async fn test_toggle_is_optimistic_and_rolls_back() {
        let gate = Arc::new(Semaphore::new(0));
        let api = MockHouseApi::new(vec![light("l1", 0)]).with_command_gate(gate.clone());
        api.reject("l1");
        let engine = loaded(api).await;

        let (outcome, ()) = tokio::join!(engine.toggle("l1", Intent::On), async {
            wait_until(|| engine.api().attempts().len() == 1).await;

            let view = device_view(&engine, "l1");
            assert!(view.on);
            assert!(view.pending);
            assert!(!view.interactive);

            assert_eq!(
                engine.toggle("l1", Intent::Off).await,
                Err(ToggleError::AlreadyPending("l1".to_string()))
            );
            assert_eq!(
                engine.execute_batch(&ids(&["l1"]), Intent::Off).await,
                Err(BatchError::TogglePending("l1".to_string()))
            );

            gate.add_permits(1);
        });

        assert_eq!(
            outcome.unwrap(),
            ToggleOutcome::RolledBack {
                device_id: "l1".to_string(),
                restored: false,
                reason: FailureReason::Rejected(503),
            }
        );

        let view = device_view(&engine, "l1");
        assert!(!view.on);
        assert!(!view.pending);
        assert!(view.interactive);
        // No refresh after a rollback.
        assert_eq!(engine.api().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_toggle_sends_nothing() {
        let engine = loaded(MockHouseApi::new(vec![sensor("b1"), shutter("s1", 0)])).await;

        let outcome = engine.toggle("b1", Intent::On).await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::RolledBack {
                device_id: "b1".to_string(),
                restored: false,
                reason: FailureReason::Unresolvable,
            }
        );
        assert!(engine.api().attempts().is_empty());
        assert!(!device_view(&engine, "b1").interactive);

        assert_eq!(
            engine.toggle("ghost", Intent::On).await,
            Err(ToggleError::UnknownDevice("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_command_timeout_rolls_back() {
        let api = MockHouseApi::new(vec![shutter("s1", 100)]);
        api.stall("s1");
        let engine =
            Engine::new(api, 7).with_timeouts(DEFAULT_TIMEOUT, Duration::from_millis(20));
        assert_eq!(engine.refresh().await, RefreshOutcome::Updated);

        let outcome = engine.toggle("s1", Intent::Off).await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::RolledBack {
                device_id: "s1".to_string(),
                restored: true,
                reason: FailureReason::TimedOut,
            }
        );
        assert!(device_view(&engine, "s1").on);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let engine = Engine::new(MockHouseApi::new(vec![light("l1", 0)]), 7);
        let mut rx = engine.subscribe();
        assert!(!rx.borrow_and_update().loaded);

        engine.refresh().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().devices.len(), 1);

        assert!(engine.select("l1"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().selection, ["l1"]);
    }
}
