//! Main command loop: demultiplexes client commands and Policy Manager
//! verdicts and drives the registry, the bridge and the oracle.

use std::sync::Arc;

use rm_proto::{
    ClientCommand, ClientResponse, CommandKind, PolicyResponse, PolicyVerdict, Verdict,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::category::Category;
use crate::domain::channel::{deliver, Gateway, ResponseChannel};
use crate::domain::platform::ConstraintSink;
use crate::domain::policy::{PendingRequest, PolicyBridge, Submission};
use crate::domain::qos::{QosOracle, QosVerdict};
use crate::domain::registry::{ArbitrationStatus, ComponentKey, DenyReason, OmxState};
use crate::domain::state::{RecoveryFlag, SharedState};

/// Input of the dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    Client(ClientCommand),
    Policy(PolicyResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Dispatcher {
    state: SharedState,
    gateway: Arc<dyn Gateway>,
    bridge: PolicyBridge,
    oracle: QosOracle,
    recovery: RecoveryFlag,
    constraint: Arc<dyn ConstraintSink>,
}

impl Dispatcher {
    pub fn new(
        state: SharedState,
        gateway: Arc<dyn Gateway>,
        bridge: PolicyBridge,
        oracle: QosOracle,
        recovery: RecoveryFlag,
        constraint: Arc<dyn ConstraintSink>,
    ) -> Self {
        Self {
            state,
            gateway,
            bridge,
            oracle,
            recovery,
            constraint,
        }
    }

    /// Processes events until `ExitTI`, cancellation or the end of the input.
    pub async fn run(mut self, mut events: mpsc::Receiver<DispatchEvent>, token: CancellationToken) {
        tracing::info!(policy_bypassed = self.bridge.is_bypassed(), oracle = ?self.oracle.mode(), "dispatcher started");
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("dispatcher shutdown requested");
                    break;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                tracing::info!("event sources closed, stopping dispatcher");
                break;
            };

            let flow = match event {
                DispatchEvent::Client(command) => self.handle_command(command),
                DispatchEvent::Policy(response) => {
                    self.handle_policy_response(response);
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                tracing::info!("ExitTI received, stopping dispatcher");
                break;
            }
        }
    }

    pub fn handle_command(&mut self, command: ClientCommand) -> Flow {
        tracing::debug!(
            kind = ?command.kind,
            handle = command.handle,
            pid = command.pid,
            param1 = command.param1,
            param2 = command.param2,
            param3 = command.param3,
            "client command"
        );
        match command.kind {
            CommandKind::Init | CommandKind::Exit => {}
            CommandKind::ExitTI => return Flow::Exit,
            CommandKind::OpenPipe => self.open_pipe(&command, None),
            CommandKind::ReusePipe => self.reuse_pipe(&command),
            CommandKind::RequestResource => self.request_resource(&command),
            CommandKind::WaitForResource => self.wait_for_resource(&command),
            CommandKind::FreeResource => self.free_resource(&command, false),
            CommandKind::FreeAndCloseResource => self.free_resource(&command, true),
            CommandKind::CancelWaitForResource => self.cancel_wait(&command),
            CommandKind::StateSet => self.state_set(&command),
        }
        Flow::Continue
    }

    pub fn handle_policy_response(&mut self, response: PolicyResponse) {
        let key = ComponentKey::new(response.handle, response.pid);
        tracing::debug!(component = %key, verdict = ?response.verdict, request_id = ?response.request_id, "policy verdict");

        match response.verdict {
            PolicyVerdict::Preempted => {
                let reply = request_reply(key, response.component_type, Verdict::Preempt);
                self.conclude(key, ArbitrationStatus::WaitingForClient, DenyReason::Policy, reply);
            }
            PolicyVerdict::DenyPolicy => {
                if self.bridge.resolve(response.request_id, key).is_none() {
                    tracing::debug!(component = %key, "deny without a pending request");
                }
                let verdict = self.unless_recovering(Verdict::Deny);
                let reply = request_reply(key, response.component_type, verdict);
                self.conclude(key, ArbitrationStatus::WaitingForClient, DenyReason::Policy, reply);
            }
            PolicyVerdict::GrantPolicy => match self.bridge.resolve(response.request_id, key) {
                Some(pending) => self.admit_granted(pending),
                None => tracing::warn!(component = %key, request_id = ?response.request_id, "grant for unknown request ignored"),
            },
        }

        for (pending, e) in self.bridge.pump() {
            tracing::warn!(component = %pending.key, "failed to forward queued policy request: {e}");
            let verdict = self.unless_recovering(Verdict::Deny);
            let reply = request_reply(pending.key, pending.component_type, verdict);
            self.conclude(pending.key, ArbitrationStatus::WaitingForClient, DenyReason::Policy, reply);
        }
    }

    fn open_pipe(&mut self, command: &ClientCommand, reused: Option<Arc<dyn ResponseChannel>>) {
        let key = ComponentKey::new(command.handle, command.pid);
        let channel = match reused {
            Some(channel) => Some(channel),
            None => self.open_channel(command.pid),
        };
        self.register(key, channel, command.param2);
    }

    fn reuse_pipe(&mut self, command: &ClientCommand) {
        let sibling = ComponentKey::new(command.param4, command.pid);
        let channel = self
            .state
            .lock()
            .registry
            .lookup(sibling)
            .and_then(|record| record.channel.clone());
        if channel.is_none() {
            tracing::debug!(component = %sibling, "no channel to reuse, opening a new one");
        }
        self.open_pipe(command, channel);
    }

    fn request_resource(&mut self, command: &ClientCommand) {
        let key = ComponentKey::new(command.handle, command.pid);
        let known = self.state.lock().registry.lookup(key).is_some();
        let channel = if known { None } else { self.open_channel(command.pid) };
        if !self.register(key, channel, command.param2) {
            return;
        }

        if let Some(record) = self.state.lock().registry.lookup_mut(key) {
            if let Some(category) = Category::from_type_index(command.param1) {
                record.category = Some(category);
            }
            record.status = ArbitrationStatus::WaitingForPolicy;
            record.reason = DenyReason::None;
        }

        let pending = PendingRequest {
            key,
            component_type: command.param1,
            requested_cycles: command.param2,
            requested_memory: u64::from(command.param3),
        };
        match self.bridge.submit(pending) {
            Ok(Submission::Bypassed) => self.admit_granted(pending),
            Ok(Submission::Sent(request_id)) => {
                tracing::debug!(component = %key, request_id, "waiting for policy");
            }
            Ok(Submission::Queued) => {
                tracing::debug!(component = %key, "policy request queued");
            }
            Err(e) => {
                tracing::warn!(component = %key, "failed to send policy request: {e}");
                let verdict = self.unless_recovering(Verdict::Deny);
                let reply = request_reply(key, command.param1, verdict);
                self.conclude(key, ArbitrationStatus::WaitingForClient, DenyReason::Policy, reply);
            }
        }
    }

    /// Runs the QoS check for a request the policy layer let through.
    fn admit_granted(&mut self, pending: PendingRequest) {
        let key = pending.key;
        if self.recovery.in_progress() {
            tracing::info!(component = %key, "fault recovery in progress, failing request");
            let reply = request_reply(key, pending.component_type, Verdict::FatalError);
            self.conclude(key, ArbitrationStatus::WaitingForClient, DenyReason::None, reply);
            return;
        }

        if self.bridge.is_bypassed() {
            tracing::info!(component = %key, cycles = pending.requested_cycles, "policy bypassed, resource granted");
            let reply = request_reply(key, pending.component_type, Verdict::Grant);
            self.conclude(key, ArbitrationStatus::ComponentActive, DenyReason::None, reply);
            return;
        }

        match self.oracle.admit(pending.requested_cycles, pending.requested_memory) {
            QosVerdict::Admit => {
                tracing::info!(component = %key, cycles = pending.requested_cycles, "resource granted");
                let reply = request_reply(key, pending.component_type, Verdict::Grant);
                self.conclude(key, ArbitrationStatus::ComponentActive, DenyReason::None, reply);
            }
            QosVerdict::Deny => {
                tracing::info!(component = %key, cycles = pending.requested_cycles, "insufficient DSP resources, releasing policy grant");
                if let Some(record) = self.state.lock().registry.lookup_mut(key) {
                    record.reason = DenyReason::Resource;
                }
                self.bridge.free_resources(key, pending.component_type);
            }
        }
    }

    fn wait_for_resource(&mut self, command: &ClientCommand) {
        let key = ComponentKey::new(command.handle, command.pid);
        let channel = {
            let mut state = self.state.lock();
            let Some(record) = state.registry.lookup_mut(key) else {
                tracing::debug!(component = %key, "wait for unknown component ignored");
                return;
            };
            match record.reason {
                DenyReason::Policy => record.status = ArbitrationStatus::WaitingForPolicy,
                DenyReason::Resource => record.status = ArbitrationStatus::WaitingForResource,
                DenyReason::None => {}
            }
            record.channel.clone()
        };
        deliver(channel.as_ref(), ClientResponse::answer(command, Verdict::None));
    }

    fn free_resource(&mut self, command: &ClientCommand, close: bool) {
        let key = ComponentKey::new(command.handle, command.pid);
        self.bridge.cancel_queued(key);
        self.bridge.free_policy(key, command.param1);

        let (removed, waiters, total) = {
            let mut state = self.state.lock();
            let Some((record, change)) = state.remove_component(key) else {
                tracing::debug!(component = %key, "free for unknown component ignored");
                return;
            };
            let waiters: Vec<_> = state
                .registry
                .iter()
                .filter(|r| r.state == OmxState::WaitForResources)
                .map(|r| (r.key, r.channel.clone()))
                .collect();
            let total = change.is_change().then(|| state.counters.total());
            (record, waiters, total)
        };

        for (waiter, channel) in waiters {
            let notice = ClientResponse {
                kind: CommandKind::WaitForResource,
                handle: waiter.handle,
                pid: waiter.pid,
                param1: 0,
                verdict: Verdict::ResourceAcquired,
            };
            deliver(channel.as_ref(), notice);
        }
        if let Some(total) = total {
            self.constraint.apply(total);
        }
        if close {
            if let Some(channel) = &removed.channel {
                channel.close();
            }
        }
        tracing::info!(component = %key, closed = close, "resources freed");
    }

    fn cancel_wait(&mut self, command: &ClientCommand) {
        let key = ComponentKey::new(command.handle, command.pid);
        let dropped = self.bridge.cancel_queued(key);
        let channel = {
            let mut state = self.state.lock();
            let Some(record) = state.registry.lookup_mut(key) else {
                return;
            };
            if matches!(
                record.status,
                ArbitrationStatus::WaitingForPolicy | ArbitrationStatus::WaitingForResource
            ) {
                record.status = ArbitrationStatus::None;
                record.reason = DenyReason::None;
            }
            record.channel.clone()
        };
        tracing::debug!(component = %key, dropped_queued = dropped, "wait cancelled");
        deliver(channel.as_ref(), ClientResponse::answer(command, Verdict::None));
    }

    fn state_set(&mut self, command: &ClientCommand) {
        let key = ComponentKey::new(command.handle, command.pid);
        let Some(new_state) = OmxState::from_wire(command.param2) else {
            tracing::warn!(component = %key, state = command.param2, "unknown OMX state");
            return;
        };

        let total = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let Some(record) = state.registry.lookup_mut(key) else {
                tracing::debug!(component = %key, "state change for unknown component ignored");
                return;
            };
            if record.category.is_none() {
                record.category = Category::from_type_index(command.param1);
            }
            let change = state.counters.transition(record, new_state);
            change.is_change().then(|| {
                tracing::info!(component = %key, ?change, total = state.counters.total(), "committed cycles changed");
                state.counters.total()
            })
        };

        if let Some(total) = total {
            self.constraint.apply(total);
        }
        if new_state == OmxState::WaitForResources {
            self.wait_for_resource(command);
        }
    }

    /// Registers `key`; on a full registry the client is answered with `Deny`.
    fn register(&mut self, key: ComponentKey, channel: Option<Arc<dyn ResponseChannel>>, cpu_budget: u32) -> bool {
        let result = self
            .state
            .lock()
            .registry
            .register(key, channel.clone(), cpu_budget)
            .map(|_| ());
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(component = %key, "cannot register component: {e}");
                let reply = request_reply(key, 0, Verdict::Deny);
                deliver(channel.as_ref(), reply);
                false
            }
        }
    }

    fn open_channel(&self, pid: u32) -> Option<Arc<dyn ResponseChannel>> {
        match self.gateway.open(pid) {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(pid, "failed to open response channel: {e}");
                None
            }
        }
    }

    /// Updates the record's status and sends `reply`, unless the component is gone.
    fn conclude(&self, key: ComponentKey, status: ArbitrationStatus, reason: DenyReason, reply: ClientResponse) {
        let channel = {
            let mut state = self.state.lock();
            let Some(record) = state.registry.lookup_mut(key) else {
                tracing::debug!(component = %key, verdict = ?reply.verdict, "component gone, verdict dropped");
                return;
            };
            record.status = status;
            record.reason = reason;
            record.channel.clone()
        };
        deliver(channel.as_ref(), reply);
    }

    fn unless_recovering(&self, verdict: Verdict) -> Verdict {
        if self.recovery.in_progress() {
            Verdict::FatalError
        } else {
            verdict
        }
    }
}

fn request_reply(key: ComponentKey, component_type: u32, verdict: Verdict) -> ClientResponse {
    ClientResponse {
        kind: CommandKind::RequestResource,
        handle: key.handle,
        pid: key.pid,
        param1: component_type,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rm_proto::{ComponentType, PolicyCommand};
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::fault_monitor::{FaultKind, FaultMonitor, FaultMonitorSettings, MonitorPhase};
    use crate::domain::mock::{MockConstraint, MockDsp, MockFaultSource, MockGateway, MockPolicyLink};
    use crate::domain::policy::PolicyMode;

    const MP3: u32 = ComponentType::Mp3Decoder as u32;
    const MPEG4: u32 = ComponentType::Mpeg4Decoder as u32;

    struct Harness {
        dispatcher: Dispatcher,
        state: SharedState,
        gateway: Arc<MockGateway>,
        link: Arc<MockPolicyLink>,
        dsp: Arc<MockDsp>,
        constraint: Arc<MockConstraint>,
        recovery: RecoveryFlag,
    }

    impl Harness {
        fn new(bypass: bool, max_components: usize) -> Self {
            let state = SharedState::new(max_components);
            let gateway = Arc::new(MockGateway::default());
            let link = Arc::new(MockPolicyLink::default());
            let dsp = Arc::new(MockDsp::new(500, 100));
            let constraint = Arc::new(MockConstraint::default());
            let recovery = RecoveryFlag::default();
            let mode = if bypass {
                PolicyMode::Bypass
            } else {
                PolicyMode::Live(link.clone())
            };
            let dispatcher = Dispatcher::new(
                state.clone(),
                gateway.clone(),
                PolicyBridge::new(mode, 1),
                QosOracle::new(dsp.clone(), 5),
                recovery.clone(),
                constraint.clone(),
            );
            Self {
                dispatcher,
                state,
                gateway,
                link,
                dsp,
                constraint,
                recovery,
            }
        }

        fn live() -> Self {
            Self::new(false, 16)
        }

        fn send(&mut self, command: ClientCommand) -> Flow {
            self.dispatcher.handle_command(command)
        }

        fn open(&mut self, handle: u64, pid: u32, budget: u32) {
            self.send(ClientCommand::new(CommandKind::OpenPipe, handle, pid).with_params(0, budget, 0));
        }

        fn request(&mut self, handle: u64, pid: u32, ty: u32, cycles: u32) {
            self.send(ClientCommand::new(CommandKind::RequestResource, handle, pid).with_params(ty, cycles, 0));
        }

        fn set_state(&mut self, handle: u64, pid: u32, ty: u32, state: OmxState) {
            self.send(ClientCommand::new(CommandKind::StateSet, handle, pid).with_params(ty, state.to_wire(), 0));
        }

        fn policy(&mut self, request_id: Option<u64>, verdict: PolicyVerdict, handle: u64, pid: u32) {
            self.dispatcher.handle_policy_response(PolicyResponse {
                request_id,
                verdict,
                handle,
                pid,
                component_type: MP3,
            });
        }

        /// Grants the most recent RequestPolicy.
        fn grant_last(&mut self) {
            let last = self
                .link
                .requests()
                .into_iter()
                .rev()
                .find(|r| r.command == PolicyCommand::RequestPolicy)
                .expect("a policy request");
            self.policy(Some(last.request_id), PolicyVerdict::GrantPolicy, last.handle, last.pid);
        }

        fn verdicts(&self, pid: u32) -> Vec<Verdict> {
            self.gateway
                .channel(pid)
                .map(|c| c.responses().iter().map(|r| r.verdict).collect())
                .unwrap_or_default()
        }

        fn status(&self, handle: u64, pid: u32) -> Option<ArbitrationStatus> {
            self.state
                .lock()
                .registry
                .lookup(ComponentKey::new(handle, pid))
                .map(|r| r.status)
        }

        fn policy_commands(&self) -> Vec<PolicyCommand> {
            self.link.requests().iter().map(|r| r.command).collect()
        }
    }

    #[test]
    fn granted_request_becomes_active() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForPolicy));

        h.grant_last();

        assert_eq!(h.verdicts(100), vec![Verdict::Grant]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::ComponentActive));
        let record_category = h.state.lock().registry.lookup(ComponentKey::new(1, 100)).and_then(|r| r.category);
        assert_eq!(record_category, Some(Category::Audio));
    }

    #[test]
    fn qos_denial_releases_the_policy_grant() {
        let mut h = Harness::live();
        h.dsp.set_load(480);
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        h.grant_last();

        assert_eq!(
            h.policy_commands(),
            vec![PolicyCommand::RequestPolicy, PolicyCommand::FreeResources]
        );
        assert!(!h.verdicts(100).contains(&Verdict::Grant));
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForPolicy));

        // the policy manager answers the release with a deny
        h.policy(None, PolicyVerdict::DenyPolicy, 1, 100);
        assert_eq!(h.verdicts(100), vec![Verdict::Deny]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForClient));
    }

    #[test]
    fn executing_adds_budget_to_category() {
        let mut h = Harness::live();
        h.open(2, 200, 30);
        h.set_state(2, 200, MPEG4, OmxState::Executing);

        {
            let state = h.state.lock();
            assert_eq!(state.counters.get(Category::Video), 30);
            assert_eq!(state.counters.total(), 30);
        }
        assert_eq!(h.constraint.applied(), vec![30]);

        h.set_state(2, 200, MPEG4, OmxState::Idle);
        assert_eq!(h.state.lock().counters.total(), 0);
        assert_eq!(h.constraint.applied(), vec![30, 0]);
    }

    #[test]
    fn unsupported_hardware_grants_without_policy_round_trip() {
        let mut h = Harness::new(true, 16);
        h.dispatcher.oracle.enter_stub();
        h.dsp.set_load(500);

        h.open(1, 100, 50);
        h.request(1, 100, MP3, 400);

        assert_eq!(h.verdicts(100), vec![Verdict::Grant]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::ComponentActive));
        assert!(h.link.requests().is_empty());
        assert_eq!(h.dsp.open_count(), 0);
    }

    #[test]
    fn bypassed_policy_grants_whatever_the_dsp_load() {
        let mut h = Harness::new(true, 16);
        h.dsp.set_load(480);
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);

        assert_eq!(h.verdicts(100), vec![Verdict::Grant]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::ComponentActive));
        assert_eq!(h.dsp.open_count(), 0);
    }

    #[test]
    fn bypassed_policy_still_fails_requests_during_recovery() {
        let mut h = Harness::new(true, 16);
        h.open(1, 100, 50);
        h.recovery.begin();
        h.request(1, 100, MP3, 50);

        assert_eq!(h.verdicts(100), vec![Verdict::FatalError]);
    }

    #[test]
    fn concurrent_requests_are_serialized() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.open(2, 200, 50);
        h.request(1, 100, MP3, 50);
        h.request(2, 200, MP3, 50);

        assert_eq!(h.link.requests().len(), 1);
        assert_eq!(h.link.requests()[0].handle, 1);

        h.grant_last();
        let requests = h.link.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].handle, 2);
        assert_eq!(h.verdicts(200), Vec::<Verdict>::new());

        h.grant_last();
        assert_eq!(h.verdicts(200), vec![Verdict::Grant]);
    }

    #[test]
    fn request_registers_unknown_component() {
        let mut h = Harness::live();
        h.request(5, 500, MP3, 10);
        assert_eq!(h.gateway.open_count(), 1);
        assert_eq!(h.status(5, 500), Some(ArbitrationStatus::WaitingForPolicy));
    }

    #[test]
    fn deny_and_preempt_park_the_component() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        let id = h.link.requests()[0].request_id;
        h.policy(Some(id), PolicyVerdict::DenyPolicy, 1, 100);
        assert_eq!(h.verdicts(100), vec![Verdict::Deny]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForClient));

        h.open(2, 100, 20);
        h.policy(None, PolicyVerdict::Preempted, 2, 100);
        assert_eq!(h.verdicts(100), vec![Verdict::Deny, Verdict::Preempt]);
        assert_eq!(h.status(2, 100), Some(ArbitrationStatus::WaitingForClient));
    }

    #[test]
    fn verdicts_during_recovery_are_fatal() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.open(2, 200, 50);
        h.request(1, 100, MP3, 50);
        h.recovery.begin();

        h.grant_last();
        assert_eq!(h.verdicts(100), vec![Verdict::FatalError]);

        h.request(2, 200, MP3, 50);
        let id = h.link.requests().last().map(|r| r.request_id);
        h.policy(id, PolicyVerdict::DenyPolicy, 2, 200);
        assert_eq!(h.verdicts(200), vec![Verdict::FatalError]);
    }

    #[test]
    fn free_notifies_waiters_and_removes_record() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.open(2, 200, 30);
        h.open(3, 300, 30);
        h.set_state(1, 100, MP3, OmxState::Executing);
        h.set_state(2, 200, MP3, OmxState::WaitForResources);

        h.send(ClientCommand::new(CommandKind::FreeResource, 1, 100).with_params(MP3, 0, 0));

        assert_eq!(h.status(1, 100), None);
        assert_eq!(h.state.lock().counters.total(), 0);
        assert_eq!(h.constraint.applied(), vec![50, 0]);
        assert_eq!(h.policy_commands(), vec![PolicyCommand::FreePolicy]);
        assert_eq!(h.verdicts(200), vec![Verdict::None, Verdict::ResourceAcquired]);
        assert_eq!(h.verdicts(300), Vec::<Verdict>::new());
        assert!(!h.gateway.channel(100).expect("channel").is_closed());
    }

    #[test]
    fn free_and_close_closes_the_channel() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.send(ClientCommand::new(CommandKind::FreeAndCloseResource, 1, 100));
        assert_eq!(h.state.lock().registry.len(), 0);
        assert!(h.gateway.channel(100).expect("channel").is_closed());
    }

    #[test]
    fn freeing_unknown_component_still_releases_policy() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.send(ClientCommand::new(CommandKind::FreeResource, 1, 999).with_params(MP3, 0, 0));
        assert_eq!(h.state.lock().registry.len(), 1);
        assert_eq!(h.policy_commands(), vec![PolicyCommand::FreePolicy]);
        assert_eq!(h.link.requests()[0].pid, 999);
        assert!(h.constraint.applied().is_empty());
    }

    #[test]
    fn wait_echoes_and_tracks_reason() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        let id = h.link.requests()[0].request_id;
        h.policy(Some(id), PolicyVerdict::DenyPolicy, 1, 100);

        h.send(ClientCommand::new(CommandKind::WaitForResource, 1, 100));
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForPolicy));
        assert_eq!(h.verdicts(100), vec![Verdict::Deny, Verdict::None]);
    }

    #[test]
    fn wait_without_reason_keeps_status() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.send(ClientCommand::new(CommandKind::WaitForResource, 1, 100));
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::None));
        assert_eq!(h.verdicts(100), vec![Verdict::None]);

        h.dsp.set_load(480);
        h.request(1, 100, MP3, 50);
        h.grant_last();
        h.send(ClientCommand::new(CommandKind::WaitForResource, 1, 100));
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForResource));
    }

    #[test]
    fn cancel_wait_rolls_back_status_and_backlog() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.open(2, 200, 50);
        h.request(1, 100, MP3, 50);
        h.request(2, 200, MP3, 50);

        h.send(ClientCommand::new(CommandKind::CancelWaitForResource, 2, 200));
        assert_eq!(h.status(2, 200), Some(ArbitrationStatus::None));

        h.grant_last();
        assert_eq!(h.link.requests().len(), 1);
    }

    #[test]
    fn full_registry_denies_new_component() {
        let mut h = Harness::new(false, 1);
        h.open(1, 100, 50);
        h.open(2, 200, 50);

        assert_eq!(h.state.lock().registry.len(), 1);
        assert_eq!(h.verdicts(200), vec![Verdict::Deny]);
    }

    #[test]
    fn reuse_pipe_shares_sibling_channel() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.send(
            ClientCommand::new(CommandKind::ReusePipe, 2, 100)
                .with_params(0, 20, 0)
                .with_param4(1),
        );
        assert_eq!(h.gateway.open_count(), 1);

        h.send(
            ClientCommand::new(CommandKind::ReusePipe, 3, 300)
                .with_params(0, 20, 0)
                .with_param4(1),
        );
        assert_eq!(h.gateway.open_count(), 2);
        assert_eq!(h.state.lock().registry.len(), 3);
    }

    #[test]
    fn policy_link_failure_denies() {
        let mut h = Harness::live();
        h.link.set_failing(true);
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        assert_eq!(h.verdicts(100), vec![Verdict::Deny]);
        assert_eq!(h.status(1, 100), Some(ArbitrationStatus::WaitingForClient));
    }

    #[test]
    fn policy_link_failure_during_recovery_is_fatal() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.open(2, 200, 50);
        h.request(1, 100, MP3, 50);
        h.request(2, 200, MP3, 50);

        h.recovery.begin();
        h.link.set_failing(true);
        // resolving the first request forwards the queued second one
        h.policy(None, PolicyVerdict::DenyPolicy, 1, 100);
        assert_eq!(h.verdicts(100), vec![Verdict::FatalError]);
        assert_eq!(h.verdicts(200), vec![Verdict::FatalError]);

        h.open(3, 300, 50);
        h.request(3, 300, MP3, 50);
        assert_eq!(h.verdicts(300), vec![Verdict::FatalError]);
    }

    #[test]
    fn exit_ti_stops_and_init_is_ignored() {
        let mut h = Harness::live();
        assert_eq!(h.send(ClientCommand::new(CommandKind::Init, 0, 1)), Flow::Continue);
        assert_eq!(h.send(ClientCommand::new(CommandKind::Exit, 0, 1)), Flow::Continue);
        assert_eq!(h.send(ClientCommand::new(CommandKind::ExitTI, 0, 1)), Flow::Exit);
        assert!(h.state.lock().registry.is_empty());
    }

    #[test(tokio::test)]
    async fn run_stops_on_exit_ti() {
        let h = Harness::live();
        let state = h.state.clone();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.dispatcher.run(rx, CancellationToken::new()));

        tx.send(DispatchEvent::Client(
            ClientCommand::new(CommandKind::OpenPipe, 1, 100).with_params(0, 10, 0),
        ))
        .await
        .expect("send");
        tx.send(DispatchEvent::Client(ClientCommand::new(CommandKind::ExitTI, 0, 0)))
            .await
            .expect("send");

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dispatcher stops")
            .expect("join");
        assert_eq!(state.lock().registry.len(), 1);
    }

    #[test(tokio::test)]
    async fn fault_preempts_active_components_until_they_free() {
        let mut h = Harness::live();
        h.open(1, 100, 50);
        h.request(1, 100, MP3, 50);
        h.grant_last();
        h.open(2, 200, 30);
        h.request(2, 200, MPEG4, 30);
        h.grant_last();
        assert_eq!(h.status(2, 200), Some(ArbitrationStatus::ComponentActive));

        let (source, trigger) = MockFaultSource::new();
        let settings = FaultMonitorSettings {
            attach_attempts: 3,
            attach_backoff: Duration::from_millis(5),
            drain_attempts: 400,
            drain_interval: Duration::from_millis(5),
        };
        let monitor = FaultMonitor::new(Box::new(source), h.state.clone(), h.recovery.clone(), settings);
        let mut phase = monitor.subscribe();
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor.run(token.clone()));

        phase.wait_for(|p| *p == MonitorPhase::Armed).await.expect("armed");
        trigger.send(FaultKind::MmuFault).await.expect("trigger");
        phase.wait_for(|p| *p == MonitorPhase::Draining).await.expect("draining");

        assert!(h.recovery.in_progress());
        assert_eq!(h.verdicts(100), vec![Verdict::Grant, Verdict::FatalError]);
        assert_eq!(h.verdicts(200), vec![Verdict::Grant, Verdict::FatalError]);

        h.send(ClientCommand::new(CommandKind::FreeAndCloseResource, 1, 100));
        h.send(ClientCommand::new(CommandKind::FreeAndCloseResource, 2, 200));
        assert_eq!(h.state.lock().registry.len(), 0);

        phase.wait_for(|p| *p == MonitorPhase::Armed).await.expect("re-armed");
        assert!(!h.recovery.in_progress());

        token.cancel();
        assert!(task.await.expect("join").is_ok());
    }
}
