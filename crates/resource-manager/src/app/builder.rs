use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tokio::sync::mpsc;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::{DaemonArgs, QosSettings, RegistrySettings, TransportSettings};
use crate::domain::channel::Gateway;
use crate::domain::platform::{ConstraintSink, NoConstraint, Platform};
use crate::domain::policy::{PolicyBridge, PolicyMode};
use crate::domain::qos::{identify_platform, QosOracle};
use crate::domain::{Dispatcher, FaultMonitor, FaultMonitorSettings, RecoveryFlag, SharedState};
use crate::infrastructure::command_server::CommandServer;
use crate::infrastructure::constraint::SysfsConstraint;
use crate::infrastructure::dsp::SysfsDsp;
use crate::infrastructure::fault_source::FileFaultSource;
use crate::infrastructure::gateway::UnixSocketGateway;
use crate::infrastructure::policy_link::{self, PolicyReader, PolicyWriter};

/// Depth of the queue between the event sources and the dispatcher.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let registry = RegistrySettings::from(&self.daemon_args);
        let qos = QosSettings::from(&self.daemon_args);
        let transport = TransportSettings::from(&self.daemon_args);
        let fault = FaultMonitorSettings::from(&self.daemon_args);

        let state = SharedState::new(registry.max_components);
        let recovery = RecoveryFlag::default();

        let dsp = Arc::new(SysfsDsp::new(&qos.dsp_root));
        let platform = match identify_platform(dsp.as_ref()) {
            Ok(platform) => {
                tracing::info!(%platform, "DSP platform identified");
                Some(platform)
            }
            Err(e) => {
                tracing::warn!("unsupported or missing DSP hardware, running in stub mode: {e}");
                None
            }
        };

        let mut oracle = QosOracle::new(dsp, qos.history_depth);
        if platform.is_none() {
            oracle.enter_stub();
        }
        let constraint = create_constraint(platform, &qos);

        let (policy_mode, policy) = self.connect_policy(platform, &transport).await;
        let bridge = PolicyBridge::new(policy_mode, transport.max_in_flight_policy);

        let gateway: Arc<dyn Gateway> = Arc::new(UnixSocketGateway::new(
            &transport.response_prefix,
            transport.response_write_timeout,
        ));

        let (event_sender, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let dispatcher = Dispatcher::new(
            state.clone(),
            gateway,
            bridge,
            oracle,
            recovery.clone(),
            constraint,
        );

        let command_server = CommandServer::new(
            &transport.command_socket,
            event_sender.clone(),
            transport.rebind_delay,
        );
        let listener = command_server.bind().with_context(|| {
            format!(
                "failed to bind command socket {}",
                transport.command_socket.display()
            )
        })?;

        let fault_monitor = FaultMonitor::new(
            Box::new(FileFaultSource::new(&qos.fault_file)),
            state,
            recovery,
            fault,
        );

        let services = ApplicationServices {
            dispatcher,
            events,
            event_sender,
            command_server,
            listener,
            fault_monitor,
            policy,
        };
        Ok(Application::new(services, self.daemon_args))
    }

    /// Connects the Policy Manager, falling back to bypass mode.
    async fn connect_policy(
        &self,
        platform: Option<Platform>,
        transport: &TransportSettings,
    ) -> (PolicyMode, Option<(PolicyReader, PolicyWriter)>) {
        if platform.is_none() {
            tracing::info!("policy manager bypassed on unsupported hardware");
            return (PolicyMode::Bypass, None);
        }
        let Some(path) = &transport.policy_socket else {
            tracing::info!("policy manager disabled");
            return (PolicyMode::Bypass, None);
        };
        match policy_link::connect(path).await {
            Ok(connection) => (
                PolicyMode::Live(Arc::new(connection.link)),
                Some((connection.reader, connection.writer)),
            ),
            Err(e) => {
                tracing::warn!(path = %path.display(), "policy manager unavailable, bypassing it: {e}");
                (PolicyMode::Bypass, None)
            }
        }
    }
}

fn create_constraint(platform: Option<Platform>, qos: &QosSettings) -> Arc<dyn ConstraintSink> {
    match platform {
        Some(platform) => Arc::new(SysfsConstraint::new(platform, &qos.opp_path)),
        None => Arc::new(NoConstraint),
    }
}
