//! Directory agent: agent discovery by service name and remote kill.

pub mod guard;
pub mod registry;

use crate::actors::agent_runtime::{AgentIdentity, AgentRuntime};
use crate::actors::handler_registry::HandlerRegistry;
use crate::actors::message_router::MessageRouterHandle;
use crate::actors::messages::{AgentName, AgentRecord, MessageContent};
use crate::config::Settings;
use crate::error::AgentError;
use registry::{RegistryHandler, REGISTRY_HANDLER, REGISTRY_KINDS};
use tokio::time::Duration;

pub const DIRECTORY_SERVICE: &str = "/service/directory";

/// Start the directory agent under the configured name and secret.
pub async fn start_directory(
    router: MessageRouterHandle,
    settings: &Settings,
) -> Result<AgentRuntime, AgentError> {
    let mut handlers = HandlerRegistry::with_builtins();
    handlers.register_reusable(REGISTRY_HANDLER, REGISTRY_KINDS, || {
        Box::new(RegistryHandler::new())
    });

    let identity = AgentIdentity::new(
        settings.directory.name.clone(),
        DIRECTORY_SERVICE,
        settings.directory.shared_secret.clone(),
    );
    AgentRuntime::start(identity, handlers, router, settings).await
}

/// Records registered under exactly `service_name`.
pub async fn lookup_service(
    runtime: &AgentRuntime,
    service_name: &str,
) -> Result<Vec<AgentRecord>, AgentError> {
    lookup_service_within(runtime, service_name, runtime.ask_timeout()).await
}

/// `lookup_service` bounded by `within` instead of the configured ask timeout.
pub async fn lookup_service_within(
    runtime: &AgentRuntime,
    service_name: &str,
    within: Duration,
) -> Result<Vec<AgentRecord>, AgentError> {
    let reply = runtime
        .ask(
            runtime.directory_name().clone(),
            MessageContent::AgentNameAsk {
                service_name: service_name.to_string(),
            },
            within,
        )
        .await?;
    records_from(reply.content)
}

/// Records whose service name starts with `prefix`.
pub async fn lookup_prefix(
    runtime: &AgentRuntime,
    prefix: &str,
) -> Result<Vec<AgentRecord>, AgentError> {
    let reply = runtime
        .ask_default(
            runtime.directory_name().clone(),
            MessageContent::AgentNameAllAsk {
                prefix: prefix.to_string(),
            },
        )
        .await?;
    records_from(reply.content)
}

/// Ask the directory to kill `name`. Returns whether the target confirmed.
pub async fn kill_agent(
    runtime: &AgentRuntime,
    name: AgentName,
    admin_secret: &str,
) -> Result<bool, AgentError> {
    let reply = runtime
        .ask_default(
            runtime.directory_name().clone(),
            MessageContent::KillAgentAsk {
                name,
                admin_secret: admin_secret.to_string(),
            },
        )
        .await?;
    match reply.content {
        MessageContent::KillTell { killed } => Ok(killed),
        other => Err(AgentError::UnexpectedReply(format!("{:?}", other.kind()))),
    }
}

fn records_from(content: MessageContent) -> Result<Vec<AgentRecord>, AgentError> {
    match content {
        MessageContent::AgentNameTell { records } => Ok(records),
        other => Err(AgentError::UnexpectedReply(format!("{:?}", other.kind()))),
    }
}
