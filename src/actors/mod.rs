pub mod agent_runtime;
pub mod builtin;
pub mod handler;
pub mod handler_registry;
pub mod message_router;
pub mod messages;

pub use agent_runtime::{AgentIdentity, AgentRuntime};
pub use handler::{Handler, HandlerContext, RequestHandler};
pub use handler_registry::HandlerRegistry;
pub use message_router::MessageRouterHandle;
pub use messages::{AgentName, ContentKind, Message, MessageContent, RequestId};
