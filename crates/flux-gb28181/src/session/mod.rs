// 点播会话：INVITE 描述 + 编排 actor

pub mod descriptor;
pub mod orchestrator;

pub use descriptor::{MediaTransport, SessionDescriptor};
pub use orchestrator::{
    AdapterFactory, EndCallback, NoopHooks, SessionCommand, SessionHandle, SessionHooks, SessionOrchestrator,
    SessionStream, SessionTable, REASON_BYE, REASON_SHUTDOWN, REASON_SUPERSEDED,
};
