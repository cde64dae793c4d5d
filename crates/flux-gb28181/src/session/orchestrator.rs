// 点播会话编排
//
// 单任务 actor：会话表只在编排任务内修改，外部通过 `SessionHandle`
// 投递 Invite / Ack / Bye 命令。同一 Call-ID 最多一个活动适配器。

use super::descriptor::SessionDescriptor;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// 重复 INVITE 顶替旧会话时的停止原因
pub const REASON_SUPERSEDED: &str = "prior session superseded";
pub const REASON_BYE: &str = "bye";
pub const REASON_SHUTDOWN: &str = "shutdown";

/// 会话结束回调，参数为结束原因；每个适配器恰好调用一次
pub type EndCallback = Box<dyn FnOnce(&str) + Send>;

/// 运行中的媒体会话
pub trait SessionStream: Send + Sync {
    /// 停止会话，可重复调用
    fn stop(&self, reason: &str);
}

#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// 启动会话；返回错误时不会调用 `on_end`
    async fn create(&self, descriptor: &SessionDescriptor, on_end: EndCallback) -> Result<Box<dyn SessionStream>>;
}

/// 会话生命周期钩子
pub trait SessionHooks: Send + Sync {
    /// ACK 时补全描述（分配端口、选择流类型），返回 false 表示不推流
    fn prepare(&self, _descriptor: &mut SessionDescriptor) -> bool {
        true
    }

    fn on_start(&self, _descriptor: &SessionDescriptor) {}

    fn on_end(&self, _descriptor: &SessionDescriptor, _reason: &str) {}
}

pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

#[derive(Debug)]
pub enum SessionCommand {
    Invite(Box<SessionDescriptor>),
    Ack(String),
    Bye(String),
    /// 适配器自行结束（读写错误）
    Finished { call_id: String, id: u64 },
    ActiveSessions(oneshot::Sender<Vec<String>>),
    Shutdown(oneshot::Sender<()>),
}

struct LiveSession {
    id: u64,
    stream: Box<dyn SessionStream>,
}

/// 会话表，只由编排任务持有
pub struct SessionTable {
    descriptors: HashMap<String, SessionDescriptor>,
    adapters: HashMap<String, LiveSession>,
    factory: Arc<dyn AdapterFactory>,
    hooks: Arc<dyn SessionHooks>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    next_id: u64,
}

impl SessionTable {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        hooks: Arc<dyn SessionHooks>,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            descriptors: HashMap::new(),
            adapters: HashMap::new(),
            factory,
            hooks,
            commands,
            next_id: 0,
        }
    }

    pub fn invite(&mut self, descriptor: SessionDescriptor) {
        let call_id = descriptor.call_id.clone();

        if let Some(prior) = self.adapters.remove(&call_id) {
            tracing::info!(target: "gb28181::session", %call_id, "Stopping superseded session");
            prior.stream.stop(REASON_SUPERSEDED);
        }

        tracing::info!(
            target: "gb28181::session",
            %call_id,
            channel = %descriptor.target_channel_id,
            destination = %descriptor.destination(),
            "Session invited",
        );
        self.descriptors.insert(call_id, descriptor);
    }

    pub async fn ack(&mut self, call_id: &str) {
        if self.adapters.contains_key(call_id) {
            tracing::debug!(target: "gb28181::session", %call_id, "Duplicate ACK ignored");
            return;
        }

        let Some(descriptor) = self.descriptors.get_mut(call_id) else {
            tracing::debug!(target: "gb28181::session", %call_id, "ACK for unknown session");
            return;
        };

        if !self.hooks.prepare(descriptor) {
            tracing::info!(target: "gb28181::session", %call_id, "Streaming disabled for session");
            return;
        }
        let descriptor = descriptor.clone();

        self.next_id += 1;
        let id = self.next_id;
        let on_end = self.end_callback(&descriptor, id);

        self.hooks.on_start(&descriptor);
        match self.factory.create(&descriptor, on_end).await {
            Ok(stream) => {
                tracing::info!(
                    target: "gb28181::session",
                    %call_id,
                    port = descriptor.source_stream_port,
                    "Session started",
                );
                self.adapters.insert(call_id.to_string(), LiveSession { id, stream });
            }
            Err(e) => {
                tracing::warn!(target: "gb28181::session", %call_id, "Failed to start session: {}", e);
                self.hooks.on_end(&descriptor, &format!("start failed: {}", e));
            }
        }
    }

    pub fn bye(&mut self, call_id: &str) {
        self.descriptors.remove(call_id);
        match self.adapters.remove(call_id) {
            Some(live) => {
                tracing::info!(target: "gb28181::session", %call_id, "Session closed by peer");
                live.stream.stop(REASON_BYE);
            }
            None => tracing::debug!(target: "gb28181::session", %call_id, "BYE without live session"),
        }
    }

    /// 适配器自行结束；过期的通知（已被顶替）忽略
    pub fn finished(&mut self, call_id: &str, id: u64) {
        if self.adapters.get(call_id).map(|live| live.id) == Some(id) {
            self.adapters.remove(call_id);
            self.descriptors.remove(call_id);
            tracing::info!(target: "gb28181::session", %call_id, "Session ended");
        }
    }

    pub fn shutdown(&mut self) {
        for (call_id, live) in self.adapters.drain() {
            tracing::debug!(target: "gb28181::session", %call_id, "Stopping session on shutdown");
            live.stream.stop(REASON_SHUTDOWN);
        }
        self.descriptors.clear();
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, call_id: &str) -> Option<&SessionDescriptor> {
        self.descriptors.get(call_id)
    }

    pub fn is_live(&self, call_id: &str) -> bool {
        self.adapters.contains_key(call_id)
    }

    fn end_callback(&self, descriptor: &SessionDescriptor, id: u64) -> EndCallback {
        let hooks = self.hooks.clone();
        let commands = self.commands.clone();
        let descriptor = descriptor.clone();

        Box::new(move |reason: &str| {
            tracing::debug!(target: "gb28181::session", call_id = %descriptor.call_id, %reason, "Stream ended");
            hooks.on_end(&descriptor, reason);
            let _ = commands.send(SessionCommand::Finished {
                call_id: descriptor.call_id.clone(),
                id,
            });
        })
    }

    async fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Invite(descriptor) => self.invite(*descriptor),
            SessionCommand::Ack(call_id) => self.ack(&call_id).await,
            SessionCommand::Bye(call_id) => self.bye(&call_id),
            SessionCommand::Finished { call_id, id } => self.finished(&call_id, id),
            SessionCommand::ActiveSessions(reply) => {
                let _ = reply.send(self.active_sessions());
            }
            SessionCommand::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }
}

pub struct SessionOrchestrator;

impl SessionOrchestrator {
    /// 启动编排任务
    pub fn spawn(factory: Arc<dyn AdapterFactory>, hooks: Arc<dyn SessionHooks>) -> SessionHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = SessionTable::new(factory, hooks, tx.clone());

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if !table.handle(command).await {
                    break;
                }
            }
            table.shutdown();
            tracing::info!(target: "gb28181::session", "Session orchestrator stopped");
        });

        SessionHandle {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// 编排任务句柄；投递不阻塞，关闭后静默忽略
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn invite(&self, descriptor: SessionDescriptor) {
        self.submit(SessionCommand::Invite(Box::new(descriptor)));
    }

    pub fn ack(&self, call_id: &str) {
        self.submit(SessionCommand::Ack(call_id.to_string()));
    }

    pub fn bye(&self, call_id: &str) {
        self.submit(SessionCommand::Bye(call_id.to_string()));
    }

    fn submit(&self, command: SessionCommand) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(command);
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::ActiveSessions(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// 停止所有会话并结束编排任务，可重复调用
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::sdp::SdpSession;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stops: Mutex<Vec<(u64, String)>>,
        created: Mutex<Vec<u64>>,
    }

    struct FakeStream {
        id: u64,
        recorder: Arc<Recorder>,
    }

    impl SessionStream for FakeStream {
        fn stop(&self, reason: &str) {
            self.recorder.stops.lock().unwrap().push((self.id, reason.to_string()));
        }
    }

    struct FakeFactory(Arc<Recorder>);

    #[async_trait]
    impl AdapterFactory for FakeFactory {
        async fn create(&self, _descriptor: &SessionDescriptor, _on_end: EndCallback) -> Result<Box<dyn SessionStream>> {
            let id = {
                let mut created = self.0.created.lock().unwrap();
                let next = created.len() as u64 + 1;
                created.push(next);
                created.len() as u64
            };
            Ok(Box::new(FakeStream {
                id,
                recorder: self.0.clone(),
            }))
        }
    }

    struct DisableHooks;

    impl SessionHooks for DisableHooks {
        fn prepare(&self, _descriptor: &mut SessionDescriptor) -> bool {
            false
        }
    }

    fn descriptor(call_id: &str) -> SessionDescriptor {
        let mut offer = SdpSession::new("34020000002000000001", "127.0.0.1");
        offer.media.push(crate::sip::sdp::SdpMedia {
            media_type: "video".to_string(),
            port: 30000,
            protocol: "TCP/RTP/AVP".to_string(),
            formats: vec![96],
            rtpmap: Vec::new(),
            attributes: Vec::new(),
        });
        SessionDescriptor::from_offer(
            call_id.to_string(),
            "34020000002000000001".to_string(),
            "34020000001310000001".to_string(),
            String::new(),
            offer,
        )
        .unwrap()
    }

    fn table(recorder: Arc<Recorder>, hooks: Arc<dyn SessionHooks>) -> SessionTable {
        let (tx, _rx) = mpsc::unbounded_channel();
        SessionTable::new(Arc::new(FakeFactory(recorder)), hooks, tx)
    }

    #[tokio::test]
    async fn test_invite_ack_bye() {
        let recorder = Arc::new(Recorder::default());
        let mut table = table(recorder.clone(), Arc::new(NoopHooks));

        table.invite(descriptor("c1"));
        assert!(table.descriptor("c1").is_some());
        assert!(!table.is_live("c1"));

        table.ack("c1").await;
        assert!(table.is_live("c1"));

        // ACK 重传不会再建适配器
        table.ack("c1").await;
        assert_eq!(recorder.created.lock().unwrap().len(), 1);

        table.bye("c1");
        assert!(table.descriptor("c1").is_none());
        assert!(table.active_sessions().is_empty());
        assert_eq!(*recorder.stops.lock().unwrap(), vec![(1, REASON_BYE.to_string())]);
    }

    #[tokio::test]
    async fn test_ack_unknown_and_disabled() {
        let recorder = Arc::new(Recorder::default());
        let mut table = table(recorder.clone(), Arc::new(DisableHooks));

        table.ack("missing").await;
        table.invite(descriptor("c1"));
        table.ack("c1").await;

        assert!(recorder.created.lock().unwrap().is_empty());
        assert!(!table.is_live("c1"));
    }

    #[tokio::test]
    async fn test_stale_finished_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let mut table = table(recorder.clone(), Arc::new(NoopHooks));

        table.invite(descriptor("c1"));
        table.ack("c1").await;
        table.invite(descriptor("c1"));
        table.ack("c1").await;

        table.finished("c1", 1);
        assert!(table.is_live("c1"));

        table.finished("c1", 2);
        assert!(!table.is_live("c1"));
    }

    #[tokio::test]
    async fn test_handle_submit_after_shutdown_is_noop() {
        let recorder = Arc::new(Recorder::default());
        let handle = SessionOrchestrator::spawn(Arc::new(FakeFactory(recorder.clone())), Arc::new(NoopHooks));

        handle.invite(descriptor("c1"));
        handle.ack("c1");
        assert_eq!(handle.active_sessions().await, vec!["c1".to_string()]);

        handle.shutdown().await;
        handle.shutdown().await;
        assert!(handle.is_closed());

        handle.invite(descriptor("c2"));
        handle.ack("c2");
        assert!(handle.active_sessions().await.is_empty());
        assert_eq!(*recorder.stops.lock().unwrap(), vec![(1, REASON_SHUTDOWN.to_string())]);
        assert_eq!(recorder.created.lock().unwrap().len(), 1);
    }
}
