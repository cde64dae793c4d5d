// 会话编排：重复 INVITE 顶替、适配器自行结束、关闭
use async_trait::async_trait;
use flux_gb28181::error::{GbError, Result};
use flux_gb28181::session::{
    AdapterFactory, EndCallback, SessionDescriptor, SessionHooks, SessionOrchestrator, SessionStream,
    REASON_SHUTDOWN, REASON_SUPERSEDED,
};
use flux_gb28181::sip::sdp::{SdpMedia, SdpSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct CountingStream {
    stops: Arc<Mutex<Vec<String>>>,
}

impl SessionStream for CountingStream {
    fn stop(&self, reason: &str) {
        self.stops.lock().unwrap().push(reason.to_string());
    }
}

/// 记录每个适配器的 stop 调用，并保留结束回调供测试触发
#[derive(Default)]
struct Factory {
    stops: Mutex<Vec<Arc<Mutex<Vec<String>>>>>,
    callbacks: Mutex<Vec<Option<EndCallback>>>,
    fail_ports: Mutex<Vec<u16>>,
}

impl Factory {
    fn stops_of(&self, index: usize) -> Vec<String> {
        self.stops.lock().unwrap()[index].lock().unwrap().clone()
    }

    fn created(&self) -> usize {
        self.stops.lock().unwrap().len()
    }

    fn end(&self, index: usize, reason: &str) {
        let callback = self.callbacks.lock().unwrap()[index].take();
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}

struct Shared(Arc<Factory>);

#[async_trait]
impl AdapterFactory for Shared {
    async fn create(&self, descriptor: &SessionDescriptor, on_end: EndCallback) -> Result<Box<dyn SessionStream>> {
        self.0.create(descriptor, on_end)
    }
}

impl Factory {
    fn create(&self, descriptor: &SessionDescriptor, on_end: EndCallback) -> Result<Box<dyn SessionStream>> {
        if self.fail_ports.lock().unwrap().contains(&descriptor.source_stream_port) {
            return Err(GbError::Transport("port busy".to_string()));
        }
        let stops = Arc::new(Mutex::new(Vec::new()));
        self.stops.lock().unwrap().push(stops.clone());
        self.callbacks.lock().unwrap().push(Some(on_end));
        Ok(Box::new(CountingStream { stops }))
    }
}

#[derive(Default)]
struct Hooks {
    next_port: AtomicUsize,
    started: Mutex<Vec<String>>,
    ended: Mutex<Vec<(String, String)>>,
}

impl SessionHooks for Hooks {
    fn prepare(&self, descriptor: &mut SessionDescriptor) -> bool {
        descriptor.source_stream_port = 40000 + self.next_port.fetch_add(1, Ordering::SeqCst) as u16;
        descriptor.sim = "013800138000".to_string();
        true
    }

    fn on_start(&self, descriptor: &SessionDescriptor) {
        self.started.lock().unwrap().push(descriptor.call_id.clone());
    }

    fn on_end(&self, descriptor: &SessionDescriptor, reason: &str) {
        self.ended
            .lock()
            .unwrap()
            .push((descriptor.call_id.clone(), reason.to_string()));
    }
}

fn descriptor(call_id: &str) -> SessionDescriptor {
    let mut offer = SdpSession::new("34020000002000000001", "127.0.0.1");
    offer.media.push(SdpMedia {
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

#[tokio::test]
async fn duplicate_invite_supersedes_prior_session() {
    let factory = Arc::new(Factory::default());
    let hooks = Arc::new(Hooks::default());
    let sessions = SessionOrchestrator::spawn(Arc::new(Shared(factory.clone())), hooks.clone());

    sessions.invite(descriptor("dup"));
    sessions.ack("dup");
    sessions.invite(descriptor("dup"));
    sessions.ack("dup");

    assert_eq!(sessions.active_sessions().await, vec!["dup".to_string()]);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.stops_of(0), vec![REASON_SUPERSEDED.to_string()]);
    assert!(factory.stops_of(1).is_empty());

    sessions.shutdown().await;
    assert_eq!(factory.stops_of(1), vec![REASON_SHUTDOWN.to_string()]);
    assert_eq!(factory.stops_of(0).len(), 1);
}

#[tokio::test]
async fn self_ended_session_is_removed() {
    let factory = Arc::new(Factory::default());
    let hooks = Arc::new(Hooks::default());
    let sessions = SessionOrchestrator::spawn(Arc::new(Shared(factory.clone())), hooks.clone());

    sessions.invite(descriptor("a"));
    sessions.ack("a");
    sessions.invite(descriptor("b"));
    sessions.ack("b");
    assert_eq!(sessions.active_sessions().await.len(), 2);
    assert_eq!(*hooks.started.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);

    factory.end(0, "source closed");
    assert_eq!(sessions.active_sessions().await, vec!["b".to_string()]);
    assert_eq!(
        *hooks.ended.lock().unwrap(),
        vec![("a".to_string(), "source closed".to_string())]
    );

    // 已结束的会话再收到 BYE 不会重复停止
    sessions.bye("a");
    assert_eq!(sessions.active_sessions().await, vec!["b".to_string()]);
    assert!(factory.stops_of(0).is_empty());

    sessions.shutdown().await;
}

#[tokio::test]
async fn stale_end_from_superseded_adapter_keeps_new_session() {
    let factory = Arc::new(Factory::default());
    let sessions = SessionOrchestrator::spawn(Arc::new(Shared(factory.clone())), Arc::new(Hooks::default()));

    sessions.invite(descriptor("x"));
    sessions.ack("x");
    sessions.invite(descriptor("x"));
    sessions.ack("x");
    assert_eq!(sessions.active_sessions().await.len(), 1);
    assert_eq!(factory.created(), 2);

    // 旧适配器被停止后回调结束
    factory.end(0, REASON_SUPERSEDED);
    assert_eq!(sessions.active_sessions().await, vec!["x".to_string()]);

    sessions.shutdown().await;
}

#[tokio::test]
async fn failed_start_reports_end() {
    let factory = Arc::new(Factory::default());
    factory.fail_ports.lock().unwrap().push(40000);
    let hooks = Arc::new(Hooks::default());
    let sessions = SessionOrchestrator::spawn(Arc::new(Shared(factory.clone())), hooks.clone());

    sessions.invite(descriptor("f"));
    sessions.ack("f");
    assert!(sessions.active_sessions().await.is_empty());

    let ended = hooks.ended.lock().unwrap().clone();
    assert_eq!(ended.len(), 1);
    assert!(ended[0].1.contains("port busy"));

    sessions.shutdown().await;
}
