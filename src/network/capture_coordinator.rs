//! # Capture Coordinator
//!
//! Opens one capture device per interface and turns everything they deliver
//! into per-connection sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  blocking   ┌─────────────┐         ┌──────────────────────┐
//! │ device (en0) │──── pump ──▶│             │         │ CaptureCoordinator   │
//! └──────────────┘             │ mpsc queue  │────────▶│ - TcpReassembler/if  │
//! ┌──────────────┐  blocking   │             │         │ - session routing    │
//! │ device (en1) │──── pump ──▶│             │         │ - FrameRenderer      │
//! └──────────────┘             └─────────────┘         └──────────────────────┘
//! ```
//!
//! Pumps only move raw frames. Reassembly, session handling and rendering all
//! happen on the single consumer of the queue, so handlers run to completion
//! one event at a time.

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use super::filter_builder::{self, FilterExpression};
use super::packet_source::{CaptureDevice, PacketSource};
use super::reassembler::TcpReassembler;
use super::types::{CapturedPacket, ConnectionKey, SessionId, StreamEvent};
use crate::configuration::config::Config;
use crate::configuration::types::DEFAULT_PORT;
use crate::error_handling::types::CaptureError;
use crate::rendering::FrameRenderer;
use crate::session_management::{ConnectionSession, SessionContext};

/// Raw frames buffered between the pumps and the event loop.
const PACKET_QUEUE: usize = 4096;

pub struct CaptureCoordinator {
    source: Box<dyn PacketSource>,
    filter: FilterExpression,
    buffer_size: Option<i32>,
    server_ports: Vec<u16>,
    context: SessionContext,
    renderer: Box<dyn FrameRenderer>,
    interfaces: Vec<String>,
    reassemblers: Vec<TcpReassembler>,
    sessions: HashMap<(usize, ConnectionKey), ConnectionSession>,
    next_session_id: SessionId,
    running: Arc<AtomicBool>,
    packets: Option<Receiver<CapturedPacket>>,
    pumps: Vec<JoinHandle<()>>,
}

impl CaptureCoordinator {
    /// Builds the capture filter from `config`; nothing is opened yet.
    pub fn new(
        source: Box<dyn PacketSource>,
        config: &Config,
        context: SessionContext,
        renderer: Box<dyn FrameRenderer>,
    ) -> Self {
        Self {
            source,
            filter: filter_builder::build(&config.filter, &config.ports, DEFAULT_PORT),
            buffer_size: config.buffer_size,
            server_ports: config.server_ports(),
            context,
            renderer,
            interfaces: Vec::new(),
            reassemblers: Vec::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
            running: Arc::new(AtomicBool::new(true)),
            packets: None,
            pumps: Vec::new(),
        }
    }

    /// Opens every interface, then starts one pump per device.
    ///
    /// All interfaces are opened before any pump starts, so a failure leaves
    /// nothing running. The error names the interface that could not be opened.
    pub fn listen(&mut self, interfaces: &[String]) -> Result<(), CaptureError> {
        let mut devices = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            match self.source.open(interface, &self.filter, self.buffer_size) {
                Ok(device) => {
                    info!("Listening on {} with filter '{}'", interface, self.filter);
                    devices.push((interface.clone(), device));
                }
                Err(e) => {
                    error!("Unable to open interface {}: {}", interface, e);
                    return Err(e);
                }
            }
        }

        let (tx, rx) = mpsc::channel(PACKET_QUEUE);
        for (name, device) in devices {
            let index = self.interfaces.len();
            self.interfaces.push(name.clone());
            self.reassemblers
                .push(TcpReassembler::new(self.server_ports.clone()));

            let tx = tx.clone();
            let running = Arc::clone(&self.running);
            self.pumps.push(tokio::task::spawn_blocking(move || {
                pump(index, name, device, tx, running)
            }));
        }
        self.packets = Some(rx);
        Ok(())
    }

    /// Processes captured traffic until every device is closed or `shutdown` resolves.
    ///
    /// Live sessions are ended before returning.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), CaptureError>
    where
        F: Future<Output = ()>,
    {
        let mut packets = self.packets.take().ok_or(CaptureError::ChannelFailed)?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => self.handle_packet(packet),
                    None => {
                        info!("All capture sources closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    pub fn handle_packet(&mut self, packet: CapturedPacket) {
        let events = match self.reassemblers.get_mut(packet.interface) {
            Some(reassembler) => reassembler.process(packet.link, &packet.data),
            None => {
                warn!("Packet from unknown interface index {}", packet.interface);
                return;
            }
        };
        for event in events {
            self.dispatch(packet.interface, event, packet.timestamp);
        }
    }

    /// Routes one lifecycle event of interface `interface` to its session.
    ///
    /// `captured_at` is the capture time of the packet the event came from.
    pub fn dispatch(
        &mut self,
        interface: usize,
        event: StreamEvent,
        captured_at: DateTime<Utc>,
    ) {
        let frames = match event {
            StreamEvent::Start { key, missed_syn } => {
                let id = self.allocate_session_id();
                let name = self
                    .interfaces
                    .get(interface)
                    .map(String::as_str)
                    .unwrap_or("unknown");
                let session = ConnectionSession::new(id, key, name, missed_syn, &self.context);
                match self.sessions.insert((interface, key), session) {
                    Some(mut replaced) => replaced.on_end(),
                    None => Vec::new(),
                }
            }
            StreamEvent::Data {
                key,
                direction,
                payload,
            } => match self.sessions.get_mut(&(interface, key)) {
                Some(session) => session.on_data(direction, &payload, captured_at),
                None => {
                    trace!("No session for {}, dropping {} bytes", key, payload.len());
                    Vec::new()
                }
            },
            StreamEvent::End { key } => match self.sessions.remove(&(interface, key)) {
                Some(mut session) => session.on_end(),
                None => {
                    trace!("Duplicate end for {}", key);
                    Vec::new()
                }
            },
        };

        for frame in &frames {
            self.renderer.render(frame);
        }
    }

    /// Stops the pumps and ends every live session, oldest first.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        let mut live: Vec<ConnectionSession> = self.sessions.drain().map(|(_, s)| s).collect();
        live.sort_by_key(|s| s.id());
        if !live.is_empty() {
            debug!("Ending {} live session(s)", live.len());
        }
        for mut session in live {
            for frame in session.on_end() {
                self.renderer.render(&frame);
            }
        }
    }

    fn allocate_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, interface: usize, key: &ConnectionKey) -> Option<&ConnectionSession> {
        self.sessions.get(&(interface, *key))
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn filter(&self) -> &FilterExpression {
        &self.filter
    }

    pub fn pump_count(&self) -> usize {
        self.pumps.len()
    }
}

/// Moves frames from one blocking device into the queue until told to stop.
fn pump(
    index: usize,
    name: String,
    mut device: Box<dyn CaptureDevice>,
    tx: Sender<CapturedPacket>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match device.next_packet() {
            Ok(Some((link, data))) => {
                let packet = CapturedPacket {
                    interface: index,
                    link,
                    timestamp: Utc::now(),
                    data,
                };
                if tx.blocking_send(packet).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(CaptureError::SourceClosed) => {
                info!("Capture on {} finished", name);
                break;
            }
            Err(e) => {
                error!("Capture on {} stopped: {}", name, e);
                break;
            }
        }
    }
    debug!("Pump for {} exited", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::response_status::ResponseStatusCatalog;
    use crate::decoding::framed_decoder::{encode_call, encode_reply, FramedDecoderFactory};
    use crate::decoding::types::{MethodLabel, TracedFrame};
    use crate::network::types::{Direction, LinkKind};
    use etherparse::PacketBuilder;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    type Opened = Arc<Mutex<Vec<(String, String)>>>;

    enum Script {
        Frames(Vec<Vec<u8>>),
        Idle,
    }

    struct ScriptedSource {
        scripts: Mutex<HashMap<String, Script>>,
        opened: Opened,
        broken: Vec<String>,
    }

    impl ScriptedSource {
        fn new(opened: Opened) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                opened,
                broken: Vec::new(),
            }
        }

        fn with_script(self, interface: &str, script: Script) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(interface.to_string(), script);
            self
        }
    }

    impl PacketSource for ScriptedSource {
        fn open(
            &self,
            interface: &str,
            filter: &FilterExpression,
            _buffer_size: Option<i32>,
        ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            if self.broken.iter().any(|b| b == interface) {
                return Err(CaptureError::InterfaceOpen {
                    interface: interface.to_string(),
                    reason: "No such device exists".to_string(),
                });
            }
            self.opened
                .lock()
                .unwrap()
                .push((interface.to_string(), filter.to_string()));
            let script = self
                .scripts
                .lock()
                .unwrap()
                .remove(interface)
                .unwrap_or(Script::Frames(Vec::new()));
            Ok(Box::new(ScriptedDevice(script, VecDeque::new())))
        }
    }

    struct ScriptedDevice(Script, VecDeque<Vec<u8>>);

    impl CaptureDevice for ScriptedDevice {
        fn next_packet(&mut self) -> Result<Option<(LinkKind, Vec<u8>)>, CaptureError> {
            match &mut self.0 {
                Script::Frames(frames) => {
                    self.1.extend(frames.drain(..));
                    match self.1.pop_front() {
                        Some(frame) => Ok(Some((LinkKind::Ethernet, frame))),
                        None => Err(CaptureError::SourceClosed),
                    }
                }
                Script::Idle => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct CollectingRenderer(Arc<Mutex<Vec<TracedFrame>>>);

    impl FrameRenderer for CollectingRenderer {
        fn render(&mut self, frame: &TracedFrame) {
            self.0.lock().unwrap().push(frame.clone());
        }
    }

    fn context() -> SessionContext {
        SessionContext::new(
            Arc::new(FramedDecoderFactory),
            Arc::new(ResponseStatusCatalog::default()),
            Some(Arc::from(vec!["getBalance".to_string()])),
        )
    }

    fn coordinator(source: ScriptedSource, renderer: CollectingRenderer) -> CaptureCoordinator {
        CaptureCoordinator::new(
            Box::new(source),
            &Config::default(),
            context(),
            Box::new(renderer),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn key(client_port: u16) -> ConnectionKey {
        let client: SocketAddr = format!("10.0.0.1:{}", client_port).parse().unwrap();
        let server: SocketAddr = "10.0.0.2:4040".parse().unwrap();
        ConnectionKey::new(client, server)
    }

    fn tcp(from_client: bool, seq: u32, syn: bool, fin: bool, payload: &[u8]) -> Vec<u8> {
        let (src, dst, sport, dport) = if from_client {
            ([10, 0, 0, 1], [10, 0, 0, 2], 50000, 4040)
        } else {
            ([10, 0, 0, 2], [10, 0, 0, 1], 4040, 50000)
        };
        let mut builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4(src, dst, 64)
            .tcp(sport, dport, seq, 64240);
        if syn {
            builder = builder.syn();
        }
        if !(syn && from_client) {
            builder = builder.ack(1);
        }
        if fin {
            builder = builder.fin();
        }
        let mut out = Vec::new();
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[tokio::test]
    async fn test_listen_opens_every_interface_with_filter() {
        let _ = env_logger::builder().is_test(true).try_init();
        let opened = Opened::default();
        let mut c = coordinator(ScriptedSource::new(opened.clone()), CollectingRenderer::default());

        c.listen(&names(&["en0", "en1"])).unwrap();

        assert_eq!(c.filter().as_str(), "ip proto \\tcp and port 4040");
        assert_eq!(
            *opened.lock().unwrap(),
            vec![
                ("en0".to_string(), "ip proto \\tcp and port 4040".to_string()),
                ("en1".to_string(), "ip proto \\tcp and port 4040".to_string())
            ]
        );
        assert_eq!(c.interfaces(), &names(&["en0", "en1"])[..]);
        assert_eq!(c.pump_count(), 2);
    }

    #[tokio::test]
    async fn test_listen_fails_fast_on_bad_interface() {
        let opened = Opened::default();
        let mut source = ScriptedSource::new(opened.clone());
        source.broken.push("bad0".to_string());
        let mut c = coordinator(source, CollectingRenderer::default());

        let result = c.listen(&names(&["en0", "bad0", "en1"]));

        match result {
            Err(CaptureError::InterfaceOpen { interface, .. }) => assert_eq!(interface, "bad0"),
            other => panic!("expected an interface error, got {:?}", other),
        }
        assert_eq!(opened.lock().unwrap().len(), 1);
        assert!(c.interfaces().is_empty());
        assert_eq!(c.pump_count(), 0);
    }

    #[tokio::test]
    async fn test_session_ids_increase_across_interfaces() {
        let mut c = coordinator(
            ScriptedSource::new(Opened::default()),
            CollectingRenderer::default(),
        );
        c.listen(&names(&["en0", "en1"])).unwrap();

        let mut ids = Vec::new();
        for (i, port) in [50001u16, 50002, 50003, 50004].iter().enumerate() {
            let interface = i % 2;
            c.dispatch(
                interface,
                StreamEvent::Start {
                    key: key(*port),
                    missed_syn: false,
                },
                Utc::now(),
            );
            ids.push(c.session(interface, &key(*port)).unwrap().id());
        }

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(c.session(1, &key(50002)).unwrap().interface(), "en1");
        assert_eq!(c.session_count(), 4);
    }

    #[tokio::test]
    async fn test_end_detaches_session() {
        let renderer = CollectingRenderer::default();
        let mut c = coordinator(ScriptedSource::new(Opened::default()), renderer.clone());
        c.listen(&names(&["en0"])).unwrap();
        let k = key(50010);

        c.dispatch(0, StreamEvent::Start { key: k, missed_syn: false }, Utc::now());
        c.dispatch(0, StreamEvent::End { key: k }, Utc::now());
        c.dispatch(0, StreamEvent::End { key: k }, Utc::now());
        c.dispatch(
            0,
            StreamEvent::Data {
                key: k,
                direction: Direction::Outgoing,
                payload: encode_call(1, "late", b""),
            },
            Utc::now(),
        );

        assert_eq!(c.session_count(), 0);
        assert!(renderer.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traffic_is_traced_end_to_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let call = encode_call(7, "getBalance", b"acct");
        let reply = encode_reply(7, 0, b"100");
        let frames = vec![
            tcp(true, 99, true, false, b""),
            tcp(false, 499, true, false, b""),
            tcp(true, 100, false, false, &call),
            tcp(false, 500, false, false, &reply),
            tcp(true, 100 + call.len() as u32, false, true, b""),
            tcp(false, 500 + reply.len() as u32, false, true, b""),
        ];
        let source = ScriptedSource::new(Opened::default()).with_script("en0", Script::Frames(frames));
        let renderer = CollectingRenderer::default();
        let mut c = coordinator(source, renderer.clone());

        c.listen(&names(&["en0"])).unwrap();
        c.run(std::future::pending()).await.unwrap();

        let traced = renderer.0.lock().unwrap();
        assert_eq!(traced.len(), 2);
        assert_eq!(traced[0].direction, Direction::Outgoing);
        assert_eq!(traced[1].direction, Direction::Incoming);
        assert_eq!(traced[1].method, MethodLabel::Known("getBalance".to_string()));
        assert_eq!(traced[1].status.as_ref().unwrap().to_string(), "OK");
        assert_eq!(c.session_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_keep_capture_time() {
        let renderer = CollectingRenderer::default();
        let mut c = coordinator(ScriptedSource::new(Opened::default()), renderer.clone());
        c.listen(&names(&["en0"])).unwrap();
        let captured_at = Utc::now() - chrono::Duration::seconds(5);

        for data in [
            tcp(true, 99, true, false, b""),
            tcp(false, 499, true, false, b""),
            tcp(true, 100, false, false, &encode_call(1, "ping", b"")),
        ] {
            c.handle_packet(CapturedPacket {
                interface: 0,
                link: LinkKind::Ethernet,
                timestamp: captured_at,
                data,
            });
        }

        let traced = renderer.0.lock().unwrap();
        assert_eq!(traced.len(), 1);
        assert_eq!(traced[0].timestamp, captured_at);
    }

    #[tokio::test]
    async fn test_shutdown_ends_live_sessions() {
        let source = ScriptedSource::new(Opened::default()).with_script("en0", Script::Idle);
        let mut c = coordinator(source, CollectingRenderer::default());
        c.listen(&names(&["en0"])).unwrap();
        c.dispatch(0, StreamEvent::Start { key: key(50020), missed_syn: true }, Utc::now());
        c.dispatch(0, StreamEvent::Start { key: key(50021), missed_syn: false }, Utc::now());
        assert_eq!(c.session_count(), 2);

        c.run(async {}).await.unwrap();

        assert_eq!(c.session_count(), 0);
        assert!(c.run(async {}).await.is_err());
    }
}
