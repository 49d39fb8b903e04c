//! TCP stream reassembly for one interface.
//!
//! Raw frames go in, connection lifecycle events come out:
//!
//! ```text
//! frame ──▶ etherparse ──▶ flow lookup ──▶ per-direction sequencing ──▶ Start / Data / End
//! ```
//!
//! Each direction delivers its bytes strictly in sequence order. Segments that
//! arrive early are held back (up to [`MAX_OUT_OF_ORDER`] per direction),
//! retransmitted overlap is trimmed. A flow ends once both directions have
//! delivered everything up to their FIN, or on any RST. The final sequence
//! numbers of recently closed flows are kept so late retransmissions do not
//! open a new flow.

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};

use super::types::{ConnectionKey, Direction, LinkKind, StreamEvent};

/// Early segments kept per direction while waiting for a gap to fill.
pub const MAX_OUT_OF_ORDER: usize = 64;

/// Closed flows remembered for dropping late segments.
pub const MAX_CLOSED_FLOWS: usize = 256;

/// `a` comes strictly after `b` in sequence space.
fn seq_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// The part of a segment starting at `seq` that lies at or after `expected`.
fn fresh_bytes(seq: u32, payload: &[u8], expected: u32) -> Option<&[u8]> {
    let skip = expected.wrapping_sub(seq) as usize;
    payload.get(skip..).filter(|rest| !rest.is_empty())
}

#[derive(Debug, Default)]
struct HalfStream {
    next_seq: Option<u32>,
    pending: BTreeMap<u32, Vec<u8>>,
    /// Sequence number right after the last data byte, once a FIN was seen.
    fin_seq: Option<u32>,
}

impl HalfStream {
    fn close_at(&mut self, fin_seq: u32) {
        self.fin_seq = Some(fin_seq);
        self.next_seq.get_or_insert(fin_seq);
    }

    /// FIN seen and every byte before it delivered.
    fn finished(&self) -> bool {
        match (self.fin_seq, self.next_seq) {
            (Some(fin), Some(next)) => !seq_after(fin, next),
            _ => false,
        }
    }

    fn accept(&mut self, seq: u32, payload: &[u8]) -> Vec<Vec<u8>> {
        let expected = *self.next_seq.get_or_insert(seq);
        let mut ready = Vec::new();

        if seq_after(seq, expected) {
            if self.pending.len() < MAX_OUT_OF_ORDER {
                self.pending.entry(seq).or_insert_with(|| payload.to_vec());
            } else {
                debug!("out-of-order queue full, dropping segment at seq {}", seq);
            }
            return ready;
        }

        if let Some(fresh) = fresh_bytes(seq, payload, expected) {
            self.next_seq = Some(expected.wrapping_add(fresh.len() as u32));
            ready.push(fresh.to_vec());
        }
        self.drain_pending(&mut ready);
        ready
    }

    fn drain_pending(&mut self, ready: &mut Vec<Vec<u8>>) {
        while let Some(expected) = self.next_seq {
            let seq = match self
                .pending
                .keys()
                .copied()
                .find(|&s| !seq_after(s, expected))
            {
                Some(seq) => seq,
                None => return,
            };
            if let Some(data) = self.pending.remove(&seq) {
                if let Some(fresh) = fresh_bytes(seq, &data, expected) {
                    self.next_seq = Some(expected.wrapping_add(fresh.len() as u32));
                    ready.push(fresh.to_vec());
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Flow {
    outgoing: HalfStream,
    incoming: HalfStream,
}

impl Flow {
    fn half_mut(&mut self, direction: Direction) -> &mut HalfStream {
        match direction {
            Direction::Outgoing => &mut self.outgoing,
            Direction::Incoming => &mut self.incoming,
        }
    }
}

struct Segment<'a> {
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    syn: bool,
    ack: bool,
    fin: bool,
    rst: bool,
    payload: &'a [u8],
}

fn parse_segment(link: LinkKind, data: &[u8]) -> Option<Segment<'_>> {
    let sliced = match link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(data).ok()?,
        LinkKind::Ip => SlicedPacket::from_ip(data).ok()?,
    };
    let (src_ip, dst_ip): (IpAddr, IpAddr) = match &sliced.net {
        Some(NetSlice::Ipv4(ip)) => (
            ip.header().source_addr().into(),
            ip.header().destination_addr().into(),
        ),
        Some(NetSlice::Ipv6(ip)) => (
            ip.header().source_addr().into(),
            ip.header().destination_addr().into(),
        ),
        _ => return None,
    };
    let tcp = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return None,
    };
    Some(Segment {
        src: SocketAddr::new(src_ip, tcp.source_port()),
        dst: SocketAddr::new(dst_ip, tcp.destination_port()),
        seq: tcp.sequence_number(),
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: tcp.payload(),
    })
}

/// Where each direction of a closed flow stopped.
#[derive(Debug, Clone, Copy)]
struct ClosedFlow {
    outgoing: Option<u32>,
    incoming: Option<u32>,
}

/// Reassembly engine for the TCP traffic of one interface.
pub struct TcpReassembler {
    server_ports: Vec<u16>,
    flows: HashMap<ConnectionKey, Flow>,
    closed: HashMap<ConnectionKey, ClosedFlow>,
    closed_order: VecDeque<ConnectionKey>,
}

impl TcpReassembler {
    /// `server_ports` decide which side is the server on connections joined mid-stream.
    pub fn new(server_ports: Vec<u16>) -> Self {
        Self {
            server_ports,
            flows: HashMap::new(),
            closed: HashMap::new(),
            closed_order: VecDeque::new(),
        }
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn process(&mut self, link: LinkKind, data: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let segment = match parse_segment(link, data) {
            Some(s) => s,
            None => {
                trace!("ignoring non-TCP frame of {} bytes", data.len());
                return events;
            }
        };

        let key = match self.existing_flow(&segment, &mut events) {
            Some(key) => key,
            None => match self.new_flow(&segment) {
                Some((key, missed_syn)) => {
                    self.forget_closed(&key);
                    self.flows.insert(key, Flow::default());
                    events.push(StreamEvent::Start { key, missed_syn });
                    key
                }
                None => return events,
            },
        };
        let direction = match key.direction_of(segment.src, segment.dst) {
            Some(d) => d,
            None => return events,
        };
        let flow = match self.flows.get_mut(&key) {
            Some(f) => f,
            None => return events,
        };

        let half = flow.half_mut(direction);
        if segment.syn {
            // SYN occupies one sequence number, data starts right after it
            half.next_seq = Some(segment.seq.wrapping_add(1));
        } else if !segment.payload.is_empty() {
            for payload in half.accept(segment.seq, segment.payload) {
                events.push(StreamEvent::Data {
                    key,
                    direction,
                    payload,
                });
            }
        }

        if segment.fin {
            half.close_at(segment.seq.wrapping_add(segment.payload.len() as u32));
        }
        if segment.rst || (flow.outgoing.finished() && flow.incoming.finished()) {
            events.push(self.close(key));
        }
        events
    }

    /// Drops the flow, keeping where it stopped.
    fn close(&mut self, key: ConnectionKey) -> StreamEvent {
        if let Some(flow) = self.flows.remove(&key) {
            if self.closed_order.len() >= MAX_CLOSED_FLOWS {
                if let Some(oldest) = self.closed_order.pop_front() {
                    self.closed.remove(&oldest);
                }
            }
            self.closed.insert(
                key,
                ClosedFlow {
                    outgoing: flow.outgoing.next_seq,
                    incoming: flow.incoming.next_seq,
                },
            );
            self.closed_order.push_back(key);
        }
        StreamEvent::End { key }
    }

    fn forget_closed(&mut self, key: &ConnectionKey) {
        if self.closed.remove(key).is_some() {
            self.closed_order.retain(|k| k != key);
        }
    }

    /// Payload of a flow that already closed and that ends at or before where it stopped.
    fn is_late(&self, segment: &Segment<'_>) -> bool {
        let forward = ConnectionKey::new(segment.src, segment.dst);
        let reverse = ConnectionKey::new(segment.dst, segment.src);
        let (key, closed) = match self
            .closed
            .get(&forward)
            .map(|c| (forward, c))
            .or_else(|| self.closed.get(&reverse).map(|c| (reverse, c)))
        {
            Some(found) => found,
            None => return false,
        };
        let stopped_at = match key.direction_of(segment.src, segment.dst) {
            Some(Direction::Outgoing) => closed.outgoing,
            Some(Direction::Incoming) => closed.incoming,
            None => return false,
        };
        let end = segment.seq.wrapping_add(segment.payload.len() as u32);
        match stopped_at {
            Some(stop) => !seq_after(end, stop),
            None => true,
        }
    }

    /// Known flow for this segment. A fresh SYN on a known tuple ends the old flow first.
    fn existing_flow(
        &mut self,
        segment: &Segment<'_>,
        events: &mut Vec<StreamEvent>,
    ) -> Option<ConnectionKey> {
        let forward = ConnectionKey::new(segment.src, segment.dst);
        let reverse = ConnectionKey::new(segment.dst, segment.src);

        if let Some(flow) = self.flows.get(&forward) {
            let retransmitted_syn = flow.outgoing.next_seq == Some(segment.seq.wrapping_add(1));
            if segment.syn && !segment.ack && !retransmitted_syn {
                debug!("new connection reusing {}, closing the previous one", forward);
                events.push(self.close(forward));
                return None;
            }
            return Some(forward);
        }
        if self.flows.contains_key(&reverse) {
            return Some(reverse);
        }
        None
    }

    /// Orientation of a flow first seen with this segment, and whether its handshake was missed.
    fn new_flow(&self, segment: &Segment<'_>) -> Option<(ConnectionKey, bool)> {
        if segment.rst {
            return None;
        }
        match (segment.syn, segment.ack) {
            (true, false) => Some((ConnectionKey::new(segment.src, segment.dst), false)),
            (true, true) => Some((ConnectionKey::new(segment.dst, segment.src), false)),
            _ if segment.payload.is_empty() => None,
            _ if self.is_late(segment) => {
                debug!(
                    "dropping {} late bytes of closed flow {} -> {}",
                    segment.payload.len(),
                    segment.src,
                    segment.dst
                );
                None
            }
            _ => Some((self.orient(segment.src, segment.dst), true)),
        }
    }

    /// Guesses client and server for a connection joined mid-stream.
    fn orient(&self, src: SocketAddr, dst: SocketAddr) -> ConnectionKey {
        let dst_is_server = if self.server_ports.contains(&dst.port()) {
            true
        } else if self.server_ports.contains(&src.port()) {
            false
        } else {
            dst.port() <= src.port()
        };
        if dst_is_server {
            ConnectionKey::new(src, dst)
        } else {
            ConnectionKey::new(dst, src)
        }
    }
}
