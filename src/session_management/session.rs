use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use std::sync::Arc;

use super::stream_tracker::DirectionalStreamTracker;
use super::SessionState;
use crate::configuration::config::Config;
use crate::correlation::correlation_table::CorrelationTable;
use crate::correlation::response_status::ResponseStatusCatalog;
use crate::decoding::stream_decoder::DecoderFactory;
use crate::decoding::types::TracedFrame;
use crate::network::types::{ConnectionKey, Direction, SessionId};

/// Everything a new session needs besides its own identity.
///
/// Built once at startup and shared by every session. The tracked-method list
/// is only a template: each session builds its own table from it.
#[derive(Clone)]
pub struct SessionContext {
    pub decoder_factory: Arc<dyn DecoderFactory>,
    pub status_catalog: Arc<ResponseStatusCatalog>,
    pub tracked_methods: Option<Arc<[String]>>,
}

impl SessionContext {
    pub fn new(
        decoder_factory: Arc<dyn DecoderFactory>,
        status_catalog: Arc<ResponseStatusCatalog>,
        tracked_methods: Option<Arc<[String]>>,
    ) -> Self {
        Self {
            decoder_factory,
            status_catalog,
            tracked_methods,
        }
    }

    pub fn from_config(config: &Config, decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        Self::new(
            decoder_factory,
            Arc::new(ResponseStatusCatalog::new(
                config.response_statuses.as_deref(),
            )),
            config
                .tracked_methods
                .as_ref()
                .map(|methods| Arc::from(methods.as_slice())),
        )
    }
}

/// One traced TCP connection.
///
/// Owns the connection's correlation table and one tracker per direction.
/// Goes from `Active` to `Ended` exactly once; anything delivered afterwards
/// is dropped.
pub struct ConnectionSession {
    id: SessionId,
    key: ConnectionKey,
    interface: String,
    missed_syn: bool,
    started_at: DateTime<Utc>,
    state: SessionState,
    correlation: CorrelationTable,
    outgoing: DirectionalStreamTracker,
    incoming: DirectionalStreamTracker,
}

impl ConnectionSession {
    pub fn new(
        id: SessionId,
        key: ConnectionKey,
        interface: &str,
        missed_syn: bool,
        context: &SessionContext,
    ) -> Self {
        let factory = context.decoder_factory.as_ref();
        let session = Self {
            id,
            key,
            interface: interface.to_string(),
            missed_syn,
            started_at: Utc::now(),
            state: SessionState::Active,
            correlation: CorrelationTable::new(context.tracked_methods.clone()),
            outgoing: DirectionalStreamTracker::new(
                id,
                Direction::Outgoing,
                !missed_syn,
                factory,
                Arc::clone(&context.status_catalog),
            ),
            incoming: DirectionalStreamTracker::new(
                id,
                Direction::Incoming,
                !missed_syn,
                factory,
                Arc::clone(&context.status_catalog),
            ),
        };
        info!("{}", session.describe_start());
        session
    }

    /// Session start line: id, how the connection was joined, interface and endpoints.
    pub fn describe_start(&self) -> String {
        format!(
            "[{}] session started {} on {}: {}",
            self.id,
            if self.missed_syn {
                "in progress"
            } else {
                "from start"
            },
            self.interface,
            self.key
        )
    }

    pub fn describe_end(&self) -> String {
        format!(
            "[{}] session ended: {} ({} bytes out, {} bytes in, {}s)",
            self.id,
            self.key,
            self.outgoing.bytes_seen(),
            self.incoming.bytes_seen(),
            (Utc::now() - self.started_at).num_seconds()
        )
    }

    /// Routes the next ordered chunk of one direction to its tracker.
    pub fn on_data(
        &mut self,
        direction: Direction,
        chunk: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Vec<TracedFrame> {
        if self.state == SessionState::Ended {
            trace!(
                "[{}] dropping {} {} bytes after end",
                self.id,
                direction,
                chunk.len()
            );
            return Vec::new();
        }
        match direction {
            Direction::Outgoing => {
                self.outgoing
                    .handle_packet(chunk, captured_at, &mut self.correlation)
            }
            Direction::Incoming => {
                self.incoming
                    .handle_packet(chunk, captured_at, &mut self.correlation)
            }
        }
    }

    /// Closes both trackers and resets the correlation table. Only the first call has any effect.
    pub fn on_end(&mut self) -> Vec<TracedFrame> {
        if self.state == SessionState::Ended {
            return Vec::new();
        }
        self.state = SessionState::Ended;

        let mut frames = self.outgoing.end(&mut self.correlation);
        frames.extend(self.incoming.end(&mut self.correlation));

        if self.correlation.is_enabled() {
            debug!(
                "[{}] {} call(s) left unanswered, method summary: {:?}",
                self.id,
                self.correlation.pending_calls(),
                self.correlation.summary()
            );
        }
        self.correlation.reset();

        info!("{}", self.describe_end());
        frames
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn missed_syn(&self) -> bool {
        self.missed_syn
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn correlation(&self) -> &CorrelationTable {
        &self.correlation
    }

    pub fn tracker(&self, direction: Direction) -> &DirectionalStreamTracker {
        match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        }
    }
}
