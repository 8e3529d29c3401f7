//! Observer feed payloads and their encoding.
//!
//! The core never inspects encoded bytes. It asks the simulation for a full
//! snapshot when an observer connects and for a delta once per tick.

use log::error;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, Frame};
use crate::simulation::MassTotals;

/// One entity as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: EntityId,
    pub mass: f64,
    pub start_frame: Frame,
}

/// Full world state sent to a newly connected observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub frame: Frame,
    pub frames_per_second: u32,
    pub entities: Vec<EntityView>,
    pub natural_food: f64,
    pub mass: MassTotals,
}

/// A kill as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillNotice {
    pub victim: EntityId,
    pub killer: Option<EntityId>,
}

/// Live statistics pushed into the feed on their own interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub frame: Frame,
    pub active_count: usize,
    pub mass: MassTotals,
}

/// A line of deferred output produced by an entity's program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub entity: EntityId,
    pub frame: Frame,
    pub text: String,
}

/// Everything that changed during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldDelta {
    pub frame: Frame,
    pub spawned: Vec<EntityView>,
    pub killed: Vec<KillNotice>,
    pub updated: Vec<EntityView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_stats: Option<StreamStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogLine>,
}

/// Turns feed payloads into bytes.
pub trait UpdateEncoder {
    /// Encodes the full state for a new observer.
    fn encode_snapshot(&self, snapshot: &WorldSnapshot) -> Vec<u8>;

    /// Encodes one tick's changes.
    fn encode_delta(&self, delta: &WorldDelta) -> Vec<u8>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope<'a> {
    Snapshot(&'a WorldSnapshot),
    Delta(&'a WorldDelta),
}

/// Line-delimited JSON encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonUpdateEncoder;

impl JsonUpdateEncoder {
    fn encode(envelope: &Envelope<'_>) -> Vec<u8> {
        match serde_json::to_vec(envelope) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                bytes
            }
            Err(e) => {
                error!("failed to encode update: {e}");
                Vec::new()
            }
        }
    }
}

impl UpdateEncoder for JsonUpdateEncoder {
    fn encode_snapshot(&self, snapshot: &WorldSnapshot) -> Vec<u8> {
        Self::encode(&Envelope::Snapshot(snapshot))
    }

    fn encode_delta(&self, delta: &WorldDelta) -> Vec<u8> {
        Self::encode(&Envelope::Delta(delta))
    }
}
