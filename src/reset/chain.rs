//! SHA-256 hash chain over audit ledger writes.
//!
//! Every write to `reset_audit` appends one event that commits to the event
//! before it via `prev_hash`. Editing any stored event (or the snapshot it
//! carries) changes its hash and breaks every later link.

use sha2::{Digest, Sha256};

/// `prev_hash` of the first event in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Fields of one chain event that are covered by its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub seq: i64,
    pub job_id: String,
    pub status: String,
    pub recorded_at: String,
    pub snapshot: String,
    pub prev_hash: String,
}

impl ChainEvent {
    /// Hex SHA-256 over the event's canonical content.
    ///
    /// Fields are length-prefixed so that no two distinct events share a
    /// preimage.
    pub fn compute_hash(&self) -> String {
        let seq = self.seq.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.prev_hash.as_str(),
            seq.as_str(),
            self.job_id.as_str(),
            self.status.as_str(),
            self.recorded_at.as_str(),
            self.snapshot.as_str(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Where a stored chain stops being consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub seq: i64,
    pub reason: String,
}

/// Walk `(event, stored_hash)` pairs in sequence order and return the first
/// inconsistency, if any.
pub fn verify_links<'a, I>(events: I) -> Result<Option<String>, ChainBreak>
where
    I: IntoIterator<Item = (&'a ChainEvent, &'a str)>,
{
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut last_seq: Option<i64> = None;
    for (event, stored_hash) in events {
        if let Some(prev) = last_seq
            && event.seq <= prev
        {
            return Err(ChainBreak {
                seq: event.seq,
                reason: format!("sequence {} does not follow {}", event.seq, prev),
            });
        }
        if event.prev_hash != expected_prev {
            return Err(ChainBreak {
                seq: event.seq,
                reason: "prev_hash does not match the preceding event".to_string(),
            });
        }
        let recomputed = event.compute_hash();
        if recomputed != stored_hash {
            return Err(ChainBreak {
                seq: event.seq,
                reason: "stored hash does not match event content".to_string(),
            });
        }
        expected_prev = recomputed;
        last_seq = Some(event.seq);
    }
    Ok(last_seq.map(|_| expected_prev))
}
