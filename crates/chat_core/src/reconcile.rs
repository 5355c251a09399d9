//! Merges the three message sources for a conversation — fetched history,
//! optimistic local messages, live socket envelopes — into one ordered,
//! duplicate-free sequence.

use shared::envelope::MessageEnvelope;

/// Window within which a server envelope is treated as the confirmation of
/// an optimistic local message with the same sender and body. A true
/// idempotency key threaded through both send paths would make this exact;
/// the window is the accepted approximation because the HTTP fallback does
/// not carry one.
pub const ECHO_MATCH_WINDOW_MS: i64 = 5_000;

/// True when `local` is the optimistic placeholder for the server-confirmed
/// `incoming`. The comparison is strict: a delta of exactly the window does
/// not match, so both entries are kept.
pub fn confirms_local(incoming: &MessageEnvelope, local: &MessageEnvelope) -> bool {
    if !local.is_local() || incoming.is_local() {
        return false;
    }
    local.body == incoming.body
        && local.sender_id == incoming.sender_id
        && (local.timestamp - incoming.timestamp)
            .num_milliseconds()
            .abs()
            < ECHO_MATCH_WINDOW_MS
}

/// Folds one envelope into the known sequence. A confirmed envelope evicts
/// the local placeholder it matches (the non-local side always wins); an
/// envelope already present verbatim is dropped so re-delivery is a no-op.
pub fn merge_inbound(known: &mut Vec<MessageEnvelope>, incoming: MessageEnvelope) {
    if !incoming.is_local() {
        let already_known = known.iter().any(|existing| {
            !existing.is_local()
                && existing.sender_id == incoming.sender_id
                && existing.body == incoming.body
                && existing.timestamp == incoming.timestamp
        });
        if already_known {
            return;
        }
        known.retain(|existing| !confirms_local(&incoming, existing));
    }
    known.push(incoming);
    known.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}

/// Three-way merge used when history loads after live traffic has already
/// started. History is authoritative and immutable; live envelopes fold in
/// next; local placeholders survive only while nothing confirms them.
/// Re-merging the same sources always yields the same sequence.
pub fn merge_sources(
    history: &[MessageEnvelope],
    local: &[MessageEnvelope],
    live: &[MessageEnvelope],
) -> Vec<MessageEnvelope> {
    let mut merged = history.to_vec();
    for envelope in live {
        merge_inbound(&mut merged, envelope.clone());
    }
    for envelope in local {
        let confirmed = merged
            .iter()
            .any(|candidate| confirms_local(candidate, envelope));
        if !confirmed {
            merged.push(envelope.clone());
        }
    }
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    merged
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
