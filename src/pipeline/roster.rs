//! Participant roster: fetch, name decoding and dedup.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::platform::{decode_display_name, MeetingApi, MeetingInfo, Participant};

/// Fetch and normalize the roster. A failed fetch degrades to an empty
/// roster.
pub async fn fetch_roster(
    api: &dyn MeetingApi,
    meeting: &MeetingInfo,
    operator_userid: &str,
) -> Vec<Participant> {
    match api.participants(meeting, operator_userid).await {
        Ok(participants) => {
            let fetched = participants.len();
            let roster = normalize_roster(participants);
            debug!(
                meeting_id = %meeting.meeting_id,
                fetched,
                unique = roster.len(),
                "Fetched participant roster"
            );
            roster
        }
        Err(e) => {
            warn!(
                meeting_id = %meeting.meeting_id,
                "Failed to fetch participant roster, continuing without it: {:#}",
                e
            );
            Vec::new()
        }
    }
}

/// Decode base64 display names and keep the first entry per uuid. Entries
/// without a uuid are kept as they are.
pub fn normalize_roster(participants: Vec<Participant>) -> Vec<Participant> {
    let mut seen = HashSet::new();
    participants
        .into_iter()
        .filter(|p| match &p.identity.uuid {
            Some(uuid) => seen.insert(uuid.clone()),
            None => true,
        })
        .map(|mut p| {
            if let Some(name) = &p.identity.name {
                p.identity.name = Some(decode_display_name(name));
            }
            p
        })
        .collect()
}
