//! Speaker resolution against the roster and the identity store.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::{UserRecord, UserStore};
use crate::platform::{decode_display_name, Participant, SpeakerInfo, Transcript};

pub struct SpeakerService {
    users: Arc<dyn UserStore>,
}

impl SpeakerService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Enrich `info` from the roster (userid, open_id, ms_open_id, then
    /// name), else from the identity store (userid, then name). Returns the
    /// input unchanged when nothing matches. Never fails.
    pub async fn enrich(&self, info: &SpeakerInfo, roster: &[Participant]) -> SpeakerInfo {
        if let Some(participant) = match_roster(info, roster) {
            return apply_participant(info, participant);
        }

        match self.lookup_user(info).await {
            Some(record) => apply_user(info, &record),
            None => info.clone(),
        }
    }

    /// Enrich every paragraph's speaker in place. Identical speaker infos are
    /// resolved once.
    pub async fn enrich_transcript(&self, transcript: &mut Transcript, roster: &[Participant]) {
        let mut resolved: Vec<(SpeakerInfo, SpeakerInfo)> = Vec::new();

        for paragraph in &mut transcript.paragraphs {
            if let Some((_, enriched)) = resolved
                .iter()
                .find(|(original, _)| *original == paragraph.speaker_info)
            {
                paragraph.speaker_info = enriched.clone();
                continue;
            }

            let enriched = self.enrich(&paragraph.speaker_info, roster).await;
            resolved.push((paragraph.speaker_info.clone(), enriched.clone()));
            paragraph.speaker_info = enriched;
        }

        debug!(
            paragraphs = transcript.paragraphs.len(),
            speakers = resolved.len(),
            "Resolved transcript speakers"
        );
    }

    async fn lookup_user(&self, info: &SpeakerInfo) -> Option<UserRecord> {
        if let Some(userid) = &info.identity.userid {
            match self.users.find_by_userid(userid).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(e) => warn!(userid = %userid, "Identity lookup by userid failed: {:#}", e),
            }
        }

        if let Some(name) = info.identity.name.as_deref().map(decode_display_name) {
            match self.users.find_by_name(&name).await {
                Ok(found) => return found,
                Err(e) => warn!(name = %name, "Identity lookup by name failed: {:#}", e),
            }
        }

        None
    }
}

fn match_roster<'a>(info: &SpeakerInfo, roster: &'a [Participant]) -> Option<&'a Participant> {
    let identity = &info.identity;

    if let Some(userid) = &identity.userid {
        if let Some(p) = roster.iter().find(|p| p.identity.userid.as_ref() == Some(userid)) {
            return Some(p);
        }
    }
    if let Some(open_id) = &identity.open_id {
        if let Some(p) = roster.iter().find(|p| p.identity.open_id.as_ref() == Some(open_id)) {
            return Some(p);
        }
    }
    if let Some(ms_open_id) = &identity.ms_open_id {
        if let Some(p) = roster
            .iter()
            .find(|p| p.identity.ms_open_id.as_ref() == Some(ms_open_id))
        {
            return Some(p);
        }
    }
    if let Some(name) = identity.name.as_deref().map(decode_display_name) {
        // Roster names are already decoded.
        if let Some(p) = roster
            .iter()
            .find(|p| p.identity.name.as_deref() == Some(name.as_str()))
        {
            return Some(p);
        }
    }
    None
}

/// Roster attributes win; the roster name replaces the diarization name.
fn apply_participant(info: &SpeakerInfo, participant: &Participant) -> SpeakerInfo {
    let mut enriched = info.clone();
    let identity = &mut enriched.identity;
    let source = &participant.identity;

    identity.uuid = source.uuid.clone().or(identity.uuid.take());
    identity.userid = identity.userid.take().or(source.userid.clone());
    identity.open_id = identity.open_id.take().or(source.open_id.clone());
    identity.ms_open_id = identity.ms_open_id.take().or(source.ms_open_id.clone());
    identity.name = source.name.clone().or(identity.name.take());

    enriched.phone = participant.phone.clone().or(enriched.phone);
    enriched.instance_id = participant.instance_id.clone().or(enriched.instance_id);
    enriched.ip = participant.ip.clone().or(enriched.ip);
    enriched.location = participant.location.clone().or(enriched.location);
    enriched.os = participant.os.clone().or(enriched.os);
    enriched.is_enterprise_user = Some(participant.is_enterprise_user);
    enriched
}

/// Fill gaps from the identity store without overriding what the platform sent.
fn apply_user(info: &SpeakerInfo, record: &UserRecord) -> SpeakerInfo {
    let mut enriched = info.clone();
    let identity = &mut enriched.identity;

    identity.uuid = identity.uuid.take().or(record.uuid.clone());
    identity.userid = identity.userid.take().or(record.userid.clone());
    identity.open_id = identity.open_id.take().or(record.open_id.clone());
    identity.ms_open_id = identity.ms_open_id.take().or(record.ms_open_id.clone());
    identity.name = identity.name.take().or(record.name.clone());
    enriched.phone = enriched.phone.take().or(record.phone.clone());
    enriched
}
