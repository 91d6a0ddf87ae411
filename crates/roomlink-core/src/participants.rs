use crate::events::ConnectionQuality;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub connection_quality: ConnectionQuality,
}

/// Remote participants of the current session.
///
/// Updated by the session event dispatch. Read by native UI layers.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRoster {
    participants: Vec<RemoteParticipant>,
    local_quality: ConnectionQuality,
}

impl ParticipantRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the identity was already present.
    pub fn add(&mut self, identity: &str) -> bool {
        if self.participants.iter().any(|p| p.identity == identity) {
            return false;
        }
        self.participants.push(RemoteParticipant {
            identity: identity.to_string(),
            connection_quality: ConnectionQuality::Unknown,
        });
        true
    }

    /// Returns false when the identity was not present.
    pub fn remove(&mut self, identity: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.identity != identity);
        self.participants.len() != before
    }

    pub fn set_quality(&mut self, identity: &str, quality: ConnectionQuality) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.identity == identity) {
            p.connection_quality = quality;
        }
    }

    pub fn set_local_quality(&mut self, quality: ConnectionQuality) {
        self.local_quality = quality;
    }

    pub fn local_quality(&self) -> ConnectionQuality {
        self.local_quality
    }

    pub fn participants(&self) -> &[RemoteParticipant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_quality = ConnectionQuality::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality_of(roster: &ParticipantRoster, identity: &str) -> Option<ConnectionQuality> {
        roster
            .participants()
            .iter()
            .find(|p| p.identity == identity)
            .map(|p| p.connection_quality)
    }

    #[test]
    fn add_and_retrieve_participant() {
        let mut roster = ParticipantRoster::new();
        assert!(roster.add("alice"));
        assert_eq!(roster.len(), 1);
        assert_eq!(quality_of(&roster, "alice"), Some(ConnectionQuality::Unknown));
    }

    #[test]
    fn no_duplicate_participants() {
        let mut roster = ParticipantRoster::new();
        assert!(roster.add("alice"));
        assert!(!roster.add("alice"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn remove_participant() {
        let mut roster = ParticipantRoster::new();
        roster.add("alice");
        roster.add("bob");
        assert!(roster.remove("alice"));
        assert!(!roster.remove("alice"));
        assert_eq!(roster.len(), 1);
        assert!(quality_of(&roster, "bob").is_some());
    }

    #[test]
    fn quality_updates_known_participants_only() {
        let mut roster = ParticipantRoster::new();
        roster.add("alice");
        roster.set_quality("alice", ConnectionQuality::Poor);
        roster.set_quality("ghost", ConnectionQuality::Good);
        assert_eq!(quality_of(&roster, "alice"), Some(ConnectionQuality::Poor));
        assert_eq!(quality_of(&roster, "ghost"), None);
    }

    #[test]
    fn clear_resets_everything() {
        let mut roster = ParticipantRoster::new();
        roster.add("alice");
        roster.set_local_quality(ConnectionQuality::Excellent);
        roster.clear();
        assert_eq!(roster.len(), 0);
        assert_eq!(roster.local_quality(), ConnectionQuality::Unknown);
    }
}
