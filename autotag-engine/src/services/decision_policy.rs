//! Decision policy
//!
//! Maps the identity candidate's composite score to a [`ConfidenceTier`] and
//! the action it authorizes:
//! - HIGH → rewrite tags and rename to `Title - Artist.ext`
//! - MEDIUM → rewrite tags only, after manual confirmation
//! - REJECTED → nothing is written

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::{ApprovedAction, ConfidenceTier, TrackIdentity, UnifiedTrackData};

/// Characters not allowed in a file name on common filesystems
const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Outcome of the SCORED → DECIDED transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub tier: ConfidenceTier,
    /// `None` for REJECTED
    pub action: Option<ApprovedAction>,
    /// MEDIUM waits for a manual verdict before COMMITTED
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    high_threshold: f64,
    medium_threshold: f64,
}

impl DecisionPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            high_threshold: config.high_threshold,
            medium_threshold: config.medium_threshold,
        }
    }

    /// Pure tier mapping
    pub fn tier_for(&self, score: f64) -> ConfidenceTier {
        if score >= self.high_threshold {
            ConfidenceTier::High
        } else if score >= self.medium_threshold {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Rejected
        }
    }

    pub fn decide(&self, identity: &TrackIdentity, data: &UnifiedTrackData) -> Decision {
        match self.tier_for(data.confidence) {
            ConfidenceTier::High => match proposed_file_name(data, identity.extension()) {
                Some(file_name) => Decision {
                    tier: ConfidenceTier::High,
                    action: Some(ApprovedAction::TagAndRename { file_name }),
                    requires_confirmation: false,
                },
                // No usable title/artist to build a name from: tag only
                None => Decision {
                    tier: ConfidenceTier::High,
                    action: Some(ApprovedAction::TagOnly),
                    requires_confirmation: false,
                },
            },
            ConfidenceTier::Medium => Decision {
                tier: ConfidenceTier::Medium,
                action: Some(ApprovedAction::TagOnly),
                requires_confirmation: true,
            },
            ConfidenceTier::Rejected => Decision {
                tier: ConfidenceTier::Rejected,
                action: None,
                requires_confirmation: false,
            },
        }
    }
}

/// `Title - Artist.ext`, with characters unsafe in file names removed
pub fn proposed_file_name(data: &UnifiedTrackData, extension: Option<&str>) -> Option<String> {
    let title = sanitize_component(data.title.as_deref()?);
    let artist = sanitize_component(data.artist.as_deref()?);
    if title.is_empty() || artist.is_empty() {
        return None;
    }

    let stem = format!("{} - {}", title, artist);
    Some(match extension.filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    })
}

fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| if FORBIDDEN_FILENAME_CHARS.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('.')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(score: f64) -> UnifiedTrackData {
        UnifiedTrackData {
            title: Some("One More Time".into()),
            artist: Some("Daft Punk".into()),
            confidence: score,
            ..Default::default()
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = DecisionPolicy::new(&EngineConfig::default());

        assert_eq!(policy.tier_for(0.95), ConfidenceTier::High);
        assert_eq!(policy.tier_for(1.0), ConfidenceTier::High);
        assert_eq!(policy.tier_for(0.9499), ConfidenceTier::Medium);
        assert_eq!(policy.tier_for(0.50), ConfidenceTier::Medium);
        assert_eq!(policy.tier_for(0.4999), ConfidenceTier::Rejected);
        assert_eq!(policy.tier_for(0.0), ConfidenceTier::Rejected);
    }

    #[test]
    fn test_tier_is_deterministic() {
        let policy = DecisionPolicy::new(&EngineConfig::default());
        for score in [0.1, 0.5, 0.73, 0.95, 0.99] {
            assert_eq!(policy.tier_for(score), policy.tier_for(score));
        }
    }

    #[test]
    fn test_high_authorizes_rename() {
        let policy = DecisionPolicy::new(&EngineConfig::default());
        let identity = TrackIdentity::from_path("/music/01 - daft punk one more time.mp3", Some(320.0));

        let decision = policy.decide(&identity, &data(0.97));

        assert_eq!(decision.tier, ConfidenceTier::High);
        assert_eq!(
            decision.action,
            Some(ApprovedAction::TagAndRename {
                file_name: "One More Time - Daft Punk.mp3".into()
            })
        );
        assert!(!decision.requires_confirmation);
    }

    #[test]
    fn test_medium_withholds_rename_and_needs_confirmation() {
        let policy = DecisionPolicy::new(&EngineConfig::default());
        let identity = TrackIdentity::from_path("Billie Jean Vs. Last Night.mp3", Some(228.0));

        let decision = policy.decide(&identity, &data(0.90));

        assert_eq!(decision.tier, ConfidenceTier::Medium);
        assert_eq!(decision.action, Some(ApprovedAction::TagOnly));
        assert!(decision.requires_confirmation);
    }

    #[test]
    fn test_rejected_authorizes_nothing() {
        let policy = DecisionPolicy::new(&EngineConfig::default());
        let identity = TrackIdentity::from_path("x.mp3", None);

        let decision = policy.decide(&identity, &data(0.2));
        assert_eq!(decision.tier, ConfidenceTier::Rejected);
        assert_eq!(decision.action, None);
    }

    #[test]
    fn test_file_name_sanitized() {
        let d = UnifiedTrackData {
            title: Some("What/Ever: Part 2?".into()),
            artist: Some("AC/DC".into()),
            ..Default::default()
        };
        assert_eq!(
            proposed_file_name(&d, Some("flac")).as_deref(),
            Some("What Ever Part 2 - AC DC.flac")
        );
        assert_eq!(proposed_file_name(&UnifiedTrackData::default(), Some("mp3")), None);
    }
}
