//! Decides who wants a translation of a given group message.

use crate::settings::{SettingsService, StoreError, UserId, UserSettings};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Users sharing one target language for a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageGroup {
    /// Language as the first (lowest id) requesting user spelled it
    pub target_language: String,
    pub recipients: Vec<UserId>,
}

/// Eligible recipients for one inbound message, grouped by target language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    groups: Vec<LanguageGroup>,
}

impl Resolution {
    pub fn groups(&self) -> &[LanguageGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<LanguageGroup> {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn language_count(&self) -> usize {
        self.groups.len()
    }

    pub fn recipient_count(&self) -> usize {
        self.groups.iter().map(|g| g.recipients.len()).sum()
    }
}

/// Group the active candidates by language, dropping the sender and anyone
/// without both overlay mode and a language.
///
/// Languages are compared case-insensitively after trimming, so "Spanish" and
/// "spanish " share one translation.
pub fn group_recipients(
    sender: UserId,
    candidates: impl IntoIterator<Item = UserSettings>,
) -> Resolution {
    let mut eligible: Vec<UserSettings> = candidates
        .into_iter()
        .filter(|s| s.user_id != sender && s.is_active())
        .collect();
    eligible.sort_by_key(|s| s.user_id);

    let mut seen = BTreeSet::new();
    let mut by_language: BTreeMap<String, LanguageGroup> = BTreeMap::new();

    for settings in eligible {
        if !seen.insert(settings.user_id) {
            continue;
        }
        let language = settings.target_language.trim();
        by_language
            .entry(language.to_lowercase())
            .or_insert_with(|| LanguageGroup {
                target_language: language.to_string(),
                recipients: Vec::new(),
            })
            .recipients
            .push(settings.user_id);
    }

    Resolution {
        groups: by_language.into_values().collect(),
    }
}

pub struct Resolver {
    settings: SettingsService,
}

impl Resolver {
    pub fn new(settings: SettingsService) -> Self {
        Self { settings }
    }

    /// Resolve recipients for a message sent by `sender`.
    ///
    /// With a known member roster only those users are consulted (each read
    /// fails open on its own). Without one, every user with active settings
    /// is considered, whichever group they are in.
    pub async fn resolve(
        &self,
        sender: UserId,
        members: Option<&[UserId]>,
    ) -> Result<Resolution, StoreError> {
        let candidates = match members {
            Some(members) => {
                let unique: BTreeSet<UserId> =
                    members.iter().copied().filter(|id| *id != sender).collect();
                join_all(unique.into_iter().map(|id| self.settings.get(id))).await
            }
            None => self.settings.list_active().await?,
        };

        let resolution = group_recipients(sender, candidates);
        debug!(
            "Resolved {} recipients across {} languages for message from {}",
            resolution.recipient_count(),
            resolution.language_count(),
            sender
        );
        Ok(resolution)
    }
}
