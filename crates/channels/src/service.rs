//! In-memory channel state, persisted best-effort to the registry
//! (spec §4.5, §4.7).
//!
//! Membership, moderation, and the bounded history ring live in memory for
//! fast access from the Router; every mutation is also mirrored to the
//! registry so a restart can reconstruct the channel list, though the
//! Router never blocks on that mirror succeeding (spec §4.7 failure policy).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use intermud_protocol::Endpoint;
use intermud_registry::RegistryAdapter;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

const IN_MEMORY_HISTORY_CAP: usize = 100;
const PERSISTED_HISTORY_CAP: usize = 1000;

fn member_key(endpoint: &Endpoint) -> String {
    format!("{}:{}", endpoint.mud, endpoint.user.as_deref().unwrap_or(""))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelMeta {
    name: String,
    description: Option<String>,
    mud_restricted: bool,
    allowed_muds: HashSet<String>,
    moderators: HashSet<String>,
    banned: HashSet<String>,
}

struct ChannelState {
    meta: ChannelMeta,
    members: HashSet<String>,
    history: VecDeque<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub member: String,
    pub text: Option<String>,
    pub at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Join,
    Leave,
    Message,
}

#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub name: String,
    pub description: Option<String>,
    pub member_count: usize,
    pub flags: Vec<String>,
}

/// Fan-out instruction handed back to the Router on a successful `send`:
/// one channel message, delivered once per distinct destination MUD.
#[derive(Debug, Clone)]
pub struct ChannelPost {
    pub channel: String,
    pub from: Endpoint,
    pub text: String,
    pub destination_muds: Vec<String>,
}

pub struct ChannelService {
    channels: RwLock<HashMap<String, ChannelState>>,
    registry: Arc<dyn RegistryAdapter>,
}

impl ChannelService {
    pub fn new(registry: Arc<dyn RegistryAdapter>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Reload channel metadata and membership from the registry at startup.
    /// Per spec §4.7, a failed read here means the gateway starts with an
    /// empty channel set rather than failing.
    pub async fn load_from_registry(&self) {
        let names = match self.registry.set_members("active_channels").await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list active channels, starting empty");
                return;
            },
        };

        let mut channels = self.channels.write().await;
        for name in names {
            let meta = match self.registry.get(&format!("channel:{name}")).await {
                Ok(Some(raw)) => match serde_json::from_str::<ChannelMeta>(&raw) {
                    Ok(meta) => meta,
                    Err(e) => {
                        tracing::warn!(channel = %name, error = %e, "corrupt channel metadata, skipping");
                        continue;
                    },
                },
                _ => continue,
            };
            let members = self
                .registry
                .set_members(&format!("channel_members:{name}"))
                .await
                .unwrap_or_default()
                .into_iter()
                .collect();
            channels.insert(
                name.clone(),
                ChannelState {
                    meta,
                    members,
                    history: VecDeque::new(),
                },
            );
        }
    }

    pub async fn create(
        &self,
        name: &str,
        creator: &Endpoint,
        description: Option<String>,
    ) -> Result<()> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        let creator_key = member_key(creator);
        let meta = ChannelMeta {
            name: name.to_string(),
            description,
            mud_restricted: false,
            allowed_muds: HashSet::new(),
            moderators: HashSet::from([creator_key.clone()]),
            banned: HashSet::new(),
        };
        self.persist_meta(&meta).await;
        let _ = self.registry.set_add("active_channels", name).await;
        channels.insert(
            name.to_string(),
            ChannelState {
                meta,
                members: HashSet::new(),
                history: VecDeque::new(),
            },
        );
        Ok(())
    }

    pub async fn join(&self, channel: &str, user: &Endpoint) -> Result<()> {
        let mut channels = self.channels.write().await;
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(channel.to_string()))?;

        let key = member_key(user);
        if state.meta.banned.contains(&key) {
            return Err(Error::Banned(key));
        }
        if state.meta.mud_restricted && !state.meta.allowed_muds.contains(&user.mud) {
            return Err(Error::Restricted {
                mud: user.mud.clone(),
                allowed_muds: state.meta.allowed_muds.iter().cloned().collect(),
            });
        }

        state.members.insert(key.clone());
        push_history(&mut state.history, HistoryAction::Join, key.clone(), None);
        let _ = self
            .registry
            .set_add(&format!("channel_members:{channel}"), &key)
            .await;
        self.append_registry_history(channel, HistoryAction::Join, &key, None)
            .await;
        Ok(())
    }

    pub async fn leave(&self, channel: &str, user: &Endpoint) -> Result<()> {
        let mut channels = self.channels.write().await;
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(channel.to_string()))?;

        let key = member_key(user);
        if !state.members.remove(&key) {
            return Err(Error::NotMember(key));
        }
        push_history(&mut state.history, HistoryAction::Leave, key.clone(), None);
        let _ = self
            .registry
            .set_remove(&format!("channel_members:{channel}"), &key)
            .await;
        self.append_registry_history(channel, HistoryAction::Leave, &key, None)
            .await;
        Ok(())
    }

    pub async fn send(&self, channel: &str, from: &Endpoint, text: &str) -> Result<ChannelPost> {
        let mut channels = self.channels.write().await;
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(channel.to_string()))?;

        let key = member_key(from);
        if state.meta.banned.contains(&key) {
            return Err(Error::Banned(key));
        }
        if !state.members.contains(&key) {
            return Err(Error::NotMember(key));
        }

        push_history(
            &mut state.history,
            HistoryAction::Message,
            key.clone(),
            Some(text.to_string()),
        );
        self.append_registry_history(channel, HistoryAction::Message, &key, Some(text))
            .await;

        let destination_muds: Vec<String> = state
            .members
            .iter()
            .filter_map(|m| m.split(':').next())
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        Ok(ChannelPost {
            channel: channel.to_string(),
            from: from.clone(),
            text: text.to_string(),
            destination_muds,
        })
    }

    pub async fn ban(&self, channel: &str, target_key: &str, moderator: &Endpoint) -> Result<()> {
        let mut channels = self.channels.write().await;
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| Error::NotFound(channel.to_string()))?;

        let moderator_key = member_key(moderator);
        if !state.meta.moderators.contains(&moderator_key) {
            return Err(Error::NotModerator(moderator_key));
        }

        state.meta.banned.insert(target_key.to_string());
        state.members.remove(target_key);
        self.persist_meta(&state.meta).await;
        let _ = self
            .registry
            .set_remove(&format!("channel_members:{channel}"), target_key)
            .await;
        Ok(())
    }

    pub async fn members(&self, channel: &str) -> Result<Vec<String>> {
        let channels = self.channels.read().await;
        let state = channels
            .get(channel)
            .ok_or_else(|| Error::NotFound(channel.to_string()))?;
        Ok(state.members.iter().cloned().collect())
    }

    pub async fn list(&self) -> Vec<ChannelSummary> {
        let channels = self.channels.read().await;
        channels
            .values()
            .map(|s| ChannelSummary {
                name: s.meta.name.clone(),
                description: s.meta.description.clone(),
                member_count: s.members.len(),
                flags: if s.meta.mud_restricted {
                    vec!["restricted".to_string()]
                } else {
                    Vec::new()
                },
            })
            .collect()
    }

    pub async fn recent_history(&self, channel: &str, limit: usize) -> Vec<HistoryEntry> {
        let channels = self.channels.read().await;
        channels
            .get(channel)
            .map(|s| s.history.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default()
    }

    async fn persist_meta(&self, meta: &ChannelMeta) {
        if let Ok(raw) = serde_json::to_string(meta) {
            if let Err(e) = self
                .registry
                .set_with_ttl(&format!("channel:{}", meta.name), &raw, 0)
                .await
            {
                tracing::warn!(channel = %meta.name, error = %e, "failed to persist channel metadata");
            }
        }
    }

    async fn append_registry_history(
        &self,
        channel: &str,
        action: HistoryAction,
        member: &str,
        text: Option<&str>,
    ) {
        let entry = HistoryEntry {
            action,
            member: member.to_string(),
            text: text.map(str::to_string),
            at: Utc::now(),
        };
        let Ok(raw) = serde_json::to_string(&entry) else {
            return;
        };
        let key = format!("channel_history:{channel}");
        if let Err(e) = self.registry.list_push(&key, &raw).await {
            tracing::warn!(channel, error = %e, "failed to append channel history");
            return;
        }
        let _ = self.registry.list_trim(&key, PERSISTED_HISTORY_CAP).await;
    }
}

fn push_history(
    history: &mut VecDeque<HistoryEntry>,
    action: HistoryAction,
    member: String,
    text: Option<String>,
) {
    history.push_back(HistoryEntry {
        action,
        member,
        text,
        at: Utc::now(),
    });
    while history.len() > IN_MEMORY_HISTORY_CAP {
        history.pop_front();
    }
}
