//! Normalized voice-state events and the dispatcher task.
//!
//! The gateway handler forwards raw voice-state updates here; the dispatcher
//! serializes the resulting work instead of relying on callback ordering.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::error::VoiceError;
use super::VoiceService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    Joined {
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
    },
    Left {
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
    },
    Moved {
        guild_id: u64,
        from_channel_id: u64,
        to_channel_id: u64,
        user_id: u64,
    },
}

/// Collapses a raw voice-state update (previous channel, current channel)
/// into one normalized event. Returns None for updates that do not change
/// the channel (mute/deafen toggles and the like).
pub fn classify(
    guild_id: u64,
    user_id: u64,
    old_channel: Option<u64>,
    new_channel: Option<u64>,
) -> Option<VoiceEvent> {
    match (old_channel, new_channel) {
        (None, Some(channel_id)) => Some(VoiceEvent::Joined {
            guild_id,
            channel_id,
            user_id,
        }),
        (Some(channel_id), None) => Some(VoiceEvent::Left {
            guild_id,
            channel_id,
            user_id,
        }),
        (Some(from), Some(to)) if from != to => Some(VoiceEvent::Moved {
            guild_id,
            from_channel_id: from,
            to_channel_id: to,
            user_id,
        }),
        _ => None,
    }
}

pub struct VoiceDispatcher {
    service: Arc<VoiceService>,
    rx: UnboundedReceiver<VoiceEvent>,
}

/// Creates the event channel and its dispatcher.
pub fn dispatcher(service: Arc<VoiceService>) -> (UnboundedSender<VoiceEvent>, VoiceDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, VoiceDispatcher { service, rx })
}

impl VoiceDispatcher {
    pub async fn run(mut self) {
        info!("Voice dispatcher started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        debug!("Voice dispatcher stopped");
    }

    async fn handle(&self, event: VoiceEvent) {
        match event {
            VoiceEvent::Joined {
                guild_id,
                channel_id,
                user_id,
            } => self.arrival(guild_id, channel_id, user_id).await,
            VoiceEvent::Left { channel_id, .. } => self.activity(channel_id),
            VoiceEvent::Moved {
                guild_id,
                from_channel_id,
                to_channel_id,
                user_id,
            } => {
                self.activity(from_channel_id);
                self.arrival(guild_id, to_channel_id, user_id).await;
            }
        }
    }

    async fn arrival(&self, guild_id: u64, channel_id: u64, user_id: u64) {
        if self.service.is_jtc(guild_id, channel_id) {
            match self.service.provision(guild_id, channel_id, user_id).await {
                Ok(created) => {
                    debug!("Voice: provisioned channel {} for {}", created, user_id)
                }
                // Expected under rapid re-joins; not worth a warning.
                Err(VoiceError::CooldownActive(remaining)) => debug!(
                    "Voice: {} is on cooldown for {:?} on trigger {}",
                    user_id, remaining, channel_id
                ),
                Err(VoiceError::ScopeLocked) => debug!(
                    "Voice: provisioning already in flight for {} on trigger {}",
                    user_id, channel_id
                ),
                Err(err) => warn!(
                    "Voice: provisioning for {} via trigger {} failed: {}",
                    user_id, channel_id, err
                ),
            }
        } else {
            self.activity(channel_id);
        }
    }

    /// Membership changed on a managed channel: refresh its activity stamp.
    fn activity(&self, channel_id: u64) {
        if self.service.cache.get(channel_id).is_none() {
            return;
        }
        if let Err(err) = self.service.touch_activity(channel_id) {
            warn!(
                "Voice: could not refresh activity of channel {}: {}",
                channel_id, err
            );
        }
    }
}
