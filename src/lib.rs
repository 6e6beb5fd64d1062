pub mod commands;
pub mod config;
pub mod db;
pub mod voice;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub voice: Arc<voice::VoiceService>,
    /// Normalized voice events flow from the gateway handler into the dispatcher
    pub voice_tx: tokio::sync::mpsc::UnboundedSender<voice::events::VoiceEvent>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
