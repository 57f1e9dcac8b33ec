use std::sync::Arc;

use control::{ChatRouter, Registry};
use files::Catalog;
use media::{AudioMixer, PresenterArbiter, ScreenRouter, VideoRouter};

use crate::config::Config;

/// Shared, cheaply-cloned runtime state every accept loop and worker reads
/// from. Each field owns exactly one of the locks described in spec §5's
/// shared-resource policy.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub chat: Arc<ChatRouter>,
    pub catalog: Arc<Catalog>,
    pub video: Arc<VideoRouter>,
    pub audio: Arc<AudioMixer>,
    pub screen: Arc<ScreenRouter>,
    pub presenter: Arc<PresenterArbiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry =
            Arc::new(Registry::with_rebind_grace(config.max_users, std::time::Duration::from_secs(config.rebind_grace_secs)));
        let audio = Arc::new(AudioMixer::new(
            config.chunk_samples,
            std::time::Duration::from_millis(config.audio_staleness_ms),
        ));
        let screen = Arc::new(ScreenRouter::new(config.max_screen_datagram));

        Self {
            config,
            registry,
            chat: Arc::new(ChatRouter::new()),
            catalog: Arc::new(Catalog::new()),
            video: Arc::new(VideoRouter::new()),
            audio,
            screen,
            presenter: Arc::new(PresenterArbiter::new()),
        }
    }
}
