use std::sync::Arc;

use settings::SettingsProvider;
use tokio::sync::mpsc;
use transport::{Channel, ChannelConfig, ChannelEvent};

/// Starts an interpreter and connects a channel to it
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        args: &[String],
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> eyre::Result<Channel>;
}

/// Spawns the interpreter executable named by the settings
pub struct ProcessLauncher {
    settings: Arc<dyn SettingsProvider>,
}

impl ProcessLauncher {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        args: &[String],
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> eyre::Result<Channel> {
        let Some(executable) = self.settings.resolve_interpreter_path() else {
            let settings = self.settings.go_to_settings();
            tracing::warn!(settings = %settings.display(), "no interpreter configured");
            eyre::bail!(
                "interpreter not found, set \"interpreterPath\" in {}",
                settings.display()
            );
        };
        Channel::spawn(executable, args, config, events)
    }
}
