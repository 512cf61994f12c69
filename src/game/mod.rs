pub mod content;
pub mod host;

use std::sync::Arc;
use std::time::Duration;

pub use content::ContentManager;
pub use host::{GameHost, GameHostBuilder};

use crate::error::ConfigurationError;
use crate::graphics::{GraphicsDevice, GraphicsDeviceService};
use crate::services::ServiceRegistry;

///Timing passed to `update` and `draw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameTime {
    pub total: Duration,
    pub elapsed: Duration,
    ///Always false. There is no fixed timestep to fall behind on.
    pub is_running_slowly: bool,
}

///What a game can reach from its callbacks.
pub struct GameContext {
    services: Arc<ServiceRegistry>,
    pub content: ContentManager,
}

impl GameContext {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self {
            services,
            content: ContentManager::new(),
        }
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    ///The device held by the registered device service.
    pub fn graphics_device(&self) -> Result<Arc<GraphicsDevice>, ConfigurationError> {
        self.services
            .require::<dyn GraphicsDeviceService>()?
            .graphics_device()
            .ok_or(ConfigurationError::NoGraphicsDevice)
    }
}

impl std::fmt::Debug for GameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameContext")
            .field("services", &self.services)
            .field("content", &self.content)
            .finish()
    }
}

///A game hosted inside another process's frame loop.
///
///Every callback runs on the host's render thread, inside its EndScene. Errors are logged by the
///host and never reach the host process.
///
///Lifecycle: `initialize`, then `load_content` if a device already exists, then `begin_run` and
///one `update` with zero elapsed time on the first frame. Every later frame is one `update`
///followed by one `draw`.
#[allow(unused_variables)]
pub trait Game: Send + 'static {
    fn initialize(&mut self, context: &mut GameContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn begin_run(&mut self, context: &mut GameContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_content(&mut self, context: &mut GameContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn unload_content(&mut self, context: &mut GameContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&mut self, context: &mut GameContext, time: &GameTime) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw(&mut self, context: &mut GameContext, time: &GameTime) -> anyhow::Result<()> {
        Ok(())
    }
}
