/*
 *
 *    Runs a Game inside the host's frame loop.
 *
 *    run() blocks its (dedicated) thread until the host's render thread reaches the first EndScene.
 *    That first EndScene initializes the game and releases run(). From then on every EndScene is
 *    exactly one tick, executed right there on the host's render thread with the host's render
 *    state captured before and applied back after.
 *
 *    EndScene is hooked at the function, so it fires for every device of the host. Each device gets
 *    its own state block, dropped when that device resets (Reset fails while state blocks exist).
 *
 *    Lifecycle handlers (device created/resetting/disposing) take the same state lock as the frame
 *    handler. A game must not reset or dispose the device from inside update/draw.
 *
 * */

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;

use crate::clock::{GameClock, SystemCounter, TickSource};
use crate::error::{ConfigurationError, HookError};
use crate::events::{Handoff, SubscriptionId};
use crate::game::{Game, GameContext, GameTime};
use crate::graphics::device::DeviceHandle;
use crate::graphics::interceptor::{DeviceNotice, GraphicsHooks};
use crate::graphics::manager::{DeviceManager, GraphicsDeviceService};
use crate::graphics::native::graphics_hooks;
use crate::graphics::state_block::{CapturedState, RenderStateBlock, StateBlock};
use crate::services::ServiceRegistry;

type StateBlockFactory =
    Box<dyn Fn(DeviceHandle) -> Result<Box<dyn RenderStateBlock>, HookError> + Send + Sync>;

struct AppState<G> {
    game: G,
    context: GameContext,
    clock: GameClock,
    manager: Option<Arc<dyn DeviceManager>>,
    last_frame_elapsed: Duration,
    total_elapsed: Duration,
    initialized: bool,
}

impl<G: Game> AppState<G> {
    fn initialize(&mut self) -> anyhow::Result<()> {
        self.game.initialize(&mut self.context).context("initialize failed")?;
        if self.context.graphics_device().is_ok() {
            self.game.load_content(&mut self.context).context("load_content failed")?;
        }
        Ok(())
    }

    fn first_frame(&mut self) {
        if let Err(e) = self.initialize() {
            log::error!("{:#}", e);
        }
        if let Err(e) = self.game.begin_run(&mut self.context) {
            log::error!("begin_run failed: {:#}", e);
        }

        let time = GameTime {
            total: self.total_elapsed,
            elapsed: Duration::ZERO,
            is_running_slowly: false,
        };
        if let Err(e) = self.game.update(&mut self.context, &time) {
            log::error!("First update failed: {:#}", e);
        }

        //Start measuring from this frame.
        self.clock.reset();
        self.clock.step();
        self.initialized = true;
    }

    ///One update and (if it succeeded and drawing is possible) one draw.
    fn tick(&mut self) -> anyhow::Result<()> {
        self.clock.step();
        self.last_frame_elapsed = self.clock.elapsed_adjusted();

        let time = GameTime {
            total: self.total_elapsed,
            elapsed: self.last_frame_elapsed,
            is_running_slowly: false,
        };
        let updated = self.game.update(&mut self.context, &time).context("update failed");
        self.total_elapsed += self.last_frame_elapsed;

        let result = updated.and_then(|()| self.draw_frame());
        self.last_frame_elapsed = Duration::ZERO;
        result
    }

    fn draw_frame(&mut self) -> anyhow::Result<()> {
        let can_draw = self.manager.as_ref().is_none_or(|manager| manager.begin_draw());
        if !can_draw {
            log::trace!("Device manager declined to draw");
            return Ok(());
        }

        let time = GameTime {
            total: self.total_elapsed,
            elapsed: self.last_frame_elapsed,
            is_running_slowly: false,
        };
        let drawn = self.game.draw(&mut self.context, &time).context("draw failed");
        if let Some(manager) = &self.manager {
            manager.end_draw();
        }
        drawn
    }
}

struct HostState<G> {
    app: AppState<G>,
    render_states: HashMap<DeviceHandle, Box<dyn RenderStateBlock>>,
}

#[derive(Debug, Default)]
struct Subscriptions {
    first_frame: Option<SubscriptionId>,
    steady: Option<SubscriptionId>,
}

struct HostShared<G> {
    state: Mutex<HostState<G>>,
    services: Arc<ServiceRegistry>,
    hooks: &'static GraphicsHooks,
    handoff: Handoff,
    state_blocks: StateBlockFactory,
    subscriptions: Mutex<Subscriptions>,
}

impl<G: Game> HostShared<G> {
    fn lock(&self) -> MutexGuard<'_, HostState<G>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_first_frame(self: &Arc<Self>, notice: &DeviceNotice) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = subscriptions.first_frame.take() {
            self.hooks.end_scene.unsubscribe(id);
        }
        if subscriptions.steady.is_some() {
            return;
        }

        log::info!("First frame on device {:#x}, initializing", notice.device.address());
        self.wire_lifecycle();
        self.lock().app.first_frame();

        let shared = self.clone();
        let steady = self
            .hooks
            .end_scene
            .subscribe(move |notice: &DeviceNotice| shared.on_frame(notice));
        subscriptions.steady = Some(steady);
        drop(subscriptions);

        self.handoff.signal();
    }

    fn on_frame(&self, notice: &DeviceNotice) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let block = match state.render_states.entry(notice.device) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match (self.state_blocks)(notice.device) {
                Ok(block) => {
                    log::debug!("Created a render state block for device {:#x}", notice.device.address());
                    entry.insert(block)
                }
                Err(e) => {
                    log::error!("Could not create a render state block, skipping frame: {}", e);
                    return;
                }
            },
        };

        let _restore = match CapturedState::capture(block.as_mut()) {
            Ok(restore) => restore,
            Err(e) => {
                log::error!("Could not capture render state, skipping frame: {}", e);
                return;
            }
        };
        if let Err(e) = state.app.tick() {
            log::error!("Game tick failed: {:#}", e);
        }
    }

    fn wire_lifecycle(self: &Arc<Self>) {
        let shared = Arc::downgrade(self);
        self.hooks.resetting.subscribe(move |notice: &DeviceNotice| {
            if let Some(shared) = shared.upgrade() {
                if shared.lock().render_states.remove(&notice.device).is_some() {
                    log::debug!(
                        "Device {:#x} resetting, dropped its render state block",
                        notice.device.address()
                    );
                }
            }
        });

        let Some(service) = self.services.get::<dyn GraphicsDeviceService>() else {
            log::debug!("No graphics device service, device lifecycle is not tracked");
            return;
        };
        let events = service.events();

        let shared = Arc::downgrade(self);
        events.created.subscribe(move |_: &()| {
            if let Some(shared) = shared.upgrade() {
                let mut state = shared.lock();
                let app = &mut state.app;
                if let Err(e) = app.game.load_content(&mut app.context) {
                    log::error!("load_content failed: {:#}", e);
                }
            }
        });

        let shared = Arc::downgrade(self);
        events.disposing.subscribe(move |_: &()| {
            if let Some(shared) = shared.upgrade() {
                let mut state = shared.lock();
                let app = &mut state.app;
                app.context.content.unload();
                if let Err(e) = app.game.unload_content(&mut app.context) {
                    log::error!("unload_content failed: {:#}", e);
                }
            }
        });
    }
}

pub struct GameHostBuilder<G> {
    game: G,
    hooks: &'static GraphicsHooks,
    services: Option<Arc<ServiceRegistry>>,
    tick_source: Option<Box<dyn TickSource>>,
    state_blocks: Option<StateBlockFactory>,
}

impl<G: Game> GameHostBuilder<G> {
    pub fn hooks(mut self, hooks: &'static GraphicsHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn tick_source(mut self, source: Box<dyn TickSource>) -> Self {
        self.tick_source = Some(source);
        self
    }

    ///How render state blocks are created for a device. Defaults to `StateBlock::create`.
    pub fn state_blocks<F>(mut self, factory: F) -> Self
    where
        F: Fn(DeviceHandle) -> Result<Box<dyn RenderStateBlock>, HookError> + Send + Sync + 'static,
    {
        self.state_blocks = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> GameHost<G> {
        let services = self.services.unwrap_or_default();
        let source = self
            .tick_source
            .unwrap_or_else(|| Box::new(SystemCounter::new()));
        let state_blocks = self.state_blocks.unwrap_or_else(|| {
            Box::new(|device: DeviceHandle| {
                Ok(Box::new(StateBlock::create(device)?) as Box<dyn RenderStateBlock>)
            })
        });

        let app = AppState {
            game: self.game,
            context: GameContext::new(services.clone()),
            clock: GameClock::with_source(source),
            manager: None,
            last_frame_elapsed: Duration::ZERO,
            total_elapsed: Duration::ZERO,
            initialized: false,
        };

        GameHost {
            shared: Arc::new(HostShared {
                state: Mutex::new(HostState {
                    app,
                    render_states: HashMap::new(),
                }),
                services,
                hooks: self.hooks,
                handoff: Handoff::new(),
                state_blocks,
                subscriptions: Mutex::new(Subscriptions::default()),
            }),
        }
    }
}

pub struct GameHost<G> {
    shared: Arc<HostShared<G>>,
}

impl<G: Game> GameHost<G> {
    pub fn new(game: G) -> Self {
        Self::builder(game).build()
    }

    pub fn builder(game: G) -> GameHostBuilder<G> {
        GameHostBuilder {
            game,
            hooks: graphics_hooks(),
            services: None,
            tick_source: None,
            state_blocks: None,
        }
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.shared.services
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().app.initialized
    }

    ///Asks the registered device manager (if any) for its device, then blocks until the host's
    ///first frame has initialized the game. Must not be called on the host's render thread.
    pub fn run(&self) -> Result<(), ConfigurationError> {
        {
            let mut subscriptions = self
                .shared
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if subscriptions.steady.is_some() {
                log::debug!("Game is already running");
                return Ok(());
            }
            if subscriptions.first_frame.is_some() {
                return Err(ConfigurationError::AlreadyStarting);
            }

            let manager = self.shared.services.get::<dyn DeviceManager>();
            if let Some(manager) = &manager {
                manager.create_device()?;
            }
            self.shared.lock().app.manager = manager;

            let shared = self.shared.clone();
            subscriptions.first_frame = Some(
                self.shared
                    .hooks
                    .end_scene
                    .subscribe(move |notice: &DeviceNotice| shared.on_first_frame(notice)),
            );
        }

        log::info!("Waiting for the first frame");
        self.shared.handoff.wait();
        log::info!("Game is running on the render thread");
        Ok(())
    }
}
