use std::fs::{OpenOptions, create_dir_all};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Context;
use chrono::Local;
use fern::Dispatch;

use config::{DEFAULT_CONFIG_FILE, HostConfig};
use demo::PulseGame;
use error::HookError;
use events::SubscriptionId;
use game::{Game, GameHost};
use graphics::{DeviceCreated, GraphicsDeviceManager, graphics_hooks, hook_device_creation};

pub mod address_finder;
pub mod clock;
pub mod config;
pub mod d3d9;
pub mod demo;
pub mod error;
pub mod events;
pub mod game;
pub mod graphics;
pub mod hooks;
pub mod services;

#[cfg(test)]
mod test_support;

const LAUNCH_FAILED: u32 = 0xDEAD;

/*
 *
 * Called by the launcher once the DLL is mapped into the still-suspended host. The only argument
 * is an optional config file path (UTF-16, null-terminated). Everything after hooking
 * Direct3DCreate9 happens later, from the host's own CreateDevice.
 *
 * There is no way to uninstall. Stopping means ending the host process.
 *
 * */
/// # Safety
/// `config_path` must be null or point to a null-terminated UTF-16 string.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn Launch(config_path: *const u16) -> u32 {
    let path = unsafe { read_wide(config_path) }
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let result = HostConfig::load_or_create(&path)
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            enable_logging(&config)?;
            log::info!("Loaded config from {:?}", path);
            if config.run_demo {
                launch(&config, PulseGame::new)?;
            } else {
                hook_device_creation(&config.d3d9_library)?;
                log::info!("Demo disabled, hooks installed without a game");
            }
            Ok(())
        });

    match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("Launch failed: {:#}", e);
            LAUNCH_FAILED
        }
    }
}

///Hooks device creation and, once the host has created its device, runs the game made by
///`make_game` on a thread of its own.
pub fn launch<G, F>(config: &HostConfig, make_game: F) -> Result<(), HookError>
where
    G: Game,
    F: FnOnce() -> G + Send + 'static,
{
    hook_device_creation(&config.d3d9_library)?;

    let hooks = graphics_hooks();
    let make_game = Mutex::new(Some(make_game));
    let started = AtomicBool::new(false);
    let subscription: Arc<OnceLock<SubscriptionId>> = Arc::default();

    let id = {
        let subscription = subscription.clone();
        hooks.device_created.subscribe(move |created: &DeviceCreated| {
            if started.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(id) = subscription.get() {
                hooks.device_created.unsubscribe(*id);
            }
            let Some(make_game) = make_game.lock().unwrap_or_else(|e| e.into_inner()).take() else {
                return;
            };

            log::info!(
                "Engine device created ({}x{}), starting the game",
                created.parameters.back_buffer_width,
                created.parameters.back_buffer_height
            );
            let spawned = std::thread::Builder::new()
                .name("d3d9-game-host".into())
                .spawn(move || {
                    let host = GameHost::builder(make_game()).hooks(hooks).build();
                    if let Err(e) = GraphicsDeviceManager::new(host.services(), hooks) {
                        log::error!("Could not register the device manager: {}", e);
                        return;
                    }
                    if let Err(e) = host.run() {
                        log::error!("Game host failed to start: {}", e);
                    }
                });
            if let Err(e) = spawned {
                log::error!("Could not spawn the game thread: {}", e);
            }
        })
    };
    //Set before any device can be created: the host is still suspended.
    let _ = subscription.set(id);
    Ok(())
}

unsafe fn read_wide(text: *const u16) -> Option<String> {
    if text.is_null() {
        return None;
    }
    let mut len = 0;
    while unsafe { *text.add(len) } != 0 {
        len += 1;
    }
    let text = String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(text, len) });
    (!text.is_empty()).then_some(text)
}

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

///Sets up fern and the panic hook. Only the first call does anything.
pub fn enable_logging(config: &HostConfig) -> anyhow::Result<()> {
    if LOGGING_ENABLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let file = {
        create_dir_all(&config.log_dir)
            .with_context(|| format!("Failed to create logs directory {:?}", config.log_dir))?;

        let filename = format!("d3d9-game-host-{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let filepath = config.log_dir.join(filename);

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filepath)
            .with_context(|| format!("Failed to open log file {:?}", filepath))?
    };

    let mut dispatch = Dispatch::new()
        .level(config.level_filter())
        .chain(file)
        .format(|out, message, record| {
            let now = Local::now();
            if record.level() == log::Level::Error {
                out.finish(format_args!(
                    "[{}] [d3d9-game-host] [{}] [{}:{}] {}",
                    now.format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.file().unwrap_or("<unknown>"),
                    record.line().unwrap_or(0),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{}] [d3d9-game-host] [{}] {}",
                    now.format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    message
                ))
            }
        });
    if config.log_to_stdout {
        dispatch = dispatch.chain(std::io::stdout());
    }
    dispatch.apply().ok();

    //Panic hook
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("Unknown panic");

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        log::error!("PANIC at {}: {}", location, payload);
    }));

    log::info!(
        "---------------------------------------- New Session ----------------------------------------------"
    );
    if !config.has_known_level() {
        log::warn!("Unknown log level {:?}, using debug", config.log_level);
    }
    Ok(())
}

#[cfg(windows)]
mod dll {
    use windows::Win32::Foundation::HINSTANCE;
    use windows::Win32::System::SystemServices::DLL_PROCESS_DETACH;

    ///Hooks stay installed until the process exits, so detach only leaves a note in the log.
    #[unsafe(no_mangle)]
    extern "system" fn DllMain(_dll_module: HINSTANCE, call_reason: u32, _: *mut ()) -> bool {
        if call_reason == DLL_PROCESS_DETACH {
            log::info!("Detaching from process");
        }
        true
    }
}
