pub mod device;
pub mod formats;
pub mod interceptor;
pub mod manager;
pub mod native;
pub mod state_block;

pub use device::{DeviceHandle, GraphicsDevice};
pub use formats::{DepthFormat, PresentInterval, PresentationParameters, RenderTargetUsage, SurfaceFormat};
pub use interceptor::{DeviceCreated, DeviceNotice, GraphicsHooks};
pub use manager::{DeviceEvents, DeviceManager, GraphicsDeviceManager, GraphicsDeviceService};
pub use native::{graphics_hooks, hook_device_creation};
