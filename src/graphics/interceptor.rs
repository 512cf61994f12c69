/*
 *
 *    Device-creation and presentation interception.
 *
 *    GraphicsHooks holds every piece of process-wide hook state (captured factory, creation phase,
 *    engine device, notification lists). The native detours in graphics::native forward into one
 *    static instance of it. Tests build their own instance over a fake backend.
 *
 *    Creation runs as a two-state machine:
 *      Idle    -> the host's CreateDevice. Translate its parameters, build the engine device (which
 *                 calls CreateDevice again), hook EndScene/Reset on it and hand it to the host.
 *      Nested  -> the engine device's own CreateDevice. Force the lockable back buffer flag, put
 *                 back the host's behavior flags and forward.
 *    The phase never goes back to Idle. One device per process.
 *
 *    Nothing in here may unwind into the host. Every failure degrades to forwarding the call.
 *
 * */

use std::any::Any;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::d3d9::{D3D_OK, D3DPRESENTFLAG_LOCKABLE_BACKBUFFER, HRESULT, NativePresentParameters};
use crate::error::HookError;
use crate::events::Event;
use crate::graphics::device::{DeviceHandle, GraphicsDevice, add_ref, native_handle};
use crate::graphics::formats::PresentationParameters;

///Arguments of one IDirect3D9::CreateDevice call, exactly as the caller passed them.
#[derive(Debug, Clone, Copy)]
pub struct CreateDeviceCall {
    pub factory: *mut c_void,
    pub adapter: u32,
    pub device_type: u32,
    pub focus_window: *mut c_void,
    pub behavior_flags: u32,
    pub parameters: *mut NativePresentParameters,
    pub returned_device: *mut *mut c_void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Idle,
    Nested { preserved_behavior_flags: u32 },
}

///The native side of the hooks: the original implementations and the presentation detours.
pub trait HookBackend: Send + Sync {
    /// # Safety
    /// `call` must carry the arguments of a real CreateDevice call.
    unsafe fn forward_create_device(&self, call: &CreateDeviceCall) -> HRESULT;

    ///Installs the EndScene and Reset hooks for `device`.
    fn hook_presentation(&self, device: DeviceHandle) -> Result<(), HookError>;

    /// # Safety
    /// `device` must be the device EndScene was called on.
    unsafe fn forward_end_scene(&self, device: *mut c_void) -> HRESULT;

    /// # Safety
    /// Arguments must be those Reset was called with.
    unsafe fn forward_reset(&self, device: *mut c_void, parameters: *mut NativePresentParameters) -> HRESULT;
}

pub struct DeviceCreated {
    pub device: Arc<GraphicsDevice>,
    pub parameters: PresentationParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNotice {
    pub device: DeviceHandle,
}

pub struct GraphicsHooks {
    backend: &'static dyn HookBackend,
    phase: Mutex<CreationPhase>,
    factory: AtomicUsize,
    engine_device: OnceLock<Arc<GraphicsDevice>>,

    pub device_created: Event<DeviceCreated>,
    pub end_scene: Event<DeviceNotice>,
    pub resetting: Event<DeviceNotice>,
    pub reset: Event<DeviceNotice>,
}

impl GraphicsHooks {
    pub const fn new(backend: &'static dyn HookBackend) -> Self {
        Self {
            backend,
            phase: Mutex::new(CreationPhase::Idle),
            factory: AtomicUsize::new(0),
            engine_device: OnceLock::new(),
            device_created: Event::new(),
            end_scene: Event::new(),
            resetting: Event::new(),
            reset: Event::new(),
        }
    }

    ///Remembers the first factory handed out. Returns false if one was already recorded.
    pub fn record_factory(&self, factory: *mut c_void) -> bool {
        !factory.is_null()
            && self
                .factory
                .compare_exchange(0, factory as usize, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn factory(&self) -> Option<usize> {
        match self.factory.load(Ordering::Acquire) {
            0 => None,
            factory => Some(factory),
        }
    }

    pub fn phase(&self) -> CreationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn engine_device(&self) -> Option<Arc<GraphicsDevice>> {
        self.engine_device.get().cloned()
    }

    ///Body of the CreateDevice detour.
    ///
    /// # Safety
    /// `call` must carry the arguments of a real CreateDevice call.
    pub unsafe fn on_create_device(&self, call: &CreateDeviceCall) -> HRESULT {
        let phase = {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            let observed = *phase;
            if observed == CreationPhase::Idle {
                *phase = CreationPhase::Nested {
                    preserved_behavior_flags: call.behavior_flags,
                };
            }
            observed
        };

        match phase {
            CreationPhase::Nested { preserved_behavior_flags } => unsafe {
                self.forward_nested(call, preserved_behavior_flags)
            },
            CreationPhase::Idle => match unsafe { self.intercept(call) } {
                Ok(()) => D3D_OK,
                Err(e) => {
                    log::error!("Device interception failed, forwarding CreateDevice unmodified: {}", e);
                    unsafe { self.backend.forward_create_device(call) }
                }
            },
        }
    }

    unsafe fn forward_nested(&self, call: &CreateDeviceCall, preserved_behavior_flags: u32) -> HRESULT {
        if let Some(parameters) = unsafe { call.parameters.as_mut() } {
            parameters.flags |= D3DPRESENTFLAG_LOCKABLE_BACKBUFFER;
        }
        log::debug!(
            "Nested CreateDevice, flags {:#x} -> {:#x}",
            call.behavior_flags,
            preserved_behavior_flags
        );
        let corrected = CreateDeviceCall {
            behavior_flags: preserved_behavior_flags,
            ..*call
        };
        unsafe { self.backend.forward_create_device(&corrected) }
    }

    unsafe fn intercept(&self, call: &CreateDeviceCall) -> Result<(), HookError> {
        let native = unsafe { call.parameters.as_ref() }
            .ok_or(HookError::NullArgument("presentation parameters"))?;
        if call.returned_device.is_null() {
            return Err(HookError::NullArgument("returned device"));
        }

        let parameters = PresentationParameters::from_native(native, call.focus_window);
        log::info!(
            "Intercepted CreateDevice: {}x{} {:?}, depth {:?}, full screen {}",
            parameters.back_buffer_width,
            parameters.back_buffer_height,
            parameters.back_buffer_format,
            parameters.depth_stencil_format,
            parameters.is_full_screen
        );

        let device = unsafe {
            GraphicsDevice::create(
                call.factory,
                call.adapter,
                call.device_type,
                call.focus_window,
                &parameters,
            )?
        };
        let handle = native_handle(&device)?;
        self.backend.hook_presentation(handle)?;

        //The host gets its own reference. The engine device keeps the one it was created with.
        add_ref(handle);
        unsafe { *call.returned_device = handle.as_ptr() };

        let device = Arc::new(device);
        if self.engine_device.set(device.clone()).is_err() {
            log::warn!("An engine device already exists, keeping the first one");
        }

        guarded("device created", || {
            self.device_created.publish(&DeviceCreated { device, parameters })
        });
        Ok(())
    }

    ///Body of the EndScene detour. Subscribers run first, then the frame is forwarded.
    ///
    /// # Safety
    /// `device` must be the device EndScene was called on.
    pub unsafe fn on_end_scene(&self, device: *mut c_void) -> HRESULT {
        if let Some(device) = DeviceHandle::new(device) {
            guarded("end of frame", || self.end_scene.publish(&DeviceNotice { device }));
        }
        unsafe { self.backend.forward_end_scene(device) }
    }

    ///Body of the Reset detour. Always forwarded; `reset` is only published when it succeeded.
    ///
    /// # Safety
    /// Arguments must be those Reset was called with.
    pub unsafe fn on_reset(&self, device: *mut c_void, parameters: *mut NativePresentParameters) -> HRESULT {
        let handle = DeviceHandle::new(device);
        if let Some(device) = handle {
            guarded("device resetting", || self.resetting.publish(&DeviceNotice { device }));
        }

        let hr = unsafe { self.backend.forward_reset(device, parameters) };

        match handle {
            Some(device) if hr >= 0 => {
                guarded("device reset", || self.reset.publish(&DeviceNotice { device }))
            }
            _ if hr < 0 => log::warn!("Device reset returned {:#010x}", hr),
            _ => {}
        }
        hr
    }
}

///Runs `f`, logging instead of unwinding if it panics.
pub(crate) fn guarded<F: FnOnce()>(what: &str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        log::error!("A {} subscriber panicked: {}", what, panic_message(payload.as_ref()));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("Unknown panic")
}
