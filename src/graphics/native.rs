/*
 *
 *    The real detours. Direct3DCreate9 is hooked by export; the factory's CreateDevice and the
 *    device's EndScene/Reset are hooked through their vtable slots once the objects exist.
 *    Each detour is an extern "system" thunk that hands over to GRAPHICS_HOOKS and never lets a
 *    panic cross back into the host.
 *
 *    The detours are never removed. They live in statics for the rest of the process.
 *
 * */

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::null_mut;
use std::sync::{Mutex, OnceLock};

use retour::Function;

use crate::address_finder::{resolve_export, vtable_slot};
use crate::d3d9::{
    CreateDeviceFn, Direct3DCreate9Fn, E_FAIL, EndSceneFn, HRESULT, NativePresentParameters, ResetFn,
    slot,
};
use crate::error::{DetourError, HookError};
use crate::graphics::device::DeviceHandle;
use crate::graphics::interceptor::{CreateDeviceCall, GraphicsHooks, HookBackend, panic_message};
use crate::hooks::{Detour, DetourEngine};

pub struct D3d9Hooks {
    detours: DetourEngine,
    install: Mutex<()>,
    direct3d_create9: OnceLock<Detour<Direct3DCreate9Fn>>,
    create_device: OnceLock<Detour<CreateDeviceFn>>,
    end_scene: OnceLock<Detour<EndSceneFn>>,
    reset: OnceLock<Detour<ResetFn>>,
}

static NATIVE_HOOKS: D3d9Hooks = D3d9Hooks::new();

pub static GRAPHICS_HOOKS: GraphicsHooks = GraphicsHooks::new(&NATIVE_HOOKS);

pub fn graphics_hooks() -> &'static GraphicsHooks {
    &GRAPHICS_HOOKS
}

///Hooks Direct3DCreate9 in `library`. Does nothing if that was already done.
///Must run before the host creates its device, i.e. with the host still suspended.
pub fn hook_device_creation(library: &str) -> Result<(), HookError> {
    NATIVE_HOOKS.hook_direct3d_create9(library)
}

impl D3d9Hooks {
    const fn new() -> Self {
        Self {
            detours: DetourEngine::new(),
            install: Mutex::new(()),
            direct3d_create9: OnceLock::new(),
            create_device: OnceLock::new(),
            end_scene: OnceLock::new(),
            reset: OnceLock::new(),
        }
    }

    fn hook_direct3d_create9(&self, library: &str) -> Result<(), HookError> {
        let _install = self.install.lock().unwrap_or_else(|e| e.into_inner());
        if self.direct3d_create9.get().is_some() {
            log::debug!("Device creation is already hooked");
            return Ok(());
        }

        let target = resolve_export(library, "Direct3DCreate9")?;
        let detour = unsafe { self.detours.prepare(target, direct3d_create9_detour as Direct3DCreate9Fn)? };
        unsafe { store_and_enable(&self.direct3d_create9, detour)? };
        log::info!(
            "Hooked Direct3DCreate9: {:#x} -> {:#x}",
            target,
            direct3d_create9_detour as Direct3DCreate9Fn as usize
        );
        Ok(())
    }

    fn hook_factory(&self, factory: *mut c_void) -> Result<(), HookError> {
        let _install = self.install.lock().unwrap_or_else(|e| e.into_inner());
        let target = unsafe { vtable_slot(factory as usize, slot::DIRECT3D9_CREATE_DEVICE) };
        let detour = unsafe { self.detours.prepare(target, create_device_detour as CreateDeviceFn)? };
        unsafe { store_and_enable(&self.create_device, detour)? };
        log::info!("Hooked IDirect3D9::CreateDevice at {:#x}", target);
        Ok(())
    }
}

impl HookBackend for D3d9Hooks {
    unsafe fn forward_create_device(&self, call: &CreateDeviceCall) -> HRESULT {
        let Some(detour) = self.create_device.get() else {
            log::error!("CreateDevice forwarded before its detour was stored");
            return E_FAIL;
        };
        unsafe {
            (detour.original())(
                call.factory,
                call.adapter,
                call.device_type,
                call.focus_window,
                call.behavior_flags,
                call.parameters,
                call.returned_device,
            )
        }
    }

    fn hook_presentation(&self, device: DeviceHandle) -> Result<(), HookError> {
        let _install = self.install.lock().unwrap_or_else(|e| e.into_inner());
        let end_scene = unsafe { vtable_slot(device.address(), slot::DEVICE_END_SCENE) };
        let reset = unsafe { vtable_slot(device.address(), slot::DEVICE_RESET) };

        let end_scene = unsafe { self.detours.prepare(end_scene, end_scene_detour as EndSceneFn)? };
        let reset = unsafe { self.detours.prepare(reset, reset_detour as ResetFn)? };
        log::info!(
            "Hooking EndScene at {:#x} and Reset at {:#x} for device {:#x}",
            end_scene.target(),
            reset.target(),
            device.address()
        );

        unsafe {
            store_and_enable(&self.end_scene, end_scene)?;
            store_and_enable(&self.reset, reset)?;
        }
        Ok(())
    }

    unsafe fn forward_end_scene(&self, device: *mut c_void) -> HRESULT {
        match self.end_scene.get() {
            Some(detour) => unsafe { (detour.original())(device) },
            None => E_FAIL,
        }
    }

    unsafe fn forward_reset(&self, device: *mut c_void, parameters: *mut NativePresentParameters) -> HRESULT {
        match self.reset.get() {
            Some(detour) => unsafe { (detour.original())(device, parameters) },
            None => E_FAIL,
        }
    }
}

///Puts `detour` where its replacement looks up the original, then enables it. A call that reaches
///the replacement can therefore always forward.
///
/// # Safety
/// The replacement must be ready to be called from any thread.
unsafe fn store_and_enable<F: Function>(cell: &OnceLock<Detour<F>>, detour: Detour<F>) -> Result<(), HookError> {
    cell.set(detour)
        .map_err(|detour| DetourError::AlreadyHooked(detour.target()))?;
    if let Some(detour) = cell.get() {
        unsafe { detour.enable()? };
    }
    Ok(())
}

///Runs a hook body. A panic is logged and replaced by `fallback`.
fn shielded<R>(what: &str, body: impl FnOnce() -> R, fallback: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            log::error!("{} hook panicked: {}", what, panic_message(payload.as_ref()));
            fallback()
        }
    }
}

unsafe extern "system" fn direct3d_create9_detour(sdk_version: u32) -> *mut c_void {
    let Some(detour) = NATIVE_HOOKS.direct3d_create9.get() else {
        return null_mut();
    };
    let factory = unsafe { (detour.original())(sdk_version) };

    shielded(
        "Direct3DCreate9",
        || {
            if GRAPHICS_HOOKS.record_factory(factory) {
                log::info!("Captured IDirect3D9 {:?} (sdk {})", factory, sdk_version);
                if let Err(e) = NATIVE_HOOKS.hook_factory(factory) {
                    log::error!("Could not hook IDirect3D9::CreateDevice: {}", e);
                }
            }
        },
        || (),
    );
    factory
}

unsafe extern "system" fn create_device_detour(
    factory: *mut c_void,
    adapter: u32,
    device_type: u32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    parameters: *mut NativePresentParameters,
    returned_device: *mut *mut c_void,
) -> HRESULT {
    let call = CreateDeviceCall {
        factory,
        adapter,
        device_type,
        focus_window,
        behavior_flags,
        parameters,
        returned_device,
    };
    shielded(
        "CreateDevice",
        || unsafe { GRAPHICS_HOOKS.on_create_device(&call) },
        || unsafe { NATIVE_HOOKS.forward_create_device(&call) },
    )
}

unsafe extern "system" fn end_scene_detour(device: *mut c_void) -> HRESULT {
    log::trace!("EndScene {:?}", device);
    shielded(
        "EndScene",
        || unsafe { GRAPHICS_HOOKS.on_end_scene(device) },
        || unsafe { NATIVE_HOOKS.forward_end_scene(device) },
    )
}

unsafe extern "system" fn reset_detour(device: *mut c_void, parameters: *mut NativePresentParameters) -> HRESULT {
    shielded(
        "Reset",
        || unsafe { GRAPHICS_HOOKS.on_reset(device, parameters) },
        || unsafe { NATIVE_HOOKS.forward_reset(device, parameters) },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooking_a_missing_library_fails_cleanly() {
        let err = hook_device_creation("no-such-d3d9-build.dll").unwrap_err();
        assert!(matches!(err, HookError::Resolution(_)));
        assert!(NATIVE_HOOKS.direct3d_create9.get().is_none());
    }

    #[test]
    fn forwarding_before_hooks_exist_reports_failure() {
        let call = CreateDeviceCall {
            factory: null_mut(),
            adapter: 0,
            device_type: 1,
            focus_window: null_mut(),
            behavior_flags: 0,
            parameters: null_mut(),
            returned_device: null_mut(),
        };
        assert_eq!(unsafe { NATIVE_HOOKS.forward_create_device(&call) }, E_FAIL);
        assert_eq!(unsafe { NATIVE_HOOKS.forward_end_scene(null_mut()) }, E_FAIL);
    }

    #[test]
    fn shielded_replaces_a_panic_with_the_fallback() {
        assert_eq!(shielded("test", || -> HRESULT { panic!("boom") }, || 7), 7);
        assert_eq!(shielded("test", || 1, || 7), 1);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    mod stored_before_enabled {
        use std::hint::black_box;

        use super::*;

        type StepFn = unsafe extern "system" fn(i32) -> i32;

        static STEP: OnceLock<Detour<StepFn>> = OnceLock::new();

        #[inline(never)]
        unsafe extern "system" fn plus_one(x: i32) -> i32 {
            black_box(x).wrapping_add(black_box(1))
        }

        #[inline(never)]
        unsafe extern "system" fn plus_two(x: i32) -> i32 {
            black_box(x).wrapping_add(black_box(2))
        }

        //Finds its original through STEP, the way the Direct3D thunks do.
        unsafe extern "system" fn doubled(x: i32) -> i32 {
            match STEP.get() {
                Some(detour) => unsafe { (detour.original())(x) }.wrapping_mul(2),
                None => i32::MIN,
            }
        }

        #[test]
        fn the_first_redirected_call_reaches_the_original() {
            let engine = DetourEngine::new();
            let detour = unsafe { engine.prepare(plus_one as StepFn as usize, doubled as StepFn) }.unwrap();
            assert!(!detour.is_enabled());

            unsafe { store_and_enable(&STEP, detour) }.unwrap();
            assert_eq!(unsafe { (black_box(plus_one as StepFn))(4) }, 10);

            //The slot is taken: a second detour is refused and never enabled.
            let other = unsafe { engine.prepare(plus_two as StepFn as usize, doubled as StepFn) }.unwrap();
            let err = unsafe { store_and_enable(&STEP, other) }.unwrap_err();
            assert!(matches!(err, HookError::Detour(DetourError::AlreadyHooked(_))));
            assert_eq!(unsafe { (black_box(plus_two as StepFn))(4) }, 6);
        }
    }
}
