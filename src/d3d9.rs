/*
 *
 *    Native Direct3D 9 ABI used by the hooks: the presentation-parameter record exactly as d3d9.dll
 *    lays it out, the vtable slot indices we call or detour, and the function pointer types for
 *    those slots. Nothing here owns anything. All pointers are borrowed from the host process.
 *
 * */

use std::ffi::c_void;
use std::ptr::null_mut;

use crate::address_finder::vtable_slot;

#[allow(clippy::upper_case_acronyms)]
pub type HRESULT = i32;

pub const D3D_OK: HRESULT = 0;
pub const E_FAIL: HRESULT = 0x8000_4005_u32 as i32;

pub const D3DPRESENTFLAG_LOCKABLE_BACKBUFFER: u32 = 0x1;
pub const D3DCREATE_FPU_PRESERVE: u32 = 0x2;
pub const D3DCREATE_HARDWARE_VERTEXPROCESSING: u32 = 0x40;
pub const D3DDEVTYPE_HAL: u32 = 1;
pub const D3DSWAPEFFECT_DISCARD: u32 = 1;
pub const D3DSBT_ALL: u32 = 1;
pub const D3DCLEAR_TARGET: u32 = 0x1;

///Vtable slot indices, counted from QueryInterface = 0.
pub mod slot {
    pub const ADD_REF: usize = 1;
    pub const RELEASE: usize = 2;

    pub const DIRECT3D9_CREATE_DEVICE: usize = 16;

    pub const DEVICE_RESET: usize = 16;
    pub const DEVICE_END_SCENE: usize = 42;
    pub const DEVICE_CLEAR: usize = 43;
    pub const DEVICE_CREATE_STATE_BLOCK: usize = 59;

    pub const STATE_BLOCK_CAPTURE: usize = 4;
    pub const STATE_BLOCK_APPLY: usize = 5;
}

///D3DPRESENT_PARAMETERS. Offsets in the comments are for the 32-bit ABI this targets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativePresentParameters {
    pub back_buffer_width: u32,          // 0x00
    pub back_buffer_height: u32,         // 0x04
    pub back_buffer_format: u32,         // 0x08
    pub back_buffer_count: u32,          // 0x0C
    pub multi_sample_type: u32,          // 0x10
    pub multi_sample_quality: u32,       // 0x14
    pub swap_effect: u32,                // 0x18
    pub device_window: *mut c_void,      // 0x1C
    pub windowed: i32,                   // 0x20
    pub enable_auto_depth_stencil: i32,  // 0x24
    pub auto_depth_stencil_format: u32,  // 0x28
    pub flags: u32,                      // 0x2C
    pub full_screen_refresh_rate_hz: u32, // 0x30
    pub presentation_interval: u32,      // 0x34
}

#[cfg(target_pointer_width = "32")]
const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(offset_of!(NativePresentParameters, device_window) == 0x1C);
    assert!(offset_of!(NativePresentParameters, windowed) == 0x20);
    assert!(offset_of!(NativePresentParameters, flags) == 0x2C);
    assert!(offset_of!(NativePresentParameters, presentation_interval) == 0x34);
    assert!(size_of::<NativePresentParameters>() == 0x38);
};

//device_window is a window handle. It is passed along, never dereferenced.
unsafe impl Send for NativePresentParameters {}
unsafe impl Sync for NativePresentParameters {}

impl Default for NativePresentParameters {
    fn default() -> Self {
        Self {
            back_buffer_width: 0,
            back_buffer_height: 0,
            back_buffer_format: 0,
            back_buffer_count: 0,
            multi_sample_type: 0,
            multi_sample_quality: 0,
            swap_effect: 0,
            device_window: null_mut(),
            windowed: 0,
            enable_auto_depth_stencil: 0,
            auto_depth_stencil_format: 0,
            flags: 0,
            full_screen_refresh_rate_hz: 0,
            presentation_interval: 0,
        }
    }
}

///D3DRECT
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

pub type Direct3DCreate9Fn = unsafe extern "system" fn(sdk_version: u32) -> *mut c_void;

pub type CreateDeviceFn = unsafe extern "system" fn(
    this: *mut c_void,
    adapter: u32,
    device_type: u32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    parameters: *mut NativePresentParameters,
    returned_device: *mut *mut c_void,
) -> HRESULT;

pub type EndSceneFn = unsafe extern "system" fn(device: *mut c_void) -> HRESULT;

pub type ResetFn =
    unsafe extern "system" fn(device: *mut c_void, parameters: *mut NativePresentParameters) -> HRESULT;

pub type RefCountFn = unsafe extern "system" fn(this: *mut c_void) -> u32;

pub type CreateStateBlockFn =
    unsafe extern "system" fn(device: *mut c_void, kind: u32, block: *mut *mut c_void) -> HRESULT;

pub type StateBlockFn = unsafe extern "system" fn(block: *mut c_void) -> HRESULT;

pub type ClearFn = unsafe extern "system" fn(
    device: *mut c_void,
    count: u32,
    rects: *const NativeRect,
    flags: u32,
    color: u32,
    z: f32,
    stencil: u32,
) -> HRESULT;

///Reads vtable slot `index` of a COM object as a function pointer of type `F`.
///
/// # Safety
/// `instance` must point to a live COM object whose vtable has at least `index + 1` entries, and
/// `F` must be the pointer type of the method stored in that slot.
pub unsafe fn vtable_fn<F: Copy>(instance: *mut c_void, index: usize) -> F {
    debug_assert_eq!(size_of::<F>(), size_of::<usize>());
    let address = unsafe { vtable_slot(instance as usize, index) };
    unsafe { std::mem::transmute_copy(&address) }
}

/// # Safety
/// `instance` must be a live COM object.
pub unsafe fn add_ref(instance: *mut c_void) -> u32 {
    unsafe {
        let add_ref: RefCountFn = vtable_fn(instance, slot::ADD_REF);
        add_ref(instance)
    }
}

/// # Safety
/// `instance` must be a live COM object on which the caller owns a reference.
pub unsafe fn release(instance: *mut c_void) -> u32 {
    unsafe {
        let release: RefCountFn = vtable_fn(instance, slot::RELEASE);
        release(instance)
    }
}
