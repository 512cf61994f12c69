/*
 *
 *    The engine-level device. It owns one COM reference on an IDirect3DDevice9 created through
 *    the factory's CreateDevice slot, and releases it when dropped.
 *
 *    native_handle() is the only place that reaches into the device for its native pointer.
 *
 * */

use std::ffi::c_void;
use std::ptr::{NonNull, null_mut};

use crate::d3d9::{
    self, ClearFn, CreateDeviceFn, D3D_OK, D3DCLEAR_TARGET, D3DCREATE_FPU_PRESERVE,
    D3DCREATE_HARDWARE_VERTEXPROCESSING, NativeRect, slot, vtable_fn,
};
use crate::error::HookError;
use crate::graphics::formats::PresentationParameters;

///Non-null IDirect3DDevice9 pointer. Does not own a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(NonNull<c_void>);

//The pointer is only an identity outside of the host's render thread.
unsafe impl Send for DeviceHandle {}
unsafe impl Sync for DeviceHandle {}

impl DeviceHandle {
    pub fn new(device: *mut c_void) -> Option<Self> {
        NonNull::new(device).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn address(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

pub struct GraphicsDevice {
    native: *mut c_void,
    parameters: PresentationParameters,
}

//All native calls happen on the host's render thread once the loop is running.
unsafe impl Send for GraphicsDevice {}
unsafe impl Sync for GraphicsDevice {}

impl GraphicsDevice {
    ///Creates a device through the factory's CreateDevice slot. When that slot is detoured the
    ///call goes through the hook again.
    ///
    /// # Safety
    /// `factory` must be a live IDirect3D9.
    pub unsafe fn create(
        factory: *mut c_void,
        adapter: u32,
        device_type: u32,
        focus_window: *mut c_void,
        parameters: &PresentationParameters,
    ) -> Result<Self, HookError> {
        if factory.is_null() {
            return Err(HookError::NullArgument("factory"));
        }

        let mut native_parameters = parameters.to_native();
        let mut device = null_mut();
        let hr = unsafe {
            let create_device: CreateDeviceFn = vtable_fn(factory, slot::DIRECT3D9_CREATE_DEVICE);
            create_device(
                factory,
                adapter,
                device_type,
                focus_window,
                D3DCREATE_HARDWARE_VERTEXPROCESSING | D3DCREATE_FPU_PRESERVE,
                &mut native_parameters,
                &mut device,
            )
        };
        if hr < 0 {
            return Err(HookError::Native(hr));
        }

        log::debug!("Engine device created at {:?}", device);
        Ok(Self {
            native: device,
            parameters: *parameters,
        })
    }

    ///Takes ownership of one reference on `native`.
    ///
    /// # Safety
    /// `native` must be null or a live IDirect3DDevice9 on which the caller owns a reference.
    pub unsafe fn from_raw(native: *mut c_void, parameters: PresentationParameters) -> Self {
        Self { native, parameters }
    }

    pub fn parameters(&self) -> &PresentationParameters {
        &self.parameters
    }

    ///Clears `rects` (the whole target if empty) of the render target to `color` (ARGB).
    pub fn clear(&self, rects: &[NativeRect], color: u32) -> Result<(), HookError> {
        let handle = native_handle(self)?;
        let hr = unsafe {
            let clear: ClearFn = vtable_fn(handle.as_ptr(), slot::DEVICE_CLEAR);
            let pointer = if rects.is_empty() { std::ptr::null() } else { rects.as_ptr() };
            clear(handle.as_ptr(), rects.len() as u32, pointer, D3DCLEAR_TARGET, color, 1.0, 0)
        };
        match hr {
            D3D_OK => Ok(()),
            hr => Err(HookError::Native(hr)),
        }
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if !self.native.is_null() {
            unsafe { d3d9::release(self.native) };
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("native", &self.native)
            .field("parameters", &self.parameters)
            .finish()
    }
}

///Reads the native IDirect3DDevice9 pointer out of the engine device.
pub fn native_handle(device: &GraphicsDevice) -> Result<DeviceHandle, HookError> {
    DeviceHandle::new(device.native).ok_or(HookError::MissingDeviceHandle)
}

///Adds a COM reference for a second owner of `device`.
pub fn add_ref(device: DeviceHandle) -> u32 {
    unsafe { d3d9::add_ref(device.as_ptr()) }
}
