/*
 *
 *    Snapshot of the device's complete render state (IDirect3DStateBlock9 created with D3DSBT_ALL).
 *    The application loop captures the host's state before it draws and applies it afterwards,
 *    since the host's own presentation code assumes nothing changed.
 *
 * */

use std::ffi::c_void;
use std::ptr::null_mut;

use crate::d3d9::{self, CreateStateBlockFn, D3DSBT_ALL, StateBlockFn, slot, vtable_fn};
use crate::error::HookError;
use crate::graphics::device::DeviceHandle;

pub trait RenderStateBlock: Send {
    fn capture(&mut self) -> Result<(), HookError>;
    fn apply(&mut self) -> Result<(), HookError>;
}

#[derive(Debug)]
pub struct StateBlock {
    block: *mut c_void,
}

//Used only from the host's render thread.
unsafe impl Send for StateBlock {}

impl StateBlock {
    pub fn create(device: DeviceHandle) -> Result<Self, HookError> {
        let mut block = null_mut();
        let hr = unsafe {
            let create: CreateStateBlockFn = vtable_fn(device.as_ptr(), slot::DEVICE_CREATE_STATE_BLOCK);
            create(device.as_ptr(), D3DSBT_ALL, &mut block)
        };
        if hr < 0 {
            return Err(HookError::Native(hr));
        }
        if block.is_null() {
            return Err(HookError::NullArgument("state block"));
        }
        log::debug!("Created render state block {:?} for device {:#x}", block, device.address());
        Ok(Self { block })
    }

    fn call(&self, index: usize) -> Result<(), HookError> {
        let hr = unsafe {
            let method: StateBlockFn = vtable_fn(self.block, index);
            method(self.block)
        };
        if hr < 0 { Err(HookError::Native(hr)) } else { Ok(()) }
    }
}

impl RenderStateBlock for StateBlock {
    fn capture(&mut self) -> Result<(), HookError> {
        self.call(slot::STATE_BLOCK_CAPTURE)
    }

    fn apply(&mut self) -> Result<(), HookError> {
        self.call(slot::STATE_BLOCK_APPLY)
    }
}

impl Drop for StateBlock {
    fn drop(&mut self) {
        unsafe { d3d9::release(self.block) };
    }
}

///Captured render state. Applied back when the guard goes out of scope, whatever happened in
///between.
pub struct CapturedState<'a> {
    block: &'a mut dyn RenderStateBlock,
}

impl<'a> CapturedState<'a> {
    pub fn capture(block: &'a mut dyn RenderStateBlock) -> Result<Self, HookError> {
        block.capture()?;
        Ok(Self { block })
    }
}

impl Drop for CapturedState<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.block.apply() {
            log::error!("Failed to restore render state: {}", e);
        }
    }
}
