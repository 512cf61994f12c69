//! Stand-ins for Direct3D in unit tests: COM objects with hand-built vtables, and a HookBackend
//! that plays the part of the original (un-detoured) functions.
//!
//! Everything is leaked. Hooks and devices live for the whole process in real use too.

use std::ffi::c_void;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::d3d9::{
    ClearFn, CreateDeviceFn, CreateStateBlockFn, D3D_OK, D3DDEVTYPE_HAL, E_FAIL, HRESULT,
    NativePresentParameters, NativeRect, RefCountFn, StateBlockFn, slot,
};
use crate::error::HookError;
use crate::graphics::device::DeviceHandle;
use crate::graphics::interceptor::{CreateDeviceCall, GraphicsHooks, HookBackend};
use crate::graphics::state_block::RenderStateBlock;

fn leak_vtable(len: usize, entries: &[(usize, usize)]) -> *const usize {
    let mut table = vec![0usize; len];
    for &(index, function) in entries {
        table[index] = function;
    }
    Box::leak(table.into_boxed_slice()).as_ptr()
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

///Windowed 800x600, D3DFMT_X8R8G8B8-ish back buffer (0x15), D24X8 depth.
pub(crate) fn host_parameters() -> NativePresentParameters {
    NativePresentParameters {
        back_buffer_width: 800,
        back_buffer_height: 600,
        back_buffer_format: 0x15,
        back_buffer_count: 1,
        swap_effect: 1,
        windowed: 1,
        enable_auto_depth_stencil: 1,
        auto_depth_stencil_format: 77,
        ..Default::default()
    }
}

pub(crate) fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[repr(C)]
pub(crate) struct FakeStateBlock {
    vtable: *const usize,
    references: AtomicU32,
    kind: u32,
    captures: AtomicU32,
    applies: AtomicU32,
}

impl FakeStateBlock {
    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn applies(&self) -> u32 {
        self.applies.load(Ordering::SeqCst)
    }
}

unsafe extern "system" fn block_add_ref(this: *mut c_void) -> u32 {
    let block = unsafe { &*(this as *const FakeStateBlock) };
    block.references.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "system" fn block_release(this: *mut c_void) -> u32 {
    let block = unsafe { &*(this as *const FakeStateBlock) };
    block.references.fetch_sub(1, Ordering::SeqCst) - 1
}

unsafe extern "system" fn block_capture(this: *mut c_void) -> HRESULT {
    unsafe { &*(this as *const FakeStateBlock) }.captures.fetch_add(1, Ordering::SeqCst);
    D3D_OK
}

unsafe extern "system" fn block_apply(this: *mut c_void) -> HRESULT {
    unsafe { &*(this as *const FakeStateBlock) }.applies.fetch_add(1, Ordering::SeqCst);
    D3D_OK
}

///IDirect3DDevice9 with AddRef, Release, Clear and CreateStateBlock.
#[repr(C)]
pub(crate) struct FakeDevice {
    vtable: *const usize,
    references: AtomicU32,
    clears: Mutex<Vec<(u32, u32, u32)>>,
    fail_state_blocks: AtomicUsize,
    last_state_block: AtomicPtr<FakeStateBlock>,
}

impl FakeDevice {
    ///A device with one reference, owned by whoever asked for it.
    pub fn leak() -> &'static FakeDevice {
        let vtable = leak_vtable(
            119,
            &[
                (slot::ADD_REF, device_add_ref as RefCountFn as usize),
                (slot::RELEASE, device_release as RefCountFn as usize),
                (slot::DEVICE_CLEAR, device_clear as ClearFn as usize),
                (
                    slot::DEVICE_CREATE_STATE_BLOCK,
                    device_create_state_block as CreateStateBlockFn as usize,
                ),
            ],
        );
        Box::leak(Box::new(FakeDevice {
            vtable,
            references: AtomicU32::new(1),
            clears: Mutex::new(Vec::new()),
            fail_state_blocks: AtomicUsize::new(0),
            last_state_block: AtomicPtr::new(null_mut()),
        }))
    }

    /// # Safety
    /// `handle` must come from `FakeDevice::leak`.
    pub unsafe fn from_handle(handle: DeviceHandle) -> &'static FakeDevice {
        unsafe { &*(handle.as_ptr() as *const FakeDevice) }
    }

    pub fn as_ptr(&'static self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub fn handle(&'static self) -> DeviceHandle {
        DeviceHandle::new(self.as_ptr()).unwrap()
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::SeqCst)
    }

    ///(rect count, flags, color) of every Clear call.
    pub fn clears(&self) -> Vec<(u32, u32, u32)> {
        self.clears.lock().unwrap().clone()
    }

    pub fn fail_state_blocks(&self) {
        self.fail_state_blocks.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn last_state_block(&self) -> Option<&'static FakeStateBlock> {
        let block = self.last_state_block.load(Ordering::SeqCst);
        unsafe { block.as_ref() }
    }
}

unsafe extern "system" fn device_add_ref(this: *mut c_void) -> u32 {
    let device = unsafe { &*(this as *const FakeDevice) };
    device.references.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "system" fn device_release(this: *mut c_void) -> u32 {
    let device = unsafe { &*(this as *const FakeDevice) };
    device.references.fetch_sub(1, Ordering::SeqCst) - 1
}

unsafe extern "system" fn device_clear(
    this: *mut c_void,
    count: u32,
    _rects: *const NativeRect,
    flags: u32,
    color: u32,
    _z: f32,
    _stencil: u32,
) -> HRESULT {
    let device = unsafe { &*(this as *const FakeDevice) };
    device.clears.lock().unwrap().push((count, flags, color));
    D3D_OK
}

unsafe extern "system" fn device_create_state_block(
    this: *mut c_void,
    kind: u32,
    out: *mut *mut c_void,
) -> HRESULT {
    let device = unsafe { &*(this as *const FakeDevice) };
    if take_one(&device.fail_state_blocks) {
        return E_FAIL;
    }

    let vtable = leak_vtable(
        8,
        &[
            (slot::ADD_REF, block_add_ref as RefCountFn as usize),
            (slot::RELEASE, block_release as RefCountFn as usize),
            (slot::STATE_BLOCK_CAPTURE, block_capture as StateBlockFn as usize),
            (slot::STATE_BLOCK_APPLY, block_apply as StateBlockFn as usize),
        ],
    );
    let block: &'static mut FakeStateBlock = Box::leak(Box::new(FakeStateBlock {
        vtable,
        references: AtomicU32::new(1),
        kind,
        captures: AtomicU32::new(0),
        applies: AtomicU32::new(0),
    }));
    let block = block as *mut FakeStateBlock;
    device.last_state_block.store(block, Ordering::SeqCst);
    unsafe { *out = block as *mut c_void };
    D3D_OK
}

fn create_fake_device(out: *mut *mut c_void) -> HRESULT {
    let device = FakeDevice::leak();
    if !out.is_null() {
        unsafe { *out = device.as_ptr() };
    }
    D3D_OK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ForwardedCreation {
    pub behavior_flags: u32,
    pub parameters: NativePresentParameters,
}

impl ForwardedCreation {
    fn of(call: &CreateDeviceCall) -> Self {
        Self {
            behavior_flags: call.behavior_flags,
            parameters: unsafe { call.parameters.as_ref() }.copied().unwrap_or_default(),
        }
    }
}

///IDirect3D9 whose CreateDevice either creates a FakeDevice or, when built with
///`leak_hooked`, behaves like the detoured slot and enters `hooks`.
#[repr(C)]
pub(crate) struct FakeFactory {
    vtable: *const usize,
    hooks: Option<&'static GraphicsHooks>,
    calls: Mutex<Vec<ForwardedCreation>>,
    failing: AtomicUsize,
}

impl FakeFactory {
    pub fn leak() -> &'static FakeFactory {
        Self::build(None)
    }

    pub fn leak_hooked(hooks: &'static GraphicsHooks) -> &'static FakeFactory {
        Self::build(Some(hooks))
    }

    fn build(hooks: Option<&'static GraphicsHooks>) -> &'static FakeFactory {
        let vtable = leak_vtable(
            17,
            &[(
                slot::DIRECT3D9_CREATE_DEVICE,
                factory_create_device as CreateDeviceFn as usize,
            )],
        );
        Box::leak(Box::new(FakeFactory {
            vtable,
            hooks,
            calls: Mutex::new(Vec::new()),
            failing: AtomicUsize::new(0),
        }))
    }

    pub fn as_ptr(&'static self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub fn last_call(&self) -> Option<ForwardedCreation> {
        self.calls.lock().unwrap().last().copied()
    }

    pub fn fail_next_creations(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }
}

unsafe extern "system" fn factory_create_device(
    this: *mut c_void,
    adapter: u32,
    device_type: u32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    parameters: *mut NativePresentParameters,
    returned_device: *mut *mut c_void,
) -> HRESULT {
    let factory = unsafe { &*(this as *const FakeFactory) };
    let call = CreateDeviceCall {
        factory: this,
        adapter,
        device_type,
        focus_window,
        behavior_flags,
        parameters,
        returned_device,
    };
    factory.calls.lock().unwrap().push(ForwardedCreation::of(&call));

    match factory.hooks {
        Some(hooks) => unsafe { hooks.on_create_device(&call) },
        None if take_one(&factory.failing) => E_FAIL,
        None => create_fake_device(returned_device),
    }
}

///The "original" functions behind the detours.
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    creations: Mutex<Vec<ForwardedCreation>>,
    hooked: Mutex<Vec<DeviceHandle>>,
    end_scenes: AtomicUsize,
    resets: AtomicUsize,
    failing_forwards: AtomicUsize,
    failing_resets: AtomicUsize,
}

impl FakeBackend {
    ///A fresh, isolated set of hooks over a fresh backend.
    pub fn install() -> (&'static GraphicsHooks, &'static FakeBackend) {
        let backend: &'static FakeBackend = Box::leak(Box::default());
        let hooks: &'static GraphicsHooks = Box::leak(Box::new(GraphicsHooks::new(backend)));
        (hooks, backend)
    }

    pub fn forwarded_creations(&self) -> Vec<ForwardedCreation> {
        self.creations.lock().unwrap().clone()
    }

    pub fn hooked_devices(&self) -> Vec<DeviceHandle> {
        self.hooked.lock().unwrap().clone()
    }

    pub fn forwarded_end_scenes(&self) -> usize {
        self.end_scenes.load(Ordering::SeqCst)
    }

    pub fn forwarded_resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn fail_next_forwards(&self, count: usize) {
        self.failing_forwards.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_resets(&self, count: usize) {
        self.failing_resets.store(count, Ordering::SeqCst);
    }
}

impl HookBackend for FakeBackend {
    unsafe fn forward_create_device(&self, call: &CreateDeviceCall) -> HRESULT {
        self.creations.lock().unwrap().push(ForwardedCreation::of(call));
        if take_one(&self.failing_forwards) {
            return E_FAIL;
        }
        create_fake_device(call.returned_device)
    }

    fn hook_presentation(&self, device: DeviceHandle) -> Result<(), HookError> {
        self.hooked.lock().unwrap().push(device);
        Ok(())
    }

    unsafe fn forward_end_scene(&self, _device: *mut c_void) -> HRESULT {
        self.end_scenes.fetch_add(1, Ordering::SeqCst);
        D3D_OK
    }

    unsafe fn forward_reset(&self, _device: *mut c_void, _parameters: *mut NativePresentParameters) -> HRESULT {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_resets) { E_FAIL } else { D3D_OK }
    }
}

///Runs the host's CreateDevice through `hooks` and returns the device the host received.
pub(crate) fn create_engine_device(hooks: &'static GraphicsHooks, factory: &'static FakeFactory) -> DeviceHandle {
    let mut parameters = host_parameters();
    let mut out = null_mut();
    let call = CreateDeviceCall {
        factory: factory.as_ptr(),
        adapter: 0,
        device_type: D3DDEVTYPE_HAL,
        focus_window: null_mut(),
        behavior_flags: 0x20,
        parameters: &mut parameters,
        returned_device: &mut out,
    };
    assert_eq!(unsafe { hooks.on_create_device(&call) }, D3D_OK);
    DeviceHandle::new(out).expect("host received no device")
}

///Render state block that only records what was done to it.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingStateBlock {
    events: Arc<Mutex<Vec<&'static str>>>,
    fail_capture: bool,
}

impl RecordingStateBlock {
    pub fn failing_capture() -> Self {
        Self {
            fail_capture: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl RenderStateBlock for RecordingStateBlock {
    fn capture(&mut self) -> Result<(), HookError> {
        self.events.lock().unwrap().push("capture");
        if self.fail_capture {
            Err(HookError::Native(E_FAIL))
        } else {
            Ok(())
        }
    }

    fn apply(&mut self) -> Result<(), HookError> {
        self.events.lock().unwrap().push("apply");
        Ok(())
    }
}
