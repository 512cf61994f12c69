/*
 *
 *    Translation between native D3DFORMAT / D3DPRESENT_INTERVAL codes and the engine enums.
 *    Both directions use the same tables. An unmapped native code is never fatal: the *_or_default
 *    functions log it and substitute the table default.
 *
 * */

use std::ffi::c_void;

use crate::d3d9::{D3DSWAPEFFECT_DISCARD, NativePresentParameters};
use crate::error::TranslationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceFormat {
    #[default]
    Color,
    Bgr565,
    Bgra5551,
    Bgra4444,
    Dxt1,
    Dxt3,
    Dxt5,
    NormalizedByte2,
    NormalizedByte4,
    Rgba1010102,
    Rg32,
    Rgba64,
    Alpha8,
    Single,
    Vector2,
    Vector4,
    HalfSingle,
    HalfVector2,
    HalfVector4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFormat {
    #[default]
    None,
    Depth16,
    Depth24,
    Depth24Stencil8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentInterval {
    #[default]
    Default,
    One,
    Two,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderTargetUsage {
    DiscardContents,
    PreserveContents,
    #[default]
    PlatformContents,
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

pub(crate) const SURFACE_FORMATS: [(u32, SurfaceFormat); 19] = [
    (0x15, SurfaceFormat::Color),
    (0x17, SurfaceFormat::Bgr565),
    (0x19, SurfaceFormat::Bgra5551),
    (0x1A, SurfaceFormat::Bgra4444),
    (fourcc(b"DXT1"), SurfaceFormat::Dxt1),
    (fourcc(b"DXT3"), SurfaceFormat::Dxt3),
    (fourcc(b"DXT5"), SurfaceFormat::Dxt5),
    (0x3C, SurfaceFormat::NormalizedByte2),
    (0x3F, SurfaceFormat::NormalizedByte4),
    (0x1F, SurfaceFormat::Rgba1010102),
    (0x22, SurfaceFormat::Rg32),
    (0x24, SurfaceFormat::Rgba64),
    (0x1C, SurfaceFormat::Alpha8),
    (0x72, SurfaceFormat::Single),
    (0x73, SurfaceFormat::Vector2),
    (0x74, SurfaceFormat::Vector4),
    (0x6F, SurfaceFormat::HalfSingle),
    (0x70, SurfaceFormat::HalfVector2),
    (0x71, SurfaceFormat::HalfVector4),
];

//D16, D24S8, D24X8
pub(crate) const DEPTH_FORMATS: [(u32, DepthFormat); 3] = [
    (80, DepthFormat::Depth16),
    (75, DepthFormat::Depth24Stencil8),
    (77, DepthFormat::Depth24),
];

pub(crate) const PRESENT_INTERVALS: [(u32, PresentInterval); 4] = [
    (0, PresentInterval::Default),
    (1, PresentInterval::One),
    (2, PresentInterval::Two),
    (0x8000_0000, PresentInterval::Immediate),
];

fn lookup<T: Copy>(table: &[(u32, T)], kind: &'static str, code: u32) -> Result<T, TranslationError> {
    table
        .iter()
        .find(|(native, _)| *native == code)
        .map(|(_, engine)| *engine)
        .ok_or(TranslationError { kind, code })
}

fn reverse<T: Copy + PartialEq>(table: &[(u32, T)], engine: T) -> Option<u32> {
    table
        .iter()
        .find(|(_, candidate)| *candidate == engine)
        .map(|(native, _)| *native)
}

fn or_default<T: Default>(result: Result<T, TranslationError>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("{}, using the default", e);
        T::default()
    })
}

impl SurfaceFormat {
    pub fn try_from_native(code: u32) -> Result<Self, TranslationError> {
        lookup(&SURFACE_FORMATS, "surface format", code)
    }

    pub fn from_native_or_default(code: u32) -> Self {
        or_default(Self::try_from_native(code))
    }

    pub fn to_native(self) -> u32 {
        reverse(&SURFACE_FORMATS, self).unwrap_or(0x15)
    }
}

impl DepthFormat {
    pub fn try_from_native(code: u32) -> Result<Self, TranslationError> {
        lookup(&DEPTH_FORMATS, "depth format", code)
    }

    pub fn from_native_or_default(code: u32) -> Self {
        or_default(Self::try_from_native(code))
    }

    ///D3DFMT_UNKNOWN (0) for `None`.
    pub fn to_native(self) -> u32 {
        reverse(&DEPTH_FORMATS, self).unwrap_or(0)
    }
}

impl PresentInterval {
    pub fn try_from_native(code: u32) -> Result<Self, TranslationError> {
        lookup(&PRESENT_INTERVALS, "present interval", code)
    }

    pub fn from_native_or_default(code: u32) -> Self {
        or_default(Self::try_from_native(code))
    }

    pub fn to_native(self) -> u32 {
        reverse(&PRESENT_INTERVALS, self).unwrap_or(0)
    }
}

///Engine-side description of the back buffer and display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationParameters {
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: SurfaceFormat,
    pub depth_stencil_format: DepthFormat,
    pub device_window_handle: usize,
    pub is_full_screen: bool,
    pub multi_sample_count: u32,
    pub presentation_interval: PresentInterval,
    pub render_target_usage: RenderTargetUsage,
}

impl PresentationParameters {
    ///Builds the engine description from the block the host passed to CreateDevice.
    ///The window is the focus window of that call, not the block's device window.
    pub fn from_native(native: &NativePresentParameters, focus_window: *mut c_void) -> Self {
        Self {
            back_buffer_width: native.back_buffer_width,
            back_buffer_height: native.back_buffer_height,
            back_buffer_format: SurfaceFormat::from_native_or_default(native.back_buffer_format),
            depth_stencil_format: DepthFormat::from_native_or_default(native.auto_depth_stencil_format),
            device_window_handle: focus_window as usize,
            is_full_screen: native.windowed == 0,
            multi_sample_count: native.multi_sample_type,
            presentation_interval: PresentInterval::from_native_or_default(native.presentation_interval),
            render_target_usage: RenderTargetUsage::PlatformContents,
        }
    }

    ///Native block used when the engine creates its own device.
    pub fn to_native(&self) -> NativePresentParameters {
        let depth = self.depth_stencil_format.to_native();
        NativePresentParameters {
            back_buffer_width: self.back_buffer_width,
            back_buffer_height: self.back_buffer_height,
            back_buffer_format: self.back_buffer_format.to_native(),
            back_buffer_count: 1,
            multi_sample_type: self.multi_sample_count,
            multi_sample_quality: 0,
            swap_effect: D3DSWAPEFFECT_DISCARD,
            device_window: self.device_window_handle as *mut c_void,
            windowed: (!self.is_full_screen) as i32,
            enable_auto_depth_stencil: (depth != 0) as i32,
            auto_depth_stencil_format: depth,
            flags: 0,
            full_screen_refresh_rate_hz: 0,
            presentation_interval: self.presentation_interval.to_native(),
        }
    }
}
