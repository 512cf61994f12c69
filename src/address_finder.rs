/*
 *
 *    Resolves the raw addresses the hooks are installed on: exported functions of a
 *    native library, and the methods stored in a COM object's vtable. Functions are very primitive
 *    and return raw usize addresses. PLEASE USE CAUTION, the vtable helpers cannot check anything,
 *    the slot layout comes from the d3d9 headers and is simply trusted.
 *
 *    Libraries loaded here are never unloaded. The hooks live for the rest of the process.
 *
 * */

use crate::error::ResolutionError;

///Loads `library` (if it is not already loaded) and returns the address of `symbol`.
pub fn resolve_export(library: &str, symbol: &str) -> Result<usize, ResolutionError> {
    let address = platform::load_and_resolve(library, symbol)?;
    log::debug!("Resolved {}!{} at {:#x}", library, symbol, address);
    Ok(address)
}

///Dereferences the vtable pointer of `instance` and reads slot `index`.
///
/// # Safety
/// `instance` must be the address of a live object whose first field is a vtable pointer, and
/// that vtable must have more than `index` entries. There is no way to check either.
pub unsafe fn vtable_slot(instance: usize, index: usize) -> usize {
    unsafe {
        let vtable = *(instance as *const usize);
        *((vtable + index * size_of::<usize>()) as *const usize)
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::{CString, OsStr};
    use std::os::windows::ffi::OsStrExt;

    use windows::Win32::Foundation::GetLastError;
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
    use windows::core::{PCSTR, PCWSTR};

    use crate::error::ResolutionError;

    pub fn load_and_resolve(library: &str, symbol: &str) -> Result<usize, ResolutionError> {
        //Null-terminated u16 array as is the wide character standard.
        let wide: Vec<u16> = OsStr::new(library).encode_wide().chain(Some(0)).collect();
        let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }.map_err(|e| {
            ResolutionError::LibraryNotFound {
                library: library.to_owned(),
                code: e.code().0,
                reason: e.message().to_string(),
            }
        })?;

        let symbol_not_found = |code: i32, reason: &str| ResolutionError::SymbolNotFound {
            library: library.to_owned(),
            symbol: symbol.to_owned(),
            code,
            reason: reason.to_owned(),
        };
        let name = CString::new(symbol).map_err(|_| symbol_not_found(0, "symbol contains a nul byte"))?;

        match unsafe { GetProcAddress(module, PCSTR(name.as_ptr() as *const u8)) } {
            Some(proc) => Ok(proc as usize),
            None => {
                let code = unsafe { GetLastError() }.0 as i32;
                Err(symbol_not_found(code, "GetProcAddress failed"))
            }
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use libloading::Library;

    use crate::error::ResolutionError;

    pub fn load_and_resolve(library: &str, symbol: &str) -> Result<usize, ResolutionError> {
        let handle = unsafe { Library::new(library) }.map_err(|e| ResolutionError::LibraryNotFound {
            library: library.to_owned(),
            code: 0,
            reason: e.to_string(),
        })?;

        let address = unsafe { handle.get::<unsafe extern "C" fn()>(symbol.as_bytes()) }
            .map(|proc| *proc as usize)
            .map_err(|e| ResolutionError::SymbolNotFound {
                library: library.to_owned(),
                symbol: symbol.to_owned(),
                code: 0,
                reason: e.to_string(),
            })?;

        //Never unloaded: the resolved address has to outlive this call.
        std::mem::forget(handle);
        Ok(address)
    }
}
