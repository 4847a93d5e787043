//! Win32 Pageant transport: `CreateFileMappingA` + `SendMessageA(WM_COPYDATA)`.

#![cfg(target_os = "windows")]

use std::ffi::{c_void, CString};

use windows::core::PCSTR;
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE, LPARAM, WPARAM,
};
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::Memory::{
    CreateFileMappingA, MapViewOfFile, UnmapViewOfFile, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows::Win32::UI::WindowsAndMessaging::{FindWindowA, SendMessageA, WM_COPYDATA};

use super::{PageantIpc, SharedRegion, AGENT_COPYDATA_ID, PAGEANT_WINDOW};
use crate::domain::BridgeError;

/// Talks to the real Pageant window of the current desktop session.
#[derive(Debug, Default)]
pub struct Win32Pageant;

impl Win32Pageant {
    pub fn new() -> Self {
        Self
    }
}

impl PageantIpc for Win32Pageant {
    type Region = MappedRegion;

    fn create_region(&self, name: &str, size: usize) -> Result<MappedRegion, BridgeError> {
        let c_name = CString::new(name)
            .map_err(|_| BridgeError::ProtocolMismatch(format!("region name {name:?} contains NUL")))?;
        let size_low = u32::try_from(size).map_err(|_| BridgeError::FrameTooLarge {
            total: size,
            max: u32::MAX as usize,
        })?;

        // SAFETY: c_name is a valid NUL-terminated string that outlives the call;
        // INVALID_HANDLE_VALUE requests a mapping backed by the paging file.
        let mapping = unsafe {
            CreateFileMappingA(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                size_low,
                PCSTR(c_name.as_ptr().cast()),
            )
        }
        .map_err(|e| BridgeError::backend_unavailable(format!("CreateFileMapping {name}: {e}")))?;

        // SAFETY: reads the calling thread's last-error value, set by the call above.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // SAFETY: mapping is a valid handle owned by this function.
            let _ = unsafe { CloseHandle(mapping) };
            return Err(BridgeError::backend_unavailable(format!(
                "shared region {name} already exists"
            )));
        }

        // SAFETY: mapping is a valid file-mapping handle; 0 maps the whole object.
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_WRITE, 0, 0, 0) };
        if view.Value.is_null() {
            let err = std::io::Error::last_os_error();
            // SAFETY: mapping is a valid handle owned by this function.
            let _ = unsafe { CloseHandle(mapping) };
            return Err(BridgeError::backend_unavailable(format!(
                "MapViewOfFile {name}: {err}"
            )));
        }

        Ok(MappedRegion {
            name: name.to_string(),
            c_name,
            mapping,
            view,
            len: size,
        })
    }

    fn notify_agent(&self, region: &mut MappedRegion) -> Result<(), BridgeError> {
        let window = CString::new(PAGEANT_WINDOW)
            .map_err(|_| BridgeError::ProtocolMismatch("window name contains NUL".into()))?;
        let window_name = PCSTR(window.as_ptr().cast());

        // SAFETY: both arguments point at the same valid NUL-terminated string.
        let hwnd = unsafe { FindWindowA(window_name, window_name) }
            .ok()
            .filter(|h| !h.0.is_null())
            .ok_or_else(|| BridgeError::backend_unavailable("Pageant window not found"))?;

        let payload = region.c_name.as_bytes_with_nul();
        let cds = COPYDATASTRUCT {
            dwData: AGENT_COPYDATA_ID,
            cbData: payload.len() as u32,
            lpData: payload.as_ptr() as *mut c_void,
        };

        // SAFETY: cds and the name it points to stay alive until SendMessageA
        // returns; Pageant only reads them during the call.
        let result = unsafe {
            SendMessageA(
                hwnd,
                WM_COPYDATA,
                Some(WPARAM(0)),
                Some(LPARAM(&cds as *const COPYDATASTRUCT as isize)),
            )
        };
        if result.0 == 0 {
            return Err(BridgeError::backend_unavailable(format!(
                "Pageant rejected request {}",
                region.name
            )));
        }
        Ok(())
    }
}

/// A mapped view of a named file mapping.  Unmapped and closed on drop.
pub struct MappedRegion {
    name: String,
    c_name: CString,
    mapping: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
}

impl SharedRegion for MappedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: view points at `len` mapped bytes for as long as self lives.
        unsafe { std::slice::from_raw_parts(self.view.Value as *const u8, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self guarantees no other slice is alive.
        unsafe { std::slice::from_raw_parts_mut(self.view.Value as *mut u8, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: view and mapping were created together in create_region and
        // are released exactly once here.
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
        }
    }
}
