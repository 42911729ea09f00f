use crate::abi::{self, HostCallbacks, StatusCode};

/// Safe wrapper over the host callback table an add-on receives at creation.
pub struct HostContext {
    inner: *const HostCallbacks,
}

impl HostContext {
    /// # Safety
    /// `ptr` must point to a [`HostCallbacks`] table that outlives the
    /// returned context. The host guarantees this for the table passed to
    /// `create`.
    pub unsafe fn from_raw(ptr: *const HostCallbacks) -> Self {
        Self { inner: ptr }
    }

    pub fn trace(&self, message: &str) {
        self.log(abi::LOG_TRACE, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(abi::LOG_DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(abi::LOG_INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(abi::LOG_WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.log(abi::LOG_ERROR, message);
    }

    fn log(&self, level: u32, message: &str) {
        unsafe {
            let cb = &*self.inner;
            (cb.log)(cb.host_data, level, message.as_ptr(), message.len());
        }
    }

    /// Read one stored setting from the host. Returns `None` when the key
    /// has no stored value or the stored bytes are not valid JSON.
    pub fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        unsafe {
            let cb = &*self.inner;
            let needed = (cb.get_setting)(
                cb.host_data,
                key.as_ptr(),
                key.len(),
                std::ptr::null_mut(),
                0,
            );
            if needed < 0 {
                return None;
            }
            let mut buf = vec![0u8; needed as usize];
            let written = (cb.get_setting)(
                cb.host_data,
                key.as_ptr(),
                key.len(),
                buf.as_mut_ptr(),
                buf.len(),
            );
            if written < 0 {
                return None;
            }
            buf.truncate(buf.len().min(written as usize));
            serde_json::from_slice(&buf).ok()
        }
    }

    /// Report a status change to the host without waiting for it.
    pub fn emit_status(&self, status: StatusCode, detail: &str) {
        unsafe {
            let cb = &*self.inner;
            (cb.emit_status)(cb.host_data, status.0, detail.as_ptr(), detail.len());
        }
    }
}

// SAFETY: the wrapped table is immutable and the host keeps it alive for the
// add-on's whole lifetime; every callback is required to be thread-safe.
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}
