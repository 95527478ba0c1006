/// Display mode control for the primary display.
///
/// On Windows this wraps `EnumDisplaySettingsW` / `ChangeDisplaySettingsW`.
/// A frequency change always re-reads the full current mode descriptor and
/// flags only the frequency field as modified, so resolution, color depth and
/// orientation survive the switch untouched.
///
/// On non-Windows platforms the public API compiles but every call fails with
/// [`DisplayError::Unsupported`]; the daemon keeps running and treats each
/// cycle as a degraded no-op.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The OS could not report the current display mode.
    #[error("failed to query current display mode: {0}")]
    Query(String),
    /// The OS rejected the frequency change, or applied it non-persistently.
    /// Any result other than `DISP_CHANGE_SUCCESSFUL` lands here.
    #[error("display change to {hz} Hz rejected by the OS (code {code})")]
    Apply { hz: u32, code: i32 },
    /// Display mode control is not implemented for this platform.
    #[error("display mode control is only supported on Windows")]
    Unsupported,
}

/// Capability consumed by the reconciliation engine. Implemented by the real
/// Windows controller and by in-memory fakes in tests.
pub trait DisplayControl {
    /// Returns the refresh rate of the active display mode, in Hz.
    fn current_refresh_rate(&self) -> Result<u32, DisplayError>;

    /// Applies a frequency-only mode change, preserving all other mode
    /// attributes. The switch is written back to the registry so it persists.
    /// A visible flicker during the switch is expected, not an error.
    fn set_refresh_rate(&self, hz: u32) -> Result<(), DisplayError>;
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use super::DisplayError;
    use windows::core::PCWSTR;
    use windows::Win32::Graphics::Gdi::{
        ChangeDisplaySettingsW, EnumDisplaySettingsW, CDS_UPDATEREGISTRY, DEVMODEW,
        DISP_CHANGE_SUCCESSFUL, DM_DISPLAYFREQUENCY, ENUM_CURRENT_SETTINGS,
    };

    /// Reads the active mode of the primary display into a DEVMODEW.
    pub fn query_current_mode() -> Result<DEVMODEW, DisplayError> {
        let mut devmode = DEVMODEW {
            dmSize: std::mem::size_of::<DEVMODEW>() as u16,
            ..Default::default()
        };
        let ok = unsafe {
            EnumDisplaySettingsW(PCWSTR::null(), ENUM_CURRENT_SETTINGS, &mut devmode)
        };
        if !ok.as_bool() {
            return Err(DisplayError::Query(
                "EnumDisplaySettingsW returned FALSE".to_string(),
            ));
        }
        Ok(devmode)
    }

    pub fn apply_frequency(hz: u32) -> Result<(), DisplayError> {
        // Re-read the live mode so everything except the frequency is carried
        // over exactly as the OS currently has it.
        let mut devmode = query_current_mode()?;
        devmode.dmFields = DM_DISPLAYFREQUENCY;
        devmode.dmDisplayFrequency = hz;

        let result =
            unsafe { ChangeDisplaySettingsW(Some(&devmode as *const _), CDS_UPDATEREGISTRY) };
        if result != DISP_CHANGE_SUCCESSFUL {
            return Err(DisplayError::Apply { hz, code: result.0 });
        }
        Ok(())
    }
}

/// Controller for the primary display on Windows.
#[cfg(windows)]
pub struct WindowsDisplay;

#[cfg(windows)]
impl WindowsDisplay {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
impl DisplayControl for WindowsDisplay {
    fn current_refresh_rate(&self) -> Result<u32, DisplayError> {
        Ok(imp::query_current_mode()?.dmDisplayFrequency)
    }

    fn set_refresh_rate(&self, hz: u32) -> Result<(), DisplayError> {
        imp::apply_frequency(hz)
    }
}

// ── Non-Windows stub ───────────────────────────────────────────────────────────

#[cfg(not(windows))]
pub struct UnsupportedDisplay;

#[cfg(not(windows))]
impl UnsupportedDisplay {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(windows))]
impl DisplayControl for UnsupportedDisplay {
    fn current_refresh_rate(&self) -> Result<u32, DisplayError> {
        Err(DisplayError::Unsupported)
    }

    fn set_refresh_rate(&self, _hz: u32) -> Result<(), DisplayError> {
        Err(DisplayError::Unsupported)
    }
}

/// The controller type for the current build target.
#[cfg(windows)]
pub type PlatformDisplay = WindowsDisplay;
#[cfg(not(windows))]
pub type PlatformDisplay = UnsupportedDisplay;
