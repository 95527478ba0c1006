/// Run-at-login registration.
///
/// The daemon is a stay-resident background utility, so `--register-startup`
/// writes a `Rateshift` value under `HKCU\...\Run` pointing at the current
/// binary and `--unregister-startup` removes it again. Both are idempotent
/// one-shot operations; the daemon exits after performing them.
///
/// On non-Windows platforms both entry points compile and succeed as no-ops.
use anyhow::Result;
use std::path::Path;

/// Builds the command line stored in the Run value. The path is always
/// quoted: an unquoted `REG_SZ` command breaks as soon as the install path
/// contains a space (`C:\Program Files\...`).
fn login_command(exe: &Path) -> String {
    format!("\"{}\"", exe.display())
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "Rateshift";

    /// Null-terminated UTF-16 for the Win32 W-APIs.
    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Opens (creating if needed) the HKCU Run key with write access.
    /// The caller owns the returned handle and must close it.
    fn open_run_key() -> Result<HKEY> {
        let key_w = to_wide(RUN_KEY);
        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {:?}", err);
        }
        Ok(hkey)
    }

    /// Writes `command` as the `Rateshift` Run value.
    /// Idempotent: an existing value is overwritten.
    pub fn set_login_command(command: &str) -> Result<()> {
        let val_w = to_wide(VALUE_NAME);
        let data_w = to_wide(command);
        let data_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
        };

        let hkey = open_run_key()?;
        let err = unsafe {
            RegSetValueExW(
                hkey,
                PCWSTR::from_raw(val_w.as_ptr()),
                0,
                REG_SZ,
                Some(data_bytes),
            )
        };
        unsafe { let _ = RegCloseKey(hkey); };

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {:?}", err);
        }
        Ok(())
    }

    /// Deletes the `Rateshift` Run value.
    /// Succeeds silently if the value was never registered.
    pub fn clear_login_command() -> Result<()> {
        let val_w = to_wide(VALUE_NAME);

        let hkey = open_run_key()?;
        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe { let _ = RegCloseKey(hkey); };

        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {:?}", err);
        }
        Ok(())
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Registers the running daemon binary to launch automatically at user login.
pub fn register_startup() -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| anyhow::anyhow!("Failed to locate daemon executable: {e}"))?;
    let command = login_command(&exe);
    #[cfg(windows)]
    {
        imp::set_login_command(&command)?;
        println!("[startup] Registered in Windows startup: {command}");
    }
    #[cfg(not(windows))]
    {
        // No-op on non-Windows platforms.
        let _ = command;
    }
    Ok(())
}

/// Removes the daemon from the Windows startup registry.
pub fn unregister_startup() -> Result<()> {
    #[cfg(windows)]
    {
        imp::clear_login_command()?;
        println!("[startup] Removed from Windows startup registry");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn login_command_quotes_plain_path() {
        let cmd = login_command(&PathBuf::from(r"C:\Tools\rateshift-daemon.exe"));
        assert_eq!(cmd, r#""C:\Tools\rateshift-daemon.exe""#);
    }

    #[test]
    fn login_command_survives_spaces_in_path() {
        let cmd = login_command(&PathBuf::from(r"C:\Program Files\Rateshift\rateshift-daemon.exe"));
        assert!(cmd.starts_with('"') && cmd.ends_with('"'));
        assert!(cmd.contains(r"Program Files"));
    }
}
