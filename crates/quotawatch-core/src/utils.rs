//! Utility functions for quotawatch-core

use std::path::PathBuf;
use std::process::Command;

/// Creates a Command that hides the console window on Windows.
///
/// The command notification sink spawns the user's notifier program from a
/// background task; on Windows that would otherwise flash a CMD window for
/// every notification.
///
/// # Example
/// ```ignore
/// use quotawatch_core::utils::create_command;
///
/// let status = create_command("notify-send")
///     .arg("Claude quota has reset")
///     .arg("Your Claude quota is available now")
///     .status();
/// ```
pub fn create_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        // CREATE_NO_WINDOW = 0x08000000
        cmd.creation_flags(0x08000000);
    }

    cmd
}

/// Expand a leading `~` and `$VARS` in a user-supplied path.
///
/// Falls back to the raw input when a variable cannot be resolved.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            log::warn!("Could not expand path {}: {}", raw, e);
            PathBuf::from(shellexpand::tilde(raw).as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_returns_command() {
        let cmd = create_command("echo");
        assert!(format!("{:?}", cmd).contains("echo"));
    }

    #[test]
    fn test_expand_path_plain() {
        assert_eq!(expand_path("/tmp/q.db"), PathBuf::from("/tmp/q.db"));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/q.db");
        assert!(expanded.to_string_lossy().ends_with("q.db"));
    }
}
