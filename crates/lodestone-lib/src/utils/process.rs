#[cfg(windows)]
use std::os::windows::process::CommandExt as _;

/// Extension trait for child-process commands, providing unified console
/// suppression. On Windows a spawned java would otherwise flash a console
/// window; elsewhere this is a no-op.
pub trait CommandExt {
    fn suppress_console(&mut self) -> &mut Self;
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

impl CommandExt for std::process::Command {
    fn suppress_console(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

impl CommandExt for tokio::process::Command {
    fn suppress_console(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}
