//! Back-buffer capture for a parked session.

use mirage_core::components::ScreenshotEncoder;
use mirage_core::vfs::open_increment_file;

use crate::context::SupervisorShared;
use crate::error::ScreenshotError;

/// Writes the current frame to the next free `<rom>-<n>.png` slot in the
/// state directory. The frame lock is held for the whole capture so the
/// pixels cannot change under the encoder.
pub(crate) fn take(
    shared: &SupervisorShared,
    encoder: &dyn ScreenshotEncoder,
) -> Result<(), ScreenshotError> {
    let Some(attachment) = shared.attachment.load_full() else {
        return Err(ScreenshotError::NotRunning);
    };
    let frame = shared.sync.wait_frame_start(0);
    let (width, height) = attachment.frames.dimensions();
    let rom_name = shared.rom_name.lock().expect("rom name poisoned").clone();
    let mut file = {
        let mut dirs = shared.dirs.lock().expect("directories poisoned");
        let dir = dirs
            .state_dir_mut()
            .ok_or(ScreenshotError::NoStateDirectory)?;
        open_increment_file(dir, rom_name.as_deref(), "screenshot", "-", ".png")?
    };
    let mut result = Ok(());
    attachment.frames.with_pixels(&mut |pixels, stride| {
        result = encoder.encode(width, height, stride, pixels, file.as_mut());
    });
    drop(frame);
    result.map_err(ScreenshotError::Io)
}
