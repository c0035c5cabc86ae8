use std::path::Path;

use crate::error::Result;
use crate::family::Core;

/// Debug-probe operations on one devkit.
///
/// Implemented over whatever probe library the host has (J-Link, probe-rs).
/// A devkit without a control is driven by hand: resets are requested from
/// the operator and halts are skipped.
pub trait DeviceControl: Send {
    /// Program `image` into `core` and verify it.
    fn flash(&mut self, image: &Path, core: Core) -> Result<()>;

    /// Reset and let the device run.
    fn reset(&mut self) -> Result<()>;

    /// Stop the CPU so the device stays quiet between tests.
    fn halt(&mut self) -> Result<()>;
}

impl<T: DeviceControl + ?Sized> DeviceControl for Box<T> {
    fn flash(&mut self, image: &Path, core: Core) -> Result<()> {
        (**self).flash(image, core)
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn halt(&mut self) -> Result<()> {
        (**self).halt()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every probe call.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingControl {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingControl {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceControl for RecordingControl {
        fn flash(&mut self, image: &Path, core: Core) -> Result<()> {
            let name = PathBuf::from(image);
            self.calls
                .lock()
                .unwrap()
                .push(format!("flash {core} {}", name.display()));
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("reset".into());
            Ok(())
        }

        fn halt(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("halt".into());
            Ok(())
        }
    }
}
