use std::{
    path::Path,
    time::{Duration, Instant},
};

use crate::outside::Rar;

/// An archiver running the given shell script body instead of rar.
///
/// The script is run by `sh`, receiving the rar arguments as `$1...`:
/// `$5` is the archive name, `$6` the media file name, then the companions.
pub fn fake_archiver(dir: &Path, body: &str) -> Rar {
    let script = dir.join("fake-rar.sh");
    std::fs::write(&script, body).unwrap();

    Rar::from_command(["sh".to_owned(), script.to_string_lossy().into_owned()]).unwrap()
}

/// Poll `f` until it returns something or the timeout expires
pub fn wait_until<T, F>(timeout: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = f() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
