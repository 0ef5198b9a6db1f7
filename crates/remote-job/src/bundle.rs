//! The code bundle loader: unpacks a `SEND_FILE` mapping into a scratch
//! directory unique to the session.
//!
//! Pure with respect to the rest of the job -- it only touches the
//! filesystem under the given root and returns the directory it created.
//! The caller owns deciding what "installing the search path" means for its
//! task registry; this module just materializes files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Write every `name -> bytes` entry into a freshly created subdirectory of
/// `root`. Keys are flat names by convention, but a key containing a path
/// separator has its intermediate directories created rather than rejected.
/// `HashMap` keys are already unique, so last-write-wins only matters for
/// two keys that collide after path separators are honored (e.g. `"a/b"` and
/// `"a/b"` can't collide, but nothing stops the caller's map from aliasing
/// two keys onto the same path another way); writes happen in iteration
/// order and the last one standing wins.
pub fn unpack_bundle(root: &Path, files: &HashMap<String, Vec<u8>>) -> std::io::Result<PathBuf> {
    let session_dir = root.join(format!("remote-job-{}", Uuid::new_v4()));
    fs::create_dir_all(&session_dir)?;

    for (name, bytes) in files {
        let path = session_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
    }

    Ok(session_dir)
}
