use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use tokio::sync::mpsc;

/// Watches the snapshot's directory and signals once per burst of changes to the file.
///
/// The directory is watched rather than the file so atomic replacements are seen.
pub fn setup_watcher(path: &Path) -> (Option<RecommendedWatcher>, Option<mpsc::Receiver<()>>) {
    let (tx, rx) = mpsc::channel(1);
    let file_name: Option<OsString> = path.file_name().map(OsString::from);
    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            let touches_snapshot = event.paths.iter().any(|changed| {
                file_name.is_none() || changed.file_name() == file_name.as_deref()
            });
            if touches_snapshot && (event.kind.is_modify() || event.kind.is_create()) {
                let _ = tx.try_send(());
            }
        },
        Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(_) => return (None, None),
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if watcher.watch(dir, RecursiveMode::NonRecursive).is_err() {
        return (None, None);
    }

    (Some(watcher), Some(rx))
}
