use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::scan;
use super::state::StateStore;

/// A capture file appeared or changed in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub name: String,
}

/// Watches the captures directory (direct children only) and forwards
/// create/modify events as capture events. The receiver side applies
/// debouncing; this layer only maps and filters.
pub fn start_capture_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<CaptureEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for capture in map_event(event) {
                let _ = tx.send(capture);
            }
        }
    })?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

fn map_event(event: Event) -> Vec<CaptureEvent> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name.starts_with('.') {
                    return None;
                }
                Some(CaptureEvent { name })
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A capture already recorded at its current on-disk mtime does not warrant
/// a run request; the event was a replay of something already transferred.
pub fn needs_backup(store: &StateStore, root: &Path, event: &CaptureEvent) -> bool {
    match scan::current_mtime(&root.join(&event.name)) {
        Ok(mtime) => store.stored_mtime(&event.name) != Some(mtime),
        // Vanished before we looked; the next scan decides.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn maps_create_event_to_capture() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/tmp/handshakes/net-01.pcap")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_event(event),
            vec![CaptureEvent {
                name: "net-01.pcap".into()
            }]
        );
    }

    #[test]
    fn ignores_hidden_files_and_removals() {
        let hidden = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/tmp/handshakes/.capmirror_state.json")],
            attrs: Default::default(),
        };
        assert!(map_event(hidden).is_empty());

        let removal = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/tmp/handshakes/net-01.pcap")],
            attrs: Default::default(),
        };
        assert!(map_event(removal).is_empty());
    }

    #[test]
    fn already_recorded_captures_do_not_need_backup() {
        let dir = tempdir().unwrap();
        let state_dir = tempdir().unwrap();
        let path = dir.path().join("net-01.pcap");
        std::fs::write(&path, b"capture").unwrap();

        let store = StateStore::open(state_dir.path().join("state.json"));
        let event = CaptureEvent {
            name: "net-01.pcap".into(),
        };
        assert!(needs_backup(&store, dir.path(), &event));

        let mtime = scan::current_mtime(&path).unwrap();
        store.record_success("net-01.pcap", mtime).unwrap();
        assert!(!needs_backup(&store, dir.path(), &event));

        let missing = CaptureEvent {
            name: "gone.pcap".into(),
        };
        assert!(!needs_backup(&store, dir.path(), &missing));
    }
}
