//! Filesystem event handler for the notify watcher (hot-reload).

use std::fs;
use std::path::Path;

use notify::{Event, EventKind};
use tracing::{info, warn};

use super::core::{is_dotfile, is_yaml, parse_document, DocumentMap};

/// Apply one filesystem event to the document map. Returns whether the
/// document set changed.
pub(super) fn handle_fs_event(event: &Event, documents: &DocumentMap) -> bool {
    let mut changed = false;

    for path in &event.paths {
        // Dotfiles include our own `.tmp` files.
        if !is_yaml(path) || is_dotfile(path) {
            continue;
        }

        match &event.kind {
            EventKind::Create(_) | EventKind::Modify(_) if path.is_file() => {
                changed |= reload_file(path, documents);
            }
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                // Renamed away or deleted.
                changed |= remove_file(path, documents);
            }
            _ => {}
        }
    }

    changed
}

fn reload_file(path: &Path, documents: &DocumentMap) -> bool {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read file during hot-reload");
            return false;
        }
    };

    match parse_document(&contents) {
        Ok(doc) => {
            let mut guard = documents.write().expect("documents lock poisoned");
            if guard.get(path) == Some(&doc) {
                return false;
            }
            info!(id = %doc.metadata().id, kind = %doc.kind(), path = %path.display(), "hot-reloaded config document");
            guard.insert(path.to_path_buf(), doc);
            true
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config during hot-reload, keeping previous version"
            );
            false
        }
    }
}

fn remove_file(path: &Path, documents: &DocumentMap) -> bool {
    let removed = documents
        .write()
        .expect("documents lock poisoned")
        .remove(path);
    match removed {
        Some(doc) => {
            info!(id = %doc.metadata().id, path = %path.display(), "removed config document after file deletion");
            true
        }
        None => false,
    }
}
