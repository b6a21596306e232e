//! Custom test assertions for integration tests

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use bundle_dl::{ProgressEvent, RunResult};
use tokio::sync::broadcast;

/// Read every entry of the ZIP file at `path` as `(name, bytes)`, in archive order
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path)
        .unwrap_or_else(|e| panic!("Failed to open archive {}: {}", path.display(), e));
    let mut archive = zip::ZipArchive::new(file).expect("Failed to read archive");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).expect("Failed to read archive entry");
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .expect("Failed to read archive entry");
            (entry.name().to_string(), bytes)
        })
        .collect()
}

/// Names of the entries in the ZIP file at `path`
pub fn zip_names(path: &Path) -> Vec<String> {
    read_zip(path).into_iter().map(|(name, _)| name).collect()
}

/// Collect events until a terminal phase arrives or `timeout` elapses
pub async fn collect_events_until_terminal(
    events: &mut broadcast::Receiver<ProgressEvent>,
    timeout: Duration,
) -> Vec<ProgressEvent> {
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let terminal = event.phase.is_terminal();
            collected.push(event);
            if terminal {
                break;
            }
        }
    })
    .await;
    collected
}

/// Assert percent never decreases and exactly the last event is terminal
pub fn assert_well_formed(events: &[ProgressEvent]) {
    assert!(!events.is_empty(), "no progress events");
    for pair in events.windows(2) {
        assert!(
            pair[0].percent <= pair[1].percent,
            "percent went backwards: {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
    let terminal: Vec<_> = events.iter().filter(|e| e.phase.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "expected one terminal event: {terminal:?}");
    assert!(events.last().is_some_and(|e| e.phase.is_terminal()));
}

/// Outcome of the descriptor named `name`
pub fn outcome_of<'a>(result: &'a RunResult, name: &str) -> &'a bundle_dl::Outcome {
    &result
        .individual_results
        .iter()
        .find(|r| r.descriptor.suggested_name == name)
        .unwrap_or_else(|| panic!("no result for {name}"))
        .outcome
}
