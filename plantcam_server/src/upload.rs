//! Upload adapter: turns uploaded files into gallery entries.
//!
use bytes::Bytes;
use common::protocol::{RejectedFile, UploadReport};
use futures::{stream::FuturesUnordered, StreamExt};

use crate::gallery::{Gallery, NewEntry};

/// A file received from the page.
pub struct UploadFile {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Decode all files concurrently and add every decoded image to the gallery.
///
/// Entries are inserted as their decoding finishes, so their order is not tied
/// to the order of `files`. Files that fail to decode are reported and do not
/// affect the others.
pub async fn add_uploads(gallery: &Gallery, files: Vec<UploadFile>) -> UploadReport {
    let mut decoding: FuturesUnordered<_> = files
        .into_iter()
        .map(|file| async move {
            let file_name = file.file_name.clone();
            let result =
                tokio::task::spawn_blocking(move || NewEntry::decode(file.file_name, file.data))
                    .await;
            (file_name, result)
        })
        .collect();

    let mut report = UploadReport::default();
    while let Some((file_name, result)) = decoding.next().await {
        let reason = match result {
            Ok(Ok(new_entry)) => {
                let id = gallery.insert(new_entry);
                log::info!("Uploaded {:?} as gallery entry {}", file_name, id);
                report.added.push(id);
                continue;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(err) => format!("decoding task failed: {err}"),
        };

        log::warn!("Rejected upload {:?}: {}", file_name, reason);
        report.rejected.push(RejectedFile { file_name, reason });
    }

    report
}
