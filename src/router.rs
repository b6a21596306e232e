//! Routing between the shared archive and individual transfers

use crate::config::{Config, SizeLimits};
use crate::types::{FetchedPayload, MediaClass, RejectReason, ResourceDescriptor, TransferPlan};

/// Decides the terminal action for each descriptor
///
/// Policy, in order:
/// 1. Video-class extensions always go to individual persistence.
/// 2. Non-video payloads above the standard ceiling are rejected.
/// 3. Payloads above the archive-entry ceiling go to individual persistence.
/// 4. Everything else goes into the archive.
#[derive(Clone, Debug)]
pub struct TransferRouter {
    video_extensions: Vec<String>,
    limits: SizeLimits,
    direct_video_transfers: bool,
}

impl TransferRouter {
    /// Build a router from the run configuration
    pub fn new(config: &Config) -> Self {
        Self {
            video_extensions: config
                .routing
                .video_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            limits: config.limits.clone(),
            direct_video_transfers: config.routing.direct_video_transfers,
        }
    }

    /// Media class of a file name under this router's video extensions
    pub fn media_class(&self, name: &str) -> MediaClass {
        MediaClass::of(name, &self.video_extensions)
    }

    /// Absolute ceiling for a file name
    pub fn ceiling_for(&self, name: &str) -> u64 {
        self.media_class(name).ceiling(&self.limits)
    }

    /// Route a descriptor before fetching it
    ///
    /// Returns `Some(IndividualPersist)` for videos when direct video transfers
    /// are enabled, so their bytes never cross the boundary. `None` means the
    /// descriptor must be fetched and then [`classify`](Self::classify)-ed.
    pub fn pre_route(&self, descriptor: &ResourceDescriptor) -> Option<TransferPlan> {
        (self.direct_video_transfers
            && self.media_class(&descriptor.suggested_name) == MediaClass::Video)
            .then_some(TransferPlan::IndividualPersist)
    }

    /// Classify a fetched payload
    pub fn classify(
        &self,
        descriptor: &ResourceDescriptor,
        payload: &FetchedPayload,
    ) -> TransferPlan {
        self.classify_len(descriptor, payload.byte_length)
    }

    /// Classify by name and length alone
    pub fn classify_len(&self, descriptor: &ResourceDescriptor, byte_length: u64) -> TransferPlan {
        if self.media_class(&descriptor.suggested_name) == MediaClass::Video {
            return TransferPlan::IndividualPersist;
        }
        if byte_length > self.limits.standard_ceiling {
            return TransferPlan::Rejected(RejectReason::TooLarge {
                limit: self.limits.standard_ceiling,
                actual: byte_length,
            });
        }
        if byte_length > self.limits.archive_entry_ceiling {
            return TransferPlan::IndividualPersist;
        }
        TransferPlan::Archive
    }
}
