use tracing::{info, warn};

use crate::access::AccessPolicy;
use crate::errors::{ReelError, Result};
use crate::storage::VideoStorage;
use crate::storage::models::{DestinationId, NewVideo, Video, VideoId, normalize_tags};

pub trait MessagingGateway {
    fn send_video(&self, destination: DestinationId, video: &Video) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sender {
    pub user: i64,
    pub chat: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent(Video),
    AlreadyDelivered(Video),
}

pub struct Dispatcher<'a, S, G> {
    store: &'a S,
    gateway: &'a G,
    policy: &'a AccessPolicy,
}

impl<'a, S: VideoStorage, G: MessagingGateway> Dispatcher<'a, S, G> {
    pub fn new(store: &'a S, gateway: &'a G, policy: &'a AccessPolicy) -> Self {
        Self {
            store,
            gateway,
            policy,
        }
    }

    pub fn ingest(&self, sender: Sender, video: NewVideo) -> Result<VideoId> {
        if !self.policy.may_ingest(sender.user, sender.chat) {
            return Err(ReelError::Unauthorized(format!(
                "user {} in chat {} may not add videos",
                sender.user, sender.chat
            )));
        }
        let id = self.store.save(video)?;
        info!(video_id = id, user = sender.user, "video ingested");
        Ok(id)
    }

    pub fn attach_tags(&self, id: VideoId, tags: &[&str]) -> Result<Vec<String>> {
        self.store.add_tags(id, tags)?;
        Ok(normalize_tags(tags))
    }

    pub fn deliver_next(&self, destination: DestinationId) -> Result<Video> {
        let video = self.store.pick_random_undelivered(destination)?;
        self.gateway.send_video(destination, &video)?;
        self.record(destination, &video)?;
        Ok(video)
    }

    pub fn deliver_by_id(&self, destination: DestinationId, id: VideoId) -> Result<DeliveryOutcome> {
        let video = self.store.get_by_id(id)?;
        if self.store.has_been_delivered(destination, id) {
            return Ok(DeliveryOutcome::AlreadyDelivered(video));
        }
        self.gateway.send_video(destination, &video)?;
        self.record(destination, &video)?;
        Ok(DeliveryOutcome::Sent(video))
    }

    pub fn by_tag(&self, tag: &str) -> Result<Vec<Video>> {
        self.store.get_by_tag(tag)
    }

    pub fn catalogue(&self, sender: Sender) -> Result<Vec<Video>> {
        self.require_admin(sender)?;
        self.store.list_all()
    }

    pub fn remove(&self, sender: Sender, id: VideoId) -> Result<bool> {
        self.require_admin(sender)?;
        let removed = self.store.delete(id)?;
        if removed {
            info!(video_id = id, user = sender.user, "video removed");
        }
        Ok(removed)
    }

    fn require_admin(&self, sender: Sender) -> Result<()> {
        if self.policy.is_admin(sender.user) {
            Ok(())
        } else {
            Err(ReelError::Unauthorized(format!("user {} is not an admin", sender.user)))
        }
    }

    // A concurrent delivery may have recorded the pair first; the video still
    // reached the destination, so that is not a failure.
    fn record(&self, destination: DestinationId, video: &Video) -> Result<()> {
        match self.store.mark_delivered(destination, video.id) {
            Ok(()) => Ok(()),
            Err(ReelError::DuplicateDelivery { .. }) => {
                warn!(destination, video_id = video.id, "delivery already recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
