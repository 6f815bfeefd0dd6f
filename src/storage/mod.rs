pub mod migrate;
pub mod models;
pub mod pool;
pub mod schema;
pub mod sqlite;

pub use pool::{connect, open};

use crate::errors::Result;
use models::{DestinationId, NewVideo, TagCount, Video, VideoId};

pub trait VideoStorage {
    fn save(&self, video: NewVideo) -> Result<VideoId>;
    fn get_by_id(&self, id: VideoId) -> Result<Video>;
    fn get_by_tag(&self, tag: &str) -> Result<Vec<Video>>;
    fn add_tags(&self, id: VideoId, tags: &[&str]) -> Result<()>;
    fn get_tags(&self, id: VideoId) -> Result<Vec<String>>;
    // Fail-open: a store error reads as "not delivered".
    fn has_been_delivered(&self, destination: DestinationId, id: VideoId) -> bool;
    fn mark_delivered(&self, destination: DestinationId, id: VideoId) -> Result<()>;
    fn pick_random_undelivered(&self, destination: DestinationId) -> Result<Video>;
    fn list_all(&self) -> Result<Vec<Video>>;
    fn delete(&self, id: VideoId) -> Result<bool>;
    fn exists(&self, id: VideoId) -> Result<bool>;
    fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>>;
}
