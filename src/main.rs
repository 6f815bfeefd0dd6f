use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;

use reel::access::AccessPolicy;
use reel::config::{AppPaths, DbLocation, StoreConfig};
use reel::dispatch::{DeliveryOutcome, Dispatcher, MessagingGateway, Sender};
use reel::errors::{ReelError, Result};
use reel::storage::VideoStorage;
use reel::storage::migrate::Migrator;
use reel::storage::models::{DestinationId, NewVideo, Video};

#[derive(Parser)]
#[command(name = "reel", version, about = "Tagged video catalogue with per-chat delivery tracking")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// User id the command is issued as
    #[arg(long, global = true, env = "REEL_USER", default_value = "0")]
    user: i64,

    /// Chat id the command is issued from
    #[arg(long, global = true, env = "REEL_CHAT", default_value = "0")]
    chat: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the schema up to date and exit
    Migrate,

    /// Store a new video reference
    Ingest {
        /// Opaque reference understood by the transport
        file_ref: String,

        #[arg(short, long)]
        caption: Option<String>,
    },

    /// Attach tags to a video
    Tag {
        id: i64,

        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Show a video
    Get { id: i64 },

    /// Videos carrying a tag
    ByTag { tag: String },

    /// Deliver a random video the destination has not seen yet
    Next {
        #[arg(long)]
        to: DestinationId,
    },

    /// Deliver a specific video unless the destination already has it
    Send {
        id: i64,

        #[arg(long)]
        to: DestinationId,
    },

    /// Check whether a video was delivered to a destination
    Sent { destination: DestinationId, id: i64 },

    /// List every video, newest first
    List,

    /// Delete a video together with its tags and delivery records
    Delete { id: i64 },

    /// Most used tags
    Tags {
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

/// Prints what would be handed to a chat transport.
struct StdoutGateway {
    json: bool,
}

impl MessagingGateway for StdoutGateway {
    fn send_video(&self, destination: DestinationId, video: &Video) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::json!({ "destination": destination, "video": video })
            );
        } else {
            println!("-> {} {}", destination, video.file_ref);
        }
        Ok(())
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<StoreConfig> {
    let paths = AppPaths::new()?;
    let config = StoreConfig::from_env(paths.db_path)?;
    if let DbLocation::File(path) = &config.location {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let json = cli.json;

    if let Commands::Migrate = cli.command {
        let pool = reel::storage::connect(&config)?;
        let mut conn = pool.get()?;
        let report = Migrator::new()
            .unit_timeout(config.migration_timeout)
            .run(&mut conn)?;
        let message = if report.is_noop() {
            "Schema is up to date.".to_string()
        } else {
            format!("Applied {}.", report.applied.join(", "))
        };
        return print_status(json, true, message, None);
    }

    let storage = reel::storage::open(&config)?;
    let policy = AccessPolicy::from_env();
    let gateway = StdoutGateway { json };
    let dispatcher = Dispatcher::new(&storage, &gateway, &policy);
    let sender = Sender {
        user: cli.user,
        chat: cli.chat,
    };

    match cli.command {
        Commands::Migrate => Ok(()),
        Commands::Ingest { file_ref, caption } => {
            let mut video = NewVideo::new(file_ref);
            if let Some(caption) = caption {
                video = video.with_caption(caption);
            }
            match dispatcher.ingest(sender, video) {
                Ok(id) => print_status(
                    json,
                    true,
                    format!("Saved video #{}. Tag it with: reel tag {} <tags..>", id, id),
                    Some(id),
                ),
                Err(ReelError::DuplicateContent(_)) => {
                    print_status(json, false, "This video is already stored.".to_string(), None)
                }
                Err(e) => Err(e),
            }
        }
        Commands::Tag { id, tags } => {
            let refs: Vec<&str> = tags.iter().map(String::as_str).collect();
            let attached = dispatcher.attach_tags(id, &refs)?;
            print_status(
                json,
                true,
                format!("Tagged video #{} with: {}", id, attached.join(", ")),
                Some(id),
            )
        }
        Commands::Get { id } => {
            let video = storage.get_by_id(id)?;
            if json {
                print_json(&video);
            } else {
                print_video_detail(&video);
            }
            Ok(())
        }
        Commands::ByTag { tag } => {
            let videos = dispatcher.by_tag(&tag)?;
            print_videos(json, &videos, &format!("No videos tagged \"{}\".", tag));
            Ok(())
        }
        Commands::Next { to } => match dispatcher.deliver_next(to) {
            Ok(_) => Ok(()),
            Err(ReelError::NoContentAvailable(_)) => print_status(
                json,
                false,
                format!("Destination {} has already seen every video.", to),
                None,
            ),
            Err(e) => Err(e),
        },
        Commands::Send { id, to } => match dispatcher.deliver_by_id(to, id)? {
            DeliveryOutcome::Sent(_) => Ok(()),
            DeliveryOutcome::AlreadyDelivered(_) => print_status(
                json,
                false,
                format!("Video #{} was already delivered to {}.", id, to),
                Some(id),
            ),
        },
        Commands::Sent { destination, id } => {
            let sent = storage.has_been_delivered(destination, id);
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "destination": destination, "id": id, "delivered": sent })
                );
            } else if sent {
                println!("Video #{} was delivered to {}.", id, destination);
            } else {
                println!("Video #{} has not been delivered to {}.", id, destination);
            }
            Ok(())
        }
        Commands::List => {
            let videos = dispatcher.catalogue(sender)?;
            print_videos(json, &videos, "No videos stored.");
            Ok(())
        }
        Commands::Delete { id } => {
            let removed = dispatcher.remove(sender, id)?;
            let message = if removed {
                format!("Deleted video #{}.", id)
            } else {
                format!("Video #{} not found.", id)
            };
            print_status(json, removed, message, Some(id))
        }
        Commands::Tags { limit } => {
            let tags = storage.popular_tags(limit)?;
            if json {
                print_json(&tags);
            } else if tags.is_empty() {
                println!("No tags yet.");
            } else {
                for tag in &tags {
                    println!("{:>5}  #{}", tag.videos, tag.name);
                }
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: {}", e),
    }
}

fn print_status(json: bool, success: bool, message: String, id: Option<i64>) -> Result<()> {
    if json {
        print_json(&StatusResponse {
            success,
            message,
            id,
        });
    } else {
        println!("{}", message);
    }
    Ok(())
}

fn print_videos(json: bool, videos: &[Video], empty: &str) {
    if json {
        print_json(&videos);
        return;
    }
    if videos.is_empty() {
        println!("{}", empty);
        return;
    }
    for video in videos {
        print_video_row(video);
    }
}

fn print_video_row(video: &Video) {
    let caption = video.caption.as_deref().unwrap_or("");
    let caption = if caption.chars().count() > 50 {
        format!("{}...", caption.chars().take(47).collect::<String>())
    } else {
        caption.replace('\n', " ")
    };
    let tags = if video.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", video.tags.join(", "))
    };
    println!(
        "{:>4}  {}  {}{}",
        video.id,
        video.created_at.format("%Y-%m-%d %H:%M"),
        caption,
        tags
    );
}

fn print_video_detail(video: &Video) {
    println!("ID:      {}", video.id);
    println!("Ref:     {}", video.file_ref);
    println!("Created: {}", video.created_at.format("%Y-%m-%d %H:%M:%S"));
    if !video.tags.is_empty() {
        println!("Tags:    {}", video.tags.join(", "));
    }
    if let Some(caption) = &video.caption {
        println!("─────────────────────────");
        println!("{}", caption);
    }
}
